//! The integer-constant-expression evaluator used only by `#if`/`#elif`
//! (spec §4.3: "the resulting tokens are parsed as a
//! conditional-expression by the parser and folded by the constant
//! evaluator"). This is a small, self-contained precedence-climbing
//! evaluator over an already-macro-expanded, `defined`-resolved token
//! list — it does not depend on the declaration-aware parser in
//! `crate::parser`, which breaks what would otherwise be a circular
//! module dependency (the preprocessor feeds the parser, but `#if`
//! needs expression evaluation before any declaration context exists).
//! Grounded on `examples/original_source/constexpr.c`'s `eval_intexpr`.

use crate::errors::{CompileError, SourcePos};
use crate::token::{Token, TokenKind};

struct Cursor<'a> {
    toks: &'a [Token],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Token> {
        self.toks.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Token> {
        let t = self.toks.get(self.pos);
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn eat_punct(&mut self, p: &str) -> bool {
        if self.peek().map(|t| t.is_punct(p)).unwrap_or(false) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn err(&self, message: impl Into<String>) -> CompileError {
        let pos = self
            .peek()
            .map(|t| t.pos.clone())
            .unwrap_or_else(|| SourcePos::new("<if>", 0, 0));
        CompileError::preprocessor(pos, message)
    }
}

/// Evaluates a fully-expanded, `#if`-ready token list (no `Newline`,
/// no remaining bare identifiers) to a 64-bit two's-complement signed
/// value, wrapping on overflow as 8cc does.
pub fn eval(tokens: &[Token]) -> Result<i64, CompileError> {
    let mut c = Cursor { toks: tokens, pos: 0 };
    let v = parse_conditional(&mut c)?;
    if let Some(extra) = c.peek() {
        return Err(c.err(format!("unexpected token in #if expression: {extra}")));
    }
    Ok(v)
}

fn parse_conditional(c: &mut Cursor) -> Result<i64, CompileError> {
    let cond = parse_logical_or(c)?;
    if c.eat_punct("?") {
        let t = parse_conditional(c)?;
        if !c.eat_punct(":") {
            return Err(c.err("expected ':' in conditional expression"));
        }
        let f = parse_conditional(c)?;
        Ok(if cond != 0 { t } else { f })
    } else {
        Ok(cond)
    }
}

macro_rules! left_assoc {
    ($name:ident, $next:ident, { $($punct:literal => $op:expr),+ $(,)? }) => {
        fn $name(c: &mut Cursor) -> Result<i64, CompileError> {
            let mut left = $next(c)?;
            loop {
                $(
                    if c.eat_punct($punct) {
                        let right = $next(c)?;
                        left = $op(left, right);
                        continue;
                    }
                )+
                break;
            }
            Ok(left)
        }
    };
}

left_assoc!(parse_logical_or, parse_logical_and, { "||" => |a: i64, b: i64| ((a != 0) || (b != 0)) as i64 });
left_assoc!(parse_logical_and, parse_bitor, { "&&" => |a: i64, b: i64| ((a != 0) && (b != 0)) as i64 });
left_assoc!(parse_bitor, parse_bitxor, { "|" => |a: i64, b: i64| a | b });
left_assoc!(parse_bitxor, parse_bitand, { "^" => |a: i64, b: i64| a ^ b });
left_assoc!(parse_bitand, parse_equality, { "&" => |a: i64, b: i64| a & b });
left_assoc!(parse_equality, parse_relational, {
    "==" => |a: i64, b: i64| (a == b) as i64,
    "!=" => |a: i64, b: i64| (a != b) as i64,
});
left_assoc!(parse_relational, parse_shift, {
    "<=" => |a: i64, b: i64| (a <= b) as i64,
    ">=" => |a: i64, b: i64| (a >= b) as i64,
    "<" => |a: i64, b: i64| (a < b) as i64,
    ">" => |a: i64, b: i64| (a > b) as i64,
});
left_assoc!(parse_shift, parse_additive, {
    "<<" => |a: i64, b: i64| a.wrapping_shl(b as u32),
    ">>" => |a: i64, b: i64| a.wrapping_shr(b as u32),
});
left_assoc!(parse_additive, parse_multiplicative, {
    "+" => |a: i64, b: i64| a.wrapping_add(b),
    "-" => |a: i64, b: i64| a.wrapping_sub(b),
});

fn parse_multiplicative(c: &mut Cursor) -> Result<i64, CompileError> {
    let mut left = parse_unary(c)?;
    loop {
        if c.eat_punct("*") {
            left = left.wrapping_mul(parse_unary(c)?);
        } else if c.eat_punct("/") {
            let rhs = parse_unary(c)?;
            if rhs == 0 {
                return Err(c.err("division by zero in #if expression"));
            }
            left = left.wrapping_div(rhs);
        } else if c.eat_punct("%") {
            let rhs = parse_unary(c)?;
            if rhs == 0 {
                return Err(c.err("division by zero in #if expression"));
            }
            left = left.wrapping_rem(rhs);
        } else {
            break;
        }
    }
    Ok(left)
}

fn parse_unary(c: &mut Cursor) -> Result<i64, CompileError> {
    if c.eat_punct("-") {
        return Ok(parse_unary(c)?.wrapping_neg());
    }
    if c.eat_punct("+") {
        return parse_unary(c);
    }
    if c.eat_punct("!") {
        return Ok((parse_unary(c)? == 0) as i64);
    }
    if c.eat_punct("~") {
        return Ok(!parse_unary(c)?);
    }
    parse_primary(c)
}

fn parse_primary(c: &mut Cursor) -> Result<i64, CompileError> {
    if c.eat_punct("(") {
        let v = parse_conditional(c)?;
        if !c.eat_punct(")") {
            return Err(c.err("expected ')'"));
        }
        return Ok(v);
    }
    let tok = c.bump().ok_or_else(|| c.err("unexpected end of #if expression"))?;
    match &tok.kind {
        TokenKind::Number(s) => parse_int_literal(s).ok_or_else(|| {
            CompileError::preprocessor(tok.pos.clone(), format!("invalid integer constant '{s}' in #if expression"))
        }),
        TokenKind::Char { value, .. } => Ok(*value as i64),
        other => Err(CompileError::preprocessor(tok.pos.clone(), format!("unexpected token in #if expression: {other:?}"))),
    }
}

/// Parses a C integer-literal spelling (decimal/octal/hex, with any
/// trailing `u`/`U`/`l`/`L` suffix ignored for the purposes of value
/// computation, matching 8cc's `#if` evaluator).
fn parse_int_literal(spelling: &str) -> Option<i64> {
    let s = spelling.trim_end_matches(['u', 'U', 'l', 'L']);
    let (digits, radix) = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        (hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        (&s[1..], 8)
    } else {
        (s, 10)
    };
    if digits.is_empty() {
        return Some(0);
    }
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::stream::Stream;

    fn tokens_for(src: &str) -> Vec<Token> {
        let mut stream = Stream::new();
        stream.push_source("t", src);
        let mut lexer = Lexer::new(stream);
        let mut out = Vec::new();
        loop {
            let t = lexer.next().unwrap();
            if matches!(t.kind, TokenKind::Eof | TokenKind::Newline) {
                break;
            }
            out.push(t);
        }
        out
    }

    #[test]
    fn arithmetic_precedence() {
        assert_eq!(eval(&tokens_for("1+2*3")).unwrap(), 7);
    }

    #[test]
    fn ternary_and_comparison() {
        assert_eq!(eval(&tokens_for("1 < 2 ? 10 : 20")).unwrap(), 10);
    }

    #[test]
    fn hex_and_shift() {
        assert_eq!(eval(&tokens_for("0x10 >> 2")).unwrap(), 4);
    }

    #[test]
    fn division_by_zero_is_an_error() {
        assert!(eval(&tokens_for("1/0")).is_err());
    }
}
