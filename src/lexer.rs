//! Lexer: characters -> preprocessing tokens (spec §4.2).
//!
//! Grounded on `examples/original_source/lex.c`: comment skipping,
//! maximal-munch numeric literals, `L`/`u`/`U`/`u8` string/char
//! prefixes with the standard escape set, digraphs, and greedy
//! multi-character punctuators.

use crate::errors::{CompileError, CResult, SourcePos};
use crate::stream::Stream;
use crate::token::{Keyword, StrEncoding, Token, TokenKind, PUNCTUATORS};

pub struct Lexer {
    stream: Stream,
    seq: u32,
    at_bol: bool,
}

impl Lexer {
    pub fn new(stream: Stream) -> Self {
        Lexer { stream, seq: 0, at_bol: true }
    }

    pub fn stream_mut(&mut self) -> &mut Stream {
        &mut self.stream
    }

    fn pos(&self) -> SourcePos {
        self.stream.pos()
    }

    fn next_seq(&mut self) -> u32 {
        let s = self.seq;
        self.seq += 1;
        s
    }

    fn mk(&mut self, kind: TokenKind, pos: SourcePos, leading_space: bool) -> Token {
        let bol = self.at_bol;
        self.at_bol = false;
        Token::new(kind, pos, leading_space, bol, self.next_seq())
    }

    /// Produces the next preprocessing token, or `None` at end of the
    /// active file (the preprocessor pops the file stack and keeps
    /// going, or emits `Eof` once no file remains).
    pub fn next(&mut self) -> CResult<Token> {
        let mut leading_space = false;
        loop {
            let Some(c) = self.stream.read_char() else {
                return Ok(self.mk(TokenKind::Eof, self.pos(), leading_space));
            };
            match c {
                ' ' | '\t' | '\x0b' | '\x0c' => {
                    leading_space = true;
                    continue;
                }
                '\n' => {
                    let pos = self.pos();
                    let tok = self.mk(TokenKind::Newline, pos, leading_space);
                    self.at_bol = true;
                    return Ok(tok);
                }
                '/' => {
                    match self.stream.peek_char() {
                        Some('/') => {
                            self.skip_line_comment();
                            leading_space = true;
                            continue;
                        }
                        Some('*') => {
                            self.skip_block_comment()?;
                            leading_space = true;
                            continue;
                        }
                        _ => return self.read_punct('/', leading_space),
                    }
                }
                '"' => return self.read_str_literal(StrEncoding::Narrow, leading_space),
                '\'' => return self.read_char_literal(StrEncoding::Narrow, leading_space),
                c @ ('L' | 'U') if matches!(self.stream.peek_char(), Some('"') | Some('\'')) => {
                    let encoding = if c == 'L' { StrEncoding::Wchar } else { StrEncoding::Utf32 };
                    return self.read_prefixed_literal(encoding, leading_space);
                }
                'u' if matches!(self.stream.peek_char(), Some('"') | Some('\'')) => {
                    return self.read_prefixed_literal(StrEncoding::Utf16, leading_space);
                }
                'u' if self.stream.peek_char() == Some('8') => {
                    let eight = self.stream.read_char().unwrap();
                    if self.stream.peek_char() == Some('"') {
                        return self.read_prefixed_literal(StrEncoding::Utf8, leading_space);
                    }
                    self.stream.unread_char(eight);
                    return self.read_ident('u', leading_space);
                }
                c if is_ident_start(c) => return self.read_ident(c, leading_space),
                c if c.is_ascii_digit() => return self.read_number(c, leading_space),
                '.' if self.stream.peek_char().map(|c| c.is_ascii_digit()).unwrap_or(false) => {
                    return self.read_number('.', leading_space);
                }
                c => return self.read_punct(c, leading_space),
            }
        }
    }

    fn skip_line_comment(&mut self) {
        self.stream.read_char(); // consume the second '/'
        while let Some(c) = self.stream.read_char() {
            if c == '\n' {
                self.stream.unread_char(c);
                break;
            }
        }
    }

    fn skip_block_comment(&mut self) -> CResult<()> {
        self.stream.read_char(); // consume '*'
        loop {
            match self.stream.read_char() {
                None => {
                    return Err(CompileError::lexical(self.pos(), "unterminated comment"));
                }
                Some('*') => {
                    if self.stream.peek_char() == Some('/') {
                        self.stream.read_char();
                        return Ok(());
                    }
                }
                Some(_) => {}
            }
        }
    }

    fn read_ident(&mut self, first: char, leading_space: bool) -> CResult<Token> {
        let pos = self.pos();
        let mut s = String::new();
        s.push(first);
        loop {
            match self.stream.peek_char() {
                Some(c) if is_ident_continue(c) => {
                    s.push(c);
                    self.stream.read_char();
                }
                Some('\\') => {
                    // \u or \U universal-character-name escapes are legal
                    // inside identifiers (spec §4.2).
                    let save = self.stream.read_char();
                    match self.stream.peek_char() {
                        Some('u') | Some('U') => {
                            let kind = self.stream.read_char().unwrap();
                            let digits = if kind == 'u' { 4 } else { 8 };
                            let mut code = 0u32;
                            for _ in 0..digits {
                                match self.stream.read_char().and_then(|c| c.to_digit(16)) {
                                    Some(d) => code = code * 16 + d,
                                    None => return Err(CompileError::lexical(self.pos(), "invalid universal character name")),
                                }
                            }
                            if let Some(ch) = char::from_u32(code) {
                                s.push(ch);
                            }
                        }
                        _ => {
                            if let Some(c) = save {
                                self.stream.unread_char(c);
                            }
                            break;
                        }
                    }
                }
                _ => break,
            }
        }
        let kind = match Keyword::lookup(&s) {
            Some(kw) => TokenKind::Keyword(kw),
            None => TokenKind::Ident(s),
        };
        Ok(self.mk(kind, pos, leading_space))
    }

    fn read_number(&mut self, first: char, leading_space: bool) -> CResult<Token> {
        let pos = self.pos();
        let mut s = String::new();
        s.push(first);
        loop {
            match self.stream.peek_char() {
                Some(c) if matches!(c, 'e' | 'E' | 'p' | 'P') => {
                    s.push(c);
                    self.stream.read_char();
                    if matches!(self.stream.peek_char(), Some('+') | Some('-')) {
                        s.push(self.stream.read_char().unwrap());
                    }
                }
                Some(c) if c.is_ascii_alphanumeric() || c == '.' || c == '_' => {
                    s.push(c);
                    self.stream.read_char();
                }
                _ => break,
            }
        }
        Ok(self.mk(TokenKind::Number(s), pos, leading_space))
    }

    /// Consumes the quote that follows an `L`/`u`/`U`/`u8` prefix
    /// already confirmed by lookahead, then reads the literal body.
    fn read_prefixed_literal(&mut self, encoding: StrEncoding, leading_space: bool) -> CResult<Token> {
        match self.stream.read_char() {
            Some('"') => self.read_str_literal(encoding, leading_space),
            Some('\'') => self.read_char_literal(encoding, leading_space),
            _ => unreachable!("caller already confirmed a quote follows"),
        }
    }

    fn read_str_literal(&mut self, encoding: StrEncoding, leading_space: bool) -> CResult<Token> {
        let pos = self.pos();
        let mut bytes = Vec::new();
        loop {
            match self.stream.read_char() {
                None => return Err(CompileError::lexical(self.pos(), "unterminated string literal")),
                Some('"') => break,
                Some('\n') => return Err(CompileError::lexical(self.pos(), "unterminated string literal")),
                Some('\\') => self.read_escape_into(&mut bytes)?,
                Some(c) => push_utf8(&mut bytes, c),
            }
        }
        Ok(self.mk(TokenKind::Str { bytes, encoding }, pos, leading_space))
    }

    fn read_char_literal(&mut self, encoding: StrEncoding, leading_space: bool) -> CResult<Token> {
        let pos = self.pos();
        let value = match self.stream.read_char() {
            None => return Err(CompileError::lexical(self.pos(), "unterminated character literal")),
            Some('\\') => self.read_escape_value()?,
            Some(c) => c as u32,
        };
        match self.stream.read_char() {
            Some('\'') => {}
            _ => return Err(CompileError::lexical(self.pos(), "unterminated character literal")),
        }
        Ok(self.mk(TokenKind::Char { value, encoding }, pos, leading_space))
    }

    fn read_escape_value(&mut self) -> CResult<u32> {
        let mut tmp = Vec::new();
        self.read_escape_into(&mut tmp)?;
        if tmp.is_empty() {
            return Ok(0);
        }
        // \u/\U escapes land here as valid UTF-8; \x/\o are raw byte
        // values and need not be (e.g. '\xff').
        match std::str::from_utf8(&tmp) {
            Ok(s) => Ok(s.chars().next().map(|c| c as u32).unwrap_or(0)),
            Err(_) => Ok(tmp[0] as u32),
        }
    }

    fn read_escape_into(&mut self, out: &mut Vec<u8>) -> CResult<()> {
        let c = self
            .stream
            .read_char()
            .ok_or_else(|| CompileError::lexical(self.pos(), "unterminated escape sequence"))?;
        match c {
            'a' => out.push(0x07),
            'b' => out.push(0x08),
            'f' => out.push(0x0c),
            'n' => out.push(b'\n'),
            'r' => out.push(b'\r'),
            't' => out.push(b'\t'),
            'v' => out.push(0x0b),
            'e' => out.push(0x1b),
            '"' => out.push(b'"'),
            '\'' => out.push(b'\''),
            '?' => out.push(b'?'),
            '\\' => out.push(b'\\'),
            'x' => {
                let mut v: u32 = 0;
                let mut any = false;
                while let Some(d) = self.stream.peek_char().and_then(|c| c.to_digit(16)) {
                    v = v * 16 + d;
                    self.stream.read_char();
                    any = true;
                }
                if !any {
                    return Err(CompileError::lexical(self.pos(), "\\x used with no following hex digits"));
                }
                out.push((v & 0xff) as u8);
            }
            'u' | 'U' => {
                let digits = if c == 'u' { 4 } else { 8 };
                let mut code = 0u32;
                for _ in 0..digits {
                    match self.stream.read_char().and_then(|c| c.to_digit(16)) {
                        Some(d) => code = code * 16 + d,
                        None => return Err(CompileError::lexical(self.pos(), "invalid universal character name")),
                    }
                }
                if let Some(ch) = char::from_u32(code) {
                    push_utf8(out, ch);
                }
            }
            '0'..='7' => {
                let mut v = c.to_digit(8).unwrap();
                for _ in 0..2 {
                    match self.stream.peek_char().and_then(|c| c.to_digit(8)) {
                        Some(d) => {
                            v = v * 8 + d;
                            self.stream.read_char();
                        }
                        None => break,
                    }
                }
                out.push((v & 0xff) as u8);
            }
            other => {
                // Unknown escape: 8cc passes the character through unchanged.
                push_utf8(out, other);
            }
        }
        Ok(())
    }

    fn read_punct(&mut self, first: char, leading_space: bool) -> CResult<Token> {
        let pos = self.pos();
        // Digraphs (spec §4.2): mapped to their punctuation equivalents.
        if let Some(mapped) = self.try_digraph(first) {
            return Ok(self.mk(TokenKind::Punct(mapped), pos, leading_space));
        }
        let mut candidate = String::new();
        candidate.push(first);
        let mut lookahead = Vec::new();
        // Greedily extend up to the longest punctuator spelling (3 chars).
        for _ in 0..2 {
            match self.stream.peek_char() {
                Some(c) => {
                    candidate.push(c);
                    lookahead.push(c);
                    self.stream.read_char();
                }
                None => break,
            }
        }
        for &len in &[3usize, 2, 1] {
            if candidate.len() < len {
                continue;
            }
            let slice = &candidate[..len];
            if let Some(&spelling) = PUNCTUATORS.iter().find(|p| **p == slice) {
                for c in candidate[len..].chars().rev() {
                    self.stream.unread_char(c);
                }
                return Ok(self.mk(TokenKind::Punct(spelling), pos, leading_space));
            }
        }
        for c in lookahead.into_iter().rev() {
            self.stream.unread_char(c);
        }
        Ok(self.mk(TokenKind::Invalid(first as u8), pos, leading_space))
    }

    fn try_digraph(&mut self, first: char) -> Option<&'static str> {
        let second = self.stream.peek_char()?;
        let mapped = match (first, second) {
            ('<', ':') => "[",
            ('<', '%') => "{",
            (':', '>') => "]",
            ('%', '>') => "}",
            ('%', ':') => "#",
            _ => return None,
        };
        self.stream.read_char();
        if mapped == "#" && self.stream.peek_char() == Some(':') {
            // %:%: -> ##
            let save = self.stream.read_char();
            if self.stream.peek_char() == Some('%') {
                self.stream.read_char();
                if self.stream.peek_char() == Some(':') {
                    self.stream.read_char();
                    return Some("##");
                }
                self.stream.unread_char('%');
            }
            if let Some(c) = save {
                self.stream.unread_char(c);
            }
        }
        Some(mapped)
    }

    /// Special lexing mode used only right after `#include`: escape
    /// processing is suppressed and `"..."`/`<...>` simply delimit the
    /// filename (spec §4.2).
    pub fn read_header_name(&mut self, angled: bool) -> CResult<String> {
        let close = if angled { '>' } else { '"' };
        let mut s = String::new();
        loop {
            match self.stream.read_char() {
                None | Some('\n') => {
                    return Err(CompileError::lexical(self.pos(), "missing terminating header-name delimiter"));
                }
                Some(c) if c == close => break,
                Some(c) => s.push(c),
            }
        }
        Ok(s)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_' || c == '$' || (c as u32) >= 0x80
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '$' || (c as u32) >= 0x80
}

fn push_utf8(out: &mut Vec<u8>, c: char) {
    let mut buf = [0u8; 4];
    out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_all(src: &str) -> Vec<Token> {
        let mut stream = Stream::new();
        stream.push_source("t", src);
        let mut lexer = Lexer::new(stream);
        let mut out = Vec::new();
        loop {
            let tok = lexer.next().unwrap();
            let eof = tok.is_eof();
            out.push(tok);
            if eof {
                break;
            }
        }
        out
    }

    #[test]
    fn skips_comments_and_collapses_whitespace() {
        let toks = lex_all("a /* c */  b // line\nc\n");
        let idents: Vec<_> = toks.iter().filter_map(|t| t.ident_name()).collect();
        assert_eq!(idents, vec!["a", "b", "c"]);
        assert!(toks[2].leading_space); // "b" preceded by collapsed whitespace
    }

    #[test]
    fn numeric_literal_is_maximal_munch() {
        let toks = lex_all("1.0e+5f\n");
        match &toks[0].kind {
            TokenKind::Number(s) => assert_eq!(s, "1.0e+5f"),
            other => panic!("expected number, got {other:?}"),
        }
    }

    #[test]
    fn string_escapes_decode() {
        let toks = lex_all("\"a\\nb\"\n");
        match &toks[0].kind {
            TokenKind::Str { bytes, .. } => assert_eq!(bytes, b"a\nb"),
            other => panic!("expected string, got {other:?}"),
        }
    }

    #[test]
    fn digraphs_map_to_punctuators() {
        let toks = lex_all("<: :>\n");
        assert!(toks[0].is_punct("["));
        assert!(toks[1].is_punct("]"));
    }

    #[test]
    fn greedy_multichar_punctuators() {
        let toks = lex_all("<<= ... ##\n");
        assert!(toks[0].is_punct("<<="));
        assert!(toks[1].is_punct("..."));
        assert!(toks[2].is_punct("##"));
    }

    #[test]
    fn string_prefixes_set_encoding_and_dont_eat_plain_idents() {
        let toks = lex_all("u8\"hi\" L'x' u\"y\" user\n");
        match &toks[0].kind {
            TokenKind::Str { encoding, .. } => assert_eq!(*encoding, StrEncoding::Utf8),
            other => panic!("expected string, got {other:?}"),
        }
        match &toks[1].kind {
            TokenKind::Char { encoding, .. } => assert_eq!(*encoding, StrEncoding::Wchar),
            other => panic!("expected char, got {other:?}"),
        }
        match &toks[2].kind {
            TokenKind::Str { encoding, .. } => assert_eq!(*encoding, StrEncoding::Utf16),
            other => panic!("expected string, got {other:?}"),
        }
        assert_eq!(toks[3].ident_name(), Some("user"));
    }

    #[test]
    fn identifier_recognizes_keyword() {
        let toks = lex_all("return x;\n");
        assert!(toks[0].is_keyword(Keyword::Return));
        assert!(toks[1].is_ident());
    }
}
