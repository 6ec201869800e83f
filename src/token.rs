//! The preprocessing-token data model (spec §3, `Token`).
//!
//! Grounded on `examples/original_source/8cc.h`'s `Token` struct: a
//! tagged union with a hide-set and begin-of-line/leading-space flags
//! carried on every token, since the preprocessor needs them before a
//! single character of semantic analysis happens.

use std::collections::BTreeSet;
use std::fmt;
use std::rc::Rc;

use crate::errors::SourcePos;

/// Per spec §9 "Hide-sets": represented as a persistent, structurally
/// shared set of macro names. Cloning a `HideSet` is O(1); union and
/// intersection allocate a new `Rc` rather than mutating a token's set
/// in place, since a single macro body's tokens are shared across many
/// expansions.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct HideSet(Rc<BTreeSet<String>>);

impl HideSet {
    pub fn empty() -> Self {
        HideSet(Rc::new(BTreeSet::new()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn with(&self, name: &str) -> Self {
        if self.0.contains(name) {
            return self.clone();
        }
        let mut next = (*self.0).clone();
        next.insert(name.to_string());
        HideSet(Rc::new(next))
    }

    pub fn union(&self, other: &HideSet) -> Self {
        if Rc::ptr_eq(&self.0, &other.0) {
            return self.clone();
        }
        let mut next = (*self.0).clone();
        next.extend(other.0.iter().cloned());
        HideSet(Rc::new(next))
    }

    pub fn intersection(&self, other: &HideSet) -> Self {
        let next: BTreeSet<String> = self.0.intersection(&other.0).cloned().collect();
        HideSet(Rc::new(next))
    }
}

impl fmt::Debug for HideSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.0.iter().cloned().collect::<Vec<_>>().join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrEncoding {
    Narrow,
    Utf8,
    Utf16,
    Utf32,
    Wchar,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Keyword(Keyword),
    /// Punctuator/operator, identified by its canonical spelling
    /// (`"+="`, `"->"`, `"##"`, ...).
    Punct(&'static str),
    Number(String),
    Char { value: u32, encoding: StrEncoding },
    Str { bytes: Vec<u8>, encoding: StrEncoding },
    Eof,
    Newline,
    Space,
    /// Only ever produced inside a macro body; `position` indexes into
    /// the macro's formal parameter list.
    MacroParam { position: usize, is_vararg: bool },
    Invalid(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Copy, PartialOrd, Ord)]
pub enum Keyword {
    Auto, Break, Case, Char, Const, Continue, Default, Do, Double, Else,
    Enum, Extern, Float, For, Goto, If, Inline, Int, Long, Register,
    Restrict, Return, Short, Signed, Sizeof, Static, Struct, Switch,
    Typedef, Union, Unsigned, Void, Volatile, While,
    Bool, Complex, Imaginary,
    Alignas, Alignof, Atomic, Generic, Noreturn, StaticAssert, ThreadLocal,
}

impl Keyword {
    pub fn spelling(self) -> &'static str {
        use Keyword::*;
        match self {
            Auto => "auto", Break => "break", Case => "case", Char => "char",
            Const => "const", Continue => "continue", Default => "default",
            Do => "do", Double => "double", Else => "else", Enum => "enum",
            Extern => "extern", Float => "float", For => "for", Goto => "goto",
            If => "if", Inline => "inline", Int => "int", Long => "long",
            Register => "register", Restrict => "restrict", Return => "return",
            Short => "short", Signed => "signed", Sizeof => "sizeof",
            Static => "static", Struct => "struct", Switch => "switch",
            Typedef => "typedef", Union => "union", Unsigned => "unsigned",
            Void => "void", Volatile => "volatile", While => "while",
            Bool => "_Bool", Complex => "_Complex", Imaginary => "_Imaginary",
            Alignas => "_Alignas", Alignof => "_Alignof", Atomic => "_Atomic",
            Generic => "_Generic", Noreturn => "_Noreturn",
            StaticAssert => "_Static_assert", ThreadLocal => "_Thread_local",
        }
    }

    pub fn lookup(spelling: &str) -> Option<Keyword> {
        use Keyword::*;
        Some(match spelling {
            "auto" => Auto, "break" => Break, "case" => Case, "char" => Char,
            "const" => Const, "continue" => Continue, "default" => Default,
            "do" => Do, "double" => Double, "else" => Else, "enum" => Enum,
            "extern" => Extern, "float" => Float, "for" => For, "goto" => Goto,
            "if" => If, "inline" => Inline, "int" => Int, "long" => Long,
            "register" => Register, "restrict" => Restrict, "return" => Return,
            "short" => Short, "signed" => Signed, "sizeof" => Sizeof,
            "static" => Static, "struct" => Struct, "switch" => Switch,
            "typedef" => Typedef, "union" => Union, "unsigned" => Unsigned,
            "void" => Void, "volatile" => Volatile, "while" => While,
            "_Bool" => Bool, "_Complex" => Complex, "_Imaginary" => Imaginary,
            "_Alignas" => Alignas, "_Alignof" => Alignof, "_Atomic" => Atomic,
            "_Generic" => Generic, "_Noreturn" => Noreturn,
            "_Static_assert" => StaticAssert, "_Thread_local" => ThreadLocal,
            _ => return None,
        })
    }
}

/// Every multi- and single-character punctuator the lexer recognizes,
/// longest spelling first so greedy matching picks the right one.
pub const PUNCTUATORS: &[&str] = &[
    "...", "<<=", ">>=", "##",
    "->", "++", "--", "<<", ">>", "<=", ">=", "==", "!=", "&&", "||",
    "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=",
    "[", "]", "(", ")", "{", "}", ".", "&", "*", "+", "-", "~", "!",
    "/", "%", "<", ">", "^", "|", "?", ":", ";", "=", ",", "#",
];

#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub pos: SourcePos,
    /// True if at least one space or comment preceded this token on
    /// its line (spec §3: leading-space flag).
    pub leading_space: bool,
    /// True if this is the first token on its logical line.
    pub bol: bool,
    /// Per-file monotonically increasing sequence number.
    pub seq: u32,
    pub hideset: HideSet,
}

impl Token {
    pub fn new(kind: TokenKind, pos: SourcePos, leading_space: bool, bol: bool, seq: u32) -> Self {
        Token { kind, pos, leading_space, bol, seq, hideset: HideSet::empty() }
    }

    pub fn is_eof(&self) -> bool {
        matches!(self.kind, TokenKind::Eof)
    }

    pub fn is_ident(&self) -> bool {
        matches!(self.kind, TokenKind::Ident(_))
    }

    pub fn ident_name(&self) -> Option<&str> {
        match &self.kind {
            TokenKind::Ident(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_punct(&self, s: &str) -> bool {
        matches!(&self.kind, TokenKind::Punct(p) if *p == s)
    }

    pub fn is_keyword(&self, kw: Keyword) -> bool {
        matches!(self.kind, TokenKind::Keyword(k) if k == kw)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TokenKind::Ident(s) => write!(f, "{s}"),
            TokenKind::Keyword(k) => write!(f, "{}", k.spelling()),
            TokenKind::Punct(p) => write!(f, "{p}"),
            TokenKind::Number(s) => write!(f, "{s}"),
            TokenKind::Char { value, .. } => write!(f, "'{}'", char::from_u32(*value).unwrap_or('?')),
            TokenKind::Str { bytes, .. } => write!(f, "\"{}\"", String::from_utf8_lossy(bytes)),
            TokenKind::Eof => write!(f, "<eof>"),
            TokenKind::Newline => write!(f, "\\n"),
            TokenKind::Space => write!(f, " "),
            TokenKind::MacroParam { position, .. } => write!(f, "<param {position}>"),
            TokenKind::Invalid(b) => write!(f, "<invalid 0x{b:02x}>"),
        }
    }
}
