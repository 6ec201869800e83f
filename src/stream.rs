//! Character-stream reader (spec §4.1), the collaborator the lexer
//! drives. Grounded on `examples/original_source/file.c`: CRLF/CR
//! normalization, backslash-newline splicing, and a small push-back
//! buffer, plus a stack of active files for `#include` and a
//! stash/unstash pair used to lex a single string in isolation (used
//! by `_Pragma` destringizing and by stringified-number re-lexing).

use crate::errors::SourcePos;

struct FileState {
    name: String,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    column: u32,
    pushback: Vec<(char, u32, u32)>,
}

impl FileState {
    fn new(name: impl Into<String>, source: &str) -> Self {
        let normalized = normalize(source);
        FileState {
            name: name.into(),
            chars: normalized.chars().collect(),
            pos: 0,
            line: 1,
            column: 1,
            pushback: Vec::new(),
        }
    }
}

/// Canonicalizes CRLF and lone CR to LF, splices `\` immediately
/// followed by a newline into nothing, and guarantees the text ends
/// with a single trailing LF (synthesizing one if absent).
fn normalize(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                out.push('\n');
            }
            '\\' => {
                // Backslash-newline splice; also accept `\<CR><LF>`.
                let mut lookahead = chars.clone();
                match lookahead.next() {
                    Some('\n') => {
                        chars.next();
                    }
                    Some('\r') => {
                        chars.next();
                        if chars.peek() == Some(&'\n') {
                            chars.next();
                        }
                    }
                    _ => out.push('\\'),
                }
            }
            other => out.push(other),
        }
    }
    if !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

pub struct Stream {
    files: Vec<FileState>,
    stash: Vec<FileState>,
}

impl Stream {
    pub fn new() -> Self {
        Stream { files: Vec::new(), stash: Vec::new() }
    }

    pub fn push_source(&mut self, name: impl Into<String>, source: &str) {
        self.files.push(FileState::new(name, source));
    }

    pub fn pop_source(&mut self) {
        self.files.pop();
    }

    pub fn depth(&self) -> usize {
        self.files.len()
    }

    pub fn current_file_name(&self) -> &str {
        self.files.last().map(|f| f.name.as_str()).unwrap_or("<unknown>")
    }

    pub fn pos(&self) -> SourcePos {
        match self.files.last() {
            Some(f) => SourcePos::new(f.name.clone(), f.line, f.column),
            None => SourcePos::new("<none>", 0, 0),
        }
    }

    /// Stashes the current top file and begins lexing `source` in
    /// isolation; paired with [`Stream::unstash`].
    pub fn stash(&mut self, name: impl Into<String>, source: &str) {
        if let Some(top) = self.files.pop() {
            self.stash.push(top);
        }
        self.files.push(FileState::new(name, source));
    }

    pub fn unstash(&mut self) {
        self.files.pop();
        if let Some(prev) = self.stash.pop() {
            self.files.push(prev);
        }
    }

    pub fn read_char(&mut self) -> Option<char> {
        let f = self.files.last_mut()?;
        if let Some((c, line, column)) = f.pushback.pop() {
            f.line = line;
            f.column = column;
            return Some(c);
        }
        if f.pos >= f.chars.len() {
            return None;
        }
        let c = f.chars[f.pos];
        f.pos += 1;
        if c == '\n' {
            f.line += 1;
            f.column = 1;
        } else {
            f.column += 1;
        }
        Some(c)
    }

    pub fn unread_char(&mut self, c: char) {
        if let Some(f) = self.files.last_mut() {
            f.pushback.push((c, f.line, f.column));
            if c == '\n' {
                f.line -= 1;
            } else if f.column > 1 {
                f.column -= 1;
            }
        }
    }

    pub fn peek_char(&mut self) -> Option<char> {
        let c = self.read_char()?;
        self.unread_char(c);
        Some(c)
    }
}

impl Default for Stream {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_normalizes_to_lf() {
        let mut s = Stream::new();
        s.push_source("t", "a\r\nb\rc\n");
        let mut out = String::new();
        while let Some(c) = s.read_char() {
            out.push(c);
        }
        assert_eq!(out, "a\nb\nc\n");
    }

    #[test]
    fn backslash_newline_splices() {
        let mut s = Stream::new();
        s.push_source("t", "ab\\\ncd\n");
        let mut out = String::new();
        while let Some(c) = s.read_char() {
            out.push(c);
        }
        assert_eq!(out, "abcd\n");
    }

    #[test]
    fn missing_trailing_newline_is_synthesized() {
        let mut s = Stream::new();
        s.push_source("t", "x");
        let mut out = String::new();
        while let Some(c) = s.read_char() {
            out.push(c);
        }
        assert_eq!(out, "x\n");
    }

    #[test]
    fn unread_restores_character_and_position() {
        let mut s = Stream::new();
        s.push_source("t", "ab\n");
        let a = s.read_char().unwrap();
        assert_eq!(a, 'a');
        s.unread_char(a);
        assert_eq!(s.read_char(), Some('a'));
        assert_eq!(s.read_char(), Some('b'));
    }
}
