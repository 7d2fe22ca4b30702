//! Token types for the voltage node language.

use std::fmt;

/// A line/column position in source text. Both are 1-based.
///
/// `SourcePos::UNDEFINED` (line 0) marks values synthesized by the compiler
/// that have no place in the user's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SourcePos {
    pub line: u32,
    pub column: u32,
}

impl SourcePos {
    pub const UNDEFINED: SourcePos = SourcePos { line: 0, column: 0 };

    pub fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    pub fn is_undefined(&self) -> bool {
        self.line == 0
    }
}

impl fmt::Display for SourcePos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// A half-open `[start, end)` range of source positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SourceRange {
    pub start: SourcePos,
    pub end: SourcePos,
}

impl SourceRange {
    pub const UNDEFINED: SourceRange = SourceRange {
        start: SourcePos::UNDEFINED,
        end: SourcePos::UNDEFINED,
    };

    pub fn new(start: SourcePos, end: SourcePos) -> Self {
        Self { start, end }
    }

    /// Smallest range covering both `self` and `other`.
    pub fn to(self, other: SourceRange) -> SourceRange {
        SourceRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }

    pub fn is_undefined(&self) -> bool {
        self.start.is_undefined()
    }
}

/// A token produced by the [`TokenStream`](super::lexer::TokenStream).
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    /// The exact source text the token was matched from (empty for `Eof`).
    pub text: String,
    pub pos: SourcePos,
    /// A line break appeared between the previous token and this one.
    pub newline_before: bool,
}

impl Token {
    /// Position just past the last character of the token.
    pub fn end(&self) -> SourcePos {
        let mut end = self.pos;
        for ch in self.text.chars() {
            if ch == '\n' {
                end.line += 1;
                end.column = 1;
            } else {
                end.column += 1;
            }
        }
        end
    }

    pub fn range(&self) -> SourceRange {
        SourceRange::new(self.pos, self.end())
    }
}

/// The kind of token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    // Literals
    Number,
    Identifier,

    // Keywords
    If,
    Else,
    Num,
    Midi,

    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Bang,

    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    PercentAssign,

    // Comparison and logic
    EqEq,
    NotEq,
    Lt,
    Gt,
    LtEq,
    GtEq,
    AndAnd,
    OrOr,

    // Delimiters
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Colon,
    Semicolon,

    // Special
    Eof,
}

impl TokenKind {
    /// Human-readable description used in diagnostics.
    pub fn describe(&self) -> &'static str {
        match self {
            TokenKind::Number => "number",
            TokenKind::Identifier => "identifier",
            TokenKind::If => "'if'",
            TokenKind::Else => "'else'",
            TokenKind::Num => "'num'",
            TokenKind::Midi => "'midi'",
            TokenKind::Plus => "'+'",
            TokenKind::Minus => "'-'",
            TokenKind::Star => "'*'",
            TokenKind::Slash => "'/'",
            TokenKind::Percent => "'%'",
            TokenKind::Caret => "'^'",
            TokenKind::Bang => "'!'",
            TokenKind::Assign => "'='",
            TokenKind::PlusAssign => "'+='",
            TokenKind::MinusAssign => "'-='",
            TokenKind::StarAssign => "'*='",
            TokenKind::SlashAssign => "'/='",
            TokenKind::PercentAssign => "'%='",
            TokenKind::EqEq => "'=='",
            TokenKind::NotEq => "'!='",
            TokenKind::Lt => "'<'",
            TokenKind::Gt => "'>'",
            TokenKind::LtEq => "'<='",
            TokenKind::GtEq => "'>='",
            TokenKind::AndAnd => "'&&'",
            TokenKind::OrOr => "'||'",
            TokenKind::LParen => "'('",
            TokenKind::RParen => "')'",
            TokenKind::LBrace => "'{'",
            TokenKind::RBrace => "'}'",
            TokenKind::LBracket => "'['",
            TokenKind::RBracket => "']'",
            TokenKind::Comma => "','",
            TokenKind::Colon => "':'",
            TokenKind::Semicolon => "';'",
            TokenKind::Eof => "end of input",
        }
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_end_counts_characters() {
        let token = Token {
            kind: TokenKind::Identifier,
            text: "freq".to_string(),
            pos: SourcePos::new(3, 5),
            newline_before: false,
        };
        assert_eq!(token.end(), SourcePos::new(3, 9));
        assert_eq!(token.range().start, SourcePos::new(3, 5));
    }

    #[test]
    fn range_union() {
        let a = SourceRange::new(SourcePos::new(1, 1), SourcePos::new(1, 4));
        let b = SourceRange::new(SourcePos::new(1, 7), SourcePos::new(2, 2));
        let joined = a.to(b);
        assert_eq!(joined.start, SourcePos::new(1, 1));
        assert_eq!(joined.end, SourcePos::new(2, 2));
    }

    #[test]
    fn undefined_sentinels() {
        assert!(SourcePos::UNDEFINED.is_undefined());
        assert!(SourceRange::UNDEFINED.is_undefined());
        assert!(!SourcePos::new(1, 1).is_undefined());
    }
}
