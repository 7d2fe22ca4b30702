//! Lexer for the voltage node language.
//!
//! [`TokenStream`] produces tokens lazily from an ordered table of anchored
//! patterns. The first pattern that matches at the current position wins, so
//! keywords are listed before identifiers and two-character operators before
//! their one-character prefixes.

use std::sync::LazyLock;

use regex::Regex;

use super::error::CompileError;
use super::token::{SourcePos, Token, TokenKind};

struct Rule {
    pattern: Regex,
    kind: TokenKind,
}

fn rule(pattern: &str, kind: TokenKind) -> Rule {
    let pattern = Regex::new(&format!("^(?:{pattern})")).expect("lexer pattern is valid");
    Rule { pattern, kind }
}

static TRIVIA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:\s+|#[^\n]*|//[^\n]*)+").expect("trivia pattern is valid")
});

static RULES: LazyLock<Vec<Rule>> = LazyLock::new(|| {
    vec![
        rule(r"(\d+\.?\d*|\.\d+)([eE][+-]?\d+)?", TokenKind::Number),
        rule(r"if\b", TokenKind::If),
        rule(r"else\b", TokenKind::Else),
        rule(r"num\b", TokenKind::Num),
        rule(r"midi\b", TokenKind::Midi),
        rule(r"[A-Za-z_][A-Za-z0-9_]*", TokenKind::Identifier),
        rule(r"\+=", TokenKind::PlusAssign),
        rule(r"-=", TokenKind::MinusAssign),
        rule(r"\*=", TokenKind::StarAssign),
        rule(r"/=", TokenKind::SlashAssign),
        rule(r"%=", TokenKind::PercentAssign),
        rule(r"==", TokenKind::EqEq),
        rule(r"!=", TokenKind::NotEq),
        rule(r"<=", TokenKind::LtEq),
        rule(r">=", TokenKind::GtEq),
        rule(r"&&", TokenKind::AndAnd),
        rule(r"\|\|", TokenKind::OrOr),
        rule(r"\+", TokenKind::Plus),
        rule(r"-", TokenKind::Minus),
        rule(r"\*", TokenKind::Star),
        rule(r"/", TokenKind::Slash),
        rule(r"%", TokenKind::Percent),
        rule(r"\^", TokenKind::Caret),
        rule(r"!", TokenKind::Bang),
        rule(r"=", TokenKind::Assign),
        rule(r"<", TokenKind::Lt),
        rule(r">", TokenKind::Gt),
        rule(r"\(", TokenKind::LParen),
        rule(r"\)", TokenKind::RParen),
        rule(r"\{", TokenKind::LBrace),
        rule(r"\}", TokenKind::RBrace),
        rule(r"\[", TokenKind::LBracket),
        rule(r"\]", TokenKind::RBracket),
        rule(r",", TokenKind::Comma),
        rule(r":", TokenKind::Colon),
        rule(r";", TokenKind::Semicolon),
    ]
});

/// A restartable stream of tokens with one token of look-ahead.
pub struct TokenStream<'a> {
    source: &'a str,
    offset: usize,
    pos: SourcePos,
    peeked: Option<Token>,
}

impl<'a> TokenStream<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            offset: 0,
            pos: SourcePos::new(1, 1),
            peeked: None,
        }
    }

    /// Consume and return the next token.
    ///
    /// Once the source is exhausted every call returns an `Eof` token.
    pub fn next(&mut self) -> Result<Token, CompileError> {
        match self.peeked.take() {
            Some(token) => Ok(token),
            None => self.scan(),
        }
    }

    /// Return the next token without consuming it.
    pub fn peek(&mut self) -> Result<&Token, CompileError> {
        let token = match self.peeked.take() {
            Some(token) => token,
            None => self.scan()?,
        };
        Ok(self.peeked.insert(token))
    }

    /// Rewind to the beginning of the source.
    pub fn restart(&mut self) {
        self.offset = 0;
        self.pos = SourcePos::new(1, 1);
        self.peeked = None;
    }

    /// Lex the whole source, including the trailing `Eof`.
    pub fn collect_all(&mut self) -> Result<Vec<Token>, CompileError> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn scan(&mut self) -> Result<Token, CompileError> {
        let newline_before = self.skip_trivia();
        let rest = &self.source[self.offset..];

        if rest.is_empty() {
            return Ok(Token {
                kind: TokenKind::Eof,
                text: String::new(),
                pos: self.pos,
                newline_before,
            });
        }

        for rule in RULES.iter() {
            if let Some(m) = rule.pattern.find(rest) {
                let text = m.as_str();
                let token = Token {
                    kind: rule.kind,
                    text: text.to_string(),
                    pos: self.pos,
                    newline_before,
                };
                self.advance(text.len());
                return Ok(token);
            }
        }

        let found = rest.chars().next().unwrap_or('\0');
        Err(CompileError::lex(found, self.pos))
    }

    /// Skip whitespace and comments, returning whether a line break was seen.
    fn skip_trivia(&mut self) -> bool {
        let rest = &self.source[self.offset..];
        let Some(m) = TRIVIA.find(rest) else {
            return false;
        };
        let saw_newline = m.as_str().contains('\n');
        self.advance(m.end());
        saw_newline
    }

    fn advance(&mut self, bytes: usize) {
        let text = &self.source[self.offset..self.offset + bytes];
        for ch in text.chars() {
            if ch == '\n' {
                self.pos.line += 1;
                self.pos.column = 1;
            } else {
                self.pos.column += 1;
            }
        }
        self.offset += bytes;
    }
}
