//! Error types for the voltage compiler.
//!
//! Every diagnostic carries the source range it refers to so the editor can
//! draw an inline marker. Errors produced for synthesized values use
//! [`SourceRange::UNDEFINED`].

use std::fmt;

use thiserror::Error;

use super::ast::ValueKind;
use super::token::{SourcePos, SourceRange};

/// An error that occurred while compiling one unit of code.
#[derive(Debug, Clone, PartialEq)]
pub struct CompileError {
    pub kind: ErrorKind,
    pub range: SourceRange,
}

/// The number of arguments a builtin accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arity {
    pub min: usize,
    /// `None` for variadic builtins.
    pub max: Option<usize>,
}

impl Arity {
    pub fn exactly(n: usize) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.map_or(true, |max| count <= max)
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{}", self.min),
            Some(max) => write!(f, "{} to {}", self.min, max),
            None => write!(f, "at least {}", self.min),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ErrorKind {
    #[error("no token matches '{found}'")]
    Lex { found: char },

    #[error("expected {}, found {found}", expected.join(" or "))]
    Parse { expected: Vec<String>, found: String },

    #[error("argument {} of '{function}' must be {expected}, found {found}", index + 1)]
    Type {
        function: String,
        index: usize,
        expected: ValueKind,
        found: ValueKind,
    },

    #[error("argument {} of '{function}' must be a constant", index + 1)]
    NotConstant { function: String, index: usize },

    #[error(
        "argument {} of '{function}' must be between {min} and {max}, found {value}",
        index + 1
    )]
    OutOfRange {
        function: String,
        index: usize,
        value: f32,
        min: f32,
        max: f32,
    },

    #[error("control '{name}' is used as both {first} and {second}")]
    ControlKind {
        name: String,
        first: ValueKind,
        second: ValueKind,
    },

    #[error("cannot assign a {found} value to {target}")]
    InvalidTarget { target: String, found: ValueKind },

    #[error("'{function}' expects {expected} argument(s), found {actual}")]
    Arity {
        function: String,
        expected: Arity,
        actual: usize,
    },

    #[error("undefined function '{name}'")]
    UndefinedFunction { name: String },

    #[error("undefined variable '{name}'")]
    UndefinedVariable { name: String },

    #[error("link failed: {message}")]
    Link { message: String },
}

impl ErrorKind {
    /// Short category name as shown to users.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorKind::Lex { .. } => "LexError",
            ErrorKind::Parse { .. } => "ParseError",
            ErrorKind::Type { .. }
            | ErrorKind::NotConstant { .. }
            | ErrorKind::OutOfRange { .. }
            | ErrorKind::ControlKind { .. }
            | ErrorKind::InvalidTarget { .. } => "TypeError",
            ErrorKind::Arity { .. } => "ArityError",
            ErrorKind::UndefinedFunction { .. } => "UndefinedFunctionError",
            ErrorKind::UndefinedVariable { .. } => "UndefinedVariableError",
            ErrorKind::Link { .. } => "LinkError",
        }
    }
}

impl CompileError {
    pub fn new(kind: ErrorKind, range: SourceRange) -> Self {
        Self { kind, range }
    }

    pub fn lex(found: char, pos: SourcePos) -> Self {
        let mut end = pos;
        end.column += 1;
        Self::new(ErrorKind::Lex { found }, SourceRange::new(pos, end))
    }

    pub fn parse(expected: Vec<String>, found: impl Into<String>, range: SourceRange) -> Self {
        Self::new(
            ErrorKind::Parse {
                expected,
                found: found.into(),
            },
            range,
        )
    }

    pub fn arity(function: &str, expected: Arity, actual: usize, range: SourceRange) -> Self {
        Self::new(
            ErrorKind::Arity {
                function: function.to_string(),
                expected,
                actual,
            },
            range,
        )
    }

    pub fn mismatch(
        function: &str,
        index: usize,
        expected: ValueKind,
        found: ValueKind,
        range: SourceRange,
    ) -> Self {
        Self::new(
            ErrorKind::Type {
                function: function.to_string(),
                index,
                expected,
                found,
            },
            range,
        )
    }

    pub fn undefined_function(name: &str, range: SourceRange) -> Self {
        Self::new(
            ErrorKind::UndefinedFunction {
                name: name.to_string(),
            },
            range,
        )
    }

    pub fn link(message: impl Into<String>) -> Self {
        Self::new(
            ErrorKind::Link {
                message: message.into(),
            },
            SourceRange::UNDEFINED,
        )
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {}",
            self.range.start,
            self.kind.category(),
            self.kind
        )
    }
}

impl std::error::Error for CompileError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_display() {
        assert_eq!(Arity::exactly(2).to_string(), "2");
        assert_eq!(
            Arity {
                min: 1,
                max: Some(3)
            }
            .to_string(),
            "1 to 3"
        );
        assert_eq!(Arity { min: 2, max: None }.to_string(), "at least 2");
    }

    #[test]
    fn arity_accepts() {
        let variadic = Arity { min: 2, max: None };
        assert!(!variadic.accepts(1));
        assert!(variadic.accepts(7));
        assert!(!Arity::exactly(2).accepts(3));
    }

    #[test]
    fn display_includes_position_and_category() {
        let err = CompileError::undefined_function(
            "bogus",
            SourceRange::new(SourcePos::new(2, 9), SourcePos::new(2, 14)),
        );
        assert_eq!(
            err.to_string(),
            "[2:9] UndefinedFunctionError: undefined function 'bogus'"
        );
    }

    #[test]
    fn arity_message_names_function() {
        let err = CompileError::arity("pow", Arity::exactly(2), 3, SourceRange::UNDEFINED);
        assert_eq!(err.message(), "'pow' expects 2 argument(s), found 3");
        assert_eq!(err.kind.category(), "ArityError");
    }

    #[test]
    fn parse_message_lists_expected() {
        let err = CompileError::parse(
            vec!["')'".to_string(), "','".to_string()],
            "end of input",
            SourceRange::UNDEFINED,
        );
        assert_eq!(err.message(), "expected ')' or ',', found end of input");
    }
}
