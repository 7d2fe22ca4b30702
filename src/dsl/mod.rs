//! Front end for the voltage node language: source text to tokens to AST.

pub mod ast;
pub mod diff;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::*;
pub use error::{Arity, CompileError, ErrorKind};
pub use token::{SourcePos, SourceRange, Token, TokenKind};

use crate::codegen::{self, UnitCode};
use crate::library::Library;
use lexer::TokenStream;
use parser::Parser;

/// The voltage compiler.
///
/// Runs source text through lexer, parser and code generator. Each call
/// owns its own token stream and tree.
pub struct Compiler;

impl Compiler {
    /// Lex source into tokens, including the trailing `Eof`.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, CompileError> {
        TokenStream::new(source).collect_all()
    }

    /// Parse a node body.
    pub fn parse(source: &str) -> Result<Block, CompileError> {
        Parser::new(source).parse()
    }

    /// Parse and lower a node body to IR.
    pub fn compile(source: &str, library: &Library) -> Result<UnitCode, CompileError> {
        let body = Self::parse(source)?;
        codegen::generate_unit(&body, library)
    }
}
