//! Parser for the voltage node language.
//!
//! Statements are parsed by recursive descent and expressions by precedence
//! climbing over [`BinaryOp::precedence`]. A statement ends at `;`, `}`, end
//! of input, or at a token that starts a new line while the parser is not
//! inside parentheses or brackets. The first error aborts the parse.

use super::ast::*;
use super::error::CompileError;
use super::lexer::TokenStream;
use super::token::{SourcePos, SourceRange, Token, TokenKind};

pub struct Parser<'a> {
    stream: TokenStream<'a>,
    /// Depth of open `(` / `[`; line breaks are insignificant while non-zero.
    nesting: u32,
    last_end: SourcePos,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            stream: TokenStream::new(source),
            nesting: 0,
            last_end: SourcePos::new(1, 1),
        }
    }

    /// Parse a whole node body.
    pub fn parse(&mut self) -> Result<Block, CompileError> {
        let start = self.peek()?.pos;
        let statements = self.parse_statements(TokenKind::Eof)?;
        self.expect(TokenKind::Eof)?;
        Ok(Block {
            statements,
            range: SourceRange::new(start, self.last_end.max(start)),
        })
    }

    fn parse_statements(&mut self, close: TokenKind) -> Result<Vec<Expr>, CompileError> {
        let mut statements = Vec::new();
        loop {
            while self.check(TokenKind::Semicolon)? {
                self.advance()?;
            }
            if self.check(close)? || self.check(TokenKind::Eof)? {
                return Ok(statements);
            }
            statements.push(self.parse_statement()?);
            self.end_statement(close)?;
        }
    }

    fn end_statement(&mut self, close: TokenKind) -> Result<(), CompileError> {
        let (kind, newline_before) = {
            let token = self.peek()?;
            (token.kind, token.newline_before)
        };
        match kind {
            TokenKind::Semicolon => {
                self.advance()?;
                Ok(())
            }
            kind if kind == close || kind == TokenKind::Eof => Ok(()),
            _ if newline_before => Ok(()),
            _ => Err(self.unexpected(&["';'", "end of line", close.describe()])?),
        }
    }

    fn parse_statement(&mut self) -> Result<Expr, CompileError> {
        let expr = self.parse_expr()?;

        let op = match self.peek_continuing()?.map(|t| t.kind) {
            Some(TokenKind::Assign) => None,
            Some(TokenKind::PlusAssign) => Some(BinaryOp::Add),
            Some(TokenKind::MinusAssign) => Some(BinaryOp::Sub),
            Some(TokenKind::StarAssign) => Some(BinaryOp::Mul),
            Some(TokenKind::SlashAssign) => Some(BinaryOp::Div),
            Some(TokenKind::PercentAssign) => Some(BinaryOp::Rem),
            _ => return Ok(expr),
        };

        let target = match expr.kind {
            ExprKind::Variable(name) => AssignTarget::Variable(name),
            ExprKind::Control { name, kind } => AssignTarget::Control { name, kind },
            _ => {
                let token = self.peek()?;
                return Err(CompileError::parse(
                    vec!["end of statement".to_string()],
                    found(token),
                    token.range(),
                ));
            }
        };
        self.advance()?;
        let value = self.parse_expr()?;
        let range = expr.range.to(value.range);
        Ok(Expr::new(
            ExprKind::Assign {
                target,
                op,
                value: Box::new(value),
            },
            range,
        ))
    }

    pub fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        self.parse_binary(1)
    }

    fn parse_binary(&mut self, min_precedence: u8) -> Result<Expr, CompileError> {
        let mut lhs = self.parse_unary()?;

        loop {
            let Some(op) = self.peek_continuing()?.and_then(|t| binary_op(t.kind)) else {
                break;
            };
            let precedence = op.precedence();
            if precedence < min_precedence {
                break;
            }
            self.advance()?;

            let next_min = if op.is_right_associative() {
                precedence
            } else {
                precedence + 1
            };
            let rhs = self.parse_binary(next_min)?;
            let range = lhs.range.to(rhs.range);
            lhs = Expr::new(
                ExprKind::Binary {
                    op,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                },
                range,
            );
        }

        Ok(lhs)
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let op = match self.peek()?.kind {
            TokenKind::Minus => UnaryOp::Neg,
            TokenKind::Plus => UnaryOp::Plus,
            TokenKind::Bang => UnaryOp::Not,
            _ => return self.parse_postfix(),
        };
        let start = self.advance()?.pos;
        let operand = self.parse_unary()?;
        let range = SourceRange::new(start, operand.range.end);
        Ok(Expr::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            range,
        ))
    }

    fn parse_postfix(&mut self) -> Result<Expr, CompileError> {
        let mut expr = self.parse_primary()?;

        while matches!(
            self.peek_continuing()?.map(|t| t.kind),
            Some(TokenKind::LBracket)
        ) {
            self.advance()?;
            self.nesting += 1;
            let lane = self.parse_expr()?;
            self.expect(TokenKind::RBracket)?;
            self.nesting -= 1;

            let range = SourceRange::new(expr.range.start, self.last_end);
            expr = Expr::new(
                ExprKind::Index {
                    target: Box::new(expr),
                    lane: Box::new(lane),
                },
                range,
            );
        }

        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let token = self.peek()?.clone();
        match token.kind {
            TokenKind::Number => {
                self.advance()?;
                let value: f32 = token.text.parse().map_err(|_| {
                    CompileError::parse(vec!["number".to_string()], found(&token), token.range())
                })?;
                Ok(Expr::new(ExprKind::Number(value), token.range()))
            }
            TokenKind::Identifier => self.parse_identifier(),
            TokenKind::LParen => {
                self.advance()?;
                self.nesting += 1;
                let mut inner = self.parse_expr()?;
                self.expect(TokenKind::RParen)?;
                self.nesting -= 1;
                inner.range = SourceRange::new(token.pos, self.last_end);
                Ok(inner)
            }
            TokenKind::LBrace => {
                let block = self.parse_block()?;
                let range = block.range;
                Ok(Expr::new(ExprKind::Block(block), range))
            }
            TokenKind::If => self.parse_if(),
            _ => Err(self.unexpected(&[
                "number",
                "identifier",
                "'('",
                "'{'",
                "'if'",
                "'-'",
                "'!'",
            ])?),
        }
    }

    fn parse_identifier(&mut self) -> Result<Expr, CompileError> {
        let ident = self.advance()?;
        let name = ident.text.clone();
        let name_range = ident.range();

        match self.peek_continuing()?.map(|t| t.kind) {
            Some(TokenKind::LParen) => {
                self.advance()?;
                self.nesting += 1;
                let mut args = Vec::new();
                if !self.check(TokenKind::RParen)? {
                    loop {
                        args.push(self.parse_expr()?);
                        if self.check(TokenKind::Comma)? {
                            self.advance()?;
                        } else {
                            break;
                        }
                    }
                }
                self.expect(TokenKind::RParen)?;
                self.nesting -= 1;
                Ok(Expr::new(
                    ExprKind::Call {
                        name,
                        name_range,
                        args,
                    },
                    SourceRange::new(name_range.start, self.last_end),
                ))
            }
            Some(TokenKind::Colon) => {
                self.advance()?;
                let kind = match self.peek()?.kind {
                    TokenKind::Num => ValueKind::Num,
                    TokenKind::Midi => ValueKind::Midi,
                    _ => return Err(self.unexpected(&["'num'", "'midi'"])?),
                };
                self.advance()?;
                Ok(Expr::new(
                    ExprKind::Control { name, kind },
                    SourceRange::new(name_range.start, self.last_end),
                ))
            }
            _ => Ok(Expr::new(ExprKind::Variable(name), name_range)),
        }
    }

    fn parse_block(&mut self) -> Result<Block, CompileError> {
        let start = self.expect(TokenKind::LBrace)?.pos;
        let outer = std::mem::replace(&mut self.nesting, 0);
        let statements = self.parse_statements(TokenKind::RBrace)?;
        self.expect(TokenKind::RBrace)?;
        self.nesting = outer;
        Ok(Block {
            statements,
            range: SourceRange::new(start, self.last_end),
        })
    }

    fn parse_if(&mut self) -> Result<Expr, CompileError> {
        let start = self.expect(TokenKind::If)?.pos;
        let condition = self.parse_expr()?;
        let then_block = self.parse_block()?;

        // `else` may sit on the following line; it can never start a statement.
        let else_branch = if self.check(TokenKind::Else)? {
            self.advance()?;
            let branch = if self.check(TokenKind::If)? {
                self.parse_if()?
            } else {
                let block = self.parse_block()?;
                let range = block.range;
                Expr::new(ExprKind::Block(block), range)
            };
            Some(Box::new(branch))
        } else {
            None
        };

        Ok(Expr::new(
            ExprKind::If {
                condition: Box::new(condition),
                then_block,
                else_branch,
            },
            SourceRange::new(start, self.last_end),
        ))
    }

    // --- Token helpers ---

    fn peek(&mut self) -> Result<&Token, CompileError> {
        self.stream.peek()
    }

    /// Peek at the next token only if it may continue the current expression.
    fn peek_continuing(&mut self) -> Result<Option<&Token>, CompileError> {
        let nested = self.nesting > 0;
        let token = self.stream.peek()?;
        Ok((nested || !token.newline_before).then_some(token))
    }

    fn advance(&mut self) -> Result<Token, CompileError> {
        let token = self.stream.next()?;
        if token.kind != TokenKind::Eof {
            self.last_end = token.end();
        }
        Ok(token)
    }

    fn check(&mut self, kind: TokenKind) -> Result<bool, CompileError> {
        Ok(self.peek()?.kind == kind)
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, CompileError> {
        if self.check(kind)? {
            self.advance()
        } else {
            Err(self.unexpected(&[kind.describe()])?)
        }
    }

    /// Build a parse error for the next token.
    fn unexpected(&mut self, expected: &[&str]) -> Result<CompileError, CompileError> {
        let token = self.peek()?;
        Ok(CompileError::parse(
            expected.iter().map(|s| s.to_string()).collect(),
            found(token),
            token.range(),
        ))
    }
}

fn found(token: &Token) -> String {
    match token.kind {
        TokenKind::Eof => token.kind.describe().to_string(),
        _ => format!("'{}'", token.text),
    }
}

fn binary_op(kind: TokenKind) -> Option<BinaryOp> {
    Some(match kind {
        TokenKind::Plus => BinaryOp::Add,
        TokenKind::Minus => BinaryOp::Sub,
        TokenKind::Star => BinaryOp::Mul,
        TokenKind::Slash => BinaryOp::Div,
        TokenKind::Percent => BinaryOp::Rem,
        TokenKind::Caret => BinaryOp::Pow,
        TokenKind::EqEq => BinaryOp::Eq,
        TokenKind::NotEq => BinaryOp::Ne,
        TokenKind::Lt => BinaryOp::Lt,
        TokenKind::Gt => BinaryOp::Gt,
        TokenKind::LtEq => BinaryOp::Le,
        TokenKind::GtEq => BinaryOp::Ge,
        TokenKind::AndAnd => BinaryOp::And,
        TokenKind::OrOr => BinaryOp::Or,
        _ => return None,
    })
}
