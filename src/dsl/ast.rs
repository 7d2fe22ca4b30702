//! Abstract syntax tree for the voltage node language.
//!
//! A node body parses into a [`Block`] of statements. Every expression carries
//! the source range it was parsed from.

use std::fmt;

use super::token::SourceRange;

/// The two kinds of value the language manipulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ValueKind {
    Num,
    Midi,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Num => f.write_str("num"),
            ValueKind::Midi => f.write_str("midi"),
        }
    }
}

/// A sequence of statements, either a whole node body or a `{ ... }` block.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub statements: Vec<Expr>,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub range: SourceRange,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f32),
    /// A local variable read.
    Variable(String),
    /// `name:num` or `name:midi`.
    Control { name: String, kind: ValueKind },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Call {
        name: String,
        name_range: SourceRange,
        args: Vec<Expr>,
    },
    /// `target[lane]`.
    Index {
        target: Box<Expr>,
        lane: Box<Expr>,
    },
    /// `target = value`, or a compound form such as `target += value`.
    Assign {
        target: AssignTarget,
        op: Option<BinaryOp>,
        value: Box<Expr>,
    },
    Block(Block),
    If {
        condition: Box<Expr>,
        then_block: Block,
        /// Either another `If` expression or a `Block` expression.
        else_branch: Option<Box<Expr>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Variable(String),
    Control { name: String, kind: ValueKind },
}

impl fmt::Display for AssignTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssignTarget::Variable(name) => write!(f, "'{name}'"),
            AssignTarget::Control { name, kind } => write!(f, "'{name}:{kind}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Plus,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

impl BinaryOp {
    /// The name the operator is registered under in the builtin library.
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Gt => ">",
            BinaryOp::Le => "<=",
            BinaryOp::Ge => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
        }
    }

    /// Binding power; higher binds tighter.
    pub fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Or => 1,
            BinaryOp::And => 2,
            BinaryOp::Eq | BinaryOp::Ne => 3,
            BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => 4,
            BinaryOp::Add | BinaryOp::Sub => 5,
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => 6,
            BinaryOp::Pow => 7,
        }
    }

    pub fn is_right_associative(&self) -> bool {
        matches!(self, BinaryOp::Pow)
    }
}

impl UnaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "neg",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
        }
    }
}

impl Expr {
    pub fn new(kind: ExprKind, range: SourceRange) -> Self {
        Self { kind, range }
    }

    /// Visit this expression and all of its descendants in pre-order.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        visit(self);
        match &self.kind {
            ExprKind::Number(_) | ExprKind::Variable(_) | ExprKind::Control { .. } => {}
            ExprKind::Unary { operand, .. } => operand.walk(visit),
            ExprKind::Binary { lhs, rhs, .. } => {
                lhs.walk(visit);
                rhs.walk(visit);
            }
            ExprKind::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            ExprKind::Index { target, lane } => {
                target.walk(visit);
                lane.walk(visit);
            }
            ExprKind::Assign { value, .. } => value.walk(visit),
            ExprKind::Block(block) => block.walk(visit),
            ExprKind::If {
                condition,
                then_block,
                else_branch,
            } => {
                condition.walk(visit);
                then_block.walk(visit);
                if let Some(else_branch) = else_branch {
                    else_branch.walk(visit);
                }
            }
        }
    }
}

impl Block {
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a Expr)) {
        for stmt in &self.statements {
            stmt.walk(visit);
        }
    }

    /// Every control referenced by the block, in order of first appearance.
    pub fn control_refs(&self) -> Vec<(String, ValueKind)> {
        let mut refs: Vec<(String, ValueKind)> = Vec::new();
        let mut note = |name: &str, kind: ValueKind| {
            if !refs.iter().any(|(n, k)| n == name && *k == kind) {
                refs.push((name.to_string(), kind));
            }
        };
        self.walk(&mut |expr| match &expr.kind {
            ExprKind::Control { name, kind } => note(name, *kind),
            ExprKind::Assign {
                target: AssignTarget::Control { name, kind },
                ..
            } => note(name, *kind),
            _ => {}
        });
        refs
    }
}
