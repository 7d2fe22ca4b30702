//! Structural comparison of node bodies.
//!
//! Two bodies are structurally equal when they differ only in layout:
//! whitespace, comments, statement separators and therefore source ranges.
//! Such edits do not need a recompile.

use super::ast::{Block, Expr, ExprKind};

/// Compare two bodies ignoring source ranges.
pub fn structurally_equal(a: &Block, b: &Block) -> bool {
    blocks_equal(a, b)
}

fn blocks_equal(a: &Block, b: &Block) -> bool {
    a.statements.len() == b.statements.len()
        && a.statements
            .iter()
            .zip(&b.statements)
            .all(|(x, y)| exprs_equal(x, y))
}

fn exprs_equal(a: &Expr, b: &Expr) -> bool {
    match (&a.kind, &b.kind) {
        // Bitwise so that NaN literals compare equal to themselves.
        (ExprKind::Number(x), ExprKind::Number(y)) => x.to_bits() == y.to_bits(),
        (ExprKind::Variable(x), ExprKind::Variable(y)) => x == y,
        (
            ExprKind::Control { name: n1, kind: k1 },
            ExprKind::Control { name: n2, kind: k2 },
        ) => n1 == n2 && k1 == k2,
        (
            ExprKind::Unary {
                op: o1,
                operand: x1,
            },
            ExprKind::Unary {
                op: o2,
                operand: x2,
            },
        ) => o1 == o2 && exprs_equal(x1, x2),
        (
            ExprKind::Binary {
                op: o1,
                lhs: l1,
                rhs: r1,
            },
            ExprKind::Binary {
                op: o2,
                lhs: l2,
                rhs: r2,
            },
        ) => o1 == o2 && exprs_equal(l1, l2) && exprs_equal(r1, r2),
        (
            ExprKind::Call {
                name: n1, args: a1, ..
            },
            ExprKind::Call {
                name: n2, args: a2, ..
            },
        ) => {
            n1 == n2
                && a1.len() == a2.len()
                && a1.iter().zip(a2).all(|(x, y)| exprs_equal(x, y))
        }
        (
            ExprKind::Index {
                target: t1,
                lane: l1,
            },
            ExprKind::Index {
                target: t2,
                lane: l2,
            },
        ) => exprs_equal(t1, t2) && exprs_equal(l1, l2),
        (
            ExprKind::Assign {
                target: t1,
                op: o1,
                value: v1,
            },
            ExprKind::Assign {
                target: t2,
                op: o2,
                value: v2,
            },
        ) => t1 == t2 && o1 == o2 && exprs_equal(v1, v2),
        (ExprKind::Block(x), ExprKind::Block(y)) => blocks_equal(x, y),
        (
            ExprKind::If {
                condition: c1,
                then_block: t1,
                else_branch: e1,
            },
            ExprKind::If {
                condition: c2,
                then_block: t2,
                else_branch: e2,
            },
        ) => {
            exprs_equal(c1, c2)
                && blocks_equal(t1, t2)
                && match (e1, e2) {
                    (Some(x), Some(y)) => exprs_equal(x, y),
                    (None, None) => true,
                    _ => false,
                }
        }
        _ => false,
    }
}
