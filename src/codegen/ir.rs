//! Typed linear IR.
//!
//! A [`Function`] is a straight-line list of instructions. Every instruction
//! defines exactly one value, identified by its index. Control flow is
//! expressed with `Select` and guarded stores, so a unit body always runs
//! from top to bottom.

use std::fmt;

/// Index of the instruction that defines a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub u32);

impl ValueId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ty {
    /// Four `f32` lanes.
    Vec4,
    Bool,
    /// Pointer to a `MidiBuffer`.
    Midi,
    /// Instructions executed only for their effect.
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    Abs,
    Floor,
    Ceil,
    Sqrt,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Tanh,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Min,
    Max,
    Atan2,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
}

/// Operations implemented out of line by `extern "C"` helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    /// Per-lane xorshift noise in `[-1, 1)`.
    Noise,
    /// `[note, gate, velocity, 0]` from the most recent note events.
    MidiNote,
    /// Latest value of the given controller, `0..=1`.
    MidiCc(u8),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Inst {
    Const([f32; 4]),
    Flag(bool),
    Unary(UnaryOp, ValueId),
    Binary(BinaryOp, ValueId, ValueId),
    /// Lane `i` of the result is lane `.1` of value `.0`.
    Shuffle([(ValueId, u8); 4]),
    /// Ordered not-equal comparison of one lane against zero.
    LaneNonZero(ValueId, u8),
    FlagAnd(ValueId, ValueId),
    FlagOr(ValueId, ValueId),
    FlagNot(ValueId),
    /// Broadcast a flag as `1.0` or `0.0`.
    FlagToNum(ValueId),
    Select {
        condition: ValueId,
        then_value: ValueId,
        else_value: ValueId,
    },
    SampleRate,
    LoadState(u32),
    StoreState {
        offset: u32,
        value: ValueId,
        guard: Option<ValueId>,
    },
    LoadControl(u32),
    LoadControlActive(u32),
    StoreControl {
        index: u32,
        value: ValueId,
        active: Option<ValueId>,
        guard: Option<ValueId>,
    },
    MidiControl(u32),
    /// The buffer holds at least one event.
    MidiActive(ValueId),
    /// Append the events of `source` to the control's buffer.
    MidiCopy {
        index: u32,
        source: ValueId,
        guard: Option<ValueId>,
    },
    /// A guarded call leaves its state untouched and yields the stored
    /// state (zero for `noise`) when the guard is false.
    Call {
        intrinsic: Intrinsic,
        midi: Option<ValueId>,
        state: u32,
        guard: Option<ValueId>,
    },
}

impl Inst {
    pub fn ty(&self) -> Ty {
        match self {
            Inst::Const(_)
            | Inst::Unary(..)
            | Inst::Binary(..)
            | Inst::Shuffle(_)
            | Inst::FlagToNum(_)
            | Inst::SampleRate
            | Inst::LoadState(_)
            | Inst::LoadControl(_)
            | Inst::Call { .. } => Ty::Vec4,
            Inst::Flag(_)
            | Inst::LaneNonZero(..)
            | Inst::FlagAnd(..)
            | Inst::FlagOr(..)
            | Inst::FlagNot(_)
            | Inst::LoadControlActive(_)
            | Inst::MidiActive(_) => Ty::Bool,
            Inst::MidiControl(_) => Ty::Midi,
            Inst::StoreState { .. } | Inst::StoreControl { .. } | Inst::MidiCopy { .. } => {
                Ty::Unit
            }
            // Resolved by the builder, which knows the operand types.
            Inst::Select { .. } => Ty::Vec4,
        }
    }
}

/// A lowered unit body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Function {
    pub insts: Vec<Inst>,
    pub types: Vec<Ty>,
}

impl Function {
    pub fn ty(&self, value: ValueId) -> Ty {
        self.types[value.index()]
    }

    pub fn len(&self) -> usize {
        self.insts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.insts.is_empty()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (inst, ty)) in self.insts.iter().zip(&self.types).enumerate() {
            writeln!(f, "v{i}: {ty:?} = {inst:?}")?;
        }
        Ok(())
    }
}

/// Lane test used for conditions and activity gates. NaN counts as zero.
pub fn ordered_non_zero(x: f32) -> bool {
    !x.is_nan() && x != 0.0
}

fn from_bool(b: bool) -> f32 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Scalar semantics of a unary lane operation.
pub fn eval_unary(op: UnaryOp, x: f32) -> f32 {
    match op {
        UnaryOp::Neg => -x,
        UnaryOp::Not => from_bool(x == 0.0),
        UnaryOp::Abs => x.abs(),
        UnaryOp::Floor => x.floor(),
        UnaryOp::Ceil => x.ceil(),
        UnaryOp::Sqrt => x.sqrt(),
        UnaryOp::Sin => x.sin(),
        UnaryOp::Cos => x.cos(),
        UnaryOp::Tan => x.tan(),
        UnaryOp::Exp => x.exp(),
        UnaryOp::Log => x.ln(),
        UnaryOp::Tanh => x.tanh(),
    }
}

/// Scalar semantics of a binary lane operation.
pub fn eval_binary(op: BinaryOp, a: f32, b: f32) -> f32 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Rem => a % b,
        BinaryOp::Pow => a.powf(b),
        BinaryOp::Min => a.min(b),
        BinaryOp::Max => a.max(b),
        BinaryOp::Atan2 => a.atan2(b),
        BinaryOp::Eq => from_bool(a == b),
        BinaryOp::Ne => from_bool(a != b),
        BinaryOp::Lt => from_bool(a < b),
        BinaryOp::Gt => from_bool(a > b),
        BinaryOp::Le => from_bool(a <= b),
        BinaryOp::Ge => from_bool(a >= b),
        BinaryOp::And => from_bool(a != 0.0 && b != 0.0),
        BinaryOp::Or => from_bool(a != 0.0 || b != 0.0),
    }
}

pub fn map_lanes(x: [f32; 4], f: impl Fn(f32) -> f32) -> [f32; 4] {
    [f(x[0]), f(x[1]), f(x[2]), f(x[3])]
}

pub fn zip_lanes(a: [f32; 4], b: [f32; 4], f: impl Fn(f32, f32) -> f32) -> [f32; 4] {
    [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2]), f(a[3], b[3])]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comparisons_yield_unit_values() {
        assert_eq!(eval_binary(BinaryOp::Lt, 1.0, 2.0), 1.0);
        assert_eq!(eval_binary(BinaryOp::Ge, 1.0, 2.0), 0.0);
        assert_eq!(eval_binary(BinaryOp::And, 3.0, -1.0), 1.0);
        assert_eq!(eval_binary(BinaryOp::Or, 0.0, 0.0), 0.0);
        assert_eq!(eval_unary(UnaryOp::Not, 0.0), 1.0);
        assert_eq!(eval_unary(UnaryOp::Not, 0.5), 0.0);
    }

    #[test]
    fn nan_is_not_ordered_non_zero() {
        assert!(ordered_non_zero(3.5));
        assert!(!ordered_non_zero(0.0));
        assert!(!ordered_non_zero(-0.0));
        assert!(!ordered_non_zero(f32::NAN));
    }

    #[test]
    fn remainder_keeps_dividend_sign() {
        assert_eq!(eval_binary(BinaryOp::Rem, 7.0, 3.0), 1.0);
        assert_eq!(eval_binary(BinaryOp::Rem, -7.0, 3.0), -1.0);
    }

    #[test]
    fn lane_helpers() {
        let x = [1.0, -2.0, 3.0, -4.0];
        assert_eq!(map_lanes(x, f32::abs), [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            zip_lanes(x, [1.0; 4], |a, b| a + b),
            [2.0, -1.0, 4.0, -3.0]
        );
    }
}
