//! Code-generation-time values.

use crate::dsl::ast::ValueKind;
use crate::dsl::token::SourceRange;

use super::builder::Builder;
use super::ir::ValueId;

/// A numeric vector and its optional active flag.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Num {
    pub vec: ValueId,
    /// `None` means the value never fires (literals and values derived only
    /// from literals).
    pub active: Option<ValueId>,
    pub range: SourceRange,
}

/// A buffer of MIDI events.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Midi {
    pub buffer: ValueId,
    pub range: SourceRange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Num(Num),
    Midi(Midi),
}

impl Num {
    pub fn new(vec: ValueId, active: Option<ValueId>, range: SourceRange) -> Self {
        Self { vec, active, range }
    }
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Num(_) => ValueKind::Num,
            Value::Midi(_) => ValueKind::Midi,
        }
    }

    pub fn range(&self) -> SourceRange {
        match self {
            Value::Num(n) => n.range,
            Value::Midi(m) => m.range,
        }
    }

    pub fn with_range(self, range: SourceRange) -> Self {
        match self {
            Value::Num(n) => Value::Num(Num { range, ..n }),
            Value::Midi(m) => Value::Midi(Midi { range, ..m }),
        }
    }

    pub fn as_num(&self) -> Option<&Num> {
        match self {
            Value::Num(n) => Some(n),
            Value::Midi(_) => None,
        }
    }

    /// The value's active flag, materialized for MIDI buffers.
    pub fn active(&self, b: &mut Builder) -> Option<ValueId> {
        match self {
            Value::Num(n) => n.active,
            Value::Midi(m) => Some(b.midi_active(m.buffer)),
        }
    }

    /// Whether the value is known at compile time.
    pub fn is_constant(&self, b: &Builder) -> bool {
        match self {
            Value::Num(n) => b.const_value(n.vec).is_some(),
            Value::Midi(_) => false,
        }
    }
}

/// Combine active flags with logical OR. Absent flags count as inactive;
/// the result is absent only if every input is absent.
pub fn or_active(b: &mut Builder, flags: impl IntoIterator<Item = Option<ValueId>>) -> Option<ValueId> {
    flags.into_iter().flatten().reduce(|acc, f| b.flag_or(acc, f))
}
