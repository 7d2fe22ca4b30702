//! Code generation: AST to typed IR.

pub mod builder;
pub mod emit;
pub mod ir;
pub mod value;

use crate::dsl::ast::{Block, ValueKind};
use crate::dsl::error::CompileError;
use crate::dsl::token::SourceRange;
use crate::library::Library;

pub use builder::Builder;
pub use value::{Midi, Num, Value};

/// A control referenced by a unit body.
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMeta {
    pub name: String,
    pub kind: ValueKind,
    pub read: bool,
    pub written: bool,
    /// Where the control is first mentioned.
    pub range: SourceRange,
}

/// The lowered form of one node body, ready for linking.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitCode {
    pub function: ir::Function,
    /// Indexed by the control slots used in the IR.
    pub controls: Vec<ControlMeta>,
    pub state_size: u32,
}

/// Lower a parsed node body.
pub fn generate_unit(body: &Block, library: &Library) -> Result<UnitCode, CompileError> {
    let mut emitter = emit::Emitter::new(library);
    emitter.emit_body(body)?;
    Ok(emitter.finish())
}
