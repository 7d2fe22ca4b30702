//! Lowering of a parsed node body to IR.

use std::collections::{BTreeSet, HashMap};

use crate::dsl::ast::{AssignTarget, Block, Expr, ExprKind, UnaryOp, ValueKind};
use crate::dsl::error::{CompileError, ErrorKind};
use crate::dsl::token::SourceRange;
use crate::library::Library;

use super::builder::Builder;
use super::ir::ValueId;
use super::value::{Midi, Num, Value};
use super::{ControlMeta, UnitCode};

/// Tree-walking emitter for one unit.
///
/// Locals are unit-wide: a block does not open a new scope, and locals
/// assigned inside an `if` arm are merged with a select afterwards.
pub struct Emitter<'a> {
    library: &'a Library,
    builder: Builder,
    locals: HashMap<String, Value>,
    controls: Vec<ControlMeta>,
}

impl<'a> Emitter<'a> {
    pub fn new(library: &'a Library) -> Self {
        Self {
            library,
            builder: Builder::new(),
            locals: HashMap::new(),
            controls: Vec::new(),
        }
    }

    pub fn finish(self) -> UnitCode {
        let (function, state_size) = self.builder.finish();
        UnitCode {
            function,
            controls: self.controls,
            state_size,
        }
    }

    /// Emit a unit body. The values of its statements are discarded.
    pub fn emit_body(&mut self, body: &Block) -> Result<(), CompileError> {
        self.block(body, false).map(|_| ())
    }

    /// Emit an expression whose value is used.
    pub fn emit(&mut self, expr: &Expr) -> Result<Value, CompileError> {
        self.expr(expr, true)
    }

    /// Only the last statement of a used block is itself used.
    fn block(&mut self, block: &Block, used: bool) -> Result<Value, CompileError> {
        let mut last = None;
        let count = block.statements.len();
        for (index, stmt) in block.statements.iter().enumerate() {
            last = Some(self.expr(stmt, used && index + 1 == count)?);
        }
        Ok(match last {
            Some(value) => value,
            None => self.zero(block.range),
        })
    }

    fn expr(&mut self, expr: &Expr, used: bool) -> Result<Value, CompileError> {
        match &expr.kind {
            ExprKind::Number(v) => {
                let vec = self.builder.splat(*v);
                Ok(Value::Num(Num::new(vec, None, expr.range)))
            }
            ExprKind::Variable(name) => match self.locals.get(name) {
                Some(value) => Ok(value.with_range(expr.range)),
                None => Err(CompileError::new(
                    ErrorKind::UndefinedVariable { name: name.clone() },
                    expr.range,
                )),
            },
            ExprKind::Control { name, kind } => self.read_control(name, *kind, expr.range),
            ExprKind::Unary { op, operand } => {
                let value = self.emit(operand)?;
                match op {
                    UnaryOp::Plus => Ok(value.with_range(expr.range)),
                    UnaryOp::Neg | UnaryOp::Not => {
                        self.call(op.symbol(), expr.range, vec![value], expr.range)
                    }
                }
            }
            ExprKind::Binary { op, lhs, rhs } => {
                let lhs = self.emit(lhs)?;
                let rhs = self.emit(rhs)?;
                self.call(op.symbol(), expr.range, vec![lhs, rhs], expr.range)
            }
            ExprKind::Call {
                name,
                name_range,
                args,
            } => {
                let args = args
                    .iter()
                    .map(|arg| self.emit(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                self.call(name, *name_range, args, expr.range)
            }
            ExprKind::Index { target, lane } => {
                let target = self.emit(target)?;
                let lane = self.emit(lane)?;
                self.call("lane", expr.range, vec![target, lane], expr.range)
            }
            ExprKind::Assign { target, op, value } => {
                let mut value = self.emit(value)?;
                if let Some(op) = op {
                    let current = match target {
                        AssignTarget::Variable(name) => self.emit(&Expr::new(
                            ExprKind::Variable(name.clone()),
                            expr.range,
                        ))?,
                        AssignTarget::Control { name, kind } => {
                            self.read_control(name, *kind, expr.range)?
                        }
                    };
                    value = self.call(op.symbol(), expr.range, vec![current, value], expr.range)?;
                }
                self.assign(target, value, expr.range)?;
                Ok(value.with_range(expr.range))
            }
            ExprKind::Block(block) => Ok(self.block(block, used)?.with_range(expr.range)),
            ExprKind::If {
                condition,
                then_block,
                else_branch,
            } => self.emit_if(condition, then_block, else_branch.as_deref(), expr.range, used),
        }
    }

    fn call(
        &mut self,
        name: &str,
        name_range: SourceRange,
        args: Vec<Value>,
        range: SourceRange,
    ) -> Result<Value, CompileError> {
        self.library
            .call(&mut self.builder, name, name_range, args, range)
    }

    fn zero(&mut self, range: SourceRange) -> Value {
        let vec = self.builder.splat(0.0);
        Value::Num(Num::new(vec, None, range))
    }

    /// Find or declare a control, checking that its kind is consistent.
    fn control(
        &mut self,
        name: &str,
        kind: ValueKind,
        range: SourceRange,
    ) -> Result<usize, CompileError> {
        if let Some(index) = self.controls.iter().position(|c| c.name == name) {
            let existing = self.controls[index].kind;
            if existing != kind {
                return Err(CompileError::new(
                    ErrorKind::ControlKind {
                        name: name.to_string(),
                        first: existing,
                        second: kind,
                    },
                    range,
                ));
            }
            return Ok(index);
        }
        self.controls.push(ControlMeta {
            name: name.to_string(),
            kind,
            read: false,
            written: false,
            range,
        });
        Ok(self.controls.len() - 1)
    }

    fn read_control(
        &mut self,
        name: &str,
        kind: ValueKind,
        range: SourceRange,
    ) -> Result<Value, CompileError> {
        let index = self.control(name, kind, range)?;
        self.controls[index].read = true;
        let slot = index as u32;
        Ok(match kind {
            ValueKind::Num => {
                let vec = self.builder.load_control(slot);
                let active = self.builder.load_control_active(slot);
                Value::Num(Num::new(vec, Some(active), range))
            }
            ValueKind::Midi => Value::Midi(Midi {
                buffer: self.builder.midi_control(slot),
                range,
            }),
        })
    }

    fn assign(
        &mut self,
        target: &AssignTarget,
        value: Value,
        range: SourceRange,
    ) -> Result<(), CompileError> {
        match target {
            AssignTarget::Variable(name) => {
                self.locals.insert(name.clone(), value);
            }
            AssignTarget::Control { name, kind } => {
                if value.kind() != *kind {
                    return Err(CompileError::new(
                        ErrorKind::InvalidTarget {
                            target: target.to_string(),
                            found: value.kind(),
                        },
                        range,
                    ));
                }
                let index = self.control(name, *kind, range)?;
                self.controls[index].written = true;
                let slot = index as u32;
                match value {
                    Value::Num(num) => {
                        self.builder.store_control(slot, num.vec, num.active);
                    }
                    Value::Midi(midi) => {
                        self.builder.midi_copy(slot, midi.buffer);
                    }
                }
            }
        }
        Ok(())
    }

    fn emit_if(
        &mut self,
        condition: &Expr,
        then_block: &Block,
        else_branch: Option<&Expr>,
        range: SourceRange,
        used: bool,
    ) -> Result<Value, CompileError> {
        let cond = match self.emit(condition)? {
            Value::Num(num) => num,
            other => {
                return Err(CompileError::mismatch(
                    "if",
                    0,
                    ValueKind::Num,
                    other.kind(),
                    other.range(),
                ))
            }
        };
        let taken = self.builder.lane_non_zero(cond.vec, 0);
        let before = self.locals.clone();

        self.builder.push_guard(taken);
        let then_value = self.block(then_block, used);
        self.builder.pop_guard();
        let then_value = then_value?;
        let then_locals = std::mem::replace(&mut self.locals, before);

        let else_value = match else_branch {
            Some(branch) => {
                let not_taken = self.builder.flag_not(taken);
                self.builder.push_guard(not_taken);
                let value = self.expr(branch, used);
                self.builder.pop_guard();
                Some(value?)
            }
            None => None,
        };
        let else_locals = std::mem::take(&mut self.locals);

        let names: BTreeSet<&String> = then_locals.keys().chain(else_locals.keys()).collect();
        let mut merged = HashMap::new();
        for name in names {
            let value = match (then_locals.get(name), else_locals.get(name)) {
                (Some(a), Some(b)) => self.merge(taken, *a, *b, range)?,
                (Some(a), None) => {
                    let zero = self.zero(a.range());
                    self.merge(taken, *a, zero, range)?
                }
                (None, Some(b)) => {
                    let zero = self.zero(b.range());
                    self.merge(taken, zero, *b, range)?
                }
                (None, None) => continue,
            };
            merged.insert(name.clone(), value);
        }
        self.locals = merged;

        let else_value = match else_value {
            Some(value) => value,
            None => self.zero(range),
        };
        if used {
            return self.merge(taken, then_value, else_value, range);
        }
        // In statement position the arms may yield different kinds.
        match self.merge(taken, then_value, else_value, range) {
            Ok(value) => Ok(value),
            Err(_) => Ok(self.zero(range)),
        }
    }

    fn merge(
        &mut self,
        taken: ValueId,
        a: Value,
        b: Value,
        range: SourceRange,
    ) -> Result<Value, CompileError> {
        match (a, b) {
            (Value::Num(x), Value::Num(y)) => {
                let vec = self.builder.select(taken, x.vec, y.vec);
                let active = match (x.active, y.active) {
                    (None, None) => None,
                    (xa, ya) => {
                        let xa = xa.unwrap_or_else(|| self.builder.flag(false));
                        let ya = ya.unwrap_or_else(|| self.builder.flag(false));
                        Some(self.builder.select(taken, xa, ya))
                    }
                };
                Ok(Value::Num(Num::new(vec, active, range)))
            }
            (Value::Midi(x), Value::Midi(y)) if x.buffer == y.buffer => {
                Ok(Value::Midi(Midi { range, ..x }))
            }
            (x, y) => Err(CompileError::mismatch(
                "if",
                1,
                x.kind(),
                y.kind(),
                range,
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::ir::Inst;
    use crate::dsl::parser::Parser;
    use crate::dsl::token::SourcePos;

    fn compile(src: &str) -> Result<UnitCode, CompileError> {
        let library = Library::standard();
        let body = Parser::new(src).parse()?;
        let mut emitter = Emitter::new(&library);
        emitter.emit_body(&body)?;
        Ok(emitter.finish())
    }

    #[test]
    fn controls_are_collected_in_order() {
        let unit = compile("out:num = in:num * gain:num\nkeys:midi").unwrap();
        let summary: Vec<(&str, ValueKind, bool, bool)> = unit
            .controls
            .iter()
            .map(|c| (c.name.as_str(), c.kind, c.read, c.written))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("in", ValueKind::Num, true, false),
                ("gain", ValueKind::Num, true, false),
                ("out", ValueKind::Num, false, true),
                ("keys", ValueKind::Midi, true, false),
            ]
        );
    }

    #[test]
    fn constant_body_folds_away() {
        let unit = compile("out:num = (1 + 2) * 3").unwrap();
        let store = unit
            .function
            .insts
            .iter()
            .find_map(|inst| match inst {
                Inst::StoreControl { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap();
        assert_eq!(unit.function.insts[store.index()], Inst::Const([9.0; 4]));
    }

    #[test]
    fn arity_error_names_builtin() {
        let err = compile("x = pow(1, 2, 3)").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Arity {
                function: "pow".to_string(),
                expected: crate::dsl::error::Arity::exactly(2),
                actual: 3,
            }
        );
        assert_eq!(err.range.start, SourcePos::new(1, 5));
    }

    #[test]
    fn undefined_function_points_at_name() {
        let err = compile("a = 1\nout:num = bogus(a)").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::UndefinedFunction {
                name: "bogus".to_string()
            }
        );
        assert_eq!(err.range.start, SourcePos::new(2, 11));
        assert_eq!(err.range.end, SourcePos::new(2, 16));
    }

    #[test]
    fn undefined_variable() {
        let err = compile("out:num = missing + 1").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::UndefinedVariable {
                name: "missing".to_string()
            }
        );
    }

    #[test]
    fn compound_assignment_requires_definition() {
        let err = compile("x += 1").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UndefinedVariable { .. }));
    }

    #[test]
    fn control_kind_conflict() {
        let err = compile("a = x:num\nb = x:midi").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::ControlKind {
                name: "x".to_string(),
                first: ValueKind::Num,
                second: ValueKind::Midi,
            }
        );
        assert_eq!(err.range.start, SourcePos::new(2, 5));
    }

    #[test]
    fn writing_midi_to_num_control_is_rejected() {
        let err = compile("out:num = keys:midi").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::InvalidTarget { .. }));
    }

    #[test]
    fn midi_argument_type_error_points_at_argument() {
        let err = compile("out:num = sin(keys:midi)").unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Type { index: 0, .. }));
        assert_eq!(err.range.start, SourcePos::new(1, 15));
    }

    #[test]
    fn stores_inside_if_are_guarded() {
        let unit = compile("if in:num { out:num = 1 } else { out:num = 2 }").unwrap();
        let guards: Vec<Option<ValueId>> = unit
            .function
            .insts
            .iter()
            .filter_map(|inst| match inst {
                Inst::StoreControl { guard, .. } => Some(*guard),
                _ => None,
            })
            .collect();
        assert_eq!(guards.len(), 2);
        assert!(guards.iter().all(Option::is_some));
        assert_ne!(guards[0], guards[1]);
    }

    #[test]
    fn local_defined_in_one_arm_merges_with_zero() {
        let unit = compile("if in:num { y = 5 }\nout:num = y").unwrap();
        assert!(unit
            .function
            .insts
            .iter()
            .any(|inst| matches!(inst, Inst::Select { .. })));
    }

    #[test]
    fn constant_condition_picks_arm() {
        let unit = compile("y = if 0 { 1 } else { 2 }\nout:num = y").unwrap();
        let stored = unit
            .function
            .insts
            .iter()
            .find_map(|inst| match inst {
                Inst::StoreControl { value, .. } => Some(*value),
                _ => None,
            })
            .unwrap();
        assert_eq!(unit.function.insts[stored.index()], Inst::Const([2.0; 4]));
    }

    #[test]
    fn if_value_with_mixed_arm_kinds_is_type_error() {
        let err = compile("y = if c:num { k:midi } else { 1 }\nout:num = y").unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Type {
                function: "if".to_string(),
                index: 1,
                expected: ValueKind::Midi,
                found: ValueKind::Num,
            }
        );
        assert_eq!(err.range.start, SourcePos::new(1, 5));

        let err = compile("out:num = 1 + if c:num { k:midi }").unwrap_err();
        assert_eq!(err.kind.category(), "TypeError");
    }

    #[test]
    fn if_statement_may_mix_arm_kinds() {
        let unit = compile("if c:num { out:midi = k:midi } else { n:num = 1 }").unwrap();
        assert_eq!(unit.controls.len(), 4);
    }
}
