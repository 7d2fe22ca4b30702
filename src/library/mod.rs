//! Builtin function library.
//!
//! A fixed, name-keyed table of operators and intrinsics. Each entry declares
//! its parameter signature and emits IR when called. The table is built once
//! with [`Library::standard`] and shared read-only (usually behind an `Arc`)
//! by every compilation.

mod math;
mod midi;
mod signal;
mod vector;

use std::collections::HashMap;

use crate::codegen::builder::Builder;
use crate::codegen::ir::ValueId;
use crate::codegen::value::{or_active, Num, Value};
use crate::dsl::ast::ValueKind;
use crate::dsl::error::{Arity, CompileError, ErrorKind};
use crate::dsl::token::SourceRange;

/// One declared parameter of a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parameter {
    pub kind: ValueKind,
    pub optional: bool,
    /// The argument must be known at compile time.
    pub constant: bool,
}

impl Parameter {
    pub const fn num() -> Self {
        Self {
            kind: ValueKind::Num,
            optional: false,
            constant: false,
        }
    }

    pub const fn midi() -> Self {
        Self {
            kind: ValueKind::Midi,
            optional: false,
            constant: false,
        }
    }

    pub const fn optional(self) -> Self {
        Self {
            optional: true,
            ..self
        }
    }

    pub const fn constant(self) -> Self {
        Self {
            constant: true,
            ..self
        }
    }
}

/// How the active flag of a call result is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityRule {
    /// Active when any argument is active.
    AnyInput,
    /// The builtin sets the flag itself.
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Required parameters come before optional ones.
    pub params: Vec<Parameter>,
    pub vararg: Option<Parameter>,
    pub activity: ActivityRule,
}

impl Signature {
    pub fn new(params: Vec<Parameter>) -> Self {
        Self {
            params,
            vararg: None,
            activity: ActivityRule::AnyInput,
        }
    }

    pub fn vararg(mut self, param: Parameter) -> Self {
        self.vararg = Some(param);
        self
    }

    pub fn custom_activity(mut self) -> Self {
        self.activity = ActivityRule::Custom;
        self
    }

    pub fn arity(&self) -> Arity {
        let min = self.params.iter().filter(|p| !p.optional).count();
        let max = match self.vararg {
            Some(_) => None,
            None => Some(self.params.len()),
        };
        Arity { min, max }
    }

    fn param(&self, index: usize) -> Option<&Parameter> {
        self.params.get(index).or(self.vararg.as_ref())
    }
}

/// Where a builtin is being called from.
#[derive(Debug, Clone, Copy)]
pub struct CallSite<'a> {
    pub name: &'a str,
    pub range: SourceRange,
}

/// A builtin operator or intrinsic.
pub trait Function: Send + Sync {
    fn name(&self) -> &str;

    fn signature(&self) -> &Signature;

    /// Emit IR for a call whose arguments already match the signature.
    ///
    /// `params` has one entry per declared parameter (`None` for omitted
    /// optional ones); extra arguments land in `vararg`.
    fn generate(
        &self,
        b: &mut Builder,
        params: Vec<Option<Value>>,
        vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError>;
}

pub struct Library {
    functions: HashMap<String, Box<dyn Function>>,
}

impl Library {
    /// The full builtin catalog.
    pub fn standard() -> Self {
        let mut library = Self {
            functions: HashMap::new(),
        };
        math::register(&mut library);
        vector::register(&mut library);
        signal::register(&mut library);
        midi::register(&mut library);
        library
    }

    fn register(&mut self, function: impl Function + 'static) {
        let name = function.name().to_string();
        let previous = self.functions.insert(name.clone(), Box::new(function));
        assert!(previous.is_none(), "builtin '{name}' registered twice");
    }

    pub fn get(&self, name: &str) -> Option<&dyn Function> {
        self.functions.get(name).map(|f| f.as_ref())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Every registered name, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.functions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Resolve `name`, check the arguments against its signature and emit it.
    pub fn call(
        &self,
        b: &mut Builder,
        name: &str,
        name_range: SourceRange,
        args: Vec<Value>,
        range: SourceRange,
    ) -> Result<Value, CompileError> {
        let function = self
            .get(name)
            .ok_or_else(|| CompileError::undefined_function(name, name_range))?;
        let signature = function.signature();

        let arity = signature.arity();
        if !arity.accepts(args.len()) {
            return Err(CompileError::arity(name, arity, args.len(), range));
        }

        for (index, arg) in args.iter().enumerate() {
            let Some(param) = signature.param(index) else {
                continue;
            };
            if arg.kind() != param.kind {
                return Err(CompileError::mismatch(
                    name,
                    index,
                    param.kind,
                    arg.kind(),
                    arg.range(),
                ));
            }
            if param.constant && !arg.is_constant(b) {
                return Err(CompileError::new(
                    ErrorKind::NotConstant {
                        function: name.to_string(),
                        index,
                    },
                    arg.range(),
                ));
            }
        }

        let input_flags: Vec<_> = match signature.activity {
            ActivityRule::AnyInput => args.iter().map(|arg| arg.active(b)).collect(),
            ActivityRule::Custom => Vec::new(),
        };

        let declared = signature.params.len();
        let mut args = args.into_iter();
        let params: Vec<Option<Value>> = (0..declared).map(|_| args.next()).collect();
        let vararg: Vec<Value> = args.collect();

        let site = CallSite { name, range };
        let result = function.generate(b, params, vararg, &site)?.with_range(range);

        Ok(match (signature.activity, result) {
            (ActivityRule::AnyInput, Value::Num(num)) => Value::Num(Num {
                active: or_active(b, input_flags),
                ..num
            }),
            (_, result) => result,
        })
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("functions", &self.names())
            .finish()
    }
}

/// Fetch a numeric parameter that the signature declares as required.
pub(crate) fn num_param(
    params: &[Option<Value>],
    index: usize,
    site: &CallSite,
) -> Result<Num, CompileError> {
    match opt_num_param(params, index, site)? {
        Some(num) => Ok(num),
        None => Err(CompileError::arity(
            site.name,
            Arity::exactly(index + 1),
            index,
            site.range,
        )),
    }
}

pub(crate) fn opt_num_param(
    params: &[Option<Value>],
    index: usize,
    site: &CallSite,
) -> Result<Option<Num>, CompileError> {
    match params.get(index).copied().flatten() {
        None => Ok(None),
        Some(Value::Num(num)) => Ok(Some(num)),
        Some(other) => Err(CompileError::mismatch(
            site.name,
            index,
            ValueKind::Num,
            other.kind(),
            other.range(),
        )),
    }
}

/// A plain numeric result for a call site.
pub(crate) fn num(vec: ValueId, active: Option<ValueId>, site: &CallSite) -> Value {
    Value::Num(Num::new(vec, active, site.range))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn literal(b: &mut Builder, x: f32) -> Value {
        let vec = b.splat(x);
        Value::Num(Num::new(vec, None, SourceRange::UNDEFINED))
    }

    fn input(b: &mut Builder, index: u32) -> Value {
        let vec = b.load_control(index);
        let active = b.load_control_active(index);
        Value::Num(Num::new(vec, Some(active), SourceRange::UNDEFINED))
    }

    #[test]
    fn standard_library_has_core_entries() {
        let library = Library::standard();
        for name in [
            "+", "-", "*", "/", "%", "^", "neg", "!", "==", "&&", "sin", "pow", "min", "clamp",
            "mix", "vec", "lane", "withActive", "active", "latch", "accum", "phasor", "sinOsc",
            "noise", "sampleRate", "note", "cc",
        ] {
            assert!(library.contains(name), "missing builtin '{name}'");
        }
    }

    #[test]
    fn too_many_arguments_is_arity_error() {
        let library = Library::standard();
        let mut b = Builder::new();
        let args = vec![literal(&mut b, 1.0), literal(&mut b, 2.0), literal(&mut b, 3.0)];
        let err = library
            .call(&mut b, "pow", SourceRange::UNDEFINED, args, SourceRange::UNDEFINED)
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Arity {
                function: "pow".to_string(),
                expected: Arity::exactly(2),
                actual: 3,
            }
        );
    }

    #[test]
    fn unknown_name_is_undefined_function() {
        let library = Library::standard();
        let mut b = Builder::new();
        let err = library
            .call(&mut b, "bogus", SourceRange::UNDEFINED, vec![], SourceRange::UNDEFINED)
            .unwrap_err();
        assert_eq!(err.kind.category(), "UndefinedFunctionError");
    }

    #[test]
    fn midi_argument_to_numeric_builtin_is_type_error() {
        let library = Library::standard();
        let mut b = Builder::new();
        let buffer = b.midi_control(0);
        let midi = Value::Midi(crate::codegen::value::Midi {
            buffer,
            range: SourceRange::UNDEFINED,
        });
        let err = library
            .call(&mut b, "sin", SourceRange::UNDEFINED, vec![midi], SourceRange::UNDEFINED)
            .unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Type {
                function: "sin".to_string(),
                index: 0,
                expected: ValueKind::Num,
                found: ValueKind::Midi,
            }
        );
    }

    #[test]
    fn non_constant_lane_index_is_rejected() {
        let library = Library::standard();
        let mut b = Builder::new();
        let x = input(&mut b, 0);
        let i = input(&mut b, 1);
        let err = library
            .call(&mut b, "lane", SourceRange::UNDEFINED, vec![x, i], SourceRange::UNDEFINED)
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotConstant { index: 1, .. }));
    }

    #[test]
    fn any_input_rule_ors_flags() {
        let library = Library::standard();
        let mut b = Builder::new();
        let lit = literal(&mut b, 1.0);
        let inp = input(&mut b, 0);
        let Value::Num(inp_num) = inp else { unreachable!() };

        let both_literal = library
            .call(
                &mut b,
                "+",
                SourceRange::UNDEFINED,
                vec![lit, lit],
                SourceRange::UNDEFINED,
            )
            .unwrap();
        assert_eq!(both_literal.as_num().unwrap().active, None);

        let mixed = library
            .call(&mut b, "+", SourceRange::UNDEFINED, vec![lit, inp], SourceRange::UNDEFINED)
            .unwrap();
        assert_eq!(mixed.as_num().unwrap().active, inp_num.active);
    }

    #[test]
    fn variadic_arity() {
        let library = Library::standard();
        let arity = library.get("max").unwrap().signature().arity();
        assert_eq!(arity, Arity { min: 2, max: None });
        let clamp = library.get("clamp").unwrap().signature().arity();
        assert_eq!(
            clamp,
            Arity {
                min: 1,
                max: Some(3)
            }
        );
    }
}
