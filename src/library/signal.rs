//! Stateful signal generators.
//!
//! These keep per-unit state across ticks. State lives in the unit's region
//! of the runtime state block and survives recompiles of other units.

use std::f32::consts::TAU;

use crate::codegen::builder::Builder;
use crate::codegen::ir::{BinaryOp, Intrinsic, UnaryOp, ValueId};
use crate::codegen::value::Value;
use crate::dsl::error::CompileError;

use super::{num, num_param, opt_num_param, CallSite, Function, Library, Parameter, Signature};

/// `accum(x, reset?)`: running sum of `x`, restarted when lane 0 of `reset`
/// is non-zero.
struct Accum {
    signature: Signature,
}

impl Function for Accum {
    fn name(&self) -> &str {
        "accum"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        params: Vec<Option<Value>>,
        _vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        let x = num_param(&params, 0, site)?;
        let offset = b.alloc_state(16);
        let sum = b.load_state(offset);
        let base = match opt_num_param(&params, 1, site)? {
            Some(reset) => {
                let restart = b.lane_non_zero(reset.vec, 0);
                let zero = b.splat(0.0);
                b.select(restart, zero, sum)
            }
            None => sum,
        };
        let next = b.binary(BinaryOp::Add, base, x.vec);
        b.store_state(offset, next);
        Ok(num(next, None, site))
    }
}

/// Advance a `0..1` ramp by `freq / sampleRate`, returning the phase before
/// the step.
fn ramp(b: &mut Builder, freq: ValueId) -> ValueId {
    let offset = b.alloc_state(16);
    let phase = b.load_state(offset);
    let rate = b.sample_rate();
    let step = b.binary(BinaryOp::Div, freq, rate);
    let next = b.binary(BinaryOp::Add, phase, step);
    let whole = b.unary(UnaryOp::Floor, next);
    let wrapped = b.binary(BinaryOp::Sub, next, whole);
    b.store_state(offset, wrapped);
    phase
}

struct Phasor {
    signature: Signature,
}

impl Function for Phasor {
    fn name(&self) -> &str {
        "phasor"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        params: Vec<Option<Value>>,
        _vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        let freq = num_param(&params, 0, site)?;
        let phase = ramp(b, freq.vec);
        let always = b.flag(true);
        Ok(num(phase, Some(always), site))
    }
}

struct SinOsc {
    signature: Signature,
}

impl Function for SinOsc {
    fn name(&self) -> &str {
        "sinOsc"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        params: Vec<Option<Value>>,
        _vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        let freq = num_param(&params, 0, site)?;
        let phase = ramp(b, freq.vec);
        let tau = b.splat(TAU);
        let angle = b.binary(BinaryOp::Mul, phase, tau);
        let out = b.unary(UnaryOp::Sin, angle);
        let always = b.flag(true);
        Ok(num(out, Some(always), site))
    }
}

struct Noise {
    signature: Signature,
}

impl Function for Noise {
    fn name(&self) -> &str {
        "noise"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        _params: Vec<Option<Value>>,
        _vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        let state = b.alloc_state(16);
        let out = b.call(Intrinsic::Noise, None, state);
        let always = b.flag(true);
        Ok(num(out, Some(always), site))
    }
}

struct SampleRate {
    signature: Signature,
}

impl Function for SampleRate {
    fn name(&self) -> &str {
        "sampleRate"
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        _params: Vec<Option<Value>>,
        _vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        Ok(num(b.sample_rate(), None, site))
    }
}

pub(super) fn register(library: &mut Library) {
    library.register(Accum {
        signature: Signature::new(vec![Parameter::num(), Parameter::num().optional()]),
    });
    library.register(Phasor {
        signature: Signature::new(vec![Parameter::num()]).custom_activity(),
    });
    library.register(SinOsc {
        signature: Signature::new(vec![Parameter::num()]).custom_activity(),
    });
    library.register(Noise {
        signature: Signature::new(vec![]).custom_activity(),
    });
    library.register(SampleRate {
        signature: Signature::new(vec![]).custom_activity(),
    });
}

#[cfg(test)]
mod tests {
    use crate::codegen::builder::Builder;
    use crate::codegen::ir::Inst;
    use crate::codegen::value::{Num, Value};
    use crate::dsl::token::SourceRange;
    use crate::library::Library;

    #[test]
    fn each_stateful_call_gets_its_own_state() {
        let library = Library::standard();
        let mut b = Builder::new();
        for _ in 0..3 {
            let freq = Value::Num(Num::new(b.splat(440.0), None, SourceRange::UNDEFINED));
            library
                .call(&mut b, "phasor", SourceRange::UNDEFINED, vec![freq], SourceRange::UNDEFINED)
                .unwrap();
        }
        assert_eq!(b.state_size(), 48);
    }

    #[test]
    fn noise_is_always_active() {
        let library = Library::standard();
        let mut b = Builder::new();
        let value = library
            .call(&mut b, "noise", SourceRange::UNDEFINED, vec![], SourceRange::UNDEFINED)
            .unwrap();
        let flag = value.as_num().unwrap().active.unwrap();
        assert_eq!(b.const_flag(flag), Some(true));
        let (func, _) = b.finish();
        assert!(func.insts.iter().any(|i| matches!(i, Inst::Call { .. })));
    }
}
