//! Lane manipulation and activity builtins.

use crate::codegen::builder::Builder;
use crate::codegen::ir::ValueId;
use crate::codegen::value::Value;
use crate::dsl::error::{CompileError, ErrorKind};

use super::{num, num_param, opt_num_param, CallSite, Function, Library, Parameter, Signature};

/// `vec(x0, x1?, x2?, x3?)`: lane `i` is lane 0 of argument `i`; missing
/// lanes repeat the last supplied argument.
struct Vector {
    signature: Signature,
}

impl Function for Vector {
    fn name(&self) -> &str {
        "vec"
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
        let mut last = num_param(&params, 0, site)?.vec;
        let mut lanes = [(last, 0u8); 4];
        for (i, lane) in lanes.iter_mut().enumerate().skip(1) {
            if let Some(x) = opt_num_param(&params, i, site)? {
                last = x.vec;
            }
            *lane = (last, 0);
        }
        Ok(num(b.shuffle(lanes), None, site))
    }
}

/// `lane(x, i)`: broadcast lane `i` of `x`.
struct Lane {
    signature: Signature,
}

impl Function for Lane {
    fn name(&self) -> &str {
        "lane"
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
        let index = num_param(&params, 1, site)?;
        let lane = const_lane0(b, index.vec).unwrap_or(f32::NAN);
        if !(0.0..=3.0).contains(&lane) || lane.fract() != 0.0 {
            return Err(CompileError::new(
                ErrorKind::OutOfRange {
                    function: site.name.to_string(),
                    index: 1,
                    value: lane,
                    min: 0.0,
                    max: 3.0,
                },
                index.range,
            ));
        }
        Ok(num(b.broadcast_lane(x.vec, lane as u8), None, site))
    }
}

pub(super) fn const_lane0(b: &Builder, value: ValueId) -> Option<f32> {
    b.const_value(value).map(|lanes| lanes[0])
}

/// `withActive(x, a)`: `x` with its flag replaced by `lane0(a) != 0`.
struct WithActive {
    signature: Signature,
}

impl Function for WithActive {
    fn name(&self) -> &str {
        "withActive"
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
        let gate = num_param(&params, 1, site)?;
        let active = b.lane_non_zero(gate.vec, 0);
        Ok(num(x.vec, Some(active), site))
    }
}

/// `active(x)`: the flag of `x` as `1` or `0`.
struct Active {
    signature: Signature,
}

impl Function for Active {
    fn name(&self) -> &str {
        "active"
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
        let flag = match x.active {
            Some(flag) => flag,
            None => b.flag(false),
        };
        Ok(num(b.flag_to_num(flag), None, site))
    }
}

/// `latch(x)`: the last value `x` had while it was active.
struct Latch {
    signature: Signature,
}

impl Function for Latch {
    fn name(&self) -> &str {
        "latch"
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
        let held = b.load_state(offset);
        let Some(active) = x.active else {
            return Ok(num(held, None, site));
        };
        let next = b.select(active, x.vec, held);
        b.store_state(offset, next);
        Ok(num(next, Some(active), site))
    }
}

pub(super) fn register(library: &mut Library) {
    library.register(Vector {
        signature: Signature::new(vec![
            Parameter::num(),
            Parameter::num().optional(),
            Parameter::num().optional(),
            Parameter::num().optional(),
        ]),
    });
    library.register(Lane {
        signature: Signature::new(vec![Parameter::num(), Parameter::num().constant()]),
    });
    library.register(WithActive {
        signature: Signature::new(vec![Parameter::num(), Parameter::num()]).custom_activity(),
    });
    library.register(Active {
        signature: Signature::new(vec![Parameter::num()]),
    });
    library.register(Latch {
        signature: Signature::new(vec![Parameter::num()]).custom_activity(),
    });
}

#[cfg(test)]
mod tests {
    use crate::codegen::builder::Builder;
    use crate::codegen::value::{Num, Value};
    use crate::dsl::error::{CompileError, ErrorKind};
    use crate::dsl::token::SourceRange;
    use crate::library::Library;

    fn literal(b: &mut Builder, lanes: [f32; 4]) -> Value {
        Value::Num(Num::new(b.constant(lanes), None, SourceRange::UNDEFINED))
    }

    fn call(b: &mut Builder, name: &str, args: Vec<Value>) -> Result<Value, CompileError> {
        Library::standard().call(b, name, SourceRange::UNDEFINED, args, SourceRange::UNDEFINED)
    }

    #[test]
    fn vec_repeats_last_argument() {
        let mut b = Builder::new();
        let a = literal(&mut b, [1.0; 4]);
        let c = literal(&mut b, [2.0, 9.0, 9.0, 9.0]);
        let v = call(&mut b, "vec", vec![a, c]).unwrap();
        assert_eq!(b.const_value(v.as_num().unwrap().vec), Some([1.0, 2.0, 2.0, 2.0]));
    }

    #[test]
    fn lane_broadcasts() {
        let mut b = Builder::new();
        let x = literal(&mut b, [1.0, 2.0, 3.0, 4.0]);
        let i = literal(&mut b, [2.0; 4]);
        let v = call(&mut b, "lane", vec![x, i]).unwrap();
        assert_eq!(b.const_value(v.as_num().unwrap().vec), Some([3.0; 4]));
    }

    #[test]
    fn lane_index_out_of_range() {
        let mut b = Builder::new();
        let x = literal(&mut b, [1.0; 4]);
        let i = literal(&mut b, [4.0; 4]);
        let err = call(&mut b, "lane", vec![x, i]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::OutOfRange { index: 1, .. }));
    }

    #[test]
    fn with_active_constant_gate_folds() {
        let mut b = Builder::new();
        let x = literal(&mut b, [5.0; 4]);
        let off = literal(&mut b, [0.0, 1.0, 1.0, 1.0]);
        let on = literal(&mut b, [3.5, 0.0, 0.0, 0.0]);

        let inactive = call(&mut b, "withActive", vec![x, off]).unwrap();
        let flag = inactive.as_num().unwrap().active.unwrap();
        assert_eq!(b.const_flag(flag), Some(false));

        let active = call(&mut b, "withActive", vec![x, on]).unwrap();
        let flag = active.as_num().unwrap().active.unwrap();
        assert_eq!(b.const_flag(flag), Some(true));
    }

    #[test]
    fn active_of_literal_is_zero() {
        let mut b = Builder::new();
        let x = literal(&mut b, [5.0; 4]);
        let v = call(&mut b, "active", vec![x]).unwrap();
        assert_eq!(b.const_value(v.as_num().unwrap().vec), Some([0.0; 4]));
    }
}
