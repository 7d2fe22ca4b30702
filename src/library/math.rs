//! Operators and lane-wise math.

use crate::codegen::builder::Builder;
use crate::codegen::ir::{BinaryOp, UnaryOp};
use crate::codegen::value::Value;
use crate::dsl::ast::ValueKind;
use crate::dsl::error::CompileError;

use super::{num, num_param, opt_num_param, CallSite, Function, Library, Parameter, Signature};

struct UnaryMath {
    name: &'static str,
    op: UnaryOp,
    signature: Signature,
}

impl UnaryMath {
    fn new(name: &'static str, op: UnaryOp) -> Self {
        Self {
            name,
            op,
            signature: Signature::new(vec![Parameter::num()]),
        }
    }
}

impl Function for UnaryMath {
    fn name(&self) -> &str {
        self.name
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
        Ok(num(b.unary(self.op, x.vec), None, site))
    }
}

struct BinaryMath {
    name: &'static str,
    op: BinaryOp,
    signature: Signature,
}

impl BinaryMath {
    fn new(name: &'static str, op: BinaryOp) -> Self {
        Self {
            name,
            op,
            signature: Signature::new(vec![Parameter::num(), Parameter::num()]),
        }
    }
}

impl Function for BinaryMath {
    fn name(&self) -> &str {
        self.name
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
        let lhs = num_param(&params, 0, site)?;
        let rhs = num_param(&params, 1, site)?;
        Ok(num(b.binary(self.op, lhs.vec, rhs.vec), None, site))
    }
}

/// `min` / `max` over two or more arguments.
struct Fold {
    name: &'static str,
    op: BinaryOp,
    signature: Signature,
}

impl Fold {
    fn new(name: &'static str, op: BinaryOp) -> Self {
        Self {
            name,
            op,
            signature: Signature::new(vec![Parameter::num(), Parameter::num()])
                .vararg(Parameter::num()),
        }
    }
}

impl Function for Fold {
    fn name(&self) -> &str {
        self.name
    }

    fn signature(&self) -> &Signature {
        &self.signature
    }

    fn generate(
        &self,
        b: &mut Builder,
        params: Vec<Option<Value>>,
        vararg: Vec<Value>,
        site: &CallSite,
    ) -> Result<Value, CompileError> {
        let first = num_param(&params, 0, site)?;
        let second = num_param(&params, 1, site)?;
        let mut acc = b.binary(self.op, first.vec, second.vec);
        for (i, extra) in vararg.iter().enumerate() {
            let Some(extra) = extra.as_num() else {
                return Err(CompileError::mismatch(
                    site.name,
                    i + 2,
                    ValueKind::Num,
                    extra.kind(),
                    extra.range(),
                ));
            };
            acc = b.binary(self.op, acc, extra.vec);
        }
        Ok(num(acc, None, site))
    }
}

/// `clamp(x, lo = 0, hi = 1)`.
struct Clamp {
    signature: Signature,
}

impl Function for Clamp {
    fn name(&self) -> &str {
        "clamp"
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
        let lo = match opt_num_param(&params, 1, site)? {
            Some(lo) => lo.vec,
            None => b.splat(0.0),
        };
        let hi = match opt_num_param(&params, 2, site)? {
            Some(hi) => hi.vec,
            None => b.splat(1.0),
        };
        let upper = b.binary(BinaryOp::Min, x.vec, hi);
        Ok(num(b.binary(BinaryOp::Max, upper, lo), None, site))
    }
}

/// `mix(a, b, t) = a + (b - a) * t`.
struct Mix {
    signature: Signature,
}

impl Function for Mix {
    fn name(&self) -> &str {
        "mix"
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
        let a = num_param(&params, 0, site)?;
        let to = num_param(&params, 1, site)?;
        let t = num_param(&params, 2, site)?;
        let span = b.binary(BinaryOp::Sub, to.vec, a.vec);
        let scaled = b.binary(BinaryOp::Mul, span, t.vec);
        Ok(num(b.binary(BinaryOp::Add, a.vec, scaled), None, site))
    }
}

pub(super) fn register(library: &mut Library) {
    let operators = [
        ("+", BinaryOp::Add),
        ("-", BinaryOp::Sub),
        ("*", BinaryOp::Mul),
        ("/", BinaryOp::Div),
        ("%", BinaryOp::Rem),
        ("^", BinaryOp::Pow),
        ("==", BinaryOp::Eq),
        ("!=", BinaryOp::Ne),
        ("<", BinaryOp::Lt),
        (">", BinaryOp::Gt),
        ("<=", BinaryOp::Le),
        (">=", BinaryOp::Ge),
        ("&&", BinaryOp::And),
        ("||", BinaryOp::Or),
        ("pow", BinaryOp::Pow),
        ("atan2", BinaryOp::Atan2),
    ];
    for (name, op) in operators {
        library.register(BinaryMath::new(name, op));
    }

    let unary = [
        ("neg", UnaryOp::Neg),
        ("!", UnaryOp::Not),
        ("sin", UnaryOp::Sin),
        ("cos", UnaryOp::Cos),
        ("tan", UnaryOp::Tan),
        ("tanh", UnaryOp::Tanh),
        ("sqrt", UnaryOp::Sqrt),
        ("abs", UnaryOp::Abs),
        ("floor", UnaryOp::Floor),
        ("ceil", UnaryOp::Ceil),
        ("exp", UnaryOp::Exp),
        ("log", UnaryOp::Log),
    ];
    for (name, op) in unary {
        library.register(UnaryMath::new(name, op));
    }

    library.register(Fold::new("min", BinaryOp::Min));
    library.register(Fold::new("max", BinaryOp::Max));
    library.register(Clamp {
        signature: Signature::new(vec![
            Parameter::num(),
            Parameter::num().optional(),
            Parameter::num().optional(),
        ]),
    });
    library.register(Mix {
        signature: Signature::new(vec![Parameter::num(), Parameter::num(), Parameter::num()]),
    });
}
