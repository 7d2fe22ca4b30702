//! Native backend: lowers the IR to machine code with Cranelift.
//!
//! Vectors are scalarized into four `f32` values, flags are `i8` 0/1 and MIDI
//! values are buffer pointers. Every unit gets its own `JITModule` so that it
//! can be freed independently.

use std::collections::HashMap;
use std::mem::offset_of;

use cranelift::codegen::ir::FuncRef;
use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module};

use crate::codegen::ir::{self, Function, Inst, Intrinsic, ValueId};
use crate::runtime::value::NumValue;

use super::helpers;
use super::{Owned, UnitContext};

pub(crate) type Entry = unsafe extern "C" fn(*const UnitContext);

/// Whether Cranelift can generate code for this machine.
pub(crate) fn host_supported() -> bool {
    cranelift_native::builder().is_ok()
}

fn release_module(module: JITModule) {
    // SAFETY: called once the owning unit is dropped, after which its entry
    // point is unreachable.
    unsafe { module.free_memory() }
}

fn new_module() -> Result<JITModule, String> {
    let mut flag_builder = settings::builder();
    for (name, value) in [
        ("use_colocated_libcalls", "false"),
        ("is_pic", "false"),
        ("opt_level", "speed"),
    ] {
        flag_builder
            .set(name, value)
            .map_err(|e| format!("Failed to set {name}: {e}"))?;
    }

    let isa_builder =
        cranelift_native::builder().map_err(|e| format!("Failed to create ISA builder: {e}"))?;
    let isa = isa_builder
        .finish(settings::Flags::new(flag_builder))
        .map_err(|e| format!("Failed to create ISA: {e}"))?;

    let mut builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
    for (name, ptr) in helpers::symbols() {
        builder.symbol(name, ptr);
    }
    Ok(JITModule::new(builder))
}

/// Compile `func` into a fresh module and return its entry point.
pub(crate) fn compile(func: &Function) -> Result<(Entry, Owned<JITModule>), String> {
    let mut owned = Owned::new(new_module()?, release_module);
    let module = owned
        .get_mut()
        .ok_or_else(|| "JIT module was released".to_string())?;

    let ptr_type = module.target_config().pointer_type();
    let mut sig = module.make_signature();
    sig.params.push(AbiParam::new(ptr_type));
    let id = module
        .declare_function("unit", Linkage::Export, &sig)
        .map_err(|e| format!("Failed to declare unit: {e}"))?;

    let mut ctx = module.make_context();
    ctx.func.signature = sig;
    let mut builder_context = FunctionBuilderContext::new();
    {
        let builder = FunctionBuilder::new(&mut ctx.func, &mut builder_context);
        Lowering::new(module, builder, ptr_type).run(func)?;
    }

    module
        .define_function(id, &mut ctx)
        .map_err(|e| format!("Failed to define unit: {e:?}"))?;
    module.clear_context(&mut ctx);
    module
        .finalize_definitions()
        .map_err(|e| format!("Failed to finalize unit: {e}"))?;

    let code = module.get_finalized_function(id);
    // SAFETY: the function was declared with the `Entry` signature above.
    let entry = unsafe { std::mem::transmute::<*const u8, Entry>(code) };
    Ok((entry, owned))
}

#[derive(Debug, Clone, Copy)]
enum Lowered {
    Vec4([Value; 4]),
    Flag(Value),
    Ptr(Value),
    Unit,
}

struct Lowering<'m, 'f> {
    module: &'m mut JITModule,
    builder: FunctionBuilder<'f>,
    ptr_type: Type,
    values: Vec<Lowered>,
    imports: HashMap<&'static str, FuncRef>,
    state: Value,
    controls: Value,
    sample_rate: Value,
}

impl<'m, 'f> Lowering<'m, 'f> {
    fn new(module: &'m mut JITModule, mut builder: FunctionBuilder<'f>, ptr_type: Type) -> Self {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        builder.seal_block(entry);

        let ctx = builder.block_params(entry)[0];
        let flags = MemFlags::trusted();
        let state = builder
            .ins()
            .load(ptr_type, flags, ctx, offset_of!(UnitContext, state) as i32);
        let controls = builder
            .ins()
            .load(ptr_type, flags, ctx, offset_of!(UnitContext, controls) as i32);
        let sample_rate = builder.ins().load(
            types::F32,
            flags,
            ctx,
            offset_of!(UnitContext, sample_rate) as i32,
        );

        Self {
            module,
            builder,
            ptr_type,
            values: Vec::new(),
            imports: HashMap::new(),
            state,
            controls,
            sample_rate,
        }
    }

    fn run(mut self, func: &Function) -> Result<(), String> {
        for inst in &func.insts {
            let lowered = self.lower(inst)?;
            self.values.push(lowered);
        }
        self.builder.ins().return_(&[]);
        self.builder.finalize();
        Ok(())
    }

    fn lanes(&self, id: ValueId) -> Result<[Value; 4], String> {
        match self.values.get(id.index()) {
            Some(Lowered::Vec4(lanes)) => Ok(*lanes),
            _ => Err(format!("{id} is not a vector")),
        }
    }

    fn flag(&self, id: ValueId) -> Result<Value, String> {
        match self.values.get(id.index()) {
            Some(Lowered::Flag(v)) => Ok(*v),
            _ => Err(format!("{id} is not a flag")),
        }
    }

    fn ptr(&self, id: ValueId) -> Result<Value, String> {
        match self.values.get(id.index()) {
            Some(Lowered::Ptr(v)) => Ok(*v),
            _ => Err(format!("{id} is not a MIDI buffer")),
        }
    }

    fn import(
        &mut self,
        name: &'static str,
        params: &[Type],
        returns: &[Type],
    ) -> Result<FuncRef, String> {
        if let Some(func_ref) = self.imports.get(name) {
            return Ok(*func_ref);
        }
        let mut sig = self.module.make_signature();
        sig.params.extend(params.iter().map(|t| AbiParam::new(*t)));
        sig.returns.extend(returns.iter().map(|t| AbiParam::new(*t)));
        let id = self
            .module
            .declare_function(name, Linkage::Import, &sig)
            .map_err(|e| format!("Failed to import {name}: {e}"))?;
        let func_ref = self.module.declare_func_in_func(id, self.builder.func);
        self.imports.insert(name, func_ref);
        Ok(func_ref)
    }

    fn call_f32(&mut self, name: &'static str, args: &[Value]) -> Result<Value, String> {
        let params = vec![types::F32; args.len()];
        let func_ref = self.import(name, &params, &[types::F32])?;
        let call = self.builder.ins().call(func_ref, args);
        Ok(self.builder.inst_results(call)[0])
    }

    fn bool_to_f32(&mut self, flag: Value) -> Value {
        let one = self.builder.ins().f32const(1.0);
        let zero = self.builder.ins().f32const(0.0);
        self.builder.ins().select(flag, one, zero)
    }

    fn compare_zero(&mut self, x: Value, cc: FloatCC) -> Value {
        let zero = self.builder.ins().f32const(0.0);
        self.builder.ins().fcmp(cc, x, zero)
    }

    fn control_ptr(&mut self, index: u32) -> Value {
        let offset = index as i32 * self.ptr_type.bytes() as i32;
        self.builder
            .ins()
            .load(self.ptr_type, MemFlags::trusted(), self.controls, offset)
    }

    /// Store `value` at `base + offset`, keeping the old contents when
    /// `guard` is false.
    fn store(&mut self, ty: Type, value: Value, base: Value, offset: i32, guard: Option<Value>) {
        let flags = MemFlags::trusted();
        let value = match guard {
            Some(g) => {
                let old = self.builder.ins().load(ty, flags, base, offset);
                self.builder.ins().select(g, value, old)
            }
            None => value,
        };
        self.builder.ins().store(flags, value, base, offset);
    }

    fn store_lanes(&mut self, lanes: [Value; 4], base: Value, offset: i32, guard: Option<Value>) {
        for (i, lane) in lanes.into_iter().enumerate() {
            self.store(types::F32, lane, base, offset + 4 * i as i32, guard);
        }
    }

    fn load_lanes(&mut self, base: Value, offset: i32) -> [Value; 4] {
        std::array::from_fn(|i| {
            self.builder
                .ins()
                .load(types::F32, MemFlags::trusted(), base, offset + 4 * i as i32)
        })
    }

    fn guard(&self, guard: Option<ValueId>) -> Result<Option<Value>, String> {
        guard.map(|g| self.flag(g)).transpose()
    }

    fn unary(&mut self, op: ir::UnaryOp, x: Value) -> Result<Value, String> {
        use ir::UnaryOp::*;
        Ok(match op {
            Neg => self.builder.ins().fneg(x),
            Abs => self.builder.ins().fabs(x),
            Floor => self.builder.ins().floor(x),
            Ceil => self.builder.ins().ceil(x),
            Sqrt => self.builder.ins().sqrt(x),
            Not => {
                let zero = self.compare_zero(x, FloatCC::Equal);
                self.bool_to_f32(zero)
            }
            Sin => self.call_f32("voltage_sinf", &[x])?,
            Cos => self.call_f32("voltage_cosf", &[x])?,
            Tan => self.call_f32("voltage_tanf", &[x])?,
            Exp => self.call_f32("voltage_expf", &[x])?,
            Log => self.call_f32("voltage_logf", &[x])?,
            Tanh => self.call_f32("voltage_tanhf", &[x])?,
        })
    }

    fn binary(&mut self, op: ir::BinaryOp, a: Value, b: Value) -> Result<Value, String> {
        use ir::BinaryOp::*;
        let compare = |this: &mut Self, cc: FloatCC| {
            let c = this.builder.ins().fcmp(cc, a, b);
            this.bool_to_f32(c)
        };
        Ok(match op {
            Add => self.builder.ins().fadd(a, b),
            Sub => self.builder.ins().fsub(a, b),
            Mul => self.builder.ins().fmul(a, b),
            Div => self.builder.ins().fdiv(a, b),
            Min => self.builder.ins().fmin(a, b),
            Max => self.builder.ins().fmax(a, b),
            Rem => self.call_f32("voltage_fmodf", &[a, b])?,
            Pow => self.call_f32("voltage_powf", &[a, b])?,
            Atan2 => self.call_f32("voltage_atan2f", &[a, b])?,
            Eq => compare(self, FloatCC::Equal),
            Ne => compare(self, FloatCC::NotEqual),
            Lt => compare(self, FloatCC::LessThan),
            Gt => compare(self, FloatCC::GreaterThan),
            Le => compare(self, FloatCC::LessThanOrEqual),
            Ge => compare(self, FloatCC::GreaterThanOrEqual),
            And | Or => {
                let x = self.compare_zero(a, FloatCC::NotEqual);
                let y = self.compare_zero(b, FloatCC::NotEqual);
                let both = if op == And {
                    self.builder.ins().band(x, y)
                } else {
                    self.builder.ins().bor(x, y)
                };
                self.bool_to_f32(both)
            }
        })
    }

    fn lower(&mut self, inst: &Inst) -> Result<Lowered, String> {
        let lowered = match *inst {
            Inst::Const(lanes) => {
                Lowered::Vec4(lanes.map(|x| self.builder.ins().f32const(x)))
            }
            Inst::Flag(b) => Lowered::Flag(self.builder.ins().iconst(types::I8, b as i64)),
            Inst::Unary(op, x) => {
                let x = self.lanes(x)?;
                let mut out = x;
                for (o, lane) in out.iter_mut().zip(x) {
                    *o = self.unary(op, lane)?;
                }
                Lowered::Vec4(out)
            }
            Inst::Binary(op, a, b) => {
                let (a, b) = (self.lanes(a)?, self.lanes(b)?);
                let mut out = a;
                for i in 0..4 {
                    out[i] = self.binary(op, a[i], b[i])?;
                }
                Lowered::Vec4(out)
            }
            Inst::Shuffle(lanes) => {
                let mut out = [self.sample_rate; 4];
                for (o, (v, lane)) in out.iter_mut().zip(lanes) {
                    *o = self.lanes(v)?[lane as usize];
                }
                Lowered::Vec4(out)
            }
            Inst::LaneNonZero(x, lane) => {
                let x = self.lanes(x)?[lane as usize];
                Lowered::Flag(self.compare_zero(x, FloatCC::OrderedNotEqual))
            }
            Inst::FlagAnd(a, b) => {
                let (a, b) = (self.flag(a)?, self.flag(b)?);
                Lowered::Flag(self.builder.ins().band(a, b))
            }
            Inst::FlagOr(a, b) => {
                let (a, b) = (self.flag(a)?, self.flag(b)?);
                Lowered::Flag(self.builder.ins().bor(a, b))
            }
            Inst::FlagNot(a) => {
                let a = self.flag(a)?;
                Lowered::Flag(self.builder.ins().bxor_imm(a, 1))
            }
            Inst::FlagToNum(a) => {
                let a = self.flag(a)?;
                Lowered::Vec4([self.bool_to_f32(a); 4])
            }
            Inst::Select {
                condition,
                then_value,
                else_value,
            } => {
                let c = self.flag(condition)?;
                match (self.values[then_value.index()], self.values[else_value.index()]) {
                    (Lowered::Vec4(t), Lowered::Vec4(e)) => {
                        let mut out = t;
                        for i in 0..4 {
                            out[i] = self.builder.ins().select(c, t[i], e[i]);
                        }
                        Lowered::Vec4(out)
                    }
                    (Lowered::Flag(t), Lowered::Flag(e)) => {
                        Lowered::Flag(self.builder.ins().select(c, t, e))
                    }
                    (Lowered::Ptr(t), Lowered::Ptr(e)) => {
                        Lowered::Ptr(self.builder.ins().select(c, t, e))
                    }
                    _ => return Err(format!("select over mismatched values {then_value}, {else_value}")),
                }
            }
            Inst::SampleRate => Lowered::Vec4([self.sample_rate; 4]),
            Inst::LoadState(offset) => Lowered::Vec4(self.load_lanes(self.state, offset as i32)),
            Inst::StoreState {
                offset,
                value,
                guard,
            } => {
                let lanes = self.lanes(value)?;
                let guard = self.guard(guard)?;
                self.store_lanes(lanes, self.state, offset as i32, guard);
                Lowered::Unit
            }
            Inst::LoadControl(index) => {
                let ptr = self.control_ptr(index);
                Lowered::Vec4(self.load_lanes(ptr, 0))
            }
            Inst::LoadControlActive(index) => {
                let ptr = self.control_ptr(index);
                let active = self.builder.ins().load(
                    types::I8,
                    MemFlags::trusted(),
                    ptr,
                    NumValue::ACTIVE_OFFSET as i32,
                );
                Lowered::Flag(active)
            }
            Inst::StoreControl {
                index,
                value,
                active,
                guard,
            } => {
                let lanes = self.lanes(value)?;
                let guard = self.guard(guard)?;
                let active = match active {
                    Some(a) => self.flag(a)?,
                    None => self.builder.ins().iconst(types::I8, 0),
                };
                let ptr = self.control_ptr(index);
                self.store_lanes(lanes, ptr, 0, guard);
                self.store(types::I8, active, ptr, NumValue::ACTIVE_OFFSET as i32, guard);
                Lowered::Unit
            }
            Inst::MidiControl(index) => Lowered::Ptr(self.control_ptr(index)),
            Inst::MidiActive(m) => {
                let ptr = self.ptr(m)?;
                let count = self
                    .builder
                    .ins()
                    .load(types::I32, MemFlags::trusted(), ptr, 0);
                Lowered::Flag(self.builder.ins().icmp_imm(IntCC::NotEqual, count, 0))
            }
            Inst::MidiCopy {
                index,
                source,
                guard,
            } => {
                let src = self.ptr(source)?;
                let enabled = match self.guard(guard)? {
                    Some(g) => self.builder.ins().uextend(types::I32, g),
                    None => self.builder.ins().iconst(types::I32, 1),
                };
                let dst = self.control_ptr(index);
                let func_ref = self.import(
                    "voltage_midi_merge",
                    &[self.ptr_type, self.ptr_type, types::I32],
                    &[],
                )?;
                self.builder.ins().call(func_ref, &[dst, src, enabled]);
                Lowered::Unit
            }
            Inst::Call {
                intrinsic,
                midi,
                state,
                guard,
            } => {
                let (name, param) = match intrinsic {
                    Intrinsic::Noise => ("voltage_noise", 0),
                    Intrinsic::MidiNote => ("voltage_midi_note", 0),
                    Intrinsic::MidiCc(n) => ("voltage_midi_cc", n as i64),
                };
                let ptr = self.ptr_type;
                let func_ref =
                    self.import(name, &[ptr, types::I32, ptr, ptr, types::I32], &[])?;
                let midi = match midi {
                    Some(m) => self.ptr(m)?,
                    None => self.builder.ins().iconst(ptr, 0),
                };
                let param = self.builder.ins().iconst(types::I32, param);
                let state = self.builder.ins().iadd_imm(self.state, state as i64);
                let slot = self.builder.create_sized_stack_slot(StackSlotData::new(
                    StackSlotKind::ExplicitSlot,
                    16,
                    4,
                ));
                let out = self.builder.ins().stack_addr(ptr, slot, 0);
                let enabled = match self.guard(guard)? {
                    Some(g) => self.builder.ins().uextend(types::I32, g),
                    None => self.builder.ins().iconst(types::I32, 1),
                };
                self.builder
                    .ins()
                    .call(func_ref, &[midi, param, state, out, enabled]);
                Lowered::Vec4(std::array::from_fn(|i| {
                    self.builder.ins().stack_load(types::F32, slot, 4 * i as i32)
                }))
            }
        };
        Ok(lowered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::builder::Builder;
    use crate::codegen::ir::{BinaryOp, UnaryOp};

    #[test]
    fn compiles_and_runs_arithmetic() {
        if !host_supported() {
            return;
        }
        let mut b = Builder::new();
        let input = b.load_control(0);
        let two = b.splat(2.0);
        let product = b.binary(BinaryOp::Mul, input, two);
        let root = b.unary(UnaryOp::Sqrt, product);
        let gt = b.binary(BinaryOp::Gt, root, two);
        b.store_control(1, gt, None);
        b.store_state(0, root);
        let (func, _) = b.finish();

        let (entry, _module) = compile(&func).unwrap();
        let mut a = NumValue::new([2.0, 8.0, 18.0, 0.0]);
        let mut out = NumValue::default();
        let controls = [
            (&mut a as *mut NumValue).cast::<u8>(),
            (&mut out as *mut NumValue).cast::<u8>(),
        ];
        let mut state = [0u64; 2];
        let ctx = UnitContext {
            state: state.as_mut_ptr().cast(),
            controls: controls.as_ptr(),
            sample_rate: 44100.0,
        };
        unsafe { entry(&ctx) };
        let lanes: [f32; 4] = unsafe { state.as_ptr().cast::<[f32; 4]>().read() };
        assert_eq!(lanes, [2.0, 4.0, 6.0, 0.0]);
        assert_eq!(out.lanes, [0.0, 1.0, 1.0, 0.0]);
    }
}
