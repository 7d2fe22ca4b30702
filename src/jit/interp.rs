//! Portable backend: walks the IR once per frame.

use crate::codegen::ir::{eval_binary, eval_unary, ordered_non_zero, Function, Inst, Intrinsic, ValueId};
use crate::runtime::value::{MidiBuffer, NumValue};

use super::helpers;
use super::UnitContext;

#[derive(Debug, Clone, Copy)]
enum Slot {
    Vec4([f32; 4]),
    Bool(bool),
    Midi(*mut MidiBuffer),
    Unit,
}

/// Per-processor value storage reused across runs.
#[derive(Debug, Default)]
pub struct Scratch {
    slots: Vec<Slot>,
}

impl Scratch {
    pub fn new() -> Self {
        Self::default()
    }

    fn vec4(&self, id: ValueId) -> [f32; 4] {
        match self.slots[id.index()] {
            Slot::Vec4(v) => v,
            _ => [0.0; 4],
        }
    }

    fn flag(&self, id: ValueId) -> bool {
        matches!(self.slots[id.index()], Slot::Bool(true))
    }

    fn guard(&self, guard: Option<ValueId>) -> bool {
        guard.map_or(true, |g| self.flag(g))
    }

    fn midi(&self, id: ValueId) -> *mut MidiBuffer {
        match self.slots[id.index()] {
            Slot::Midi(p) => p,
            _ => std::ptr::null_mut(),
        }
    }
}

unsafe fn control_ptr(ctx: &UnitContext, index: u32) -> *mut u8 {
    *ctx.controls.add(index as usize)
}

/// Execute `func` for one frame.
///
/// # Safety
///
/// `ctx` must describe a state block and control slots laid out for `func`.
pub(crate) unsafe fn run(func: &Function, ctx: &UnitContext, scratch: &mut Scratch) {
    scratch.slots.clear();
    scratch.slots.reserve(func.len());
    for inst in &func.insts {
        let slot = match *inst {
            Inst::Const(lanes) => Slot::Vec4(lanes),
            Inst::Flag(b) => Slot::Bool(b),
            Inst::Unary(op, x) => Slot::Vec4(scratch.vec4(x).map(|v| eval_unary(op, v))),
            Inst::Binary(op, a, b) => {
                let (a, b) = (scratch.vec4(a), scratch.vec4(b));
                Slot::Vec4(std::array::from_fn(|i| eval_binary(op, a[i], b[i])))
            }
            Inst::Shuffle(lanes) => {
                Slot::Vec4(lanes.map(|(v, lane)| scratch.vec4(v)[lane as usize]))
            }
            Inst::LaneNonZero(x, lane) => Slot::Bool(ordered_non_zero(scratch.vec4(x)[lane as usize])),
            Inst::FlagAnd(a, b) => Slot::Bool(scratch.flag(a) && scratch.flag(b)),
            Inst::FlagOr(a, b) => Slot::Bool(scratch.flag(a) || scratch.flag(b)),
            Inst::FlagNot(a) => Slot::Bool(!scratch.flag(a)),
            Inst::FlagToNum(a) => Slot::Vec4([if scratch.flag(a) { 1.0 } else { 0.0 }; 4]),
            Inst::Select {
                condition,
                then_value,
                else_value,
            } => {
                if scratch.flag(condition) {
                    scratch.slots[then_value.index()]
                } else {
                    scratch.slots[else_value.index()]
                }
            }
            Inst::SampleRate => Slot::Vec4([ctx.sample_rate; 4]),
            Inst::LoadState(offset) => {
                Slot::Vec4(ctx.state.add(offset as usize).cast::<[f32; 4]>().read())
            }
            Inst::StoreState {
                offset,
                value,
                guard,
            } => {
                if scratch.guard(guard) {
                    let lanes = scratch.vec4(value);
                    ctx.state.add(offset as usize).cast::<[f32; 4]>().write(lanes);
                }
                Slot::Unit
            }
            Inst::LoadControl(index) => {
                Slot::Vec4((*control_ptr(ctx, index).cast::<NumValue>()).lanes)
            }
            Inst::LoadControlActive(index) => {
                Slot::Bool((*control_ptr(ctx, index).cast::<NumValue>()).active)
            }
            Inst::StoreControl {
                index,
                value,
                active,
                guard,
            } => {
                if scratch.guard(guard) {
                    let slot = &mut *control_ptr(ctx, index).cast::<NumValue>();
                    slot.lanes = scratch.vec4(value);
                    slot.active = active.is_some_and(|a| scratch.flag(a));
                }
                Slot::Unit
            }
            Inst::MidiControl(index) => Slot::Midi(control_ptr(ctx, index).cast()),
            Inst::MidiActive(m) => {
                let buffer = scratch.midi(m);
                Slot::Bool(buffer.as_ref().is_some_and(|b| !b.is_empty()))
            }
            Inst::MidiCopy {
                index,
                source,
                guard,
            } => {
                let dst = control_ptr(ctx, index).cast::<MidiBuffer>();
                helpers::voltage_midi_merge(dst, scratch.midi(source), scratch.guard(guard) as u32);
                Slot::Unit
            }
            Inst::Call {
                intrinsic,
                midi,
                state,
                guard,
            } => {
                let buffer = midi.map_or(std::ptr::null_mut(), |m| scratch.midi(m));
                let state = ctx.state.add(state as usize);
                let enabled = scratch.guard(guard) as u32;
                let mut out = [0.0f32; 4];
                let out_ptr = out.as_mut_ptr();
                match intrinsic {
                    Intrinsic::Noise => helpers::voltage_noise(buffer, 0, state, out_ptr, enabled),
                    Intrinsic::MidiNote => {
                        helpers::voltage_midi_note(buffer, 0, state, out_ptr, enabled)
                    }
                    Intrinsic::MidiCc(n) => {
                        helpers::voltage_midi_cc(buffer, n as u32, state, out_ptr, enabled)
                    }
                }
                Slot::Vec4(out)
            }
        };
        scratch.slots.push(slot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::builder::Builder;
    use crate::codegen::ir::BinaryOp;

    fn run_once(func: &Function, state: &mut [u64], controls: &[*mut u8]) {
        let ctx = UnitContext {
            state: state.as_mut_ptr().cast(),
            controls: controls.as_ptr(),
            sample_rate: 48000.0,
        };
        let mut scratch = Scratch::new();
        unsafe { run(func, &ctx, &mut scratch) };
    }

    #[test]
    fn adds_control_to_constant() {
        let mut b = Builder::new();
        let input = b.load_control(0);
        let active = b.load_control_active(0);
        let one = b.splat(1.0);
        let sum = b.binary(BinaryOp::Add, input, one);
        b.store_control(1, sum, Some(active));
        let (func, _) = b.finish();

        let mut a = NumValue::new([1.0, 2.0, 3.0, 4.0]);
        a.active = true;
        let mut out = NumValue::default();
        let controls = [
            (&mut a as *mut NumValue).cast::<u8>(),
            (&mut out as *mut NumValue).cast::<u8>(),
        ];
        run_once(&func, &mut [], &controls);
        assert_eq!(out.lanes, [2.0, 3.0, 4.0, 5.0]);
        assert!(out.active);
    }

    #[test]
    fn guarded_store_is_skipped() {
        let mut b = Builder::new();
        let gate = b.load_control_active(0);
        let v = b.splat(7.0);
        b.push_guard(gate);
        b.store_state(0, v);
        b.pop_guard();
        let (func, size) = b.finish();
        assert_eq!(size, 0);

        let mut input = NumValue::default();
        let controls = [(&mut input as *mut NumValue).cast::<u8>()];
        let mut state = [0u64; 2];
        run_once(&func, &mut state, &controls);
        assert_eq!(state, [0, 0]);

        input.active = true;
        run_once(&func, &mut state, &controls);
        let lanes: [f32; 4] = unsafe { state.as_ptr().cast::<[f32; 4]>().read() };
        assert_eq!(lanes, [7.0; 4]);
    }

    #[test]
    fn sample_rate_is_broadcast() {
        let mut b = Builder::new();
        let sr = b.sample_rate();
        b.store_state(0, sr);
        let (func, _) = b.finish();
        let mut state = [0u64; 2];
        run_once(&func, &mut state, &[]);
        let lanes: [f32; 4] = unsafe { state.as_ptr().cast::<[f32; 4]>().read() };
        assert_eq!(lanes, [48000.0; 4]);
    }
}
