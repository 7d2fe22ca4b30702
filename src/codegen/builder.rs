//! IR construction.

use super::ir::{
    eval_binary, eval_unary, map_lanes, ordered_non_zero, zip_lanes, BinaryOp, Function, Inst, Intrinsic, Ty,
    UnaryOp, ValueId,
};

/// Appends instructions to a [`Function`].
///
/// Lane-wise operations on constants are folded at build time, so the
/// constness of a value can be queried with [`Builder::const_value`]. Stores
/// pick up the innermost guard pushed with [`Builder::push_guard`].
#[derive(Debug, Default)]
pub struct Builder {
    func: Function,
    consts: Vec<Option<[f32; 4]>>,
    flags: Vec<Option<bool>>,
    guards: Vec<ValueId>,
    state_size: u32,
}

const STATE_ALIGN: u32 = 16;

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, inst: Inst, ty: Ty) -> ValueId {
        let id = ValueId(self.func.insts.len() as u32);
        let constant = match &inst {
            Inst::Const(lanes) => Some(*lanes),
            _ => None,
        };
        let flag = match &inst {
            Inst::Flag(b) => Some(*b),
            _ => None,
        };
        self.func.insts.push(inst);
        self.func.types.push(ty);
        self.consts.push(constant);
        self.flags.push(flag);
        id
    }

    pub fn ty(&self, value: ValueId) -> Ty {
        self.func.ty(value)
    }

    pub fn const_value(&self, value: ValueId) -> Option<[f32; 4]> {
        self.consts[value.index()]
    }

    pub fn const_flag(&self, value: ValueId) -> Option<bool> {
        self.flags[value.index()]
    }

    pub fn constant(&mut self, lanes: [f32; 4]) -> ValueId {
        self.push(Inst::Const(lanes), Ty::Vec4)
    }

    pub fn splat(&mut self, x: f32) -> ValueId {
        self.constant([x; 4])
    }

    pub fn flag(&mut self, b: bool) -> ValueId {
        self.push(Inst::Flag(b), Ty::Bool)
    }

    pub fn unary(&mut self, op: UnaryOp, x: ValueId) -> ValueId {
        match self.const_value(x) {
            Some(lanes) => self.constant(map_lanes(lanes, |v| eval_unary(op, v))),
            None => self.push(Inst::Unary(op, x), Ty::Vec4),
        }
    }

    pub fn binary(&mut self, op: BinaryOp, a: ValueId, b: ValueId) -> ValueId {
        match (self.const_value(a), self.const_value(b)) {
            (Some(x), Some(y)) => self.constant(zip_lanes(x, y, |p, q| eval_binary(op, p, q))),
            _ => self.push(Inst::Binary(op, a, b), Ty::Vec4),
        }
    }

    pub fn shuffle(&mut self, lanes: [(ValueId, u8); 4]) -> ValueId {
        let folded: Option<Vec<f32>> = lanes
            .iter()
            .map(|&(v, i)| self.const_value(v).map(|c| c[i as usize]))
            .collect();
        match folded {
            Some(v) => self.constant([v[0], v[1], v[2], v[3]]),
            None => self.push(Inst::Shuffle(lanes), Ty::Vec4),
        }
    }

    /// Broadcast one lane of `x` to all four lanes.
    pub fn broadcast_lane(&mut self, x: ValueId, lane: u8) -> ValueId {
        self.shuffle([(x, lane); 4])
    }

    pub fn lane_non_zero(&mut self, x: ValueId, lane: u8) -> ValueId {
        match self.const_value(x) {
            Some(c) => self.flag(ordered_non_zero(c[lane as usize])),
            None => self.push(Inst::LaneNonZero(x, lane), Ty::Bool),
        }
    }

    pub fn flag_and(&mut self, a: ValueId, b: ValueId) -> ValueId {
        match (self.const_flag(a), self.const_flag(b)) {
            (Some(false), _) | (_, Some(false)) => self.flag(false),
            (Some(true), _) => b,
            (_, Some(true)) => a,
            _ => self.push(Inst::FlagAnd(a, b), Ty::Bool),
        }
    }

    pub fn flag_or(&mut self, a: ValueId, b: ValueId) -> ValueId {
        match (self.const_flag(a), self.const_flag(b)) {
            (Some(true), _) | (_, Some(true)) => self.flag(true),
            (Some(false), _) => b,
            (_, Some(false)) => a,
            _ => self.push(Inst::FlagOr(a, b), Ty::Bool),
        }
    }

    pub fn flag_not(&mut self, a: ValueId) -> ValueId {
        match self.const_flag(a) {
            Some(b) => self.flag(!b),
            None => self.push(Inst::FlagNot(a), Ty::Bool),
        }
    }

    pub fn flag_to_num(&mut self, a: ValueId) -> ValueId {
        match self.const_flag(a) {
            Some(b) => self.splat(if b { 1.0 } else { 0.0 }),
            None => self.push(Inst::FlagToNum(a), Ty::Vec4),
        }
    }

    /// Pick `then_value` or `else_value`; both must have the same type.
    pub fn select(&mut self, condition: ValueId, then_value: ValueId, else_value: ValueId) -> ValueId {
        if then_value == else_value {
            return then_value;
        }
        match self.const_flag(condition) {
            Some(true) => then_value,
            Some(false) => else_value,
            None => {
                let ty = self.ty(then_value);
                self.push(
                    Inst::Select {
                        condition,
                        then_value,
                        else_value,
                    },
                    ty,
                )
            }
        }
    }

    pub fn sample_rate(&mut self) -> ValueId {
        self.push(Inst::SampleRate, Ty::Vec4)
    }

    /// Reserve `bytes` of persistent per-unit state, returning its offset.
    pub fn alloc_state(&mut self, bytes: u32) -> u32 {
        let offset = self.state_size;
        self.state_size += bytes.div_ceil(STATE_ALIGN) * STATE_ALIGN;
        offset
    }

    pub fn load_state(&mut self, offset: u32) -> ValueId {
        self.push(Inst::LoadState(offset), Ty::Vec4)
    }

    pub fn store_state(&mut self, offset: u32, value: ValueId) -> ValueId {
        let guard = self.current_guard();
        self.push(
            Inst::StoreState {
                offset,
                value,
                guard,
            },
            Ty::Unit,
        )
    }

    pub fn load_control(&mut self, index: u32) -> ValueId {
        self.push(Inst::LoadControl(index), Ty::Vec4)
    }

    pub fn load_control_active(&mut self, index: u32) -> ValueId {
        self.push(Inst::LoadControlActive(index), Ty::Bool)
    }

    pub fn store_control(&mut self, index: u32, value: ValueId, active: Option<ValueId>) -> ValueId {
        let guard = self.current_guard();
        self.push(
            Inst::StoreControl {
                index,
                value,
                active,
                guard,
            },
            Ty::Unit,
        )
    }

    pub fn midi_control(&mut self, index: u32) -> ValueId {
        self.push(Inst::MidiControl(index), Ty::Midi)
    }

    pub fn midi_active(&mut self, midi: ValueId) -> ValueId {
        self.push(Inst::MidiActive(midi), Ty::Bool)
    }

    pub fn midi_copy(&mut self, index: u32, source: ValueId) -> ValueId {
        let guard = self.current_guard();
        self.push(
            Inst::MidiCopy {
                index,
                source,
                guard,
            },
            Ty::Unit,
        )
    }

    pub fn call(&mut self, intrinsic: Intrinsic, midi: Option<ValueId>, state: u32) -> ValueId {
        let guard = self.current_guard();
        self.push(
            Inst::Call {
                intrinsic,
                midi,
                state,
                guard,
            },
            Ty::Vec4,
        )
    }

    /// Restrict subsequent stores to when `condition` holds.
    pub fn push_guard(&mut self, condition: ValueId) {
        let guard = match self.guards.last() {
            Some(&outer) => self.flag_and(outer, condition),
            None => condition,
        };
        self.guards.push(guard);
    }

    pub fn pop_guard(&mut self) {
        self.guards.pop();
    }

    pub fn current_guard(&self) -> Option<ValueId> {
        let guard = *self.guards.last()?;
        match self.const_flag(guard) {
            Some(true) => None,
            _ => Some(guard),
        }
    }

    pub fn state_size(&self) -> u32 {
        self.state_size
    }

    pub fn finish(self) -> (Function, u32) {
        (self.func, self.state_size)
    }
}
