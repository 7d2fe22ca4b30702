//! The tick side of the runtime.
//!
//! A [`Processor`] is moved to the audio thread. It never compiles or
//! allocates on the steady path: it picks up published programs, applies
//! queued commands and runs units frame by frame.

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer, Producer};
use ringbuf::{HeapCons, HeapProd};

use crate::dsl::ast::ValueKind;
use crate::jit::{Scratch, UnitContext};

use super::program::Program;
use super::value::{ControlValue, MidiBuffer, MidiEvent, NumValue};

/// Commands sent from the editing side to the processor.
#[derive(Debug, Clone, Copy)]
pub enum TickCommand {
    SetNum { group: u64, value: [f32; 4] },
    PushMidi { group: u64, event: MidiEvent },
}

/// A numeric group whose value changed, sent back after each call to
/// [`Processor::process`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlUpdate {
    pub group: u64,
    pub value: [f32; 4],
}

pub struct Processor {
    shared: Arc<ArcSwap<Program>>,
    current: Arc<Program>,
    state: Vec<u64>,
    scratch: Scratch,
    control_ptrs: Vec<*mut u8>,
    commands: HeapCons<TickCommand>,
    updates: HeapProd<ControlUpdate>,
    retired: HeapProd<Arc<Program>>,
    /// A replaced program the retired ring had no room for.
    retiring: Option<Arc<Program>>,
    /// MIDI events that did not fit this frame's buffer.
    pending: VecDeque<(u64, MidiEvent)>,
    /// Last value sent for each group, indexed like `current.groups`.
    published: Vec<[f32; 4]>,
    sample_rate: f32,
}

// SAFETY: the raw pointers in `control_ptrs` only ever point into `state`
// and are rebuilt before every unit runs.
unsafe impl Send for Processor {}

const PENDING_CAPACITY: usize = 256;

impl Processor {
    pub(crate) fn new(
        shared: Arc<ArcSwap<Program>>,
        commands: HeapCons<TickCommand>,
        updates: HeapProd<ControlUpdate>,
        retired: HeapProd<Arc<Program>>,
        sample_rate: f32,
    ) -> Self {
        Self {
            current: Arc::new(Program::empty()),
            shared,
            state: Vec::new(),
            scratch: Scratch::new(),
            control_ptrs: Vec::new(),
            commands,
            updates,
            retired,
            retiring: None,
            pending: VecDeque::with_capacity(PENDING_CAPACITY),
            published: Vec::new(),
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Run `frames` frames of the latest published program.
    pub fn process(&mut self, frames: usize) {
        if let Some(program) = self.retiring.take() {
            if let Err(program) = self.retired.try_push(program) {
                self.retiring = Some(program);
            }
        }
        // Stay on the current program until the previous one is handed off.
        if self.retiring.is_none() {
            let latest = self.shared.load_full();
            if !Arc::ptr_eq(&latest, &self.current) {
                self.migrate(latest);
            }
        }
        for _ in 0..frames {
            self.drain_commands();
            self.deliver_pending();
            self.run_frame();
            self.clear_transients();
        }
        self.publish_updates();
    }

    /// Address of a schematic's region in the state block.
    pub fn value_ptr(&mut self, runtime_id: u64) -> Option<*mut u8> {
        let region = self.current.region(runtime_id)?;
        let parent = match region.parent {
            Some(parent) => self.value_ptr(parent)?,
            None => self.state.as_mut_ptr().cast::<u8>(),
        };
        Some(region.value_ptr(parent))
    }

    /// Current value of a numeric group.
    pub fn read_group(&self, group: u64) -> Option<NumValue> {
        let slot = self.current.group(group)?;
        if slot.kind != ValueKind::Num {
            return None;
        }
        // SAFETY: the slot lies inside the state block sized for `current`.
        unsafe {
            let base = self.state.as_ptr().cast::<u8>();
            Some(base.add(slot.offset).cast::<NumValue>().read())
        }
    }

    /// Move to a new program, keeping the state of units that did not
    /// change and the values of groups that still exist.
    fn migrate(&mut self, next: Arc<Program>) {
        let mut state = vec![0u64; next.state_size().div_ceil(8)];
        let new_base = state.as_mut_ptr().cast::<u8>();
        let old_base = self.state.as_ptr().cast::<u8>();

        for entry in &next.units {
            let kept = self
                .current
                .units
                .iter()
                .find(|old| old.runtime_id == entry.runtime_id && Arc::ptr_eq(&old.unit, &entry.unit));
            if let Some(old) = kept {
                let size = entry.unit.state_size() as usize;
                // SAFETY: both ranges lie inside their state blocks.
                unsafe {
                    std::ptr::copy_nonoverlapping(
                        old_base.add(old.state_offset),
                        new_base.add(entry.state_offset),
                        size,
                    );
                }
            }
        }

        let mut published = Vec::with_capacity(next.groups.len());
        for group in &next.groups {
            // SAFETY: group slots are aligned and sized for their kind.
            unsafe {
                let dst = new_base.add(group.offset);
                match self.current.group(group.id) {
                    Some(old) if old.kind == group.kind => {
                        let size = super::value::slot_size(group.kind);
                        std::ptr::copy_nonoverlapping(old_base.add(old.offset), dst, size);
                    }
                    _ => match group.initial {
                        ControlValue::Num(value) => dst.cast::<NumValue>().write(value),
                        ControlValue::Midi => dst.cast::<MidiBuffer>().write(MidiBuffer::default()),
                    },
                }
                published.push(match group.kind {
                    ValueKind::Num => dst.cast::<NumValue>().read().lanes,
                    ValueKind::Midi => [0.0; 4],
                });
            }
        }

        self.state = state;
        self.published = published;
        let previous = std::mem::replace(&mut self.current, next);
        if let Err(previous) = self.retired.try_push(previous) {
            self.retiring = Some(previous);
        }
    }

    /// Apply queued commands. Commands stay in the ring while the pending
    /// MIDI queue is full, so the editing side sees `QueueFull` instead of
    /// events being lost.
    fn drain_commands(&mut self) {
        while self.pending.len() < PENDING_CAPACITY {
            let Some(command) = self.commands.try_pop() else {
                break;
            };
            match command {
                TickCommand::SetNum { group, value } => {
                    if let Some(slot) = self.current.group(group) {
                        if slot.kind == ValueKind::Num {
                            // SAFETY: the slot lies inside the state block.
                            unsafe {
                                let ptr = self.state.as_mut_ptr().cast::<u8>().add(slot.offset);
                                let num = &mut *ptr.cast::<NumValue>();
                                num.lanes = value;
                                num.active = true;
                            }
                        }
                    }
                }
                TickCommand::PushMidi { group, event } => {
                    self.pending.push_back((group, event));
                }
            }
        }
    }

    fn deliver_pending(&mut self) {
        let program = &self.current;
        let base = self.state.as_mut_ptr().cast::<u8>();
        self.pending.retain(|(group, event)| {
            let Some(slot) = program.group(*group) else {
                return false;
            };
            if slot.kind != ValueKind::Midi {
                return false;
            }
            // SAFETY: the slot lies inside the state block.
            let buffer = unsafe { &mut *base.add(slot.offset).cast::<MidiBuffer>() };
            !buffer.push(*event)
        });
    }

    fn run_frame(&mut self) {
        let base = self.state.as_mut_ptr().cast::<u8>();
        for entry in &self.current.units {
            self.control_ptrs.clear();
            // SAFETY: offsets come from the layout of `current`.
            self.control_ptrs
                .extend(entry.control_offsets.iter().map(|o| unsafe { base.add(*o) }));
            let ctx = UnitContext {
                state: unsafe { base.add(entry.state_offset) },
                controls: self.control_ptrs.as_ptr(),
                sample_rate: self.sample_rate,
            };
            // SAFETY: the context matches the unit's layout.
            unsafe { entry.unit.run(&ctx, &mut self.scratch) };
        }
    }

    fn clear_transients(&mut self) {
        let base = self.state.as_mut_ptr().cast::<u8>();
        for group in &self.current.groups {
            // SAFETY: the slot lies inside the state block.
            unsafe {
                let ptr = base.add(group.offset);
                match group.kind {
                    ValueKind::Num => (*ptr.cast::<NumValue>()).active = false,
                    ValueKind::Midi => (*ptr.cast::<MidiBuffer>()).clear(),
                }
            }
        }
    }

    fn publish_updates(&mut self) {
        for (i, group) in self.current.groups.iter().enumerate() {
            if group.kind != ValueKind::Num {
                continue;
            }
            let Some(value) = self.read_group(group.id).map(|v| v.lanes) else {
                continue;
            };
            if self.published.get(i) == Some(&value) {
                continue;
            }
            let update = ControlUpdate {
                group: group.id,
                value,
            };
            if self.updates.try_push(update).is_err() {
                break;
            }
            if let Some(p) = self.published.get_mut(i) {
                *p = value;
            }
        }
    }

    /// Whether `group` has a slot in the running program.
    pub fn has_group(&self, group: u64) -> bool {
        self.current.group_position(group).is_some()
    }
}
