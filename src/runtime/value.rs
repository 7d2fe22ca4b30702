//! Memory layout of control slots.
//!
//! These types are shared between compiled code and the host, so they are
//! `#[repr(C)]` and every all-zero bit pattern is a valid value.

use std::mem::{offset_of, size_of};

use crate::dsl::ast::ValueKind;

/// A numeric control slot.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct NumValue {
    pub lanes: [f32; 4],
    /// Written this tick. Cleared by the processor after every frame.
    pub active: bool,
}

impl NumValue {
    pub const ACTIVE_OFFSET: usize = offset_of!(NumValue, active);

    pub fn splat(x: f32) -> Self {
        Self {
            lanes: [x; 4],
            active: false,
        }
    }

    pub fn new(lanes: [f32; 4]) -> Self {
        Self {
            lanes,
            active: false,
        }
    }
}

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MidiEventKind {
    #[default]
    NoteOn = 0,
    NoteOff = 1,
    ControlChange = 2,
    PitchBend = 3,
}

/// One MIDI message. `param` is normalized to `0..=1` (velocity, controller
/// value, or bend with 0.5 at rest).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MidiEvent {
    pub kind: MidiEventKind,
    pub channel: u8,
    /// Note number, or controller number for `ControlChange`.
    pub note: u8,
    pub param: f32,
    /// Sample offset within the tick.
    pub time: u32,
}

impl MidiEvent {
    pub fn note_on(channel: u8, note: u8, velocity: f32) -> Self {
        Self {
            kind: MidiEventKind::NoteOn,
            channel,
            note,
            param: velocity,
            time: 0,
        }
    }

    pub fn note_off(channel: u8, note: u8) -> Self {
        Self {
            kind: MidiEventKind::NoteOff,
            channel,
            note,
            param: 0.0,
            time: 0,
        }
    }

    pub fn control_change(channel: u8, controller: u8, value: f32) -> Self {
        Self {
            kind: MidiEventKind::ControlChange,
            channel,
            note: controller,
            param: value,
            time: 0,
        }
    }

    /// Decode a raw three-byte channel message.
    pub fn from_bytes(bytes: [u8; 3]) -> Option<Self> {
        let channel = bytes[0] & 0x0f;
        let data1 = bytes[1] & 0x7f;
        let data2 = bytes[2] & 0x7f;
        let scaled = data2 as f32 / 127.0;
        match bytes[0] & 0xf0 {
            0x80 => Some(Self::note_off(channel, data1)),
            0x90 if data2 == 0 => Some(Self::note_off(channel, data1)),
            0x90 => Some(Self::note_on(channel, data1, scaled)),
            0xb0 => Some(Self::control_change(channel, data1, scaled)),
            0xe0 => {
                let bend = ((data2 as u16) << 7 | data1 as u16) as f32 / 16383.0;
                Some(Self {
                    kind: MidiEventKind::PitchBend,
                    channel,
                    note: 0,
                    param: bend,
                    time: 0,
                })
            }
            _ => None,
        }
    }
}

pub const MIDI_BUFFER_CAPACITY: usize = 16;

/// A MIDI control slot: the events received during the current tick.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MidiBuffer {
    pub count: u32,
    pub events: [MidiEvent; MIDI_BUFFER_CAPACITY],
}

impl MidiBuffer {
    /// Append an event, returning `false` when the buffer is full.
    pub fn push(&mut self, event: MidiEvent) -> bool {
        let count = self.count as usize;
        if count >= MIDI_BUFFER_CAPACITY {
            return false;
        }
        self.events[count] = event;
        self.count += 1;
        true
    }

    pub fn events(&self) -> &[MidiEvent] {
        &self.events[..(self.count as usize).min(MIDI_BUFFER_CAPACITY)]
    }

    /// Append as many events of `other` as fit.
    pub fn merge(&mut self, other: &MidiBuffer) {
        for event in other.events() {
            if !self.push(*event) {
                break;
            }
        }
    }

    pub fn clear(&mut self) {
        self.count = 0;
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// The cached value of a control as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlValue {
    Num(NumValue),
    Midi,
}

impl ControlValue {
    pub fn default_for(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Num => ControlValue::Num(NumValue::default()),
            ValueKind::Midi => ControlValue::Midi,
        }
    }

    pub fn as_num(&self) -> Option<NumValue> {
        match self {
            ControlValue::Num(v) => Some(*v),
            ControlValue::Midi => None,
        }
    }
}

/// Slot alignment inside the state block.
pub const SLOT_ALIGN: usize = 8;

pub const fn align_up(size: usize, align: usize) -> usize {
    size.div_ceil(align) * align
}

/// Bytes reserved for a control slot of the given kind.
pub const fn slot_size(kind: ValueKind) -> usize {
    match kind {
        ValueKind::Num => align_up(size_of::<NumValue>(), SLOT_ALIGN),
        ValueKind::Midi => align_up(size_of::<MidiBuffer>(), SLOT_ALIGN),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layouts_are_stable() {
        assert_eq!(NumValue::ACTIVE_OFFSET, 16);
        assert_eq!(size_of::<MidiEvent>(), 12);
        assert_eq!(offset_of!(MidiEvent, param), 4);
        assert_eq!(offset_of!(MidiBuffer, events), 4);
        assert_eq!(slot_size(ValueKind::Num), 24);
        assert_eq!(slot_size(ValueKind::Midi), 200);
    }

    #[test]
    fn buffer_drops_overflow() {
        let mut buffer = MidiBuffer::default();
        for note in 0..20 {
            buffer.push(MidiEvent::note_on(0, note, 1.0));
        }
        assert_eq!(buffer.events().len(), MIDI_BUFFER_CAPACITY);
        assert_eq!(buffer.events()[15].note, 15);
    }

    #[test]
    fn decode_raw_messages() {
        let on = MidiEvent::from_bytes([0x91, 60, 127]).unwrap();
        assert_eq!(on.kind, MidiEventKind::NoteOn);
        assert_eq!(on.channel, 1);
        assert_eq!(on.param, 1.0);

        let silent = MidiEvent::from_bytes([0x90, 60, 0]).unwrap();
        assert_eq!(silent.kind, MidiEventKind::NoteOff);

        let cc = MidiEvent::from_bytes([0xb0, 7, 0]).unwrap();
        assert_eq!(cc.kind, MidiEventKind::ControlChange);
        assert_eq!(cc.note, 7);

        assert!(MidiEvent::from_bytes([0xf8, 0, 0]).is_none());
    }
}
