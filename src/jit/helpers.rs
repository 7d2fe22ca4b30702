//! Out-of-line routines called from compiled units.
//!
//! Native code links against the `extern "C"` entry points below by name.
//! The interpreter calls the same routines so both backends agree
//! bit-for-bit on stateful builtins.

use crate::runtime::value::{MidiBuffer, MidiEventKind};

pub extern "C" fn voltage_sinf(x: f32) -> f32 {
    x.sin()
}

pub extern "C" fn voltage_cosf(x: f32) -> f32 {
    x.cos()
}

pub extern "C" fn voltage_tanf(x: f32) -> f32 {
    x.tan()
}

pub extern "C" fn voltage_expf(x: f32) -> f32 {
    x.exp()
}

pub extern "C" fn voltage_logf(x: f32) -> f32 {
    x.ln()
}

pub extern "C" fn voltage_tanhf(x: f32) -> f32 {
    x.tanh()
}

pub extern "C" fn voltage_powf(a: f32, b: f32) -> f32 {
    a.powf(b)
}

pub extern "C" fn voltage_atan2f(y: f32, x: f32) -> f32 {
    y.atan2(x)
}

pub extern "C" fn voltage_fmodf(a: f32, b: f32) -> f32 {
    a % b
}

const NOISE_SEEDS: [u32; 4] = [0x9e37_79b9, 0x85eb_ca6b, 0xc2b2_ae35, 0x27d4_eb2f];

/// Advance four xorshift32 generators, one per lane, yielding `[-1, 1)`.
pub fn noise(state: &mut [u32; 4]) -> [f32; 4] {
    let mut out = [0.0; 4];
    for (lane, x) in state.iter_mut().enumerate() {
        if *x == 0 {
            *x = NOISE_SEEDS[lane];
        }
        *x ^= *x << 13;
        *x ^= *x >> 17;
        *x ^= *x << 5;
        out[lane] = (*x >> 8) as f32 / (1u32 << 23) as f32 - 1.0;
    }
    out
}

/// Track the most recent note. State and result are `[note, gate, velocity, 0]`.
pub fn midi_note(buffer: &MidiBuffer, state: &mut [f32; 4]) -> [f32; 4] {
    for event in buffer.events() {
        let note = event.note as f32;
        match event.kind {
            MidiEventKind::NoteOn if event.param > 0.0 => {
                *state = [note, 1.0, event.param, 0.0];
            }
            MidiEventKind::NoteOn | MidiEventKind::NoteOff => {
                if state[0] == note {
                    state[1] = 0.0;
                }
            }
            _ => {}
        }
    }
    *state
}

/// Latest value of `controller`, broadcast to all lanes.
pub fn midi_cc(buffer: &MidiBuffer, controller: u8, state: &mut [f32; 4]) -> [f32; 4] {
    for event in buffer.events() {
        if event.kind == MidiEventKind::ControlChange && event.note == controller {
            *state = [event.param; 4];
        }
    }
    *state
}

/// Stateful intrinsics leave their state untouched when `enabled` is zero.
///
/// # Safety
///
/// `state` must point to 16 writable, 4-byte aligned bytes and `out` to four
/// writable `f32`s.
pub unsafe extern "C" fn voltage_noise(
    _midi: *const MidiBuffer,
    _param: u32,
    state: *mut u8,
    out: *mut f32,
    enabled: u32,
) {
    let lanes = if enabled == 0 {
        [0.0; 4]
    } else {
        noise(&mut *state.cast::<[u32; 4]>())
    };
    out.cast::<[f32; 4]>().write(lanes);
}

/// # Safety
///
/// As [`voltage_noise`]; `midi` must be null or point to a valid buffer.
pub unsafe extern "C" fn voltage_midi_note(
    midi: *const MidiBuffer,
    _param: u32,
    state: *mut u8,
    out: *mut f32,
    enabled: u32,
) {
    let state = &mut *state.cast::<[f32; 4]>();
    let lanes = match midi.as_ref().filter(|_| enabled != 0) {
        Some(buffer) => midi_note(buffer, state),
        None => *state,
    };
    out.cast::<[f32; 4]>().write(lanes);
}

/// # Safety
///
/// As [`voltage_midi_note`].
pub unsafe extern "C" fn voltage_midi_cc(
    midi: *const MidiBuffer,
    param: u32,
    state: *mut u8,
    out: *mut f32,
    enabled: u32,
) {
    let state = &mut *state.cast::<[f32; 4]>();
    let lanes = match midi.as_ref().filter(|_| enabled != 0) {
        Some(buffer) => midi_cc(buffer, param as u8, state),
        None => *state,
    };
    out.cast::<[f32; 4]>().write(lanes);
}

/// Append the events of `src` to `dst` when `enabled` is non-zero.
///
/// # Safety
///
/// Both pointers must be null or point to valid buffers.
pub unsafe extern "C" fn voltage_midi_merge(dst: *mut MidiBuffer, src: *const MidiBuffer, enabled: u32) {
    if enabled == 0 || std::ptr::eq(dst, src) {
        return;
    }
    if let (Some(dst), Some(src)) = (dst.as_mut(), src.as_ref()) {
        dst.merge(src);
    }
}

/// Symbol table handed to the native linker.
#[cfg_attr(not(feature = "jit"), allow(dead_code))]
pub(crate) fn symbols() -> Vec<(&'static str, *const u8)> {
    vec![
        ("voltage_sinf", voltage_sinf as *const u8),
        ("voltage_cosf", voltage_cosf as *const u8),
        ("voltage_tanf", voltage_tanf as *const u8),
        ("voltage_expf", voltage_expf as *const u8),
        ("voltage_logf", voltage_logf as *const u8),
        ("voltage_tanhf", voltage_tanhf as *const u8),
        ("voltage_powf", voltage_powf as *const u8),
        ("voltage_atan2f", voltage_atan2f as *const u8),
        ("voltage_fmodf", voltage_fmodf as *const u8),
        ("voltage_noise", voltage_noise as *const u8),
        ("voltage_midi_note", voltage_midi_note as *const u8),
        ("voltage_midi_cc", voltage_midi_cc as *const u8),
        ("voltage_midi_merge", voltage_midi_merge as *const u8),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::value::MidiEvent;

    #[test]
    fn noise_stays_in_range_and_is_deterministic() {
        let mut a = [0u32; 4];
        let mut b = [0u32; 4];
        for _ in 0..1000 {
            let x = noise(&mut a);
            assert_eq!(x, noise(&mut b));
            for lane in x {
                assert!((-1.0..1.0).contains(&lane));
            }
        }
        let lanes = noise(&mut a);
        assert_ne!(lanes[0], lanes[1]);
    }

    #[test]
    fn note_tracks_latest_and_releases_on_matching_off() {
        let mut state = [0.0; 4];
        let mut buffer = MidiBuffer::default();
        buffer.push(MidiEvent::note_on(0, 60, 0.5));
        buffer.push(MidiEvent::note_on(0, 64, 1.0));
        assert_eq!(midi_note(&buffer, &mut state), [64.0, 1.0, 1.0, 0.0]);

        buffer.clear();
        buffer.push(MidiEvent::note_off(0, 60));
        assert_eq!(midi_note(&buffer, &mut state)[1], 1.0);

        buffer.clear();
        buffer.push(MidiEvent::note_on(0, 64, 0.0));
        assert_eq!(midi_note(&buffer, &mut state), [64.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn cc_filters_by_controller() {
        let mut state = [0.0; 4];
        let mut buffer = MidiBuffer::default();
        buffer.push(MidiEvent::control_change(0, 7, 0.25));
        buffer.push(MidiEvent::control_change(0, 1, 0.75));
        assert_eq!(midi_cc(&buffer, 7, &mut state), [0.25; 4]);
        buffer.clear();
        assert_eq!(midi_cc(&buffer, 7, &mut state), [0.25; 4]);
    }

    #[test]
    fn merge_respects_enable_flag() {
        let mut dst = MidiBuffer::default();
        let mut src = MidiBuffer::default();
        src.push(MidiEvent::note_on(0, 60, 1.0));
        unsafe {
            voltage_midi_merge(&mut dst, &src, 0);
            assert!(dst.is_empty());
            voltage_midi_merge(&mut dst, &src, 1);
        }
        assert_eq!(dst.events().len(), 1);
    }

    #[test]
    fn disabled_calls_keep_state() {
        let mut seeds = [0u32; 4];
        let mut out = [1.0f32; 4];
        let mut buffer = MidiBuffer::default();
        buffer.push(MidiEvent::note_on(0, 60, 1.0));
        unsafe {
            voltage_noise(std::ptr::null(), 0, seeds.as_mut_ptr().cast(), out.as_mut_ptr(), 0);
            assert_eq!(seeds, [0; 4]);
            assert_eq!(out, [0.0; 4]);

            let mut note = [0.0f32; 4];
            voltage_midi_note(&buffer, 0, note.as_mut_ptr().cast(), out.as_mut_ptr(), 0);
            assert_eq!(note, [0.0; 4]);
            voltage_midi_note(&buffer, 0, note.as_mut_ptr().cast(), out.as_mut_ptr(), 1);
            assert_eq!(note, [60.0, 1.0, 1.0, 0.0]);
            assert_eq!(out, note);
        }
    }
}
