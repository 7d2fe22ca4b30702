//! MIDI decoding builtins.

use crate::codegen::builder::Builder;
use crate::codegen::ir::Intrinsic;
use crate::codegen::value::{Midi, Value};
use crate::dsl::ast::ValueKind;
use crate::dsl::error::{CompileError, ErrorKind};

use super::vector::const_lane0;
use super::{num, num_param, CallSite, Function, Library, Parameter, Signature};

fn midi_param(params: &[Option<Value>], site: &CallSite) -> Result<Midi, CompileError> {
    match params.first().copied().flatten() {
        Some(Value::Midi(midi)) => Ok(midi),
        Some(other) => Err(CompileError::mismatch(
            site.name,
            0,
            ValueKind::Midi,
            other.kind(),
            other.range(),
        )),
        None => Err(CompileError::mismatch(
            site.name,
            0,
            ValueKind::Midi,
            ValueKind::Num,
            site.range,
        )),
    }
}

/// `note(m)`: `[note, gate, velocity, 0]` of the most recent note.
struct Note {
    signature: Signature,
}

impl Function for Note {
    fn name(&self) -> &str {
        "note"
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
        let midi = midi_param(&params, site)?;
        let state = b.alloc_state(16);
        Ok(num(b.call(Intrinsic::MidiNote, Some(midi.buffer), state), None, site))
    }
}

/// `cc(m, number)`: latest value of controller `number`, scaled to `0..=1`.
struct Cc {
    signature: Signature,
}

impl Function for Cc {
    fn name(&self) -> &str {
        "cc"
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
        let midi = midi_param(&params, site)?;
        let number = num_param(&params, 1, site)?;
        let controller = const_lane0(b, number.vec).unwrap_or(f32::NAN);
        if !(0.0..=127.0).contains(&controller) || controller.fract() != 0.0 {
            return Err(CompileError::new(
                ErrorKind::OutOfRange {
                    function: site.name.to_string(),
                    index: 1,
                    value: controller,
                    min: 0.0,
                    max: 127.0,
                },
                number.range,
            ));
        }
        let state = b.alloc_state(16);
        let out = b.call(Intrinsic::MidiCc(controller as u8), Some(midi.buffer), state);
        Ok(num(out, None, site))
    }
}

pub(super) fn register(library: &mut Library) {
    library.register(Note {
        signature: Signature::new(vec![Parameter::midi()]),
    });
    library.register(Cc {
        signature: Signature::new(vec![Parameter::midi(), Parameter::num().constant()]),
    });
}

#[cfg(test)]
mod tests {
    use crate::dsl::{Compiler, ErrorKind, ValueKind};
    use crate::library::Library;

    fn compile_err(source: &str) -> ErrorKind {
        Compiler::compile(source, &Library::standard()).unwrap_err().kind
    }

    #[test]
    fn note_reads_a_midi_control() {
        let code = Compiler::compile("n:num = note(keys:midi)", &Library::standard()).unwrap();
        assert_eq!(code.controls[0].name, "keys");
        assert_eq!(code.controls[0].kind, ValueKind::Midi);
        assert!(code.controls[0].read);
        assert_eq!(code.state_size, 16);
    }

    #[test]
    fn note_rejects_numbers() {
        assert!(matches!(compile_err("n:num = note(1)"), ErrorKind::Type { .. }));
    }

    #[test]
    fn cc_number_must_be_constant_in_range() {
        assert!(matches!(
            compile_err("c:num = cc(m:midi, x:num)"),
            ErrorKind::NotConstant { index: 1, .. }
        ));
        assert!(matches!(
            compile_err("c:num = cc(m:midi, 200)"),
            ErrorKind::OutOfRange { index: 1, .. }
        ));
        assert!(Compiler::compile("c:num = cc(m:midi, 74)", &Library::standard()).is_ok());
    }
}
