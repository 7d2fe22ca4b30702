//! Linking lowered units into executable code.
//!
//! A [`Linker`] turns [`UnitCode`] into a [`CompiledUnit`], either by
//! generating machine code with Cranelift (feature `jit`) or by wrapping the
//! IR for the portable interpreter. Both backends share one calling
//! convention: a unit reads and writes memory through a [`UnitContext`].

pub mod helpers;
pub mod interp;
#[cfg(feature = "jit")]
mod native;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::codegen::{ir, ControlMeta, UnitCode};
use crate::dsl::error::CompileError;

pub use interp::Scratch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Jit,
    Interpreter,
}

/// An exclusively owned handle released by `release` exactly once.
///
/// Moving the guard moves ownership. [`Owned::take`] moves the handle out
/// into a new guard and leaves this one null.
pub struct Owned<T> {
    handle: Option<T>,
    release: fn(T),
}

impl<T> Owned<T> {
    pub fn new(handle: T, release: fn(T)) -> Self {
        Self {
            handle: Some(handle),
            release,
        }
    }

    pub fn get(&self) -> Option<&T> {
        self.handle.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut T> {
        self.handle.as_mut()
    }

    pub fn is_null(&self) -> bool {
        self.handle.is_none()
    }

    pub fn take(&mut self) -> Self {
        Self {
            handle: self.handle.take(),
            release: self.release,
        }
    }

    /// Release the handle now. Later calls do nothing.
    pub fn release(&mut self) {
        if let Some(handle) = self.handle.take() {
            (self.release)(handle);
        }
    }
}

impl<T> Drop for Owned<T> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<T> std::fmt::Debug for Owned<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Owned")
            .field("null", &self.is_null())
            .finish()
    }
}

/// What a unit sees while running.
#[repr(C)]
#[derive(Debug)]
pub struct UnitContext {
    /// Start of the unit's own state.
    pub state: *mut u8,
    /// One slot pointer per entry of [`CompiledUnit::controls`].
    pub controls: *const *mut u8,
    pub sample_rate: f32,
}

enum Code {
    #[cfg(feature = "jit")]
    Native {
        entry: native::Entry,
        _module: Owned<cranelift_jit::JITModule>,
    },
    Interpreted(ir::Function),
}

/// Executable code for one schematic.
pub struct CompiledUnit {
    code: Code,
    controls: Vec<ControlMeta>,
    state_size: u32,
}

// SAFETY: the code and IR are immutable once linked and running a unit only
// touches memory passed in through `UnitContext`.
unsafe impl Send for CompiledUnit {}
unsafe impl Sync for CompiledUnit {}

impl CompiledUnit {
    pub fn controls(&self) -> &[ControlMeta] {
        &self.controls
    }

    pub fn state_size(&self) -> u32 {
        self.state_size
    }

    pub fn backend(&self) -> BackendKind {
        match self.code {
            #[cfg(feature = "jit")]
            Code::Native { .. } => BackendKind::Jit,
            Code::Interpreted(_) => BackendKind::Interpreter,
        }
    }

    /// Run one frame.
    ///
    /// # Safety
    ///
    /// `ctx.state` must point to `state_size` bytes aligned to 8, and
    /// `ctx.controls` to one valid slot per control, each sized for its kind.
    pub unsafe fn run(&self, ctx: &UnitContext, scratch: &mut Scratch) {
        match &self.code {
            #[cfg(feature = "jit")]
            Code::Native { entry, .. } => entry(ctx),
            Code::Interpreted(func) => interp::run(func, ctx, scratch),
        }
    }
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("backend", &self.backend())
            .field("controls", &self.controls.len())
            .field("state_size", &self.state_size)
            .finish()
    }
}

/// Links units and hands out runtime ids.
#[derive(Debug)]
pub struct Linker {
    backend: BackendKind,
    next_id: u64,
}

impl Linker {
    pub fn new(requested: BackendKind) -> Self {
        Self {
            backend: resolve_backend(requested),
            next_id: 1,
        }
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// A fresh process-unique runtime id. `0` is never returned.
    pub fn next_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn link(&self, code: &UnitCode) -> Result<CompiledUnit, CompileError> {
        let code_kind = match self.backend {
            #[cfg(feature = "jit")]
            BackendKind::Jit => {
                let (entry, module) = native::compile(&code.function).map_err(|message| {
                    warn!(%message, "native link failed");
                    CompileError::link(message)
                })?;
                Code::Native {
                    entry,
                    _module: module,
                }
            }
            _ => Code::Interpreted(code.function.clone()),
        };
        debug!(
            instructions = code.function.len(),
            state = code.state_size,
            backend = ?self.backend,
            "linked unit"
        );
        Ok(CompiledUnit {
            code: code_kind,
            controls: code.controls.clone(),
            state_size: code.state_size,
        })
    }
}

#[cfg(feature = "jit")]
fn resolve_backend(requested: BackendKind) -> BackendKind {
    match requested {
        BackendKind::Jit if !native::host_supported() => {
            warn!("host ISA is not supported by the JIT, using the interpreter");
            BackendKind::Interpreter
        }
        other => other,
    }
}

#[cfg(not(feature = "jit"))]
fn resolve_backend(requested: BackendKind) -> BackendKind {
    if requested == BackendKind::Jit {
        warn!("built without the `jit` feature, using the interpreter");
    }
    BackendKind::Interpreter
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsl::Compiler;
    use crate::library::Library;
    use crate::runtime::value::NumValue;
    use std::cell::Cell;
    use std::rc::Rc;

    fn bump(counter: Rc<Cell<u32>>) {
        counter.set(counter.get() + 1);
    }

    #[test]
    fn owned_releases_exactly_once() {
        let counter = Rc::new(Cell::new(0));
        let mut a = Owned::new(counter.clone(), bump);
        let mut b = a.take();
        assert!(a.is_null());
        assert!(!b.is_null());
        drop(a);
        assert_eq!(counter.get(), 0);
        b.release();
        b.release();
        drop(b);
        assert_eq!(counter.get(), 1);
    }

    #[test]
    fn ids_start_at_one() {
        let mut linker = Linker::new(BackendKind::Interpreter);
        assert_eq!(linker.next_id(), 1);
        assert_eq!(linker.next_id(), 2);
    }

    fn run_both(source: &str, input: [f32; 4]) -> Vec<NumValue> {
        let library = Library::standard();
        let code = Compiler::compile(source, &library).unwrap();
        let mut results = Vec::new();
        for backend in [BackendKind::Interpreter, BackendKind::Jit] {
            let unit = Linker::new(backend).link(&code).unwrap();
            let mut x = NumValue::new(input);
            x.active = true;
            let mut y = NumValue::default();
            let controls = [
                (&mut x as *mut NumValue).cast::<u8>(),
                (&mut y as *mut NumValue).cast::<u8>(),
            ];
            let mut state = vec![0u64; (unit.state_size() as usize).div_ceil(8)];
            let ctx = UnitContext {
                state: state.as_mut_ptr().cast(),
                controls: controls.as_ptr(),
                sample_rate: 44100.0,
            };
            let mut scratch = Scratch::new();
            unsafe { unit.run(&ctx, &mut scratch) };
            results.push(y);
        }
        results
    }

    #[test]
    fn backends_agree() {
        let results = run_both(
            "y:num = clamp(x:num * 2 - 1, -1, 1) + (x:num > 0.5) + floor(x:num)",
            [0.0, 0.25, 0.75, 3.0],
        );
        assert_eq!(results[0], results[1]);
        assert_eq!(results[0].lanes, [-1.0, -0.5, 1.5, 5.0]);
        assert!(results[0].active);
    }

    #[test]
    fn with_active_gates_on_lane_zero() {
        let off = run_both("y:num = withActive(x:num, x:num)", [0.0, 1.0, 1.0, 1.0]);
        assert!(off.iter().all(|y| !y.active));
        let on = run_both("y:num = withActive(x:num, x:num)", [3.5, 0.0, 0.0, 0.0]);
        assert!(on.iter().all(|y| y.active));
    }
}
