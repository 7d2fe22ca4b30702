//! Live runtime: the editing side ([`Runtime`]) and the tick side
//! ([`Processor`]).
//!
//! The runtime compiles dirty schematics on the editing thread, then
//! publishes an immutable [`Program`] with a single pointer swap. The
//! processor observes a program either entirely or not at all.

pub mod graph;
pub mod processor;
pub mod program;
pub mod transaction;
pub mod value;

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use ringbuf::traits::{Consumer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::dsl::ast::ValueKind;
use crate::jit::Linker;
use crate::library::Library;

pub use graph::{
    Control, ControlGroup, ControlKey, Graph, GraphError, GraphEvent, Schematic, SchematicKey,
    SchematicKind, Status,
};
pub use processor::{ControlUpdate, Processor, TickCommand};
pub use program::{Program, RegionLayout};
pub use transaction::{CompileReport, Transaction};
pub use value::{ControlValue, MidiEvent, NumValue};

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error("control is {found}, expected {expected}")]
    WrongKind { expected: ValueKind, found: ValueKind },
    #[error("command queue is full")]
    QueueFull,
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

const RETIRED_CAPACITY: usize = 16;

pub struct Runtime {
    config: RuntimeConfig,
    graph: Graph,
    linker: Linker,
    shared: Arc<ArcSwap<Program>>,
    commands: HeapProd<TickCommand>,
    updates: HeapCons<ControlUpdate>,
    retired: HeapCons<Arc<Program>>,
}

impl Runtime {
    /// Create a runtime with an empty attached graph, and the processor
    /// that runs it.
    pub fn new(
        config: RuntimeConfig,
        library: Arc<Library>,
    ) -> Result<(Self, Processor), RuntimeError> {
        if config.command_capacity == 0 || config.update_capacity == 0 {
            return Err(RuntimeError::InvalidConfig(
                "queue capacities must be positive".into(),
            ));
        }
        if !config.sample_rate.is_finite() || config.sample_rate <= 0.0 {
            return Err(RuntimeError::InvalidConfig(format!(
                "sample rate must be positive, got {}",
                config.sample_rate
            )));
        }

        let shared = Arc::new(ArcSwap::from_pointee(Program::empty()));
        let (commands, command_rx) = HeapRb::<TickCommand>::new(config.command_capacity).split();
        let (update_tx, updates) = HeapRb::<ControlUpdate>::new(config.update_capacity).split();
        let (retired_tx, retired) = HeapRb::<Arc<Program>>::new(RETIRED_CAPACITY).split();
        let processor = Processor::new(
            shared.clone(),
            command_rx,
            update_tx,
            retired_tx,
            config.sample_rate,
        );

        let mut runtime = Self {
            linker: Linker::new(config.backend),
            config,
            graph: Graph::new(library),
            shared,
            commands,
            updates,
            retired,
        };
        runtime.compile_dirty();
        Ok((runtime, processor))
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Edit the graph. Changes take effect at the next
    /// [`Runtime::compile_dirty`].
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }

    /// Replace the running graph with `graph`, linking all of its code.
    /// The previous graph is detached and dropped.
    pub fn attach(&mut self, mut graph: Graph) -> CompileReport {
        if graph.is_attached() {
            graph.reset_runtime();
        }
        let mut previous = std::mem::replace(&mut self.graph, graph);
        previous.reset_runtime();
        self.compile_dirty()
    }

    /// Take the graph out of the runtime. Its runtime ids are reset to `0`;
    /// an empty graph keeps running in its place.
    pub fn detach(&mut self) -> Graph {
        let library = self.graph.library().clone();
        let mut detached = std::mem::replace(&mut self.graph, Graph::new(library));
        self.compile_dirty();
        detached.reset_runtime();
        detached
    }

    /// Attach new schematics and link every dirty unit. Nothing becomes
    /// visible to the processor until [`Runtime::commit`].
    pub fn build_dirty(&mut self) -> Transaction {
        let mut tx = Transaction::new();
        let root = self.graph.root();
        self.graph.attach_runtime(root, &mut self.linker, &mut tx);
        for key in self.graph.post_order(root) {
            let dirty = self.graph.schematic(key).is_some_and(|s| s.is_dirty());
            if dirty && !tx.contains(key) {
                self.graph.link_into(key, &self.linker, &mut tx);
            }
        }
        tx
    }

    /// Swap the units of `tx` into the graph and publish the result.
    pub fn commit(&mut self, tx: Transaction) -> CompileReport {
        let mut report = CompileReport::default();
        for entry in tx.entries {
            let current = self.graph.schematic(entry.schematic).map(|s| s.generation());
            if current != Some(entry.generation) {
                debug!(generation = entry.generation, "discarding superseded unit");
                if current.is_some() {
                    report.superseded.push(entry.schematic);
                }
                continue;
            }
            match entry.result {
                Ok(unit) => {
                    self.graph.promote(entry.schematic, unit);
                    report.linked.push(entry.schematic);
                }
                Err(error) => {
                    warn!(%error, "unit failed to link");
                    self.graph.fail(entry.schematic, error.clone());
                    report.failed.push((entry.schematic, error));
                }
            }
        }
        if self.graph.layout_dirty() {
            self.publish();
        }
        report
    }

    /// Build and commit in one step.
    pub fn compile_dirty(&mut self) -> CompileReport {
        let started = Instant::now();
        let tx = self.build_dirty();
        let pending = tx.len();
        let report = self.commit(tx);
        if pending > 0 {
            info!(
                linked = report.linked.len(),
                failed = report.failed.len(),
                superseded = report.superseded.len(),
                elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
                "compiled dirty units"
            );
        }
        report
    }

    fn publish(&mut self) {
        let program = Program::build(&self.graph);
        debug!(
            units = program.schedule_order().len(),
            state = program.state_size(),
            "publishing program"
        );
        self.shared.store(Arc::new(program));
        self.graph.clear_layout_dirty();
    }

    /// The program the processor will run next.
    pub fn program(&self) -> Arc<Program> {
        self.shared.load_full()
    }

    pub fn group(&self, control: ControlKey) -> Result<ControlGroup, RuntimeError> {
        Ok(self.graph.group_of(control)?)
    }

    /// Set the value of a numeric control and everything connected to it.
    pub fn set_value(&mut self, control: ControlKey, value: [f32; 4]) -> Result<(), RuntimeError> {
        let group = self.typed_group(control, ValueKind::Num)?;
        for member in &group.members {
            self.graph
                .set_cached_value(*member, ControlValue::Num(NumValue::new(value)));
        }
        self.commands
            .try_push(TickCommand::SetNum {
                group: group.id,
                value,
            })
            .map_err(|_| RuntimeError::QueueFull)
    }

    /// Queue a MIDI event for a control's group. Events pushed within one
    /// tick are delivered together.
    pub fn push_event(&mut self, control: ControlKey, event: MidiEvent) -> Result<(), RuntimeError> {
        let group = self.typed_group(control, ValueKind::Midi)?;
        self.commands
            .try_push(TickCommand::PushMidi {
                group: group.id,
                event,
            })
            .map_err(|_| RuntimeError::QueueFull)
    }

    /// The cached value of a control as of the last [`Runtime::sync`].
    pub fn value(&self, control: ControlKey) -> Option<ControlValue> {
        self.graph.control(control).map(|c| c.value())
    }

    fn typed_group(&self, control: ControlKey, kind: ValueKind) -> Result<ControlGroup, RuntimeError> {
        let group = self.graph.group_of(control)?;
        if group.kind != kind {
            return Err(RuntimeError::WrongKind {
                expected: kind,
                found: group.kind,
            });
        }
        Ok(group)
    }

    /// Apply value updates from the processor and free retired programs.
    /// Returns the number of updates applied.
    pub fn sync(&mut self) -> usize {
        let mut applied = 0;
        while let Some(update) = self.updates.try_pop() {
            let members = self
                .graph
                .group_by_id(update.group)
                .map(|g| g.members)
                .unwrap_or_default();
            for member in members {
                self.graph
                    .set_cached_value(member, ControlValue::Num(NumValue::new(update.value)));
            }
            applied += 1;
        }
        while let Some(program) = self.retired.try_pop() {
            drop(program);
        }
        applied
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("backend", &self.linker.backend())
            .field("graph", &self.graph)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> (Runtime, Processor) {
        let config = RuntimeConfig {
            backend: crate::jit::BackendKind::Interpreter,
            ..RuntimeConfig::default()
        };
        Runtime::new(config, Arc::new(Library::standard())).unwrap()
    }

    #[test]
    fn new_runtime_publishes_attached_root() {
        let (rt, _processor) = runtime();
        let root = rt.graph().root();
        let id = rt.graph().schematic(root).unwrap().runtime_id();
        assert_eq!(id, 1);
        assert!(rt.program().region(id).is_some());
        assert!(!rt.graph().layout_dirty());
    }

    #[test]
    fn clean_graph_does_not_republish() {
        let (mut rt, _processor) = runtime();
        let before = rt.program();
        let report = rt.compile_dirty();
        assert!(report.linked.is_empty());
        assert!(Arc::ptr_eq(&before, &rt.program()));
    }

    #[test]
    fn set_value_updates_whole_group() {
        let (mut rt, _processor) = runtime();
        let root = rt.graph().root();
        let a = rt.graph_mut().add_custom(root, "a", "out:num = 1").unwrap();
        let b = rt.graph_mut().add_custom(root, "b", "y:num = in:num").unwrap();
        let out = rt.graph().control_named(a, "out").unwrap();
        let input = rt.graph().control_named(b, "in").unwrap();
        rt.graph_mut().connect(out, input).unwrap();
        rt.compile_dirty();

        rt.set_value(input, [0.5; 4]).unwrap();
        assert_eq!(rt.value(out).and_then(|v| v.as_num()).unwrap().lanes, [0.5; 4]);
    }
}
