//! Live editing integration tests: edit code while a processor runs it and
//! check what the processor observes after each swap.

use std::sync::Arc;

use assert_approx_eq::assert_approx_eq;
use voltage::config::RuntimeConfig;
use voltage::dsl::ErrorKind;
use voltage::jit::BackendKind;
use voltage::library::Library;
use voltage::runtime::{
    ControlKey, Graph, GraphError, Processor, Runtime, RuntimeError, SchematicKey, Status,
};

const BACKENDS: [BackendKind; 2] = [BackendKind::Jit, BackendKind::Interpreter];

fn runtime(backend: BackendKind) -> (Runtime, Processor) {
    let config = RuntimeConfig {
        backend,
        ..RuntimeConfig::default()
    };
    Runtime::new(config, Arc::new(Library::standard())).unwrap()
}

fn add(runtime: &mut Runtime, name: &str, source: &str) -> SchematicKey {
    let root = runtime.graph().root();
    runtime.graph_mut().add_custom(root, name, source).unwrap()
}

fn control(runtime: &Runtime, node: SchematicKey, name: &str) -> ControlKey {
    runtime.graph().control_named(node, name).unwrap()
}

/// Lane 0 of a control as seen by the processor.
fn read(runtime: &Runtime, processor: &Processor, control: ControlKey) -> f32 {
    let group = runtime.group(control).unwrap();
    processor.read_group(group.id).unwrap().lanes[0]
}

#[test]
fn set_value_reaches_the_unit() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let amp = add(&mut rt, "amp", "out:num = in:num * 2");
        assert!(rt.compile_dirty().is_success());

        let input = control(&rt, amp, "in");
        let out = control(&rt, amp, "out");
        rt.set_value(input, [3.0; 4]).unwrap();
        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, out), 6.0);

        assert_eq!(rt.sync(), 2);
        let cached = rt.value(out).and_then(|v| v.as_num()).unwrap();
        assert_eq!(cached.lanes, [6.0; 4]);
    }
}

#[test]
fn sibling_edit_keeps_other_units_and_values() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let amp = add(&mut rt, "amp", "out:num = in:num * 2");
        let counter = add(&mut rt, "counter", "count:num = count:num + 1");
        rt.compile_dirty();
        rt.set_value(control(&rt, amp, "in"), [1.0; 4]).unwrap();
        processor.process(3);

        let count = control(&rt, counter, "count");
        assert_approx_eq!(read(&rt, &processor, count), 3.0);
        let before = rt.graph().schematic(counter).unwrap().unit().unwrap().clone();

        rt.graph_mut().set_code(amp, "out:num = in:num * 3").unwrap();
        let report = rt.compile_dirty();
        assert_eq!(report.linked, vec![amp]);

        let after = rt.graph().schematic(counter).unwrap().unit().unwrap().clone();
        assert!(Arc::ptr_eq(&before, &after));

        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, count), 4.0);
        assert_approx_eq!(read(&rt, &processor, control(&rt, amp, "out")), 3.0);
    }
}

#[test]
fn failed_recompile_keeps_running_unit() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let amp = add(&mut rt, "amp", "out:num = in:num * 2");
        rt.compile_dirty();
        rt.set_value(control(&rt, amp, "in"), [2.0; 4]).unwrap();

        let err = rt
            .graph_mut()
            .set_code(amp, "out:num = bogus(1)")
            .unwrap_err();
        let GraphError::Compile(err) = err else {
            panic!("expected a compile error");
        };
        assert_eq!(err.kind, ErrorKind::UndefinedFunction { name: "bogus".into() });
        assert_eq!((err.range.start.line, err.range.start.column), (1, 11));

        let report = rt.compile_dirty();
        assert!(report.linked.is_empty());
        let schematic = rt.graph().schematic(amp).unwrap();
        assert_eq!(schematic.status(), Status::Stale);
        assert!(schematic.unit().is_some());

        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, control(&rt, amp, "out")), 4.0);
    }
}

#[test]
fn superseded_build_is_discarded() {
    let (mut rt, mut processor) = runtime(BackendKind::Interpreter);
    let node = add(&mut rt, "node", "out:num = 1");
    rt.compile_dirty();

    rt.graph_mut().set_code(node, "out:num = 2").unwrap();
    let tx = rt.build_dirty();
    assert_eq!(tx.len(), 1);
    rt.graph_mut().set_code(node, "out:num = 3").unwrap();

    let report = rt.commit(tx);
    assert_eq!(report.superseded, vec![node]);
    assert!(report.linked.is_empty());
    assert!(rt.graph().schematic(node).unwrap().is_dirty());

    processor.process(1);
    let out = control(&rt, node, "out");
    assert_approx_eq!(read(&rt, &processor, out), 1.0);

    assert_eq!(rt.compile_dirty().linked, vec![node]);
    processor.process(1);
    assert_approx_eq!(read(&rt, &processor, out), 3.0);
}

#[test]
fn rename_keeps_connection_running() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let source = add(&mut rt, "source", "out:num = 5");
        let sink = add(&mut rt, "sink", "y:num = in:num + 1");
        let out = control(&rt, source, "out");
        let sink_in = control(&rt, sink, "in");
        rt.graph_mut().connect(out, sink_in).unwrap();
        rt.compile_dirty();
        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, control(&rt, sink, "y")), 6.0);

        rt.graph_mut().set_code(source, "signal:num = 7").unwrap();
        rt.compile_dirty();
        assert_eq!(rt.graph().control_named(source, "signal"), Some(out));
        assert_eq!(rt.graph().connections().count(), 1);

        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, control(&rt, sink, "y")), 8.0);
    }
}

#[test]
fn detached_graph_attaches_with_all_code() {
    let library = Arc::new(Library::standard());
    let mut graph = Graph::new(library);
    let root = graph.root();
    let node = graph.add_custom(root, "const", "out:num = 5").unwrap();
    assert_eq!(graph.schematic(node).unwrap().status(), Status::Unattached);
    assert!(graph.schematic(node).unwrap().staged().is_some());

    let (mut rt, mut processor) = runtime(BackendKind::Interpreter);
    let report = rt.attach(graph);
    assert_eq!(report.linked, vec![node]);
    let schematic = rt.graph().schematic(node).unwrap();
    assert_ne!(schematic.runtime_id(), 0);
    assert_eq!(schematic.status(), Status::Running);

    processor.process(1);
    assert_approx_eq!(read(&rt, &processor, control(&rt, node, "out")), 5.0);

    let detached = rt.detach();
    assert!(!detached.is_attached());
    let schematic = detached.schematic(node).unwrap();
    assert_eq!(schematic.runtime_id(), 0);
    assert!(schematic.unit().is_none());
    assert!(schematic.staged().is_some());
    processor.process(1);
    assert!(rt.program().schedule_order().is_empty());
}

#[test]
fn queued_midi_spills_into_next_frame() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let synth = add(&mut rt, "synth", "n:num = note(keys:midi)");
        rt.compile_dirty();
        let keys = control(&rt, synth, "keys");
        let n = control(&rt, synth, "n");

        for note in 40..60u8 {
            rt.push_event(keys, voltage::runtime::MidiEvent::note_on(0, note, 1.0))
                .unwrap();
        }
        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, n), 55.0);
        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, n), 59.0);
    }
}

#[test]
fn control_kinds_are_checked() {
    let (mut rt, _processor) = runtime(BackendKind::Interpreter);
    let synth = add(&mut rt, "synth", "n:num = note(keys:midi)");
    rt.compile_dirty();
    let keys = control(&rt, synth, "keys");
    let n = control(&rt, synth, "n");
    assert!(matches!(
        rt.set_value(keys, [1.0; 4]),
        Err(RuntimeError::WrongKind { .. })
    ));
    assert!(matches!(
        rt.push_event(n, voltage::runtime::MidiEvent::note_on(0, 60, 1.0)),
        Err(RuntimeError::WrongKind { .. })
    ));
}

#[test]
fn full_command_queue_is_reported() {
    let config = RuntimeConfig {
        backend: BackendKind::Interpreter,
        command_capacity: 1,
        ..RuntimeConfig::default()
    };
    let (mut rt, _processor) = Runtime::new(config, Arc::new(Library::standard())).unwrap();
    let node = add(&mut rt, "node", "out:num = in:num");
    rt.compile_dirty();
    let input = control(&rt, node, "in");
    rt.set_value(input, [1.0; 4]).unwrap();
    assert!(matches!(rt.set_value(input, [2.0; 4]), Err(RuntimeError::QueueFull)));
}

#[test]
fn untaken_branch_does_not_advance_noise() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let node = add(&mut rt, "gate", "o:num = if g:num { noise() } else { 0 }");
        rt.compile_dirty();
        let g = control(&rt, node, "g");
        let o = control(&rt, node, "o");

        processor.process(3);
        assert_eq!(read(&rt, &processor, o), 0.0);

        rt.set_value(g, [1.0; 4]).unwrap();
        processor.process(1);
        let first = voltage::jit::helpers::noise(&mut [0; 4]);
        assert_eq!(read(&rt, &processor, o), first[0]);
    }
}

#[test]
fn replaced_programs_wait_for_sync() {
    let (mut rt, mut processor) = runtime(BackendKind::Interpreter);
    let node = add(&mut rt, "node", "out:num = 0");
    rt.compile_dirty();
    let out = control(&rt, node, "out");

    let mut published = Vec::new();
    for i in 0..20 {
        rt.graph_mut().set_code(node, &format!("out:num = {i}")).unwrap();
        rt.compile_dirty();
        published.push(Arc::downgrade(&rt.program()));
        processor.process(1);
    }
    // Sixteen hand-offs fill the ring; the seventeenth is held back and the
    // processor stays on the program it is running.
    assert!(published[..17].iter().all(|p| p.upgrade().is_some()));
    assert_approx_eq!(read(&rt, &processor, out), 16.0);

    rt.sync();
    processor.process(1);
    rt.sync();
    processor.process(1);
    assert_approx_eq!(read(&rt, &processor, out), 19.0);
    let live = published.iter().filter(|p| p.upgrade().is_some()).count();
    assert_eq!(live, 1);
}

#[test]
fn midi_burst_is_delivered_in_order() {
    for backend in BACKENDS {
        let (mut rt, mut processor) = runtime(backend);
        let synth = add(&mut rt, "synth", "n:num = note(keys:midi)");
        rt.compile_dirty();
        let keys = control(&rt, synth, "keys");
        let n = control(&rt, synth, "n");

        for i in 0..400u32 {
            let event = voltage::runtime::MidiEvent::note_on(0, (i % 128) as u8, 1.0);
            rt.push_event(keys, event).unwrap();
        }
        processor.process(24);
        assert_approx_eq!(read(&rt, &processor, n), (383 % 128) as f32);
        processor.process(1);
        assert_approx_eq!(read(&rt, &processor, n), (399 % 128) as f32);
    }
}

#[test]
fn midi_beyond_queue_capacity_is_refused_not_lost() {
    let config = RuntimeConfig {
        backend: BackendKind::Interpreter,
        command_capacity: 300,
        ..RuntimeConfig::default()
    };
    let (mut rt, mut processor) = Runtime::new(config, Arc::new(Library::standard())).unwrap();
    let synth = add(&mut rt, "synth", "n:num = note(keys:midi)");
    rt.compile_dirty();
    let keys = control(&rt, synth, "keys");
    let n = control(&rt, synth, "n");

    let mut accepted = 0u32;
    for i in 0..400u32 {
        let event = voltage::runtime::MidiEvent::note_on(0, (i % 128) as u8, 1.0);
        match rt.push_event(keys, event) {
            Ok(()) => accepted += 1,
            Err(RuntimeError::QueueFull) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(accepted, 300);

    processor.process(accepted.div_ceil(16) as usize);
    assert_approx_eq!(read(&rt, &processor, n), ((accepted - 1) % 128) as f32);
}
