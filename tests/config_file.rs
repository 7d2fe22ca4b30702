//! Runtime configuration loaded from disk.

use std::sync::Arc;

use voltage::config::RuntimeConfig;
use voltage::jit::BackendKind;
use voltage::library::Library;
use voltage::runtime::{Runtime, RuntimeError};

#[test]
fn runtime_uses_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.yaml");
    std::fs::write(
        &path,
        "sample_rate: 48000\nbackend: interpreter\ncommand_capacity: 16\n",
    )
    .unwrap();

    let config = RuntimeConfig::load_from(&path).unwrap();
    assert_eq!(config.command_capacity, 16);
    assert_eq!(config.update_capacity, 1024);

    let (runtime, processor) = Runtime::new(config, Arc::new(Library::standard())).unwrap();
    assert_eq!(processor.sample_rate(), 48000.0);
    assert_eq!(runtime.linker().backend(), BackendKind::Interpreter);
    assert!(runtime.graph().is_attached());
}

#[test]
fn malformed_file_is_ignored() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("runtime.yaml");
    std::fs::write(&path, "sample_rate: [not, a, number]\n").unwrap();
    assert!(RuntimeConfig::load_from(&path).is_none());
}

#[test]
fn invalid_values_are_rejected() {
    let library = Arc::new(Library::standard());
    let zero_queue = RuntimeConfig {
        update_capacity: 0,
        ..RuntimeConfig::default()
    };
    assert!(matches!(
        Runtime::new(zero_queue, library.clone()),
        Err(RuntimeError::InvalidConfig(_))
    ));

    let no_rate = RuntimeConfig {
        sample_rate: 0.0,
        ..RuntimeConfig::default()
    };
    assert!(matches!(
        Runtime::new(no_rate, library),
        Err(RuntimeError::InvalidConfig(_))
    ));
}
