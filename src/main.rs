//! voltage: compile and render node bodies from the command line.
//!
//! Usage:
//!   voltage tokens <file>
//!   voltage check <file>
//!   voltage render <file> --frames N --out out.wav [--set name=value]... [--control out]

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use hound::{SampleFormat, WavSpec, WavWriter};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use voltage::config::RuntimeConfig;
use voltage::dsl::{CompileError, Compiler};
use voltage::library::Library;
use voltage::runtime::{ControlKey, GraphError, Runtime, SchematicKey};

#[derive(Parser, Debug)]
#[command(name = "voltage", version)]
#[command(about = "Compile and render voltage node bodies")]
struct Args {
    /// Runtime config file (defaults to ~/.voltage/runtime.yaml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the tokens of a file
    Tokens { file: PathBuf },
    /// Compile a node body and list its controls
    Check { file: PathBuf },
    /// Run a node body and write one control to a WAV file
    Render {
        file: PathBuf,
        #[arg(long, default_value_t = 44100)]
        frames: usize,
        #[arg(long, default_value = "out.wav")]
        out: PathBuf,
        /// Control written to the file (lanes 0 and 1 as left and right)
        #[arg(long, default_value = "out")]
        control: String,
        /// Initial value for a numeric control, as name=value
        #[arg(long = "set", value_parser = parse_assignment)]
        set: Vec<(String, f32)>,
    },
}

fn parse_assignment(arg: &str) -> Result<(String, f32), String> {
    let (name, value) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{arg}'"))?;
    let value = value
        .trim()
        .parse::<f32>()
        .map_err(|e| format!("invalid value for '{name}': {e}"))?;
    Ok((name.trim().to_string(), value))
}

fn init_logging(config: &RuntimeConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => RuntimeConfig::load_from(path).unwrap_or_else(|| {
            eprintln!("could not read config {}", path.display());
            process::exit(2);
        }),
        None => RuntimeConfig::load_or_default(),
    };
    init_logging(&config);

    let result = match args.command {
        Command::Tokens { file } => tokens(&file),
        Command::Check { file } => check(&file),
        Command::Render {
            file,
            frames,
            out,
            control,
            set,
        } => render(config, &file, frames, &out, &control, &set),
    };
    if let Err(message) = result {
        error!("{message}");
        process::exit(1);
    }
}

fn read_source(file: &Path) -> Result<String, String> {
    fs::read_to_string(file).map_err(|e| format!("failed to read {}: {e}", file.display()))
}

fn diagnostic(file: &Path, error: &CompileError) -> String {
    format!(
        "{}:{}:{}: error: {}",
        file.display(),
        error.range.start.line,
        error.range.start.column,
        error.message()
    )
}

fn tokens(file: &Path) -> Result<(), String> {
    let source = read_source(file)?;
    let tokens = Compiler::tokenize(&source).map_err(|e| diagnostic(file, &e))?;
    for token in tokens {
        println!("{}\t{:?}\t{:?}", token.pos, token.kind, token.text);
    }
    Ok(())
}

fn check(file: &Path) -> Result<(), String> {
    let source = read_source(file)?;
    let library = Library::standard();
    let code = Compiler::compile(&source, &library).map_err(|e| diagnostic(file, &e))?;
    for control in &code.controls {
        let access = match (control.read, control.written) {
            (true, true) => "read/write",
            (true, false) => "read",
            (false, true) => "write",
            (false, false) => "unused",
        };
        println!("{}:{}\t{access}", control.name, control.kind);
    }
    println!("state: {} bytes", code.state_size);
    Ok(())
}

fn find_control(runtime: &Runtime, node: SchematicKey, name: &str) -> Result<ControlKey, String> {
    runtime
        .graph()
        .control_named(node, name)
        .ok_or_else(|| format!("no control named '{name}'"))
}

fn render(
    config: RuntimeConfig,
    file: &Path,
    frames: usize,
    out: &Path,
    control: &str,
    set: &[(String, f32)],
) -> Result<(), String> {
    let source = read_source(file)?;
    let sample_rate = config.sample_rate;
    let (mut runtime, mut processor) =
        Runtime::new(config, Arc::new(Library::standard())).map_err(|e| e.to_string())?;

    let root = runtime.graph().root();
    let node = runtime
        .graph_mut()
        .add_custom(root, "main", &source)
        .map_err(|e| match e {
            GraphError::Compile(e) => diagnostic(file, &e),
            other => other.to_string(),
        })?;
    let report = runtime.compile_dirty();
    if let Some((_, e)) = report.failed.first() {
        return Err(diagnostic(file, e));
    }

    let target = find_control(&runtime, node, control)?;
    for (name, value) in set {
        let key = find_control(&runtime, node, name)?;
        runtime
            .set_value(key, [*value; 4])
            .map_err(|e| format!("cannot set '{name}': {e}"))?;
    }
    let group = runtime.group(target).map_err(|e| e.to_string())?;

    let spec = WavSpec {
        channels: 2,
        sample_rate: sample_rate as u32,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer =
        WavWriter::create(out, spec).map_err(|e| format!("failed to create WAV file: {e}"))?;

    for _ in 0..frames {
        processor.process(1);
        let lanes = processor.read_group(group.id).map_or([0.0; 4], |v| v.lanes);
        for &sample in &lanes[..2] {
            let sample = (sample.clamp(-1.0, 1.0) * 32767.0) as i16;
            writer
                .write_sample(sample)
                .map_err(|e| format!("failed to write sample: {e}"))?;
        }
    }
    writer
        .finalize()
        .map_err(|e| format!("failed to finalize WAV file: {e}"))?;
    runtime.sync();

    info!(frames, out = %out.display(), "rendered");
    Ok(())
}
