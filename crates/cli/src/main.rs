//! Spyre command-line driver.
//!
//! Mode selection over the toolchain stages:
//!
//! - `spyre -c FILE -o OUT` compiles source to bytecode
//! - `spyre -a FILE -o OUT` assembles textual assembly to bytecode
//! - `spyre -r FILE` executes a bytecode image
//! - `spyre FILE` runs the whole pipeline end to end, threading the
//!   compile session's record layouts into the VM so the collector can
//!   trace user structs

use clap::Parser as ClapParser;
use spyre_vm::{Spyre, VmConfig};
use std::path::{Path, PathBuf};
use std::process;

#[derive(ClapParser)]
#[command(name = "spyre")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Spyre language toolchain: compiler, assembler, and virtual machine", long_about = None)]
struct Cli {
    /// Compile a Spyre source file to bytecode (requires -o)
    #[arg(short = 'c', value_name = "FILE", conflicts_with_all = ["assemble", "run", "input"])]
    compile: Option<PathBuf>,

    /// Assemble a textual assembly file to bytecode (requires -o)
    #[arg(short = 'a', value_name = "FILE", conflicts_with_all = ["run", "input"])]
    assemble: Option<PathBuf>,

    /// Execute a bytecode file
    #[arg(short = 'r', value_name = "FILE", conflicts_with = "input")]
    run: Option<PathBuf>,

    /// Output path for -c and -a
    #[arg(short = 'o', value_name = "OUT")]
    output: Option<PathBuf>,

    /// VM configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Source file to compile and execute end to end
    input: Option<PathBuf>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = dispatch(&cli);
    if let Err(message) = result {
        eprintln!("{}", message);
        process::exit(1);
    }
}

fn dispatch(cli: &Cli) -> Result<(), String> {
    let vm_config = match &cli.config {
        Some(path) => VmConfig::from_file(path)?,
        None => VmConfig::default(),
    };

    if let Some(input) = &cli.compile {
        let output = require_output(cli, "-c")?;
        return compile_to_bytecode(input, &output);
    }
    if let Some(input) = &cli.assemble {
        let output = require_output(cli, "-a")?;
        return spyre_vm::assemble_file(input, &output);
    }
    if let Some(input) = &cli.run {
        return run_bytecode(input, vm_config);
    }
    if let Some(input) = &cli.input {
        return run_end_to_end(input, vm_config);
    }
    Err("expected a compile mode and input file (try --help)".to_string())
}

fn require_output(cli: &Cli, flag: &str) -> Result<PathBuf, String> {
    cli.output
        .clone()
        .ok_or_else(|| format!("flag '{}' requires an output path ('-o OUT')", flag))
}

/// `-c`: lex, parse, typecheck, emit, assemble, write the image.
fn compile_to_bytecode(input: &Path, output: &Path) -> Result<(), String> {
    let compiled = spyrec::compile_file(input)?;
    let image = spyre_vm::assemble_source(&compiled.assembly, &input.display().to_string())?;
    std::fs::write(output, image)
        .map_err(|e| format!("couldn't open '{}' for writing: {}", output.display(), e))
}

/// `-r`: execute an already-assembled image. Only builtin types exist, so
/// programs that allocate user structs need the end-to-end mode.
fn run_bytecode(input: &Path, config: VmConfig) -> Result<(), String> {
    let image = std::fs::read(input)
        .map_err(|e| format!("couldn't open '{}' for reading: {}", input.display(), e))?;
    let collect_on_halt = config.collect_on_halt;
    let mut vm = Spyre::with_config(config);
    spyre_vm::io::register_io(&mut vm);
    vm.execute(image)?;
    if collect_on_halt {
        vm.collect();
    }
    Ok(())
}

/// Bare `FILE`: compile, assemble, and execute with the compile session's
/// struct layouts registered in the VM.
fn run_end_to_end(input: &Path, config: VmConfig) -> Result<(), String> {
    let compiled = spyrec::compile_file(input)?;
    let image = spyre_vm::assemble_source(&compiled.assembly, &input.display().to_string())?;

    let collect_on_halt = config.collect_on_halt;
    let mut vm = Spyre::with_config(config);
    spyre_vm::io::register_io(&mut vm);
    for record in &compiled.records {
        let members = record
            .members
            .iter()
            .map(|m| (m.type_name.clone(), m.offset))
            .collect();
        vm.register_record_type(&record.name, members);
    }

    vm.execute(image)?;
    if collect_on_halt {
        vm.collect();
    }
    Ok(())
}
