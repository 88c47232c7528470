//! natwasm CLI
//!
//! Runs guest modules on the host, drives a self-hosted compiler through
//! the compile-then-run pipeline, and emits stand-in compilers for smoke
//! tests.

mod args;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use natwasm_guestgen::{compile, stub_compiler, GuestProgram};
use natwasm_host::{invoke, invoke_chained, Invocation, InvokeOptions, Naming, Params, DEFAULT_ENTRY};
use natwasm_selfhost::{PipelineConfig, PipelineReport, SelfHostPipeline, StageRun};
use natwasm_types::Representation;

/// Exit code when the self-host run exceeds its time limit.
const TIMEOUT_EXIT: i32 = 124;

const WORKER_LOST: &str = "self-host worker stopped before reporting";

#[derive(Parser)]
#[command(name = "natwasm")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run natural-number guest modules and self-hosted compilers", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a guest module
    Run {
        /// Module image (.wasm)
        module: PathBuf,

        /// Parameters as key=value; key_file=path reads the value from a file
        params: Vec<String>,

        /// Serve the module's imports from this library module
        #[arg(long)]
        library: Option<PathBuf>,

        /// Value representation the module is built against
        #[arg(long, default_value = "handle")]
        repr: Representation,

        /// Parameter naming: n (n1..nN) or x (x0..x{N-1})
        #[arg(long, default_value = "n")]
        naming: Naming,

        /// Entry point
        #[arg(long, default_value = DEFAULT_ENTRY)]
        entry: String,
    },

    /// Compile a source file with a guest compiler, then run the result
    SelfHost {
        /// Compiler module image (.wasm)
        compiler: PathBuf,

        /// Source file (.while)
        source: PathBuf,

        /// Program parameters as key=value
        params: Vec<String>,

        /// Pipeline configuration (TOML)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Stop after decoding the compiled image
        #[arg(long)]
        no_execution: bool,

        /// Write compiler output and the compiled image here
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Print the pipeline report as JSON
        #[arg(long)]
        json: bool,

        /// Give up after this many seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Representation the compiler is built against
        #[arg(long)]
        repr: Option<Representation>,

        /// Representation the compiled program is built against
        #[arg(long)]
        program_repr: Option<Representation>,

        /// Program parameter naming: n or x
        #[arg(long)]
        naming: Option<Naming>,

        /// Program entry point
        #[arg(long)]
        entry: Option<String>,
    },

    /// Write a stand-in compiler whose output is a fixed program
    EmitStub {
        /// Output path for the compiler module
        #[arg(short, long)]
        output: PathBuf,

        /// Program the stub compiles every source to
        #[arg(long, value_enum, default_value_t = StubProgram::Add)]
        program: StubProgram,

        /// Representation of the emitted program
        #[arg(long, default_value = "handle")]
        repr: Representation,

        /// Representation of the stub compiler itself
        #[arg(long, default_value = "handle")]
        compiler_repr: Representation,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StubProgram {
    /// n1 + n2
    Add,
    /// Trace and return n1
    Echo,
    /// n1 * n2 by repeated addition
    Mul,
}

impl StubProgram {
    fn program(self, repr: Representation) -> GuestProgram {
        match self {
            Self::Add => GuestProgram::adder(repr),
            Self::Echo => GuestProgram::echo(repr, 1),
            Self::Mul => GuestProgram::multiply_by_addition(repr),
        }
    }
}

/// Command-line overrides for the pipeline configuration.
struct SelfHostOverrides {
    no_execution: bool,
    output_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    repr: Option<Representation>,
    program_repr: Option<Representation>,
    naming: Option<Naming>,
    entry: Option<String>,
}

impl SelfHostOverrides {
    fn apply(self, config: &mut PipelineConfig) {
        config.no_execution |= self.no_execution;
        if let Some(dir) = self.output_dir {
            config.output_dir = Some(dir);
        }
        if let Some(secs) = self.timeout_secs {
            config.timeout_secs = Some(secs);
        }
        if let Some(repr) = self.repr {
            config.representation = repr;
        }
        if let Some(repr) = self.program_repr {
            config.program_representation = repr;
        }
        if let Some(naming) = self.naming {
            config.program_naming = naming;
        }
        if let Some(entry) = self.entry {
            config.entry_point = entry;
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Run {
            module,
            params,
            library,
            repr,
            naming,
            entry,
        } => {
            let options = InvokeOptions { entry, naming };
            run_module(&module, &params, library.as_deref(), repr, options);
        }
        Commands::SelfHost {
            compiler,
            source,
            params,
            config,
            no_execution,
            output_dir,
            json,
            timeout_secs,
            repr,
            program_repr,
            naming,
            entry,
        } => {
            let overrides = SelfHostOverrides {
                no_execution,
                output_dir,
                timeout_secs,
                repr,
                program_repr,
                naming,
                entry,
            };
            run_self_host(&compiler, &source, &params, config.as_deref(), overrides, json);
        }
        Commands::EmitStub {
            output,
            program,
            repr,
            compiler_repr,
        } => {
            run_emit_stub(&output, program, repr, compiler_repr);
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    process::exit(1);
}

fn read_file(path: &Path) -> Vec<u8> {
    fs::read(path).unwrap_or_else(|e| fail(format_args!("cannot read {}: {}", path.display(), e)))
}

fn parse_params(raw: &[String]) -> Params {
    args::parse_params(raw).unwrap_or_else(|e| fail(e))
}

fn run_module(
    module: &Path,
    raw_params: &[String],
    library: Option<&Path>,
    repr: Representation,
    options: InvokeOptions,
) {
    let image = read_file(module);
    let params = parse_params(raw_params);

    let result = match library {
        Some(library) => invoke_chained(&read_file(library), repr, options, &image, &params),
        None => invoke(repr, options, &image, &params),
    };
    match result {
        Ok(invocation) => print_invocation(&invocation),
        Err(e) => fail(e),
    }
}

fn print_invocation(invocation: &Invocation) {
    println!("{}", invocation.preview);
    for value in &invocation.trace {
        println!("{}", value);
    }
    println!("x0={}", invocation.result);
    println!(
        "wasm_execution_time={}",
        invocation.elapsed.as_secs_f64() * 1000.0
    );
}

fn run_self_host(
    compiler: &Path,
    source_path: &Path,
    raw_params: &[String],
    config_path: Option<&Path>,
    overrides: SelfHostOverrides,
    json: bool,
) {
    if source_path.extension().is_some_and(|ext| ext == "ewhile") {
        fail(format_args!(
            "{}: extended WHILE sources must be transpiled to .while first",
            source_path.display()
        ));
    }

    let mut config = match config_path {
        Some(path) => PipelineConfig::load(path).unwrap_or_else(|e| fail(e)),
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config);

    let compiler_image = read_file(compiler);
    let source = fs::read_to_string(source_path)
        .unwrap_or_else(|e| fail(format_args!("cannot read {}: {}", source_path.display(), e)));
    let params = parse_params(raw_params);
    let timeout = config.timeout_secs.map(Duration::from_secs);

    let pipeline = SelfHostPipeline::new(config);
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let report = pipeline.run(&compiler_image, &source, &params);
        // The receiver is gone only after a timeout.
        let _ = tx.send(report);
    });

    let report = match timeout {
        Some(limit) => match rx.recv_timeout(limit) {
            Ok(report) => report,
            Err(RecvTimeoutError::Timeout) => {
                eprintln!(
                    "Error: self-host run did not finish within {}s",
                    limit.as_secs()
                );
                process::exit(TIMEOUT_EXIT);
            }
            Err(RecvTimeoutError::Disconnected) => fail(WORKER_LOST),
        },
        None => rx.recv().unwrap_or_else(|_| fail(WORKER_LOST)),
    };

    if json {
        match report.to_json() {
            Ok(text) => println!("{}", text),
            Err(e) => fail(e),
        }
    } else {
        print_report(&report);
    }
    if let Some(err) = report.error {
        fail(err);
    }
}

fn print_report(report: &PipelineReport) {
    if let Some(bytes) = report.source_bytes {
        println!("source: {} bytes", bytes);
    }
    if let Some(hex) = &report.compiler_output_hex {
        println!("compiler_output_hex={}", hex);
    }
    if let (Some(len), Some(digest)) = (report.image_len, &report.image_sha256) {
        println!("image: {} bytes, sha256 {}", len, digest);
    }
    for path in &report.written {
        println!("wrote {}", path.display());
    }
    if let Some(program) = &report.program {
        print_stage_run(program);
    } else if report.state.is_done() {
        println!("execution skipped");
    }
}

fn print_stage_run(run: &StageRun) {
    println!("{}", run.preview);
    for value in &run.trace {
        println!("{}", value);
    }
    println!("x0={}", run.result);
    println!("wasm_execution_time={}", run.elapsed_ms);
}

fn run_emit_stub(
    output: &Path,
    program: StubProgram,
    repr: Representation,
    compiler_repr: Representation,
) {
    let image = compile(&program.program(repr))
        .and_then(|image| stub_compiler(&image, compiler_repr))
        .unwrap_or_else(|e| fail(e));
    if let Err(e) = fs::write(output, &image) {
        fail(format_args!("cannot write {}: {}", output.display(), e));
    }
    println!(
        "Wrote {} ({} bytes, compiles to {:?} for {})",
        output.display(),
        image.len(),
        program,
        repr
    );
}
