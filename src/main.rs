use std::{
    fs,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
};

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use strum::{Display, EnumString};
use tracing::debug;

use kiln::{
    Error,
    backend::{self, Codegen, Emit, OptLevel, TargetConfig},
    frontend,
    logging,
    middle::{
        mir::{self, json, pretty_print::render_module},
        passes::Preset,
    },
    runner::{self, Backend},
    vm::{Coverage, MachineConfig},
};

#[derive(Debug, Parser)]
#[command(name = "kilnc", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run a program and exit with its status
    Run {
        #[command(flatten)]
        input: Input,

        #[arg(long, default_value_t = BackendKind::Vm)]
        backend: BackendKind,

        #[command(flatten)]
        target: Target,

        /// Frames allowed before the interpreter faults; unlimited by default
        #[arg(long)]
        max_call_depth: Option<usize>,

        /// Write runtime-function call counts to this file as JSON
        #[arg(long, value_name = "FILE")]
        coverage: Option<PathBuf>,

        /// Arguments passed to the program, after `--`
        #[arg(last = true, value_name = "ARGS")]
        args: Vec<String>,
    },

    /// Compile a program to C source, an object file or an executable
    Build {
        #[command(flatten)]
        input: Input,

        #[command(flatten)]
        target: Target,

        #[arg(long, default_value_t = Emit::Executable)]
        emit: Emit,

        /// Output path
        #[arg(short, long, default_value = "a.out")]
        output: PathBuf,
    },

    /// Print the MIR left after the pipeline has run
    Mir {
        #[command(flatten)]
        input: Input,

        /// Print JSON instead of the listing
        #[arg(long)]
        json: bool,
    },

    /// Run a program in the interpreter and print its runtime-function call counts
    Coverage {
        #[command(flatten)]
        input: Input,
    },
}

#[derive(Debug, Args)]
struct Input {
    /// Typed tree as JSON
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// The input is MIR JSON rather than a typed tree
    #[arg(long)]
    mir: bool,

    #[arg(long, default_value_t = Preset::Runner)]
    pipeline: Preset,

    /// Function the program starts in
    #[arg(long, default_value = "main")]
    entry: String,
}

#[derive(Debug, Args)]
struct Target {
    #[arg(long, default_value_t = Codegen::C)]
    codegen: Codegen,

    #[arg(long, default_value_t = OptLevel::None)]
    opt_level: OptLevel,

    /// C compiler used for the runtime, C output and linking [default: $KILN_CC or cc]
    #[arg(long)]
    cc: Option<String>,
}

impl Target {
    fn config(self, entry: &str) -> TargetConfig {
        let defaults = TargetConfig::default();
        TargetConfig {
            codegen: self.codegen,
            opt_level: self.opt_level,
            cc: self.cc.unwrap_or(defaults.cc),
            entry: entry.into(),
            ..defaults
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
enum BackendKind {
    Vm,
    Native,
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match execute(cli.command) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("{}: {error}", "error".red().bold());
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command) -> Result<ExitCode, Error> {
    match command {
        Command::Run {
            input,
            backend,
            target,
            max_call_depth,
            coverage,
            args,
        } => {
            let module = load(&input)?;
            let backend = match backend {
                BackendKind::Vm => Backend::Vm(MachineConfig { max_call_depth }),
                BackendKind::Native => {
                    let output = scratch_output(&input.file);
                    Backend::Native(TargetConfig {
                        output,
                        ..target.config(&input.entry)
                    })
                }
            };

            let counts = coverage.as_ref().map(|_| Coverage::new());
            let outcome = runner::run_with_args(&module, &input.entry, &backend, counts.as_ref(), &args)?;

            if let Backend::Native(config) = &backend {
                if let Err(error) = fs::remove_file(&config.output) {
                    debug!(%error, path = %config.output.display(), "cannot remove scratch executable");
                }
            }
            if let (Some(path), Some(counts)) = (coverage, counts) {
                fs::write(path, counts.to_json()?)?;
            }

            io::stdout().write_all(outcome.stdout.as_bytes())?;
            if outcome.faulted() {
                eprint!("{}: {}", "error".red().bold(), outcome.stderr);
            } else {
                io::stderr().write_all(outcome.stderr.as_bytes())?;
            }
            Ok(ExitCode::from(outcome.status))
        }
        Command::Build {
            input,
            target,
            emit,
            output,
        } => {
            let module = load(&input)?;
            let config = TargetConfig {
                emit,
                output,
                ..target.config(&input.entry)
            };
            let artifact = backend::lower(&module, &config)?;
            eprintln!(
                "{} {} ({} {})",
                "wrote".green().bold(),
                artifact.path.display(),
                artifact.codegen,
                artifact.emit,
            );
            Ok(ExitCode::SUCCESS)
        }
        Command::Mir { input, json: as_json } => {
            let module = load(&input)?;
            if as_json {
                println!("{}", json::to_json(&module)?);
            } else {
                print!("{}", render_module(&module));
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Coverage { input } => {
            let module = load(&input)?;
            let counts = Coverage::new();
            let outcome = runner::run(&module, &input.entry, &Backend::default(), Some(&counts))?;
            if outcome.faulted() {
                eprint!("{}: {}", "error".red().bold(), outcome.stderr);
            }
            println!("{}", counts.to_json()?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Reads the input file and runs the selected pipeline over it
fn load(input: &Input) -> Result<mir::Module, Error> {
    let source = fs::read_to_string(&input.file)?;
    let mut pipeline = input.pipeline.pipeline();
    debug!(file = %input.file.display(), pipeline = pipeline.name(), "loading");

    if input.mir {
        let mut module = json::from_json(&source)?;
        pipeline.run(&mut module)?;
        Ok(module)
    } else {
        let tree = frontend::module_from_json(&source)?;
        runner::compile(&tree, &mut pipeline)
    }
}

/// Executable path for `run --backend native`, next to the input
fn scratch_output(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .map_or_else(|| "program".into(), |stem| stem.to_string_lossy().into_owned());
    file.with_file_name(format!(".{stem}.kiln-run"))
}
