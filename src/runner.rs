//! Takes a program from the typed tree to a process result: build MIR, run
//! the pass pipeline, hand the module to one backend and interpret what the
//! entry function produced.

use std::{
    path::Path,
    process::{Command, Stdio},
};

use tracing::info;

use crate::{
    Error,
    backend::{self, BackendError, Emit, TargetConfig},
    frontend::ast,
    middle::{builder::build_module, mir, passes::Pipeline},
    runtime::FAULT_EXIT_STATUS,
    vm::{Coverage, FaultKind, Host, Machine, MachineConfig, RuntimeFault, Value, exit_code},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Vm(MachineConfig),
    /// Builds an executable and runs it
    Native(TargetConfig),
}

impl Default for Backend {
    fn default() -> Self {
        Backend::Vm(MachineConfig::default())
    }
}

/// What a finished program left behind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub status: u8,
    pub stdout: String,
    /// Fault report of a program stopped by a runtime fault
    pub stderr: String,
}

impl Outcome {
    pub fn faulted(&self) -> bool {
        self.status == FAULT_EXIT_STATUS && !self.stderr.is_empty()
    }
}

/// Lowers the tree and runs the pipeline over the result
pub fn compile(tree: &ast::Module, pipeline: &mut Pipeline) -> Result<mir::Module, Error> {
    let mut module = build_module(tree)?;
    pipeline.run(&mut module)?;
    Ok(module)
}

/// Runs `entry` of a compiled module. Runtime faults are not errors here:
/// they become exit status 70 with the fault report on stderr, the same
/// result a native executable produces. Runtime calls are counted into
/// `coverage` when one is given; only the VM counts them.
pub fn run(
    module: &mir::Module,
    entry: &str,
    backend: &Backend,
    coverage: Option<&Coverage>,
) -> Result<Outcome, Error> {
    run_with_args(module, entry, backend, coverage, &[])
}

/// [`run`] with program arguments for `std.os.args`
pub fn run_with_args(
    module: &mir::Module,
    entry: &str,
    backend: &Backend,
    coverage: Option<&Coverage>,
    args: &[String],
) -> Result<Outcome, Error> {
    match backend {
        Backend::Vm(config) => Ok(run_vm(module, entry, *config, coverage, args)),
        Backend::Native(config) => run_native(module, entry, config, args),
    }
}

fn run_vm(
    module: &mir::Module,
    entry: &str,
    config: MachineConfig,
    coverage: Option<&Coverage>,
    args: &[String],
) -> Outcome {
    let mut machine = Machine::new(module, config);
    if let Some(coverage) = coverage {
        machine = machine.with_coverage(coverage.clone());
    }

    let mut output = Vec::new();
    let mut input = std::io::stdin().lock();
    let mut host = Host::new(&mut input, &mut output).with_args(args.to_vec());
    let result = machine.run(entry, &[], &mut host);
    drop(host);
    let mut stdout = String::from_utf8_lossy(&output).into_owned();

    match result {
        Ok(value) => {
            if let Value::String(text) = &value {
                stdout.push_str(text);
                stdout.push('\n');
            }
            Outcome {
                status: exit_code(&value),
                stdout,
                stderr: String::new(),
            }
        }
        Err(RuntimeFault {
            kind: FaultKind::Exit(code),
            ..
        }) => {
            info!(code, "program exited");
            Outcome {
                status: code as u8,
                stdout,
                stderr: String::new(),
            }
        }
        Err(fault) => {
            info!(%fault, "program faulted");
            Outcome {
                status: FAULT_EXIT_STATUS,
                stdout,
                stderr: format!("{fault}\n"),
            }
        }
    }
}

fn run_native(
    module: &mir::Module,
    entry: &str,
    config: &TargetConfig,
    args: &[String],
) -> Result<Outcome, Error> {
    if config.emit != Emit::Executable {
        return Err(BackendError::unsupported(entry, format_args!("running {} output", config.emit)).into());
    }

    let config = TargetConfig {
        entry: entry.into(),
        ..config.clone()
    };
    let artifact = backend::lower(module, &config)?;

    // A bare file name would be looked up on PATH
    let executable = Path::new(".").join(&artifact.path);
    let output = Command::new(&executable)
        .args(args)
        .stdin(Stdio::inherit())
        .output()?;

    let status = output
        .status
        .code()
        .ok_or_else(|| Error::Terminated(output.status.to_string()))?;

    Ok(Outcome {
        status: status as u8,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
