//! Invocations of the system C compiler. Every intermediate file lives in a
//! temporary directory that is removed when the [`Workspace`] is dropped.

use std::{
    fs,
    path::{Path, PathBuf},
    process::Command,
};

use tracing::debug;

use super::{BackendError, OptLevel, TargetConfig};
use crate::runtime::{C_HEADER, C_HEADER_NAME, C_SOURCE, C_SOURCE_NAME};

pub struct Workspace {
    directory: mktemp::Temp,
    cc: String,
    opt_level: OptLevel,
}

impl Workspace {
    pub fn new(config: &TargetConfig) -> Result<Self, BackendError> {
        let directory = mktemp::Temp::new_dir()?;
        debug!(path = %directory.as_path().display(), "created backend workspace");

        Ok(Self {
            directory,
            cc: config.cc.clone(),
            opt_level: config.opt_level,
        })
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.directory.as_path().join(name)
    }

    pub fn write(&self, name: &str, contents: impl AsRef<[u8]>) -> Result<PathBuf, BackendError> {
        let path = self.path(name);
        fs::write(&path, contents)?;
        Ok(path)
    }

    /// Writes the runtime header next to generated sources so `#include`
    /// finds it.
    pub fn write_runtime_header(&self) -> Result<PathBuf, BackendError> {
        self.write(C_HEADER_NAME, C_HEADER)
    }

    /// Compiles the embedded C runtime and returns the object path
    pub fn compile_runtime(&self) -> Result<PathBuf, BackendError> {
        self.write_runtime_header()?;
        let source = self.write(C_SOURCE_NAME, C_SOURCE)?;
        let object = self.path("kiln_rt.o");
        self.compile(&source, &object)?;
        Ok(object)
    }

    pub fn compile(&self, source: &Path, object: &Path) -> Result<(), BackendError> {
        run(self.create_compile_command(source, object))
    }

    pub fn link(&self, objects: &[PathBuf], output: &Path) -> Result<(), BackendError> {
        run(self.create_linker_command(objects, output))
    }

    fn create_compile_command(&self, source: &Path, object: &Path) -> Command {
        let mut cmd = Command::new(&self.cc);

        cmd.args(["-std=c11", "-c", opt_flag(self.opt_level), "-fwrapv"])
            .arg("-I")
            .arg(self.directory.as_path())
            .arg("-o")
            .arg(object)
            .arg(source);

        cmd
    }

    fn create_linker_command(&self, objects: &[PathBuf], output: &Path) -> Command {
        let mut cmd = Command::new(&self.cc);

        cmd.arg("-o").arg(output).args(objects).arg("-lm");

        cmd
    }
}

fn opt_flag(level: OptLevel) -> &'static str {
    match level {
        OptLevel::None => "-O0",
        OptLevel::Speed => "-O2",
        OptLevel::Size => "-Os",
    }
}

fn run(mut cmd: Command) -> Result<(), BackendError> {
    let command = format!("{cmd:?}");
    debug!(%command, "running toolchain");

    let output = cmd.output().map_err(|error| BackendError::Toolchain {
        command: command.clone(),
        status: "not started".into(),
        stderr: error.to_string(),
    })?;

    if output.status.success() {
        return Ok(());
    }

    Err(BackendError::Toolchain {
        command,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Whether a C compiler can be started at all
pub fn cc_available(cc: &str) -> bool {
    Command::new(cc)
        .arg("--version")
        .output()
        .is_ok_and(|output| output.status.success())
}
