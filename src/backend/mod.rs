//! The backend turns verified MIR into native code. Two code generators
//! share one ABI with the VM and the C runtime:
//!
//! - `int` is an `i64`, `float` an `f64`, `bool` an 8-bit 0/1
//! - strings are pointers to NUL-terminated bytes
//! - arrays, maps, structs and closure records are pointers to runtime
//!   allocations whose elements are 8-byte slots holding each value's bits
//!
//! Every MIR function becomes a native function named by [`mangle`], and a
//! generated `main` converts the entry function's result into an exit status.

use std::{
    fmt::{self, Write as _},
    fs,
    path::PathBuf,
};

use strum::{Display, EnumString};
use thiserror::Error;
use tracing::info;

use crate::middle::mir::{Function, Module, Type};

pub mod c;
pub mod cranelift;
pub mod toolchain;

pub use toolchain::Workspace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Codegen {
    #[default]
    C,
    Cranelift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Emit {
    /// A relocatable object holding the program and its `main`. It still has
    /// to be linked against the runtime.
    Object,
    #[default]
    Executable,
    /// C source text (C code generator only)
    Source,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum OptLevel {
    #[default]
    None,
    Speed,
    Size,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    pub codegen: Codegen,
    pub emit: Emit,
    pub output: PathBuf,
    pub opt_level: OptLevel,
    /// C compiler used to build the runtime and link executables
    pub cc: String,
    /// Function called by the generated `main`
    pub entry: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            codegen: Codegen::default(),
            emit: Emit::default(),
            output: PathBuf::from("a.out"),
            opt_level: OptLevel::default(),
            cc: default_cc(),
            entry: "main".into(),
        }
    }
}

/// The C compiler named by `KILN_CC`, or `cc`
pub fn default_cc() -> String {
    std::env::var("KILN_CC")
        .ok()
        .filter(|cc| !cc.is_empty())
        .unwrap_or_else(|| "cc".into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub codegen: Codegen,
    pub emit: Emit,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("cannot lower {construct} in `{function}`")]
    Unsupported { function: String, construct: String },
    #[error("`{command}` failed ({status})\n{stderr}")]
    Toolchain {
        command: String,
        status: String,
        stderr: String,
    },
    #[error("code generation failed: {0}")]
    Codegen(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BackendError {
    pub fn unsupported(function: &str, construct: impl fmt::Display) -> Self {
        BackendError::Unsupported {
            function: function.into(),
            construct: construct.to_string(),
        }
    }

    pub fn codegen(error: impl fmt::Display) -> Self {
        BackendError::Codegen(error.to_string())
    }
}

pub trait CodeGenerator {
    fn name(&self) -> &'static str;

    /// Writes a relocatable object for `module` into the workspace and
    /// returns its path.
    fn emit_object(
        &self,
        module: &Module,
        config: &TargetConfig,
        workspace: &Workspace,
    ) -> Result<PathBuf, BackendError>;

    fn emit_source(&self, module: &Module, config: &TargetConfig) -> Result<String, BackendError>;
}

/// Lowers a verified module to the artifact described by `config`
pub fn lower(module: &Module, config: &TargetConfig) -> Result<Artifact, BackendError> {
    match config.codegen {
        Codegen::C => lower_with(&c::CGenerator, module, config),
        Codegen::Cranelift => lower_with(&cranelift::CraneliftGenerator, module, config),
    }
}

fn lower_with(
    generator: &impl CodeGenerator,
    module: &Module,
    config: &TargetConfig,
) -> Result<Artifact, BackendError> {
    info!(
        codegen = generator.name(),
        emit = %config.emit,
        output = %config.output.display(),
        "lowering module `{}`",
        module.name
    );

    match config.emit {
        Emit::Source => {
            let source = generator.emit_source(module, config)?;
            fs::write(&config.output, source)?;
        }
        Emit::Object => {
            let workspace = Workspace::new(config)?;
            let object = generator.emit_object(module, config, &workspace)?;
            fs::copy(object, &config.output)?;
        }
        Emit::Executable => {
            let workspace = Workspace::new(config)?;
            let object = generator.emit_object(module, config, &workspace)?;
            let runtime = workspace.compile_runtime()?;
            workspace.link(&[object, runtime], &config.output)?;
        }
    }

    Ok(Artifact {
        path: config.output.clone(),
        codegen: config.codegen,
        emit: config.emit,
    })
}

/// Native symbol of a MIR function. `_` is doubled and `$` becomes `_S` so
/// distinct names never collide.
pub fn mangle(name: &str) -> String {
    let mut symbol = String::from("kiln_fn_");
    for c in name.chars() {
        match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' => symbol.push(c),
            '_' => symbol.push_str("__"),
            '$' => symbol.push_str("_S"),
            c => {
                let _ = write!(symbol, "_x{:x}_", c as u32);
            }
        }
    }
    symbol
}

/// How the generated `main` turns the entry function's result into an exit
/// status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryResult {
    /// Low 8 bits of the integer
    Int,
    Bool,
    /// Printed with a trailing newline, exit status 0
    String,
    Void,
}

/// Finds the entry function and checks that native code can call it
pub fn entry_function<'m>(
    module: &'m Module,
    entry: &str,
) -> Result<(&'m Function, EntryResult), BackendError> {
    let function = module
        .function(entry)
        .ok_or_else(|| BackendError::unsupported(entry, "a missing entry function"))?;

    if !function.parameters.is_empty() {
        return Err(BackendError::unsupported(entry, "entry parameters"));
    }

    let result = match &function.return_type {
        Type::Int => EntryResult::Int,
        Type::Bool => EntryResult::Bool,
        Type::String => EntryResult::String,
        Type::Void => EntryResult::Void,
        ty => {
            return Err(BackendError::unsupported(
                entry,
                format_args!("a `{ty}` entry result"),
            ));
        }
    };

    Ok((function, result))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middle::mir::{BlockId, Terminator};

    #[test]
    fn mangled_names_do_not_collide() {
        assert_eq!(mangle("main"), "kiln_fn_main");
        assert_eq!(mangle("main$lambda0"), "kiln_fn_main_Slambda0");
        assert_eq!(mangle("a_b"), "kiln_fn_a__b");
        assert_ne!(mangle("a$b"), mangle("a_Sb"));
        assert_eq!(mangle("x.y"), "kiln_fn_x_x2e_y");
    }

    #[test]
    fn float_entry_results_are_unsupported() {
        let mut module = Module::new("test");
        let mut function = Function::new("main", Type::Float);
        function.block_mut(BlockId::ENTRY).terminator = Some(Terminator::Return { value: None });
        module.functions.insert("main".into(), function);

        let error = entry_function(&module, "main").unwrap_err();
        assert!(matches!(
            error,
            BackendError::Unsupported { ref function, .. } if function == "main"
        ));
        assert_eq!(error.to_string(), "cannot lower a `float` entry result in `main`");
    }

    #[test]
    fn codegen_names_parse() {
        assert_eq!("cranelift".parse::<Codegen>().unwrap(), Codegen::Cranelift);
        assert_eq!("source".parse::<Emit>().unwrap(), Emit::Source);
        assert!("llvm".parse::<Codegen>().is_err());
    }
}
