//! Middle and back end of the Kiln compiler: a typed tree goes in, MIR is
//! built and optimized, and the result is either interpreted or compiled to
//! a native executable.

use thiserror::Error;

pub mod backend;
pub mod frontend;
pub mod index;
pub mod logging;
pub mod middle;
pub mod runner;
pub mod runtime;
pub mod vm;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] middle::builder::BuildError),
    #[error(transparent)]
    Pipeline(#[from] middle::passes::PipelineError),
    #[error(transparent)]
    Fault(#[from] vm::RuntimeFault),
    #[error(transparent)]
    Backend(#[from] backend::BackendError),
    #[error("malformed input: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("program was terminated: {0}")]
    Terminated(String),
}
