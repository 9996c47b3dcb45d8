//! The typed tree is lowered to MIR here and MIR is verified and optimized
//! before being handed to a backend.

pub mod builder;
pub mod mir;
pub mod passes;
