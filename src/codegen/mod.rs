//! C code generation from typed IR (§4.4).

pub mod cgen;
pub mod tokens;

pub use cgen::{generate, CodegenError, CodegenOptions, DEFAULT_SYMBOL};
