//! The IR program: the builder's output, codegen's input, and what the
//! fingerprint hashes.

use crate::dtype::{Dialect, FpMode};
use crate::ir::stmt::Block;

/// One formal parameter: name plus its resolved dtype.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub dtype: crate::dtype::Dtype,
}

/// A complete typed IR program. Owns its body block; blocks own their
/// statements; statements own their child blocks and expressions. No
/// back-pointers — fingerprint and codegen are pure recursive walks over
/// this tree (§9 design notes).
#[derive(Debug, Clone)]
pub struct IrProgram {
    pub name: String,
    pub dialect: Dialect,
    pub fp_mode: FpMode,
    pub parameters: Vec<Param>,
    pub body: Block,
}

impl IrProgram {
    /// Index of a parameter by name, used to build the
    /// parameter → host-input-index map at compile time.
    pub fn parameter_index(&self, name: &str) -> Option<usize> {
        self.parameters.iter().position(|p| p.name == name)
    }
}
