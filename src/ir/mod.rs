//! Typed intermediate representation: the tree the builder produces, the
//! fingerprint hashes, and the code generator lowers.

pub mod builder;
pub mod display;
pub mod expr;
pub mod program;
pub mod stmt;
pub mod symtab;

pub use builder::BuildError;
pub use expr::IrExpr;
pub use program::{IrProgram, Param};
pub use stmt::{Block, ElifArm, IrStmt, Pos};
