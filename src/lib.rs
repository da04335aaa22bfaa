//! JIT compilation pipeline for a numeric array-expression DSL.
//!
//! A surface AST (`ast`) is lowered by a dtype-resolving builder
//! (`ir::builder`) into a typed IR (`ir`). The IR is fingerprinted
//! (`fingerprint`) and combined with dtype/ABI/platform discriminants into
//! a cache key (`cache::key`). `codegen` lowers IR to C source; `loader`
//! turns that source (or, for the embedded backend, the IR directly) into
//! a loaded native kernel through a three-tier cache
//! (`cache::{positive,negative,disk}`). `program::CompiledProgram` ties all
//! of that together; `eval::eval_block` is the per-block entry point,
//! falling back to the tree-walking `interpreter` when no kernel is loaded
//! or a loaded kernel reports failure mid-block.

pub mod ast;
pub mod cache;
pub mod codegen;
pub mod dtype;
pub mod env;
pub mod eval;
pub mod fingerprint;
pub mod hashutil;
pub mod interpreter;
pub mod ir;
pub mod loader;
pub mod program;
pub mod rewrite;
pub mod trace;

pub use dtype::{Dialect, Dtype, FpMode};
pub use eval::{eval_block, EvalError, HostArray, NdimContext};
pub use fingerprint::fingerprint;
pub use ir::builder::{BuildError, DtypeResolver, FnResolver};
pub use program::CompiledProgram;
