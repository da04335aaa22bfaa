//! The compiled-program runtime container (§3, §4.4 "Compiled program").
//!
//! Created once per compiled expression and held by the caller until the
//! expression is released. Owns everything needed to evaluate a block: the
//! typed IR, its fingerprint, the generated C source (kept even if no
//! kernel ever loads), the resolved output dtype, the parameter index map,
//! and — if compilation succeeded — the kernel entry point and a shared
//! reference to whatever loaded it.

use std::sync::Arc;

use crate::codegen::{self, CodegenError, CodegenOptions};
use crate::dtype::Dtype;
use crate::ir::program::IrProgram;
use crate::loader::artifact::LoadedArtifact;
use crate::loader::symbol::KernelFn;
use crate::loader::{self, LoadOutcome};
use crate::{env, fingerprint};

/// A compiled program ready for evaluation. The interpreter fallback is
/// always usable; the kernel is only set when some tier of §4.5's attempt
/// order succeeded.
pub struct CompiledProgram {
    pub ir: IrProgram,
    pub fingerprint: u64,
    pub generated_source: String,
    pub output_dtype: Dtype,
    /// parameter index in `ir.parameters` → host input buffer index.
    pub parameter_host_index: Vec<usize>,
    kernel: Option<KernelFn>,
    /// Kept alive only to keep `kernel` valid; dropped (and the artifact
    /// closed, unless the positive cache holds its own `Arc`) when this
    /// program is dropped.
    _artifact: Option<Arc<LoadedArtifact>>,
    cached: bool,
}

impl CompiledProgram {
    /// Compile `ir` for `output_dtype`, attempting to load a native kernel
    /// per §4.5. Never fails outright: codegen errors are the only hard
    /// failure, since a kernel-less program is still usable via the
    /// interpreter (§7 propagation policy).
    pub fn compile(
        ir: IrProgram,
        output_dtype: Dtype,
        parameter_host_index: Vec<usize>,
        symbol_name: Option<&str>,
    ) -> Result<Self, CodegenError> {
        let fp = fingerprint::fingerprint(&ir);
        let options = CodegenOptions { symbol_name };
        let source = codegen::generate(&ir, output_dtype, &options)?;
        let symbol = symbol_name.unwrap_or(codegen::DEFAULT_SYMBOL);

        crate::trace_line!(
            "compiling `{}` (fingerprint {:016x}) for output dtype {}",
            ir.name,
            fp,
            output_dtype
        );

        let outcome: Option<LoadOutcome> =
            loader::attempt_load(&ir, output_dtype, fp, &source, symbol);

        let (kernel, artifact, cached) = match outcome {
            Some(o) => (Some(o.kernel), Some(o.artifact), o.cache_hit),
            None => {
                crate::trace_line!("no kernel loaded for `{}`; interpreter only", ir.name);
                (None, None, false)
            }
        };

        Ok(CompiledProgram {
            ir,
            fingerprint: fp,
            generated_source: source,
            output_dtype,
            parameter_host_index,
            kernel,
            _artifact: artifact,
            cached,
        })
    }

    pub fn kernel(&self) -> Option<KernelFn> {
        self.kernel
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn parameter_count(&self) -> usize {
        self.ir.parameters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{Dialect, FpMode};
    use crate::ir::expr::IrExpr;
    use crate::ir::program::Param;
    use crate::ir::stmt::{IrStmt, Pos};

    #[test]
    fn compiles_even_when_jit_disabled() {
        std::env::set_var("ME_DSL_JIT", "0");
        let ir = IrProgram {
            name: "k".into(),
            dialect: Dialect::Vector,
            fp_mode: FpMode::Strict,
            parameters: vec![Param {
                name: "x".into(),
                dtype: Dtype::Int32,
            }],
            body: vec![IrStmt::Return {
                pos: Pos::new(1, 1),
                value: IrExpr::new("x", Dtype::Int32),
            }],
        };
        let compiled = CompiledProgram::compile(ir, Dtype::Int32, vec![0], None).unwrap();
        assert!(compiled.kernel().is_none());
        assert!(!compiled.generated_source.is_empty());
        std::env::remove_var("ME_DSL_JIT");
    }
}
