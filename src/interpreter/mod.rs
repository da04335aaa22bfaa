//! Fallback interpreter (§4.7): executed when no kernel is loaded, or when
//! a loaded kernel returns a nonzero status mid-block. Control flow (If,
//! For, Break, Continue, Return) is ours; evaluating an expression over a
//! block of data is delegated to an external `ExpressionEngine` — the same
//! external-collaborator shape as the IR builder's `DtypeResolver` (§6
//! "Provided dtype resolver").

pub mod element;
pub mod expr_engine;
pub mod vector;

pub use expr_engine::{Buffer, EngineError, ExpressionEngine, VarBuffers};

use crate::dtype::Dialect;
use crate::ir::program::IrProgram;

/// Execute `program.body` against `vars`/`output` using the dialect
/// recorded on the program, delegating expressions to `engine`.
pub fn run(
    program: &IrProgram,
    engine: &mut dyn ExpressionEngine,
    vars: &mut VarBuffers,
    output: &mut Buffer,
) -> Result<(), EngineError> {
    match program.dialect {
        Dialect::Vector => {
            vector::run_block(&program.body, engine, vars, output)?;
            Ok(())
        }
        Dialect::Element => {
            if !crate::env::element_dialect_enabled() {
                // §6: ME_DSL_ELEMENT=0 disables the element dialect; the
                // vector shape is still a valid (if less precise) fallback
                // for control flow without per-lane divergence.
                vector::run_block(&program.body, engine, vars, output)?;
                return Ok(());
            }
            let len = output.len();
            let mut state = element::ElementState::all_active(len);
            element::run_block(&program.body, engine, vars, output, &mut state)?;
            Ok(())
        }
    }
}
