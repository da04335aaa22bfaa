//! Debug pretty-printer for IR programs, used in tests and by `ME_DSL_TRACE`.

use std::fmt;

use crate::ir::program::IrProgram;
use crate::ir::stmt::{Block, IrStmt};

impl fmt::Display for IrProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let params: Vec<String> = self
            .parameters
            .iter()
            .map(|p| format!("{}: {}", p.name, p.dtype))
            .collect();
        writeln!(
            f,
            "def {}({}) [{:?}/{:?}]:",
            self.name,
            params.join(", "),
            self.dialect,
            self.fp_mode
        )?;
        write_block(f, &self.body, 1)
    }
}

fn indent(f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
    for _ in 0..depth {
        write!(f, "  ")?;
    }
    Ok(())
}

fn write_block(f: &mut fmt::Formatter<'_>, block: &Block, depth: usize) -> fmt::Result {
    for stmt in block {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut fmt::Formatter<'_>, stmt: &IrStmt, depth: usize) -> fmt::Result {
    indent(f, depth)?;
    match stmt {
        IrStmt::Assign { name, dtype, value, .. } => {
            writeln!(f, "{name}: {dtype} = {}", value.text)
        }
        IrStmt::Return { value, .. } => writeln!(f, "return {}", value.text),
        IrStmt::If {
            cond,
            then_block,
            elifs,
            else_block,
            ..
        } => {
            writeln!(f, "if {}:", cond.text)?;
            write_block(f, then_block, depth + 1)?;
            for arm in elifs {
                indent(f, depth)?;
                writeln!(f, "elif {}:", arm.cond.text)?;
                write_block(f, &arm.block, depth + 1)?;
            }
            if let Some(else_block) = else_block {
                indent(f, depth)?;
                writeln!(f, "else:")?;
                write_block(f, else_block, depth + 1)?;
            }
            Ok(())
        }
        IrStmt::For { var, limit, body, .. } => {
            writeln!(f, "for {var} in range({}):", limit.text)?;
            write_block(f, body, depth + 1)
        }
        IrStmt::Break { .. } => writeln!(f, "break"),
        IrStmt::Continue { .. } => writeln!(f, "continue"),
    }
}
