//! Deterministic 64-bit fingerprint of an IR program (§4.2).
//!
//! An FNV-1a-style hash, pure and reentrant: two structurally identical IR
//! programs fingerprint identically across processes and runs. Mixes, in
//! exact order: program name, dialect, parameters (name + dtype each), then
//! the body block recursively. Used to key every tier of the runtime cache.

use crate::hashutil::{Mixer, SEED};
use crate::ir::program::IrProgram;
use crate::ir::stmt::{Block, IrStmt};

fn mix_expr(h: &mut Mixer, expr: &crate::ir::expr::IrExpr) {
    h.mix_str_nul(&expr.text);
    h.mix_tag(expr.dtype.tag());
}

fn mix_block(h: &mut Mixer, block: &Block) {
    h.mix_i32(block.len() as i32);
    for stmt in block {
        mix_stmt(h, stmt);
    }
}

fn mix_stmt(h: &mut Mixer, stmt: &IrStmt) {
    let pos = stmt.pos();
    match stmt {
        IrStmt::Assign { name, dtype, value, .. } => {
            h.mix_tag(0);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
            h.mix_str_nul(name);
            h.mix_tag(dtype.tag());
            mix_expr(h, value);
        }
        IrStmt::Return { value, .. } => {
            h.mix_tag(1);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
            mix_expr(h, value);
        }
        IrStmt::If {
            cond,
            then_block,
            elifs,
            else_block,
            ..
        } => {
            h.mix_tag(2);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
            mix_expr(h, cond);
            mix_block(h, then_block);
            h.mix_i32(elifs.len() as i32);
            for arm in elifs {
                mix_expr(h, &arm.cond);
                mix_block(h, &arm.block);
            }
            match else_block {
                Some(block) => mix_block(h, block),
                None => h.mix_null(),
            }
        }
        IrStmt::For { var, limit, body, .. } => {
            h.mix_tag(3);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
            h.mix_str_nul(var);
            mix_expr(h, limit);
            mix_block(h, body);
        }
        IrStmt::Break { .. } => {
            h.mix_tag(4);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
        }
        IrStmt::Continue { .. } => {
            h.mix_tag(5);
            h.mix_u32(pos.line);
            h.mix_u32(pos.column);
        }
    }
}

/// Compute the deterministic fingerprint of an IR program.
pub fn fingerprint(program: &IrProgram) -> u64 {
    let mut h = Mixer::new(SEED);
    h.mix_str_nul(&program.name);
    h.mix_tag(program.dialect.tag());
    h.mix_i32(program.parameters.len() as i32);
    for p in &program.parameters {
        h.mix_str_nul(&p.name);
        h.mix_tag(p.dtype.tag());
    }
    mix_block(&mut h, &program.body);
    h.finish()
}
