//! Element-dialect interpretation (§4.7): per-lane divergent control flow.
//! Every statement carries a lane `active` mask; `If` splits it by the
//! condition's per-lane truthiness instead of reducing to one decision,
//! `Break` retires a lane from its enclosing loop without touching the
//! others, `Continue` skips the remaining body for a lane this iteration
//! only, and `Return` writes that lane's output and retires it from the
//! whole block.

use crate::ir::stmt::{Block, IrStmt};

use super::expr_engine::{Buffer, EngineError, ExpressionEngine, VarBuffers};

/// Lanes still running. Shrinks only on `Return`; `Break`/`Continue` are
/// scoped to the innermost loop and a single iteration respectively and do
/// not touch this mask.
pub struct ElementState {
    pub run_mask: Vec<bool>,
}

impl ElementState {
    pub fn all_active(len: usize) -> Self {
        ElementState {
            run_mask: vec![true; len],
        }
    }
}

pub fn run_block(
    block: &Block,
    engine: &mut dyn ExpressionEngine,
    vars: &mut VarBuffers,
    output: &mut Buffer,
    state: &mut ElementState,
) -> Result<(), EngineError> {
    let mut active = state.run_mask.clone();
    run_stmts(block, engine, vars, output, state, None, &mut active)
}

fn any(mask: &[bool]) -> bool {
    mask.iter().any(|&b| b)
}

fn run_stmts(
    block: &Block,
    engine: &mut dyn ExpressionEngine,
    vars: &mut VarBuffers,
    output: &mut Buffer,
    state: &mut ElementState,
    mut loop_break: Option<&mut [bool]>,
    active: &mut [bool],
) -> Result<(), EngineError> {
    let width = active.len();
    for stmt in block {
        if !any(active) {
            break;
        }
        match stmt {
            IrStmt::Assign { name, value, .. } => {
                let result = engine.eval(value, vars, width)?;
                let mut current = vars
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| Buffer::zeroed(result.dtype(), width));
                current.masked_copy_from(&result, active);
                vars.set(name.clone(), current);
            }
            IrStmt::Return { value, .. } => {
                let result = engine.eval(value, vars, width)?;
                output.masked_copy_from(&result, active);
                for (i, a) in active.iter_mut().enumerate() {
                    if *a {
                        state.run_mask[i] = false;
                        *a = false;
                    }
                }
            }
            IrStmt::If {
                cond,
                then_block,
                elifs,
                else_block,
                ..
            } => {
                let cond_buf = engine.eval(cond, vars, width)?;
                let mut remaining: Vec<bool> = active.to_vec();
                let mut survivors = vec![false; width];

                let mut then_active: Vec<bool> =
                    (0..width).map(|i| remaining[i] && cond_buf.truthy(i)).collect();
                for i in 0..width {
                    if then_active[i] {
                        remaining[i] = false;
                    }
                }
                if any(&then_active) {
                    run_stmts(
                        then_block,
                        engine,
                        vars,
                        output,
                        state,
                        loop_break.as_deref_mut(),
                        &mut then_active,
                    )?;
                }
                for i in 0..width {
                    survivors[i] |= then_active[i];
                }

                for arm in elifs {
                    if !any(&remaining) {
                        break;
                    }
                    let arm_cond = engine.eval(&arm.cond, vars, width)?;
                    let mut arm_active: Vec<bool> =
                        (0..width).map(|i| remaining[i] && arm_cond.truthy(i)).collect();
                    for i in 0..width {
                        if arm_active[i] {
                            remaining[i] = false;
                        }
                    }
                    if any(&arm_active) {
                        run_stmts(
                            &arm.block,
                            engine,
                            vars,
                            output,
                            state,
                            loop_break.as_deref_mut(),
                            &mut arm_active,
                        )?;
                    }
                    for i in 0..width {
                        survivors[i] |= arm_active[i];
                    }
                }

                if let Some(else_block) = else_block {
                    let mut else_active = remaining.clone();
                    if any(&else_active) {
                        run_stmts(
                            else_block,
                            engine,
                            vars,
                            output,
                            state,
                            loop_break.as_deref_mut(),
                            &mut else_active,
                        )?;
                    }
                    for i in 0..width {
                        survivors[i] |= else_active[i];
                    }
                } else {
                    for i in 0..width {
                        survivors[i] |= remaining[i];
                    }
                }

                active.copy_from_slice(&survivors);
            }
            IrStmt::For { var, limit, body } => {
                let limit_buf = engine.eval(limit, vars, width)?;
                let limit_vals: Vec<i64> = match limit_buf {
                    Buffer::I64(v) => v,
                    Buffer::F64(v) => v.iter().map(|f| *f as i64).collect(),
                    Buffer::Bool(v) => v.iter().map(|b| b as i64).collect(),
                };
                let entered: Vec<bool> = active.to_vec();
                let mut break_mask = vec![false; width];
                let mut index: i64 = 0;
                loop {
                    let mut iter_mask: Vec<bool> = (0..width)
                        .map(|i| {
                            entered[i]
                                && !break_mask[i]
                                && state.run_mask[i]
                                && index < limit_vals[i]
                        })
                        .collect();
                    if !any(&iter_mask) {
                        break;
                    }
                    vars.set(var.clone(), Buffer::I64(vec![index; width]));
                    run_stmts(
                        body,
                        engine,
                        vars,
                        output,
                        state,
                        Some(&mut break_mask),
                        &mut iter_mask,
                    )?;
                    index += 1;
                }
                for (i, a) in active.iter_mut().enumerate() {
                    *a = *a && state.run_mask[i];
                }
            }
            IrStmt::Break { .. } => {
                if let Some(lb) = loop_break.as_deref_mut() {
                    for (i, a) in active.iter().enumerate() {
                        if *a {
                            lb[i] = true;
                        }
                    }
                }
                active.iter_mut().for_each(|a| *a = false);
            }
            IrStmt::Continue { .. } => {
                active.iter_mut().for_each(|a| *a = false);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::Dtype;
    use crate::ir::expr::IrExpr;
    use crate::ir::stmt::Pos;

    struct LaneEngine;

    impl ExpressionEngine for LaneEngine {
        fn eval(&mut self, expr: &IrExpr, vars: &VarBuffers, width: usize) -> Result<Buffer, EngineError> {
            if let Some(buf) = vars.get(&expr.text) {
                return Ok(buf.clone());
            }
            if let Ok(i) = expr.text.parse::<i64>() {
                return Ok(Buffer::I64(vec![i; width]));
            }
            if expr.text == "i_eq_lane" {
                let i = match vars.get("i") {
                    Some(Buffer::I64(v)) => v.clone(),
                    _ => return Err(EngineError::UnboundVariable("i".into())),
                };
                let lane = match vars.get("lane_id") {
                    Some(Buffer::I64(v)) => v.clone(),
                    _ => return Err(EngineError::UnboundVariable("lane_id".into())),
                };
                let out = i.iter().zip(lane.iter()).map(|(a, b)| a == b).collect();
                return Ok(Buffer::Bool(out));
            }
            Err(EngineError::UnboundVariable(expr.text.clone()))
        }
    }

    #[test]
    fn lanes_break_out_of_a_shared_loop_at_different_iterations() {
        let block: Block = vec![
            IrStmt::Assign {
                pos: Pos::new(1, 1),
                name: "acc".into(),
                dtype: Dtype::Int64,
                value: IrExpr::new("0", Dtype::Int64),
            },
            IrStmt::For {
                pos: Pos::new(2, 1),
                var: "i".into(),
                limit: IrExpr::new("3", Dtype::Int64),
                body: vec![
                    IrStmt::Assign {
                        pos: Pos::new(3, 1),
                        name: "acc".into(),
                        dtype: Dtype::Int64,
                        value: IrExpr::new("i", Dtype::Int64),
                    },
                    IrStmt::If {
                        pos: Pos::new(4, 1),
                        cond: IrExpr::new("i_eq_lane", Dtype::Bool),
                        then_block: vec![IrStmt::Break { pos: Pos::new(5, 1) }],
                        elifs: vec![],
                        else_block: None,
                    },
                ],
            },
            IrStmt::Return {
                pos: Pos::new(6, 1),
                value: IrExpr::new("acc", Dtype::Int64),
            },
        ];

        let mut vars = VarBuffers::new();
        vars.set("lane_id", Buffer::I64(vec![0, 1]));
        let mut output = Buffer::zeroed(Dtype::Int64, 2);
        let mut state = ElementState::all_active(2);
        run_block(&block, &mut LaneEngine, &mut vars, &mut output, &mut state).unwrap();

        match output {
            Buffer::I64(v) => assert_eq!(v, vec![0, 1]),
            _ => panic!("wrong dtype"),
        }
    }

    #[test]
    fn if_else_returns_diverge_per_lane() {
        let block: Block = vec![IrStmt::If {
            pos: Pos::new(1, 1),
            cond: IrExpr::new("cond", Dtype::Bool),
            then_block: vec![IrStmt::Return {
                pos: Pos::new(2, 1),
                value: IrExpr::new("1", Dtype::Int64),
            }],
            elifs: vec![],
            else_block: Some(vec![IrStmt::Return {
                pos: Pos::new(3, 1),
                value: IrExpr::new("2", Dtype::Int64),
            }]),
        }];

        let mut vars = VarBuffers::new();
        vars.set("cond", Buffer::Bool(vec![true, false]));
        let mut output = Buffer::zeroed(Dtype::Int64, 2);
        let mut state = ElementState::all_active(2);
        run_block(&block, &mut LaneEngine, &mut vars, &mut output, &mut state).unwrap();

        match output {
            Buffer::I64(v) => assert_eq!(v, vec![1, 2]),
            _ => panic!("wrong dtype"),
        }
    }
}
