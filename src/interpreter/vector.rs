//! Vector-dialect interpretation (§4.7): one control decision for the whole
//! block. `If`/`elif` conditions reduce to a single boolean before exactly
//! one arm executes; `For` runs sequentially; `Break`/`Continue`/`Return`
//! end or skip the whole block's current iteration, not a subset of lanes.

use crate::dtype::Dtype;
use crate::ir::stmt::{Block, IrStmt};

use super::expr_engine::{Buffer, EngineError, ExpressionEngine, VarBuffers};

/// Outcome of running a block: whether it fell off the end, or exited via
/// one of the three jump statements.
enum Flow {
    Normal,
    Broke,
    Continued,
    Returned,
}

/// A condition buffer reduces to a single decision by requiring every lane
/// agree (AND-reduction). This is the vector dialect's "reduction-or-scalar
/// boolean decision" (§4.7); a genuinely per-lane divergent condition is
/// exactly what the element dialect exists for.
fn reduce_condition(buf: &Buffer) -> bool {
    (0..buf.len()).all(|lane| buf.truthy(lane))
}

pub fn run_block(
    block: &Block,
    engine: &mut dyn ExpressionEngine,
    vars: &mut VarBuffers,
    output: &mut Buffer,
) -> Result<(), EngineError> {
    run(block, engine, vars, output)?;
    Ok(())
}

fn run(
    block: &Block,
    engine: &mut dyn ExpressionEngine,
    vars: &mut VarBuffers,
    output: &mut Buffer,
) -> Result<Flow, EngineError> {
    let width = output.len();
    for stmt in block {
        match stmt {
            IrStmt::Assign { name, value, .. } => {
                let result = engine.eval(value, vars, width)?;
                vars.set(name.clone(), result);
            }
            IrStmt::Return { value, .. } => {
                let result = engine.eval(value, vars, width)?;
                output.copy_from(&result);
                return Ok(Flow::Returned);
            }
            IrStmt::If {
                cond,
                then_block,
                elifs,
                else_block,
                ..
            } => {
                let cond_buf = engine.eval(cond, vars, width)?;
                if reduce_condition(&cond_buf) {
                    match run(then_block, engine, vars, output)? {
                        Flow::Normal => {}
                        other => return Ok(other),
                    }
                    continue;
                }
                let mut taken = false;
                for arm in elifs {
                    let arm_cond = engine.eval(&arm.cond, vars, width)?;
                    if reduce_condition(&arm_cond) {
                        taken = true;
                        match run(&arm.block, engine, vars, output)? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                        break;
                    }
                }
                if !taken {
                    if let Some(else_block) = else_block {
                        match run(else_block, engine, vars, output)? {
                            Flow::Normal => {}
                            other => return Ok(other),
                        }
                    }
                }
            }
            IrStmt::For { var, limit, body } => {
                let limit_buf = engine.eval(limit, vars, width)?;
                let count = match limit_buf {
                    Buffer::I64(v) => v.first().copied().unwrap_or(0),
                    Buffer::F64(v) => v.first().copied().unwrap_or(0.0) as i64,
                    Buffer::Bool(v) => v.first().copied().unwrap_or(false) as i64,
                };
                let mut i = 0i64;
                'iter: while i < count {
                    vars.set(var.clone(), Buffer::I64(vec![i; width]));
                    match run(body, engine, vars, output)? {
                        Flow::Normal => {}
                        Flow::Continued => {}
                        Flow::Broke => break 'iter,
                        Flow::Returned => return Ok(Flow::Returned),
                    }
                    i += 1;
                }
            }
            IrStmt::Break { .. } => return Ok(Flow::Broke),
            IrStmt::Continue { .. } => return Ok(Flow::Continued),
        }
    }
    Ok(Flow::Normal)
}

#[allow(dead_code)]
fn dtype_of(buf: &Buffer) -> Dtype {
    buf.dtype()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::expr::IrExpr;
    use crate::ir::stmt::{ElifArm, Pos};

    /// An engine whose `eval` just looks up a bound variable, or parses the
    /// text as a literal integer/float/bool — enough to drive the control
    /// flow tests without any real expression grammar.
    struct ToyEngine;

    impl ExpressionEngine for ToyEngine {
        fn eval(&mut self, expr: &IrExpr, vars: &VarBuffers, width: usize) -> Result<Buffer, EngineError> {
            if let Some(buf) = vars.get(&expr.text) {
                return Ok(buf.clone());
            }
            if let Ok(i) = expr.text.parse::<i64>() {
                return Ok(Buffer::I64(vec![i; width]));
            }
            if let Ok(f) = expr.text.parse::<f64>() {
                return Ok(Buffer::F64(vec![f; width]));
            }
            match expr.text.as_str() {
                "true" => Ok(Buffer::Bool(vec![true; width])),
                "false" => Ok(Buffer::Bool(vec![false; width])),
                other => Err(EngineError::UnboundVariable(other.to_string())),
            }
        }
    }

    #[test]
    fn accumulates_across_a_loop() {
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
                limit: IrExpr::new("4", Dtype::Int64),
                body: vec![IrStmt::Assign {
                    pos: Pos::new(3, 1),
                    name: "acc".into(),
                    dtype: Dtype::Int64,
                    value: IrExpr::new("i", Dtype::Int64),
                }],
            },
            IrStmt::Return {
                pos: Pos::new(4, 1),
                value: IrExpr::new("acc", Dtype::Int64),
            },
        ];
        let mut vars = VarBuffers::new();
        let mut output = Buffer::zeroed(Dtype::Int64, 2);
        run_block(&block, &mut ToyEngine, &mut vars, &mut output).unwrap();
        match output {
            Buffer::I64(v) => assert_eq!(v, vec![3, 3]),
            _ => panic!("wrong dtype"),
        }
    }

    #[test]
    fn break_stops_the_loop_early() {
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
                limit: IrExpr::new("10", Dtype::Int64),
                body: vec![
                    IrStmt::If {
                        pos: Pos::new(3, 1),
                        cond: IrExpr::new("true", Dtype::Bool),
                        then_block: vec![IrStmt::Break { pos: Pos::new(4, 1) }],
                        elifs: vec![],
                        else_block: None,
                    },
                    IrStmt::Assign {
                        pos: Pos::new(5, 1),
                        name: "acc".into(),
                        dtype: Dtype::Int64,
                        value: IrExpr::new("i", Dtype::Int64),
                    },
                ],
            },
            IrStmt::Return {
                pos: Pos::new(6, 1),
                value: IrExpr::new("acc", Dtype::Int64),
            },
        ];
        let mut vars = VarBuffers::new();
        let mut output = Buffer::zeroed(Dtype::Int64, 1);
        run_block(&block, &mut ToyEngine, &mut vars, &mut output).unwrap();
        match output {
            Buffer::I64(v) => assert_eq!(v, vec![0]),
            _ => panic!("wrong dtype"),
        }
    }

    #[test]
    fn elif_chain_picks_first_true_arm() {
        let block: Block = vec![IrStmt::If {
            pos: Pos::new(1, 1),
            cond: IrExpr::new("false", Dtype::Bool),
            then_block: vec![IrStmt::Return {
                pos: Pos::new(2, 1),
                value: IrExpr::new("0", Dtype::Int64),
            }],
            elifs: vec![ElifArm {
                cond: IrExpr::new("true", Dtype::Bool),
                block: vec![IrStmt::Return {
                    pos: Pos::new(3, 1),
                    value: IrExpr::new("7", Dtype::Int64),
                }],
            }],
            else_block: Some(vec![IrStmt::Return {
                pos: Pos::new(4, 1),
                value: IrExpr::new("9", Dtype::Int64),
            }]),
        }];
        let mut vars = VarBuffers::new();
        let mut output = Buffer::zeroed(Dtype::Int64, 1);
        run_block(&block, &mut ToyEngine, &mut vars, &mut output).unwrap();
        match output {
            Buffer::I64(v) => assert_eq!(v, vec![7]),
            _ => panic!("wrong dtype"),
        }
    }
}
