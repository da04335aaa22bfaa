//! The per-block evaluation entry point (§4.6): tries the loaded kernel
//! first, falling back to the interpreter when no kernel loaded or the
//! kernel itself reports a nonzero status.

use std::os::raw::c_void;

use thiserror::Error;

use crate::dtype::Dtype;
use crate::interpreter::{self, Buffer, ExpressionEngine, VarBuffers};
use crate::program::CompiledProgram;

#[derive(Debug, Error)]
pub enum EvalError {
    #[error("expected {expected} host inputs, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },
    #[error("interpreter error: {0}")]
    Interpreter(#[from] interpreter::EngineError),
}

/// One host-owned, dtype-tagged, contiguous input array: exactly the
/// layout the generated kernel ABI expects (§4.4), not the interpreter's
/// widened `Buffer` representation.
#[derive(Debug, Clone)]
pub enum HostArray {
    Bool(Vec<bool>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Uint8(Vec<u8>),
    Uint16(Vec<u16>),
    Uint32(Vec<u32>),
    Uint64(Vec<u64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
}

macro_rules! host_array_dispatch {
    ($self:expr, $v:ident => $body:expr) => {
        match $self {
            HostArray::Bool($v) => $body,
            HostArray::Int8($v) => $body,
            HostArray::Int16($v) => $body,
            HostArray::Int32($v) => $body,
            HostArray::Int64($v) => $body,
            HostArray::Uint8($v) => $body,
            HostArray::Uint16($v) => $body,
            HostArray::Uint32($v) => $body,
            HostArray::Uint64($v) => $body,
            HostArray::Float32($v) => $body,
            HostArray::Float64($v) => $body,
        }
    };
}

impl HostArray {
    pub fn dtype(&self) -> Dtype {
        match self {
            HostArray::Bool(_) => Dtype::Bool,
            HostArray::Int8(_) => Dtype::Int8,
            HostArray::Int16(_) => Dtype::Int16,
            HostArray::Int32(_) => Dtype::Int32,
            HostArray::Int64(_) => Dtype::Int64,
            HostArray::Uint8(_) => Dtype::Uint8,
            HostArray::Uint16(_) => Dtype::Uint16,
            HostArray::Uint32(_) => Dtype::Uint32,
            HostArray::Uint64(_) => Dtype::Uint64,
            HostArray::Float32(_) => Dtype::Float32,
            HostArray::Float64(_) => Dtype::Float64,
        }
    }

    pub fn len(&self) -> usize {
        host_array_dispatch!(self, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a zeroed array of `dtype` with `len` elements, used for the
    /// kernel's raw output buffer and for scratch locals that feed back
    /// into the interpreter only on fallback.
    pub fn zeroed(dtype: Dtype, len: usize) -> Self {
        match dtype {
            Dtype::Bool => HostArray::Bool(vec![false; len]),
            Dtype::Int8 => HostArray::Int8(vec![0; len]),
            Dtype::Int16 => HostArray::Int16(vec![0; len]),
            Dtype::Int32 => HostArray::Int32(vec![0; len]),
            Dtype::Int64 => HostArray::Int64(vec![0; len]),
            Dtype::Uint8 => HostArray::Uint8(vec![0; len]),
            Dtype::Uint16 => HostArray::Uint16(vec![0; len]),
            Dtype::Uint32 => HostArray::Uint32(vec![0; len]),
            Dtype::Uint64 => HostArray::Uint64(vec![0; len]),
            Dtype::Float32 => HostArray::Float32(vec![0.0; len]),
            Dtype::Float64 => HostArray::Float64(vec![0.0; len]),
            Dtype::Auto => HostArray::Int64(vec![0; len]),
        }
    }

    fn as_void_ptr(&self) -> *const c_void {
        host_array_dispatch!(self, v => v.as_ptr() as *const c_void)
    }

    fn as_void_ptr_mut(&mut self) -> *mut c_void {
        host_array_dispatch!(self, v => v.as_mut_ptr() as *mut c_void)
    }

    /// Widen into the interpreter's dtype-grouped `Buffer` representation.
    pub fn to_buffer(&self) -> Buffer {
        match self {
            HostArray::Bool(v) => Buffer::Bool(v.clone()),
            HostArray::Int8(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Int16(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Int32(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Int64(v) => Buffer::I64(v.clone()),
            HostArray::Uint8(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Uint16(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Uint32(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Uint64(v) => Buffer::I64(v.iter().map(|x| *x as i64).collect()),
            HostArray::Float32(v) => Buffer::F64(v.iter().map(|x| *x as f64).collect()),
            HostArray::Float64(v) => Buffer::F64(v.clone()),
        }
    }

    /// Narrow an interpreter `Buffer` result back down into a host array of
    /// `dtype`, used after an interpreter fallback run.
    pub fn from_buffer(buf: &Buffer, dtype: Dtype) -> Self {
        match (buf, dtype) {
            (Buffer::Bool(v), _) => HostArray::Bool(v.clone()),
            (Buffer::I64(v), Dtype::Int8) => HostArray::Int8(v.iter().map(|x| *x as i8).collect()),
            (Buffer::I64(v), Dtype::Int16) => HostArray::Int16(v.iter().map(|x| *x as i16).collect()),
            (Buffer::I64(v), Dtype::Int32) => HostArray::Int32(v.iter().map(|x| *x as i32).collect()),
            (Buffer::I64(v), Dtype::Uint8) => HostArray::Uint8(v.iter().map(|x| *x as u8).collect()),
            (Buffer::I64(v), Dtype::Uint16) => HostArray::Uint16(v.iter().map(|x| *x as u16).collect()),
            (Buffer::I64(v), Dtype::Uint32) => HostArray::Uint32(v.iter().map(|x| *x as u32).collect()),
            (Buffer::I64(v), Dtype::Uint64) => HostArray::Uint64(v.iter().map(|x| *x as u64).collect()),
            (Buffer::I64(v), _) => HostArray::Int64(v.clone()),
            (Buffer::F64(v), Dtype::Float32) => HostArray::Float32(v.iter().map(|x| *x as f32).collect()),
            (Buffer::F64(v), _) => HostArray::Float64(v.clone()),
        }
    }
}

/// N-d iteration context consumed by the reserved `_ndim`/`_n<d>`/`_i<d>`
/// variables (§4.6 step 3). The full block-iteration layer that produces
/// this context is out of scope here; this crate only consumes it.
#[derive(Debug, Clone, Default)]
pub struct NdimContext {
    pub shape: Vec<i64>,
    pub index: Vec<i64>,
}

impl NdimContext {
    fn install(&self, vars: &mut VarBuffers, width: usize) {
        vars.set("_ndim", Buffer::I64(vec![self.shape.len() as i64; width]));
        for (d, n) in self.shape.iter().enumerate() {
            vars.set(format!("_n{d}"), Buffer::I64(vec![*n; width]));
        }
        for (d, i) in self.index.iter().enumerate() {
            vars.set(format!("_i{d}"), Buffer::I64(vec![*i; width]));
        }
    }
}

/// Evaluate one block of `nitems` items. `inputs` must line up with
/// `program.ir.parameters` via `parameter_host_index`, i.e. `inputs.len()`
/// is the number of distinct host buffers the caller has, not necessarily
/// the parameter count.
pub fn eval_block(
    program: &CompiledProgram,
    inputs: &[HostArray],
    nitems: usize,
    ndim: Option<&NdimContext>,
    engine: &mut dyn ExpressionEngine,
) -> Result<HostArray, EvalError> {
    if let Some(kernel) = program.kernel() {
        if program.parameter_host_index.len() == program.ir.parameters.len() {
            let mut resolved = Vec::with_capacity(program.parameter_host_index.len());
            let mut ok = true;
            for &idx in &program.parameter_host_index {
                match inputs.get(idx) {
                    Some(arr) => resolved.push(arr),
                    None => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok {
                let jit_inputs: Vec<*const c_void> = resolved.iter().map(|a| a.as_void_ptr()).collect();
                let mut output = HostArray::zeroed(program.output_dtype, nitems);
                let status = unsafe {
                    kernel(
                        jit_inputs.as_ptr(),
                        output.as_void_ptr_mut(),
                        nitems as i64,
                    )
                };
                if status == 0 {
                    return Ok(output);
                }
                crate::trace_line!(
                    "kernel for `{}` returned status {status}; falling back to interpreter",
                    program.ir.name
                );
            }
        }
    }

    run_interpreter(program, inputs, nitems, ndim, engine)
}

fn run_interpreter(
    program: &CompiledProgram,
    inputs: &[HostArray],
    nitems: usize,
    ndim: Option<&NdimContext>,
    engine: &mut dyn ExpressionEngine,
) -> Result<HostArray, EvalError> {
    if program.parameter_host_index.len() != program.ir.parameters.len() {
        return Err(EvalError::ArityMismatch {
            expected: program.ir.parameters.len(),
            actual: program.parameter_host_index.len(),
        });
    }

    let mut vars = VarBuffers::new();
    for (param, &host_idx) in program.ir.parameters.iter().zip(&program.parameter_host_index) {
        let arr = inputs
            .get(host_idx)
            .ok_or(EvalError::ArityMismatch {
                expected: program.ir.parameters.len(),
                actual: inputs.len(),
            })?;
        vars.set(param.name.clone(), arr.to_buffer());
    }
    for (name, dtype) in crate::ir::stmt::collect_locals(&program.ir.body) {
        vars.set(name, Buffer::zeroed(dtype, nitems));
    }
    if let Some(ctx) = ndim {
        ctx.install(&mut vars, nitems);
    }

    let mut output = Buffer::zeroed(program.output_dtype, nitems);
    interpreter::run(&program.ir, engine, &mut vars, &mut output)?;
    Ok(HostArray::from_buffer(&output, program.output_dtype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::{Dialect, FpMode};
    use crate::ir::expr::IrExpr;
    use crate::ir::program::Param;
    use crate::ir::stmt::{IrStmt, Pos};
    use crate::interpreter::EngineError;
    use crate::ir::program::IrProgram;

    struct EchoEngine;

    impl ExpressionEngine for EchoEngine {
        fn eval(&mut self, expr: &IrExpr, vars: &VarBuffers, width: usize) -> Result<Buffer, EngineError> {
            if let Some(buf) = vars.get(&expr.text) {
                return Ok(buf.clone());
            }
            if let Ok(i) = expr.text.parse::<i64>() {
                return Ok(Buffer::I64(vec![i; width]));
            }
            Err(EngineError::UnboundVariable(expr.text.clone()))
        }
    }

    #[test]
    fn falls_back_to_interpreter_when_jit_is_disabled() {
        std::env::set_var("ME_DSL_JIT", "0");
        let ir = IrProgram {
            name: "echo".into(),
            dialect: Dialect::Vector,
            fp_mode: FpMode::Strict,
            parameters: vec![Param {
                name: "x".into(),
                dtype: Dtype::Int64,
            }],
            body: vec![IrStmt::Return {
                pos: Pos::new(1, 1),
                value: IrExpr::new("x", Dtype::Int64),
            }],
        };
        let compiled = CompiledProgram::compile(ir, Dtype::Int64, vec![0], None).unwrap();
        let inputs = vec![HostArray::Int64(vec![10, 20, 30])];
        let mut engine = EchoEngine;
        let result = eval_block(&compiled, &inputs, 3, None, &mut engine).unwrap();
        match result {
            HostArray::Int64(v) => assert_eq!(v, vec![10, 20, 30]),
            other => panic!("unexpected dtype: {other:?}"),
        }
        std::env::remove_var("ME_DSL_JIT");
    }
}
