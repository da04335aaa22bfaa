//! The external expression-engine seam (§4.7).
//!
//! Expression text is opaque to the IR (see `ir::expr`); the interpreter
//! never parses it itself. Instead every `IrExpr` is handed to an
//! `ExpressionEngine`, which evaluates it across the whole block width and
//! returns a typed `Buffer`. This mirrors the `DtypeResolver` seam the
//! builder already exposes — both are caller-supplied collaborators, not
//! logic this crate implements.

use thiserror::Error;

use crate::dtype::Dtype;
use crate::ir::expr::IrExpr;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("expression engine failed evaluating `{text}`: {message}")]
    Evaluation { text: String, message: String },
    #[error("variable `{0}` is not bound")]
    UnboundVariable(String),
}

/// A block-width column of values, one dtype variant per `Dtype` group. Int
/// widths below 64 bits and both unsigned and signed widths share the
/// `I64` representation; this is an interpreter simplification (there is
/// no SIMD lane width to respect off the native-code path) and is not used
/// anywhere performance-sensitive.
#[derive(Debug, Clone)]
pub enum Buffer {
    Bool(Vec<bool>),
    I64(Vec<i64>),
    F64(Vec<f64>),
}

impl Buffer {
    pub fn zeroed(dtype: Dtype, len: usize) -> Self {
        match dtype {
            Dtype::Bool => Buffer::Bool(vec![false; len]),
            Dtype::Float32 | Dtype::Float64 => Buffer::F64(vec![0.0; len]),
            _ => Buffer::I64(vec![0; len]),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::Bool(v) => v.len(),
            Buffer::I64(v) => v.len(),
            Buffer::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> Dtype {
        match self {
            Buffer::Bool(_) => Dtype::Bool,
            Buffer::I64(_) => Dtype::Int64,
            Buffer::F64(_) => Dtype::Float64,
        }
    }

    pub fn truthy(&self, lane: usize) -> bool {
        match self {
            Buffer::Bool(v) => v[lane],
            Buffer::I64(v) => v[lane] != 0,
            Buffer::F64(v) => v[lane] != 0.0,
        }
    }

    /// Write `src` into `self` at the lanes where `mask` is set, leaving
    /// other lanes untouched. Used by the element dialect's masked
    /// assignment and masked return (§4.7).
    pub fn masked_copy_from(&mut self, src: &Buffer, mask: &[bool]) {
        match (self, src) {
            (Buffer::Bool(dst), Buffer::Bool(src)) => {
                for (i, m) in mask.iter().enumerate() {
                    if *m {
                        dst[i] = src[i];
                    }
                }
            }
            (Buffer::I64(dst), Buffer::I64(src)) => {
                for (i, m) in mask.iter().enumerate() {
                    if *m {
                        dst[i] = src[i];
                    }
                }
            }
            (Buffer::F64(dst), Buffer::F64(src)) => {
                for (i, m) in mask.iter().enumerate() {
                    if *m {
                        dst[i] = src[i];
                    }
                }
            }
            _ => {
                // Dtype mismatch between destination and source never
                // happens once the builder's dtype resolver has run;
                // treated as a no-op rather than a panic path.
            }
        }
    }

    pub fn copy_from(&mut self, src: &Buffer) {
        let len = self.len();
        self.masked_copy_from(src, &vec![true; len]);
    }
}

/// Named buffers visible to the expression engine: block inputs, locals
/// declared so far, and the reserved N-d context variables (`_ndim`,
/// `_n<d>`, `_i<d>`) described in §4.6.
#[derive(Debug, Default)]
pub struct VarBuffers {
    entries: std::collections::HashMap<String, Buffer>,
}

impl VarBuffers {
    pub fn new() -> Self {
        VarBuffers {
            entries: std::collections::HashMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Buffer> {
        self.entries.get(name)
    }

    pub fn set(&mut self, name: impl Into<String>, buf: Buffer) {
        self.entries.insert(name.into(), buf);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

/// Evaluates an opaque `IrExpr` across the current block width.
///
/// Implementations broadcast scalar sub-results across `width` lanes as
/// needed; the interpreter's control-flow code never inspects the
/// expression text itself.
pub trait ExpressionEngine {
    fn eval(&mut self, expr: &IrExpr, vars: &VarBuffers, width: usize) -> Result<Buffer, EngineError>;
}
