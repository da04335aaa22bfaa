//! Typed IR expressions.
//!
//! Expression text is opaque: the IR builder never reparses it. It relies on
//! a caller-supplied dtype resolver to type each expression node, and the
//! code generator relies on textual identifier rewriting (§4.4) rather than
//! a proper sub-parser. See the design notes on this tradeoff.

use crate::dtype::Dtype;

/// A typed scalar expression, lowered verbatim (module identifier rewrites)
/// into the generated C.
#[derive(Debug, Clone, PartialEq)]
pub struct IrExpr {
    pub text: String,
    pub dtype: Dtype,
}

impl IrExpr {
    pub fn new(text: impl Into<String>, dtype: Dtype) -> Self {
        IrExpr {
            text: text.into(),
            dtype,
        }
    }
}
