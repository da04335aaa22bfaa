//! Scalar types, dialects, and floating-point modes carried on the IR.

use std::fmt;

/// The dtype lattice the JIT understands.
///
/// `Auto` must be resolved to a concrete dtype before it can appear in IR;
/// complex numbers and strings are not representable and are rejected by
/// the dtype resolver callback before the builder ever sees them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dtype {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Float32,
    Float64,
    Auto,
}

impl Dtype {
    /// Whether this dtype is an integral type (bool or any int/uint width).
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Dtype::Bool
                | Dtype::Int8
                | Dtype::Int16
                | Dtype::Int32
                | Dtype::Int64
                | Dtype::Uint8
                | Dtype::Uint16
                | Dtype::Uint32
                | Dtype::Uint64
        )
    }

    /// Whether the JIT can lower this dtype at all.
    pub fn is_jit_supported(self) -> bool {
        !matches!(self, Dtype::Auto)
    }

    /// Size in bytes of one element of this dtype.
    pub fn size_of(self) -> usize {
        match self {
            Dtype::Bool | Dtype::Int8 | Dtype::Uint8 => 1,
            Dtype::Int16 | Dtype::Uint16 => 2,
            Dtype::Int32 | Dtype::Uint32 | Dtype::Float32 => 4,
            Dtype::Int64 | Dtype::Uint64 | Dtype::Float64 => 8,
            Dtype::Auto => 0,
        }
    }

    /// The C type name used for scalars of this dtype in generated code.
    pub fn c_type(self) -> &'static str {
        match self {
            Dtype::Bool => "bool",
            Dtype::Int8 => "int8_t",
            Dtype::Int16 => "int16_t",
            Dtype::Int32 => "int32_t",
            Dtype::Int64 => "int64_t",
            Dtype::Uint8 => "uint8_t",
            Dtype::Uint16 => "uint16_t",
            Dtype::Uint32 => "uint32_t",
            Dtype::Uint64 => "uint64_t",
            Dtype::Float32 => "float",
            Dtype::Float64 => "double",
            Dtype::Auto => "/* auto */",
        }
    }

    /// Fingerprint/metadata tag. Stable across process boundaries — never
    /// reorder these without bumping `CGEN_VERSION`.
    pub fn tag(self) -> i32 {
        match self {
            Dtype::Bool => 0,
            Dtype::Int8 => 1,
            Dtype::Int16 => 2,
            Dtype::Int32 => 3,
            Dtype::Int64 => 4,
            Dtype::Uint8 => 5,
            Dtype::Uint16 => 6,
            Dtype::Uint32 => 7,
            Dtype::Uint64 => 8,
            Dtype::Float32 => 9,
            Dtype::Float64 => 10,
            Dtype::Auto => 11,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Dtype> {
        Some(match tag {
            0 => Dtype::Bool,
            1 => Dtype::Int8,
            2 => Dtype::Int16,
            3 => Dtype::Int32,
            4 => Dtype::Int64,
            5 => Dtype::Uint8,
            6 => Dtype::Uint16,
            7 => Dtype::Uint32,
            8 => Dtype::Uint64,
            9 => Dtype::Float32,
            10 => Dtype::Float64,
            11 => Dtype::Auto,
            _ => return None,
        })
    }
}

impl fmt::Display for Dtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_type())
    }
}

/// Execution dialect: whether the block takes one control path uniformly,
/// or divergent per-item control inside loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Vector,
    Element,
}

impl Dialect {
    pub fn tag(self) -> i32 {
        match self {
            Dialect::Vector => 0,
            Dialect::Element => 1,
        }
    }

    pub fn from_tag(tag: i32) -> Option<Dialect> {
        Some(match tag {
            0 => Dialect::Vector,
            1 => Dialect::Element,
            _ => return None,
        })
    }
}

/// Floating-point strictness mode. Carried on the IR program; affects
/// compiler flags and is part of the cache key since it changes codegen
/// output semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FpMode {
    Strict,
    Contract,
    Fast,
}

impl FpMode {
    pub fn tag(self) -> i32 {
        match self {
            FpMode::Strict => 0,
            FpMode::Contract => 1,
            FpMode::Fast => 2,
        }
    }

    pub fn from_tag(tag: i32) -> Option<FpMode> {
        Some(match tag {
            0 => FpMode::Strict,
            1 => FpMode::Contract,
            2 => FpMode::Fast,
            _ => return None,
        })
    }

    /// Compiler flags appended when invoking the external C compiler.
    pub fn compiler_flags(self) -> &'static [&'static str] {
        match self {
            FpMode::Strict => &["-ffp-contract=off"],
            FpMode::Contract => &["-ffp-contract=fast"],
            FpMode::Fast => &["-ffast-math"],
        }
    }
}
