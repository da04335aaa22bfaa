//! Cache key derivation (§4.3): the fingerprint combined with every
//! discriminant that changes the meaning of a compiled artifact — output
//! dtype, fp mode, parameter dtypes, ABI pointer width, codegen version,
//! platform, and selected backend.

use crate::dtype::{Dtype, FpMode};
use crate::hashutil::{Mixer, SEED};

/// Bump on any change to the C code generator's output shape that would
/// make an old `.so`/`.meta` pair unsafe to reuse.
pub const CGEN_VERSION: u32 = 1;

/// Platform tag as defined by §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlatformTag {
    Mac,
    Linux,
    Other,
}

impl PlatformTag {
    pub fn tag(self) -> i32 {
        match self {
            PlatformTag::Mac => 1,
            PlatformTag::Linux => 2,
            PlatformTag::Other => 3,
        }
    }

    pub fn host() -> Self {
        if cfg!(target_os = "macos") {
            PlatformTag::Mac
        } else if cfg!(target_os = "linux") {
            PlatformTag::Linux
        } else {
            PlatformTag::Other
        }
    }

    pub fn shared_object_ext(self) -> &'static str {
        match self {
            PlatformTag::Mac => "dylib",
            _ => "so",
        }
    }
}

/// Which backend produced (or would produce) the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendTag {
    SharedObject,
    EmbeddedTinycc,
}

impl BackendTag {
    pub fn tag(self) -> i32 {
        match self {
            BackendTag::SharedObject => 1,
            BackendTag::EmbeddedTinycc => 2,
        }
    }
}

/// Everything besides the fingerprint that identifies a compiled artifact.
#[derive(Debug, Clone)]
pub struct CacheKeyInputs {
    pub fingerprint: u64,
    pub output_dtype: Dtype,
    pub fp_mode: FpMode,
    pub parameter_dtypes: Vec<Dtype>,
    pub pointer_size: u32,
    pub platform: PlatformTag,
    pub backend: BackendTag,
}

impl CacheKeyInputs {
    /// Derive the full cache key from these inputs, per §4.3.
    pub fn derive(&self) -> u64 {
        let mut h = Mixer::new(SEED);
        h.mix_u64(self.fingerprint);
        h.mix_tag(self.output_dtype.tag());
        h.mix_tag(self.fp_mode.tag());
        h.mix_i32(self.parameter_dtypes.len() as i32);
        for dtype in &self.parameter_dtypes {
            h.mix_tag(dtype.tag());
        }
        h.mix_u32(self.pointer_size);
        h.mix_u32(CGEN_VERSION);
        h.mix_tag(self.platform.tag());
        h.mix_tag(self.backend.tag());
        h.finish()
    }
}

/// Format a cache key as the lowercase hex string used in artifact
/// filenames (`kernel_<hex16>.{c,so,meta}`).
pub fn hex16(key: u64) -> String {
    hex::encode(key.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> CacheKeyInputs {
        CacheKeyInputs {
            fingerprint: 0xDEAD_BEEF,
            output_dtype: Dtype::Int32,
            fp_mode: FpMode::Strict,
            parameter_dtypes: vec![Dtype::Int32],
            pointer_size: 8,
            platform: PlatformTag::Linux,
            backend: BackendTag::SharedObject,
        }
    }

    #[test]
    fn output_dtype_changes_key_not_fingerprint() {
        let a = base();
        let mut b = base();
        b.output_dtype = Dtype::Float64;
        assert_ne!(a.derive(), b.derive());
        assert_eq!(a.fingerprint, b.fingerprint);
    }

    #[test]
    fn fp_mode_changes_key() {
        let a = base();
        let mut b = base();
        b.fp_mode = FpMode::Fast;
        assert_ne!(a.derive(), b.derive());
    }

    #[test]
    fn parameter_dtypes_change_key() {
        let a = base();
        let mut b = base();
        b.parameter_dtypes = vec![Dtype::Float32];
        assert_ne!(a.derive(), b.derive());
    }

    #[test]
    fn pointer_width_changes_key() {
        let a = base();
        let mut b = base();
        b.pointer_size = 4;
        assert_ne!(a.derive(), b.derive());
    }

    #[test]
    fn platform_changes_key() {
        let a = base();
        let mut b = base();
        b.platform = PlatformTag::Mac;
        assert_ne!(a.derive(), b.derive());
    }

    #[test]
    fn backend_changes_key() {
        let a = base();
        let mut b = base();
        b.backend = BackendTag::EmbeddedTinycc;
        assert_ne!(a.derive(), b.derive());
    }

    #[test]
    fn hex16_is_sixteen_lowercase_hex_chars() {
        let s = hex16(0x0123_4567_89ab_cdef);
        assert_eq!(s.len(), 16);
        assert_eq!(s, "0123456789abcdef");
    }
}
