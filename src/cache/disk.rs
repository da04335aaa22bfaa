//! On-disk artifact cache (§6): three sidecar files per cache key under
//! `$TMPDIR/miniexpr-jit/`, and the fixed binary metadata record used to
//! decide whether a sidecar can be trusted without recompiling.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::cache::key::{hex16, PlatformTag, CGEN_VERSION};
use crate::dtype::{Dialect, Dtype, FpMode};
use crate::hashutil::{Mixer, SEED};

/// Upper bound on parameters a compiled program may have. Not stated by
/// name in the specification; chosen so the metadata record has a fixed
/// size (§6: "N is the compile-time maximum parameter count").
pub const MAX_PARAMS: usize = 16;

const META_MAGIC: u64 = 0x4d45_4a49_544d_4554;
const META_VERSION: u32 = 3;
const UNUSED_PARAM: i32 = -1;

#[derive(Debug, Error)]
pub enum DiskCacheError {
    #[error("cache directory {0} unavailable: {1}")]
    CacheDir(PathBuf, io::Error),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, io::Error),
    #[error("too many parameters ({0}) for metadata record (max {max})", max = MAX_PARAMS)]
    TooManyParameters(usize),
}

/// The fixed-layout metadata record (§6), field order significant.
#[derive(Debug, Clone, PartialEq)]
pub struct Metadata {
    pub cgen_version: u32,
    pub platform_tag: i32,
    pub pointer_size: u32,
    pub cache_key: u64,
    pub ir_fingerprint: u64,
    pub output_dtype: i32,
    pub dialect: i32,
    pub fp_mode: i32,
    pub nparams: i32,
    pub param_dtypes: [i32; MAX_PARAMS],
    pub compiler_identity_hash: u64,
}

impl Metadata {
    pub fn new(
        platform: PlatformTag,
        cache_key: u64,
        ir_fingerprint: u64,
        output_dtype: Dtype,
        dialect: Dialect,
        fp_mode: FpMode,
        parameter_dtypes: &[Dtype],
        compiler_identity_hash: u64,
    ) -> Result<Self, DiskCacheError> {
        if parameter_dtypes.len() > MAX_PARAMS {
            return Err(DiskCacheError::TooManyParameters(parameter_dtypes.len()));
        }
        let mut param_dtypes = [UNUSED_PARAM; MAX_PARAMS];
        for (slot, dtype) in param_dtypes.iter_mut().zip(parameter_dtypes.iter()) {
            *slot = dtype.tag();
        }
        Ok(Metadata {
            cgen_version: CGEN_VERSION,
            platform_tag: platform.tag(),
            pointer_size: std::mem::size_of::<usize>() as u32,
            cache_key,
            ir_fingerprint,
            output_dtype: output_dtype.tag(),
            dialect: dialect.tag(),
            fp_mode: fp_mode.tag(),
            nparams: parameter_dtypes.len() as i32,
            param_dtypes,
            compiler_identity_hash,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + 4 * 4 + 8 + 8 + 4 * 4 + MAX_PARAMS * 4 + 8);
        buf.extend_from_slice(&META_MAGIC.to_le_bytes());
        buf.extend_from_slice(&META_VERSION.to_le_bytes());
        buf.extend_from_slice(&self.cgen_version.to_le_bytes());
        buf.extend_from_slice(&(self.platform_tag as u32).to_le_bytes());
        buf.extend_from_slice(&self.pointer_size.to_le_bytes());
        buf.extend_from_slice(&self.cache_key.to_le_bytes());
        buf.extend_from_slice(&self.ir_fingerprint.to_le_bytes());
        buf.extend_from_slice(&self.output_dtype.to_le_bytes());
        buf.extend_from_slice(&self.dialect.to_le_bytes());
        buf.extend_from_slice(&self.fp_mode.to_le_bytes());
        buf.extend_from_slice(&self.nparams.to_le_bytes());
        for p in &self.param_dtypes {
            buf.extend_from_slice(&p.to_le_bytes());
        }
        buf.extend_from_slice(&self.compiler_identity_hash.to_le_bytes());
        buf
    }

    /// Parse a sidecar's bytes. Returns `None` on any structural mismatch
    /// (wrong length, bad magic/version) rather than an error: per §5, a
    /// malformed sidecar is simply treated as absent.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let mut r = Reader { bytes, pos: 0 };
        let magic = r.u64()?;
        let version = r.u32()?;
        if magic != META_MAGIC || version != META_VERSION {
            return None;
        }
        let cgen_version = r.u32()?;
        let platform_tag = r.u32()? as i32;
        let pointer_size = r.u32()?;
        let cache_key = r.u64()?;
        let ir_fingerprint = r.u64()?;
        let output_dtype = r.i32()?;
        let dialect = r.i32()?;
        let fp_mode = r.i32()?;
        let nparams = r.i32()?;
        let mut param_dtypes = [UNUSED_PARAM; MAX_PARAMS];
        for slot in param_dtypes.iter_mut() {
            *slot = r.i32()?;
        }
        let compiler_identity_hash = r.u64()?;
        if !r.exhausted() {
            return None;
        }
        Some(Metadata {
            cgen_version,
            platform_tag,
            pointer_size,
            cache_key,
            ir_fingerprint,
            output_dtype,
            dialect,
            fp_mode,
            nparams,
            param_dtypes,
            compiler_identity_hash,
        })
    }

    /// A sidecar is accepted iff every field matches the expected value
    /// byte-for-byte (§5, §6).
    pub fn matches(&self, expected: &Metadata) -> bool {
        self == expected
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return None;
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Some(slice)
    }

    fn u32(&mut self) -> Option<u32> {
        Some(u32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn i32(&mut self) -> Option<i32> {
        Some(i32::from_le_bytes(self.take(4)?.try_into().ok()?))
    }

    fn u64(&mut self) -> Option<u64> {
        Some(u64::from_le_bytes(self.take(8)?.try_into().ok()?))
    }

    fn exhausted(&self) -> bool {
        self.pos == self.bytes.len()
    }
}

/// Deterministic identity hash of the compiler invocation (§5 Open
/// Questions resolution): mixes `CC`, `ME_DSL_JIT_CFLAGS`, and the fp-mode
/// compiler flags through the same FNV-1a-style mixer as the fingerprint,
/// so a sidecar compiled under a different toolchain or flag set is never
/// trusted even if every other metadata field happens to match.
pub fn compiler_identity_hash(cc: &str, cflags: &str, fp_mode: FpMode) -> u64 {
    let mut h = Mixer::new(SEED);
    h.mix_str_nul(cc);
    h.mix_str_nul(cflags);
    for flag in fp_mode.compiler_flags() {
        h.mix_str_nul(flag);
    }
    h.finish()
}

pub struct ArtifactPaths {
    pub source: PathBuf,
    pub object: PathBuf,
    pub meta: PathBuf,
}

/// Resolve the cache directory: `$TMPDIR/miniexpr-jit`, default
/// `/tmp/miniexpr-jit` (§4.5 step 3, §6). Creates it (mode 0700) if
/// missing.
pub fn cache_dir() -> Result<PathBuf, DiskCacheError> {
    cache_dir_with_override(None)
}

/// Like [`cache_dir`], but `override_dir` (from `CacheConfig::cache_dir`)
/// takes precedence over the `$TMPDIR`/`/tmp` resolution when set. The
/// `miniexpr-jit` subdirectory is still appended and created underneath it.
pub fn cache_dir_with_override(override_dir: Option<&Path>) -> Result<PathBuf, DiskCacheError> {
    let base = match override_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::var_os("TMPDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/tmp")),
    };
    let dir = base.join("miniexpr-jit");
    create_dir(&dir)?;
    Ok(dir)
}

#[cfg(unix)]
fn create_dir(dir: &Path) -> Result<(), DiskCacheError> {
    use std::os::unix::fs::DirBuilderExt;
    if dir.is_dir() {
        return Ok(());
    }
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(dir)
        .map_err(|e| DiskCacheError::CacheDir(dir.to_path_buf(), e))
}

#[cfg(not(unix))]
fn create_dir(dir: &Path) -> Result<(), DiskCacheError> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| DiskCacheError::CacheDir(dir.to_path_buf(), e))
}

pub fn artifact_paths(dir: &Path, cache_key: u64, platform: PlatformTag) -> ArtifactPaths {
    let hex = hex16(cache_key);
    ArtifactPaths {
        source: dir.join(format!("kernel_{}.c", hex)),
        object: dir.join(format!("kernel_{}.{}", hex, platform.shared_object_ext())),
        meta: dir.join(format!("kernel_{}.meta", hex)),
    }
}

pub fn write_source(path: &Path, source: &str) -> Result<(), DiskCacheError> {
    fs::write(path, source).map_err(|e| DiskCacheError::Write(path.to_path_buf(), e))
}

pub fn write_metadata(path: &Path, metadata: &Metadata) -> Result<(), DiskCacheError> {
    fs::write(path, metadata.to_bytes()).map_err(|e| DiskCacheError::Write(path.to_path_buf(), e))
}

/// Read and validate a sidecar metadata file against the locally computed
/// expected metadata. Returns `None` if missing, unreadable, or mismatched
/// (§5: treated as absent, never as an error).
pub fn read_metadata(path: &Path, expected: &Metadata) -> Option<Metadata> {
    let bytes = fs::read(path).ok()?;
    let meta = Metadata::from_bytes(&bytes)?;
    if meta.matches(expected) {
        Some(meta)
    } else {
        None
    }
}
