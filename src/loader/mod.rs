//! Runtime kernel loader (§4.5): the order-of-attempts state machine that
//! turns a cache key and a generated C source into a loaded, callable
//! kernel — or gives up and leaves the compiled program interpreter-only.

pub mod artifact;
pub mod compiler;
pub mod embedded;
pub mod exprparse;
pub mod symbol;

use std::sync::Arc;

use crate::cache::disk::{self, Metadata};
use crate::cache::key::{BackendTag, CacheKeyInputs, PlatformTag};
use crate::cache::negative::FailureClass;
use crate::cache::PROCESS_CACHE;
use crate::dtype::Dtype;
use crate::env;
use crate::ir::program::IrProgram;

use artifact::LoadedArtifact;
use symbol::{KernelFn, Library};

pub struct LoadOutcome {
    pub artifact: Arc<LoadedArtifact>,
    pub kernel: KernelFn,
    /// Whether the positive cache holds its own `Arc` to this artifact
    /// (informational only: ownership itself is handled by `Arc`, not by
    /// this flag — see `cache::positive`).
    pub cache_hit: bool,
}

fn key_inputs(
    program: &IrProgram,
    output_dtype: Dtype,
    fingerprint: u64,
    backend: BackendTag,
) -> CacheKeyInputs {
    CacheKeyInputs {
        fingerprint,
        output_dtype,
        fp_mode: program.fp_mode,
        parameter_dtypes: program.parameters.iter().map(|p| p.dtype).collect(),
        pointer_size: std::mem::size_of::<usize>() as u32,
        platform: PlatformTag::host(),
        backend,
    }
}

/// Attempt to load a kernel for `program`/`output_dtype`, given its
/// (already-generated) C source. Returns `None` if every attempt failed or
/// was short-circuited by a cooldown; the caller falls back to the
/// interpreter.
pub fn attempt_load(
    program: &IrProgram,
    output_dtype: Dtype,
    fingerprint: u64,
    c_source: &str,
    symbol_name: &str,
) -> Option<LoadOutcome> {
    if !env::jit_enabled() {
        return None;
    }

    if env::force_embedded_backend() {
        return try_embedded(program, output_dtype, fingerprint, symbol_name);
    }

    if let Some(outcome) = try_shared_object(program, output_dtype, fingerprint, c_source, symbol_name) {
        return Some(outcome);
    }

    if !compiler::external_compiler_available() {
        return try_embedded(program, output_dtype, fingerprint, symbol_name);
    }

    None
}

fn try_shared_object(
    program: &IrProgram,
    output_dtype: Dtype,
    fingerprint: u64,
    c_source: &str,
    symbol_name: &str,
) -> Option<LoadOutcome> {
    let inputs = key_inputs(program, output_dtype, fingerprint, BackendTag::SharedObject);
    let key = inputs.derive();
    let now = std::time::Instant::now();

    if env::positive_cache_enabled() {
        if let Some((artifact, kernel)) = PROCESS_CACHE.positive.get(key) {
            PROCESS_CACHE.negative.clear(key);
            return Some(LoadOutcome {
                artifact,
                kernel,
                cache_hit: true,
            });
        }
    }

    if PROCESS_CACHE.negative.check(key, now).is_some() {
        return None;
    }

    let dir = match disk::cache_dir() {
        Ok(dir) => dir,
        Err(_) => {
            PROCESS_CACHE.negative.record(key, FailureClass::CacheDir, now);
            return None;
        }
    };
    let paths = disk::artifact_paths(&dir, key, PlatformTag::host());

    let identity_hash = disk::compiler_identity_hash(
        &env::compiler_command(),
        &env::extra_cflags(),
        program.fp_mode,
    );
    let expected = match Metadata::new(
        PlatformTag::host(),
        key,
        fingerprint,
        output_dtype,
        program.dialect,
        program.fp_mode,
        &inputs.parameter_dtypes,
        identity_hash,
    ) {
        Ok(m) => m,
        Err(_) => {
            PROCESS_CACHE.negative.record(key, FailureClass::Metadata, now);
            return None;
        }
    };

    if paths.object.is_file() && disk::read_metadata(&paths.meta, &expected).is_some() {
        match load_shared_object(&paths.object, symbol_name) {
            Ok((artifact, kernel)) => {
                return Some(publish(key, artifact, kernel));
            }
            Err(_) => {
                PROCESS_CACHE.negative.record(key, FailureClass::Open, now);
                // fall through to a fresh compile attempt below.
            }
        }
    }

    if disk::write_source(&paths.source, c_source).is_err() {
        PROCESS_CACHE.negative.record(key, FailureClass::Write, now);
        return None;
    }
    if compiler::compile(&paths.source, &paths.object, program.fp_mode, PlatformTag::host()).is_err() {
        PROCESS_CACHE.negative.record(key, FailureClass::Compile, now);
        return None;
    }
    if disk::write_metadata(&paths.meta, &expected).is_err() {
        PROCESS_CACHE.negative.record(key, FailureClass::Metadata, now);
        return None;
    }

    match load_shared_object(&paths.object, symbol_name) {
        Ok((artifact, kernel)) => Some(publish(key, artifact, kernel)),
        Err(class) => {
            PROCESS_CACHE.negative.record(key, class, now);
            None
        }
    }
}

fn load_shared_object(
    object_path: &std::path::Path,
    symbol_name: &str,
) -> Result<(Arc<LoadedArtifact>, KernelFn), FailureClass> {
    let lib = Library::open(object_path).map_err(|_| FailureClass::Open)?;
    let kernel = unsafe { lib.kernel(symbol_name) }.map_err(|_| FailureClass::Symbol)?;
    Ok((Arc::new(LoadedArtifact::SharedObject(lib)), kernel))
}

fn try_embedded(
    program: &IrProgram,
    output_dtype: Dtype,
    fingerprint: u64,
    symbol_name: &str,
) -> Option<LoadOutcome> {
    let inputs = key_inputs(program, output_dtype, fingerprint, BackendTag::EmbeddedTinycc);
    let key = inputs.derive();
    let now = std::time::Instant::now();

    if env::positive_cache_enabled() {
        if let Some((artifact, kernel)) = PROCESS_CACHE.positive.get(key) {
            PROCESS_CACHE.negative.clear(key);
            return Some(LoadOutcome {
                artifact,
                kernel,
                cache_hit: true,
            });
        }
    }
    if PROCESS_CACHE.negative.check(key, now).is_some() {
        return None;
    }

    match embedded::compile(program, output_dtype, symbol_name) {
        Ok((module, kernel)) => {
            let artifact = Arc::new(LoadedArtifact::Embedded(module));
            Some(publish(key, artifact, kernel))
        }
        Err(_) => {
            PROCESS_CACHE.negative.record(key, FailureClass::Compile, now);
            None
        }
    }
}

fn publish(key: u64, artifact: Arc<LoadedArtifact>, kernel: KernelFn) -> LoadOutcome {
    if !env::positive_cache_enabled() {
        return LoadOutcome {
            artifact,
            kernel,
            cache_hit: false,
        };
    }
    let (artifact, kernel, inserted) = PROCESS_CACHE.positive.try_insert(key, artifact, kernel);
    LoadOutcome {
        artifact,
        kernel,
        cache_hit: inserted || PROCESS_CACHE.positive.get(key).is_some(),
    }
}
