//! External C compiler invocation (§4.5 step 6): shells out to `$CC`
//! (default `cc`) to turn generated C source into a position-independent
//! shared object.

use std::path::Path;
use std::process::Command;

use thiserror::Error;

use crate::cache::key::PlatformTag;
use crate::dtype::FpMode;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("failed to launch compiler `{command}`: {detail}")]
    Launch { command: String, detail: String },
    #[error("compiler `{command}` exited with status {status}: {stderr}")]
    NonZeroExit {
        command: String,
        status: String,
        stderr: String,
    },
}

/// Invoke the external compiler to produce `object_path` from
/// `source_path`, applying fp-mode flags and `ME_DSL_JIT_CFLAGS`.
pub fn compile(
    source_path: &Path,
    object_path: &Path,
    fp_mode: FpMode,
    platform: PlatformTag,
) -> Result<(), CompileError> {
    let cc = crate::env::compiler_command();
    let extra = crate::env::extra_cflags();

    let mut cmd = Command::new(&cc);
    cmd.arg("-fPIC");
    match platform {
        PlatformTag::Mac => {
            cmd.arg("-dynamiclib");
        }
        _ => {
            cmd.arg("-shared");
        }
    }
    for flag in fp_mode.compiler_flags() {
        cmd.arg(flag);
    }
    for flag in extra.split_whitespace() {
        cmd.arg(flag);
    }
    cmd.arg("-o").arg(object_path).arg(source_path);

    crate::trace_line!("invoking compiler: {:?}", cmd);

    let output = cmd.output().map_err(|e| CompileError::Launch {
        command: cc.clone(),
        detail: e.to_string(),
    })?;

    if !output.status.success() {
        return Err(CompileError::NonZeroExit {
            command: cc,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(())
}

/// Whether an external compiler command appears to exist at all (§4.5 step
/// 7's "no external compiler is available" fallback condition). This is a
/// cheap existence probe, not a capability check.
pub fn external_compiler_available() -> bool {
    let cc = crate::env::compiler_command();
    Command::new(&cc)
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}
