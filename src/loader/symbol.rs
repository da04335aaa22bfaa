//! The unsafe dynamic-loading boundary.
//!
//! Isolates `dlopen`/`dlsym` behind a narrow interface, modeled directly on
//! the teacher's `vm/ffi/loader.rs::UnixLibrary`. Safety precondition for
//! every symbol resolved here: the shared object was produced by our own
//! code generator for the fixed kernel ABI `int(const void**, void*,
//! int64_t)` (§4.4) — resolving any other symbol through this path is
//! undefined behavior.

use std::ffi::{CStr, CString};
use std::os::raw::{c_int, c_void};
use std::path::Path;

use thiserror::Error;

/// The fixed C-ABI kernel signature emitted by the code generator.
pub type KernelFn = unsafe extern "C" fn(*const *const c_void, *mut c_void, i64) -> c_int;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load shared object {path}: {detail}")]
    Open { path: String, detail: String },
    #[error("symbol `{symbol}` not found in {path}: {detail}")]
    Symbol {
        symbol: String,
        path: String,
        detail: String,
    },
    #[error("invalid UTF-8 in path: {0}")]
    InvalidPath(String),
}

/// A loaded POSIX shared object. Closed (`dlclose`) on drop unless the
/// positive cache has taken ownership (§3 Compiled program life cycle).
pub struct Library {
    handle: *mut c_void,
    path: String,
}

// Safety: the handle is an opaque dlopen token; once loaded, the mapped
// code is immutable and safe to share across threads.
unsafe impl Send for Library {}
unsafe impl Sync for Library {}

impl Library {
    /// Load a dynamic library from the given path.
    ///
    /// Uses `dlopen(RTLD_NOW | RTLD_LOCAL)` so load-time symbol resolution
    /// failures surface immediately rather than on first call, and the
    /// kernel symbol is not exposed to libraries loaded afterward.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, LoadError> {
        let path_ref = path.as_ref();
        let path_str = path_ref
            .to_str()
            .ok_or_else(|| LoadError::InvalidPath(format!("{path_ref:?}")))?;
        let c_path = CString::new(path_str)
            .map_err(|e| LoadError::Open {
                path: path_str.to_string(),
                detail: e.to_string(),
            })?;

        let handle = unsafe { libc::dlopen(c_path.as_ptr(), libc::RTLD_NOW | libc::RTLD_LOCAL) };
        if handle.is_null() {
            return Err(LoadError::Open {
                path: path_str.to_string(),
                detail: dlerror_message(),
            });
        }

        Ok(Library {
            handle,
            path: path_str.to_string(),
        })
    }

    /// Resolve the kernel entry point by name.
    ///
    /// # Safety
    ///
    /// The caller must ensure the named symbol was emitted by our own code
    /// generator for the fixed kernel ABI; calling through a mismatched
    /// signature is undefined behavior.
    pub unsafe fn kernel(&self, symbol: &str) -> Result<KernelFn, LoadError> {
        let c_name = CString::new(symbol).map_err(|e| LoadError::Symbol {
            symbol: symbol.to_string(),
            path: self.path.clone(),
            detail: e.to_string(),
        })?;

        libc::dlerror(); // clear any pending error
        let ptr = libc::dlsym(self.handle, c_name.as_ptr());
        let err = dlerror_message();
        if ptr.is_null() && !err.is_empty() {
            return Err(LoadError::Symbol {
                symbol: symbol.to_string(),
                path: self.path.clone(),
                detail: err,
            });
        }

        Ok(std::mem::transmute::<*mut c_void, KernelFn>(ptr))
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        unsafe {
            libc::dlclose(self.handle);
        }
    }
}

fn dlerror_message() -> String {
    unsafe {
        let ptr = libc::dlerror();
        if ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    }
}
