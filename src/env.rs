//! Environment variable surface (§6). Centralized here so every toggle is
//! read the same way and is easy to audit.

/// Read a boolean-ish toggle: unset means `default`; `"0"` is off, anything
/// else is on. Used for `ME_DSL_JIT`, `ME_DSL_JIT_POS_CACHE`,
/// `ME_DSL_ELEMENT` (all "0 disables" toggles).
pub fn flag_enabled(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => v != "0",
        Err(_) => default,
    }
}

/// Read a "nonzero forces" toggle, e.g. `ME_DSL_JIT_FORCE_LIBTCC`.
pub fn flag_forced(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => !v.is_empty() && v != "0",
        Err(_) => false,
    }
}

pub fn jit_enabled() -> bool {
    flag_enabled("ME_DSL_JIT", true)
}

pub fn positive_cache_enabled() -> bool {
    flag_enabled("ME_DSL_JIT_POS_CACHE", true)
}

pub fn force_embedded_backend() -> bool {
    flag_forced("ME_DSL_JIT_FORCE_LIBTCC")
}

pub fn element_dialect_enabled() -> bool {
    flag_enabled("ME_DSL_ELEMENT", true)
}

pub fn compiler_command() -> String {
    std::env::var("CC").unwrap_or_else(|_| "cc".to_string())
}

pub fn extra_cflags() -> String {
    std::env::var("ME_DSL_JIT_CFLAGS").unwrap_or_default()
}

pub fn tracing_enabled() -> bool {
    flag_forced("ME_DSL_TRACE")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_enabled_defaults_when_unset() {
        assert!(flag_enabled("ME_DSL_JIT_TEST_DOES_NOT_EXIST_A", true));
        assert!(!flag_enabled("ME_DSL_JIT_TEST_DOES_NOT_EXIST_B", false));
    }
}
