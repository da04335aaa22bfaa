//! The two kinds of loaded kernel artifact (§4.5 step 5 vs step 6): a
//! `dlopen`ed shared object produced by an external C compiler, or a
//! function JIT-compiled in-process by the embedded backend. Both outlive
//! their `KernelFn` pointer for as long as any `Arc` to them is held, which
//! is what lets the positive cache and a `CompiledProgram` share ownership
//! without a separate "who closes this" flag (§3, §5): whichever holds the
//! last `Arc` runs `Drop`.

use crate::loader::embedded::EmbeddedModule;
use crate::loader::symbol::Library;

pub enum LoadedArtifact {
    SharedObject(Library),
    Embedded(EmbeddedModule),
}

impl LoadedArtifact {
    pub fn description(&self) -> &str {
        match self {
            LoadedArtifact::SharedObject(lib) => lib.path(),
            LoadedArtifact::Embedded(_) => "<embedded>",
        }
    }
}
