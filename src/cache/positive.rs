//! In-process positive cache (§4.5): a bounded slot table of loaded
//! kernels, modeled on the teacher's `jit/runtime/code_cache.rs`
//! (`parking_lot::RwLock`-guarded mutable cache state) but adapted to a
//! fixed-size, non-evicting table (§3 Positive cache entry).
//!
//! Generic over the artifact type so the slot-management logic can be
//! exercised without a real loaded kernel; production code instantiates it
//! with `LoadedArtifact`. Ownership is shared via `Arc`: once a slot holds
//! an `Arc`, the artifact stays alive even after every `CompiledProgram`
//! referencing it is dropped, and is only actually closed (`Drop`) when no
//! `Arc` anywhere still points to it — this replaces the "cache-owned flag"
//! from §3 with reference counting.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::loader::symbol::KernelFn;

struct Slot<A> {
    key: u64,
    artifact: Arc<A>,
    kernel: KernelFn,
}

pub struct PositiveCache<A> {
    slots: RwLock<Vec<Option<Slot<A>>>>,
}

impl<A> PositiveCache<A> {
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        PositiveCache {
            slots: RwLock::new(slots),
        }
    }

    pub fn get(&self, key: u64) -> Option<(Arc<A>, KernelFn)> {
        let slots = self.slots.read();
        slots
            .iter()
            .flatten()
            .find(|s| s.key == key)
            .map(|s| (s.artifact.clone(), s.kernel))
    }

    /// Insert a freshly-loaded artifact under `key`. If `key` is already
    /// present, the existing entry wins and `artifact` is dropped (closing
    /// the redundant handle). If the table is full, `artifact` is returned
    /// uninserted so the caller keeps sole ownership of it.
    pub fn try_insert(&self, key: u64, artifact: Arc<A>, kernel: KernelFn) -> (Arc<A>, KernelFn, bool) {
        let mut slots = self.slots.write();
        if let Some(existing) = slots.iter().flatten().find(|s| s.key == key) {
            return (existing.artifact.clone(), existing.kernel, false);
        }
        if let Some(free) = slots.iter_mut().find(|s| s.is_none()) {
            *free = Some(Slot {
                key,
                artifact: artifact.clone(),
                kernel,
            });
            return (artifact, kernel, true);
        }
        (artifact, kernel, false)
    }

    pub fn len(&self) -> usize {
        self.slots.read().iter().flatten().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.read().len()
    }
}
