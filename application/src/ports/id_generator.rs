//! Identifier generation port
//!
//! The compiler and the persister mint ids through this port so compilation
//! stays deterministic under a deterministic generator.

use std::sync::atomic::{AtomicU64, Ordering};

pub trait IdGenerator: Send + Sync {
    /// A fresh id, unique for the lifetime of the generator, starting with `prefix`.
    fn new_id(&self, prefix: &str) -> String;
}

/// Random UUIDv4-backed ids.
#[derive(Debug, Default)]
pub struct UuidIdGenerator;

impl IdGenerator for UuidIdGenerator {
    fn new_id(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, uuid::Uuid::new_v4().simple())
    }
}

/// Monotonic counter ids (`prefix-1`, `prefix-2`, ...).
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    counter: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn new_id(&self, prefix: &str) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", prefix, n)
    }
}
