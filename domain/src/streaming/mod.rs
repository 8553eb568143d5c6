//! Streaming support: turning cumulative provider snapshots into deltas.

pub mod delta;
