//! # Formats
//!
//! Binary snapshot format for offline storage of the base layer.

pub mod persistence;

pub use persistence::{SnapshotHeader, read_snapshot, write_snapshot};
