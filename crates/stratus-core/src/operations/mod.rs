//! # Traversal Operations
//!
//! The three traversal algorithms built on the selection iterator and the
//! layered entity store: write, query (read), and invalidate.

pub mod invalidate;
pub mod query;
pub mod write;

pub use query::QueryResult;
pub use write::WriteResult;
