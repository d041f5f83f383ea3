//! Transactional in-memory store
//!
//! All engine state lives in an [`IdentityGraph`] guarded by a
//! [`TransactionProvider`]. Callers never touch the graph directly:
//! every read and write happens inside a transaction that either
//! commits atomically or leaves the graph untouched.

mod flow;
mod graph;
mod transaction;

pub use flow::FlowId;
pub use graph::IdentityGraph;
pub use transaction::{Transaction, TransactionProvider};
