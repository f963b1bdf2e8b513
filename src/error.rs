//! Error taxonomy for cache operations.
//!
//! Remote failures never show up here: they are caught at the manager
//! boundary and degraded to local-only behavior. The variants below are the
//! caller-visible contract violations and the storage degraded mode.

use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum CacheError {
    /// The target id is not present in the collection. The operation is
    /// aborted before any state change.
    #[error("no {kind} entry with id {id}")]
    NotFound { kind: &'static str, id: String },

    /// An import blob failed shape validation; existing state is untouched.
    #[error("invalid import format: {0}")]
    InvalidFormat(String),

    /// The durable store failed. In-memory state stays correct for the
    /// current session but will not survive a restart.
    #[error(transparent)]
    Storage(#[from] StoreError),
}
