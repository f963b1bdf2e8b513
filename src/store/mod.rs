//! Durable local store for entity collections.
//!
//! This module provides the `FileStore` for persisting collections between
//! runs. Each collection is one JSON envelope keyed by
//! `oneorder_<kind>_state`, carrying the items plus the user-cleared
//! sentinel; the audit history lives in a sibling `oneorder_<kind>_history`
//! key.
//!
//! The store is shared by every context on the machine; writers use
//! last-writer-wins at whole-collection granularity.

pub mod file;

pub use file::{FileStore, StateEnvelope, StoreError};
