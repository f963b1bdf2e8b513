//! REST client module for the OneOrder backend.
//!
//! This module provides the [`Remote`] seam over one collection endpoint
//! per entity type (`GET`/`POST`/`PUT`/`DELETE`, plus `PATCH` for status
//! toggles) and the [`HttpRemote`] implementation over reqwest.
//!
//! The backend is an accelerant, never a correctness dependency: callers
//! treat every error here as a cue to fall back to local state.

pub mod client;
pub mod error;

pub use client::{HttpRemote, Remote};
pub use error::ApiError;
