//! Offline-first sync core for stone records.
//!
//! The pieces are wired together by [`context::SyncContext`]; every
//! collaborator sits behind a trait so storage, HTTP and secure storage can
//! be swapped for in-memory fakes.

pub mod cache;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod errors;
pub mod offline;
pub mod secrets;
pub mod stones;
pub mod sync;

pub use errors::{Error, Result};
