//! Durable queue of writes made while offline.

mod memory;
mod offline_queue;
mod pending_model;
mod queue_traits;

pub use memory::InMemoryPendingRecordRepository;
pub use offline_queue::*;
pub use pending_model::*;
pub use queue_traits::*;
