//! Feed sync: the read/write orchestrator and its scheduling helpers.

mod create_replayer;
mod feeds;
mod remote_traits;
mod scheduler;
mod sync_model;
mod sync_orchestrator;

pub use create_replayer::*;
pub use feeds::*;
pub use remote_traits::*;
pub use scheduler::*;
pub use sync_model::*;
pub use sync_orchestrator::*;
