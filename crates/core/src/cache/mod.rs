//! Category-aware local cache of domain records.

mod cache_model;
mod cache_service;
mod cache_traits;
mod memory;

pub use cache_model::*;
pub use cache_service::*;
pub use cache_traits::*;
pub use memory::InMemoryCacheRepository;
