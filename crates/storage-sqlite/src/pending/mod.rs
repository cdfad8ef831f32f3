mod model;
mod repository;

pub use model::PendingRecordDB;
pub use repository::PendingRecordRepository;
