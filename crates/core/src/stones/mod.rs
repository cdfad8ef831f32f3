//! Stone domain records.

mod stones_model;

pub use stones_model::*;
