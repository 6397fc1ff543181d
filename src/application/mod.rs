//! Application services layer.

pub mod error;
pub mod events;
pub mod jobs;
pub mod posts;
pub mod repos;
