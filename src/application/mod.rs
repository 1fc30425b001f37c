//! Application services orchestrating domain logic and repositories.

pub mod error;
pub mod export;
pub mod feed;
pub mod manage;
pub mod repos;
