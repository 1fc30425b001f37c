//! Arabica: a coffee brew journal stored as records in AT Protocol repositories.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;

#[cfg(test)]
mod testing;
