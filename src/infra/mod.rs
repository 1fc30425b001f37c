//! Infrastructure adapters and runtime bootstrap.

pub mod atproto;
pub mod error;
pub mod telemetry;
