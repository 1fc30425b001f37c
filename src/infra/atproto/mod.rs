//! AT Protocol plumbing: locators, record codecs, reference resolution, the
//! HTTP clients and the typed store built on top of them.

pub mod client;
pub mod public;
pub mod records;
pub mod resolver;
pub mod store;
pub mod uri;

pub use client::{Credentials, SessionAuth, StaticSessionAuth, XrpcClient};
pub use public::PublicClient;
pub use store::{AtprotoStore, ReadPolicy, StoreEntity, StoreError};
