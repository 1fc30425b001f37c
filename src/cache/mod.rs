//! Per-session cache of decoded collections.
//!
//! Each session owns at most one immutable [`CacheEntry`]. Writers clone the
//! entry, replace one collection, and swap the pointer, so a snapshot handed
//! to a reader never changes underneath it.

mod config;
pub(crate) mod lock;
mod session;
mod sweeper;

pub use config::CacheConfig;
pub use session::{CacheEntry, Cached, FillToken, SessionCache};
pub use sweeper::{SweeperHandle, spawn_sweeper};

pub(crate) const METRIC_CACHE_HIT: &str = "arabica_session_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "arabica_session_cache_miss_total";
pub(crate) const METRIC_CACHE_INVALIDATE: &str = "arabica_session_cache_invalidate_total";
pub(crate) const METRIC_CACHE_SWEPT: &str = "arabica_session_cache_swept_total";
pub(crate) const METRIC_CACHE_ENTRIES: &str = "arabica_session_cache_entries";
