use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use metrics::{counter, gauge};
use tokio::time::Instant;
use tracing::debug;

use crate::domain::entities::{Bean, Brew, Brewer, Grinder, Roaster};
use crate::domain::types::Collection;

use super::config::CacheConfig;
use super::lock::{rw_read, rw_write};
use super::{METRIC_CACHE_ENTRIES, METRIC_CACHE_INVALIDATE, METRIC_CACHE_SWEPT};

const SOURCE: &str = "cache::session";

/// Immutable snapshot of one session's cached collections.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    beans: Option<Arc<[Bean]>>,
    roasters: Option<Arc<[Roaster]>>,
    grinders: Option<Arc<[Grinder]>>,
    brewers: Option<Arc<[Brewer]>>,
    brews: Option<Arc<[Brew]>>,
    timestamp: Instant,
}

impl CacheEntry {
    fn empty(now: Instant) -> Self {
        Self {
            beans: None,
            roasters: None,
            grinders: None,
            brewers: None,
            brews: None,
            timestamp: now,
        }
    }

    /// The cached slice for `T`, if that collection has been filled.
    pub fn get<T: Cached>(&self) -> Option<Arc<[T]>> {
        T::slot(self).clone()
    }

    pub fn has(&self, collection: Collection) -> bool {
        match collection {
            Collection::Beans => self.beans.is_some(),
            Collection::Roasters => self.roasters.is_some(),
            Collection::Grinders => self.grinders.is_some(),
            Collection::Brewers => self.brewers.is_some(),
            Collection::Brews => self.brews.is_some(),
        }
    }

    fn clear(&mut self, collection: Collection) {
        match collection {
            Collection::Beans => self.beans = None,
            Collection::Roasters => self.roasters = None,
            Collection::Grinders => self.grinders = None,
            Collection::Brewers => self.brewers = None,
            Collection::Brews => self.brews = None,
        }
    }
}

/// An entity type with its own slot in a [`CacheEntry`].
pub trait Cached: Sized + Send + Sync + 'static {
    const SLOT: Collection;

    fn slot(entry: &CacheEntry) -> &Option<Arc<[Self]>>;
    fn slot_mut(entry: &mut CacheEntry) -> &mut Option<Arc<[Self]>>;
}

macro_rules! cached_slot {
    ($ty:ty, $collection:expr, $field:ident) => {
        impl Cached for $ty {
            const SLOT: Collection = $collection;

            fn slot(entry: &CacheEntry) -> &Option<Arc<[Self]>> {
                &entry.$field
            }

            fn slot_mut(entry: &mut CacheEntry) -> &mut Option<Arc<[Self]>> {
                &mut entry.$field
            }
        }
    };
}

cached_slot!(Bean, Collection::Beans, beans);
cached_slot!(Roaster, Collection::Roasters, roasters);
cached_slot!(Grinder, Collection::Grinders, grinders);
cached_slot!(Brewer, Collection::Brewers, brewers);
cached_slot!(Brew, Collection::Brews, brews);

/// Marks the invalidation epoch a list fetch started under.
///
/// Obtained from [`SessionCache::begin_fill`] before reading the repository and
/// handed back to [`SessionCache::fill_collection`] once the fetch completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FillToken(u64);

#[derive(Default)]
struct State {
    entries: HashMap<String, Arc<CacheEntry>>,
    // Last invalidation per session. Kept even when no entry exists so an
    // in-flight fill can tell it raced a write.
    invalidated: HashMap<String, (u64, Instant)>,
    next_epoch: u64,
}

impl State {
    fn epoch(&self, session_id: &str) -> u64 {
        self.invalidated
            .get(session_id)
            .map_or(0, |(epoch, _)| *epoch)
    }

    fn mark_invalidated(&mut self, session_id: &str) {
        self.next_epoch += 1;
        self.invalidated
            .insert(session_id.to_string(), (self.next_epoch, Instant::now()));
    }

    fn store<T: Cached>(&mut self, session_id: &str, items: Vec<T>) {
        let now = Instant::now();
        let mut next = self
            .entries
            .get(session_id)
            .map(|current| CacheEntry::clone(current))
            .unwrap_or_else(|| CacheEntry::empty(now));
        *T::slot_mut(&mut next) = Some(Arc::from(items));
        next.timestamp = now;
        self.entries.insert(session_id.to_string(), Arc::new(next));
        gauge!(METRIC_CACHE_ENTRIES).set(self.entries.len() as f64);
        debug!(
            target = SOURCE,
            session_id,
            collection = %T::SLOT,
            "cache collection replaced"
        );
    }
}

/// Session-keyed cache of decoded collections with a fixed TTL.
///
/// Construct one per process and share it by `Arc`.
pub struct SessionCache {
    state: RwLock<State>,
    config: CacheConfig,
}

impl SessionCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            state: RwLock::new(State::default()),
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Current snapshot for a session. Safe to read without holding any lock.
    pub fn get(&self, session_id: &str) -> Option<Arc<CacheEntry>> {
        rw_read(&self.state, SOURCE, "get")
            .entries
            .get(session_id)
            .cloned()
    }

    /// True while the entry is younger than the TTL.
    pub fn is_valid(&self, entry: &CacheEntry) -> bool {
        entry.timestamp.elapsed() < self.config.ttl
    }

    /// Replace one collection for a session, restamping the entry.
    pub fn set_collection<T: Cached>(&self, session_id: &str, items: Vec<T>) {
        rw_write(&self.state, SOURCE, "set_collection").store(session_id, items);
    }

    /// Capture the session's invalidation epoch ahead of a repository fetch.
    pub fn begin_fill(&self, session_id: &str) -> FillToken {
        FillToken(rw_read(&self.state, SOURCE, "begin_fill").epoch(session_id))
    }

    /// Publish a fetched collection unless the session was invalidated after
    /// `token` was taken. Returns whether the snapshot was stored.
    pub fn fill_collection<T: Cached>(
        &self,
        session_id: &str,
        token: FillToken,
        items: Vec<T>,
    ) -> bool {
        let mut state = rw_write(&self.state, SOURCE, "fill_collection");
        if state.epoch(session_id) != token.0 {
            debug!(
                target = SOURCE,
                session_id,
                collection = %T::SLOT,
                "discarding fill that raced an invalidation"
            );
            return false;
        }
        state.store(session_id, items);
        true
    }

    /// Drop one collection from a session's entry.
    ///
    /// Clearing roasters also clears beans, since cached beans embed their roaster.
    pub fn invalidate_collection(&self, session_id: &str, collection: Collection) {
        let mut state = rw_write(&self.state, SOURCE, "invalidate_collection");
        state.mark_invalidated(session_id);
        counter!(METRIC_CACHE_INVALIDATE, "collection" => collection.as_str()).increment(1);
        let Some(current) = state.entries.get(session_id) else {
            return;
        };
        let mut next = CacheEntry::clone(current);
        next.clear(collection);
        if collection == Collection::Roasters {
            next.clear(Collection::Beans);
        }
        state.entries.insert(session_id.to_string(), Arc::new(next));
    }

    /// Forget everything cached for a session.
    pub fn invalidate_session(&self, session_id: &str) {
        let mut state = rw_write(&self.state, SOURCE, "invalidate_session");
        state.mark_invalidated(session_id);
        state.entries.remove(session_id);
        gauge!(METRIC_CACHE_ENTRIES).set(state.entries.len() as f64);
    }

    /// Remove entries older than the eviction age. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let evict_after = self.config.evict_after();
        let mut state = rw_write(&self.state, SOURCE, "sweep");
        let before = state.entries.len();
        state
            .entries
            .retain(|_, entry| entry.timestamp.elapsed() <= evict_after);
        state
            .invalidated
            .retain(|_, (_, at)| at.elapsed() <= evict_after);
        let remaining = state.entries.len();
        let removed = before - remaining;
        counter!(METRIC_CACHE_SWEPT).increment(removed as u64);
        gauge!(METRIC_CACHE_ENTRIES).set(remaining as f64);
        if removed > 0 {
            debug!(
                target = SOURCE,
                removed, remaining, "swept stale cache entries"
            );
        }
        removed
    }

    pub fn len(&self) -> usize {
        rw_read(&self.state, SOURCE, "len").entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
