//! Public activity feed built from the repositories of registered users.
//!
//! Feed reads go straight to each user's PDS through [`PublicRepo`]. They
//! never touch the session cache, and references are linked from the lists
//! fetched alongside the brews rather than resolved one by one.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use futures::future::join_all;
use serde::Serialize;
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::application::repos::{Profile, PublicRepo, RecordEntry, RepoError};
use crate::cache::lock::{rw_read, rw_write};
use crate::domain::entities::{Bean, Brew, Brewer, Grinder, Roaster};
use crate::domain::types::Collection;
use crate::infra::atproto::records::{self, FromRecord};

const SOURCE: &str = "application::feed";

/// Brews fetched per user before merging.
const BREWS_PER_USER: usize = 10;
/// Reference records fetched per collection per user.
const REFS_PER_USER: usize = 100;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("`{0}` is not a DID")]
    InvalidDid(String),
    #[error("failed to load feed for {did}")]
    User {
        did: String,
        #[source]
        source: RepoError,
    },
}

/// DIDs whose public brews appear in the feed.
#[derive(Debug, Default)]
pub struct FeedRegistry {
    dids: RwLock<BTreeSet<String>>,
}

impl FeedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dids<I, S>(dids: I) -> Result<Self, FeedError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let registry = Self::new();
        for did in dids {
            registry.register(did)?;
        }
        Ok(registry)
    }

    /// Returns `true` when the DID was not registered before.
    pub fn register(&self, did: impl Into<String>) -> Result<bool, FeedError> {
        let did = did.into();
        if !did.starts_with("did:") || did.len() <= "did:".len() {
            return Err(FeedError::InvalidDid(did));
        }
        Ok(rw_write(&self.dids, SOURCE, "register").insert(did))
    }

    pub fn unregister(&self, did: &str) -> bool {
        rw_write(&self.dids, SOURCE, "unregister").remove(did)
    }

    pub fn list(&self) -> Vec<String> {
        rw_read(&self.dids, SOURCE, "list").iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        rw_read(&self.dids, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FeedItem {
    pub brew: Brew,
    pub author: Profile,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub time_ago: String,
}

#[derive(Clone)]
pub struct FeedService {
    registry: Arc<FeedRegistry>,
    public: Arc<dyn PublicRepo>,
}

impl FeedService {
    pub fn new(registry: Arc<FeedRegistry>, public: Arc<dyn PublicRepo>) -> Self {
        Self { registry, public }
    }

    pub fn registry(&self) -> &FeedRegistry {
        &self.registry
    }

    /// Most recent brews across every registered user, newest first.
    ///
    /// A user whose profile or brews cannot be fetched is left out.
    pub async fn recent(&self, limit: usize) -> Vec<FeedItem> {
        self.recent_at(limit, OffsetDateTime::now_utc()).await
    }

    async fn recent_at(&self, limit: usize, now: OffsetDateTime) -> Vec<FeedItem> {
        let dids = self.registry.list();
        if dids.is_empty() {
            tracing::debug!(target = SOURCE, "no registered users");
            return Vec::new();
        }

        let results = join_all(dids.iter().map(|did| self.user_brews(did))).await;

        let mut items = Vec::new();
        for result in results {
            match result {
                Ok((author, brews)) => {
                    tracing::debug!(
                        target = SOURCE,
                        did = %author.did,
                        handle = %author.handle,
                        brews = brews.len(),
                        "collected brews"
                    );
                    items.extend(brews.into_iter().map(|brew| FeedItem {
                        timestamp: brew.created_at,
                        time_ago: format_time_ago(brew.created_at, now),
                        author: author.clone(),
                        brew,
                    }));
                }
                Err(err) => tracing::warn!(
                    target = SOURCE,
                    error = %err,
                    "skipping user in feed"
                ),
            }
        }

        items.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        items.truncate(limit);
        items
    }

    async fn user_brews(&self, did: &str) -> Result<(Profile, Vec<Brew>), FeedError> {
        let wrap = |source| FeedError::User {
            did: did.to_string(),
            source,
        };

        let profile = self.public.get_profile(did).await.map_err(wrap)?;
        let brews = self
            .public
            .list_records(did, Collection::Brews, BREWS_PER_USER)
            .await
            .map_err(wrap)?;

        let (beans, roasters, grinders, brewers) = futures::join!(
            self.lookup(did, Collection::Beans),
            self.lookup(did, Collection::Roasters),
            self.lookup(did, Collection::Grinders),
            self.lookup(did, Collection::Brewers),
        );

        let roasters: HashMap<String, Roaster> = decode_by_uri(&roasters);
        let grinders: HashMap<String, Grinder> = decode_by_uri(&grinders);
        let brewers: HashMap<String, Brewer> = decode_by_uri(&brewers);
        let beans: HashMap<String, Bean> = beans
            .iter()
            .filter_map(|entry| {
                let mut bean = Bean::from_record(&entry.value, &entry.uri).ok()?;
                bean.roaster = records::bean_refs(&entry.value)
                    .roaster
                    .and_then(|uri| roasters.get(&uri).cloned());
                Some((entry.uri.clone(), bean))
            })
            .collect();

        let brews = brews
            .iter()
            .filter_map(|entry| match Brew::from_record(&entry.value, &entry.uri) {
                Ok(mut brew) => {
                    let refs = records::brew_refs(&entry.value);
                    brew.bean = beans.get(&refs.bean).cloned().map(Box::new);
                    brew.grinder = refs.grinder.and_then(|uri| grinders.get(&uri).cloned());
                    brew.brewer = refs.brewer.and_then(|uri| brewers.get(&uri).cloned());
                    Some(brew)
                }
                Err(err) => {
                    tracing::warn!(
                        target = SOURCE,
                        uri = %entry.uri,
                        error = %err,
                        "failed to decode brew"
                    );
                    None
                }
            })
            .collect();

        Ok((profile, brews))
    }

    /// Reference lists are best effort: a failure leaves the references unlinked.
    async fn lookup(&self, did: &str, collection: Collection) -> Vec<RecordEntry> {
        match self.public.list_records(did, collection, REFS_PER_USER).await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::debug!(
                    target = SOURCE,
                    did,
                    collection = %collection,
                    error = %err,
                    "reference lookup failed"
                );
                Vec::new()
            }
        }
    }
}

fn decode_by_uri<T: FromRecord>(entries: &[RecordEntry]) -> HashMap<String, T> {
    entries
        .iter()
        .filter_map(|entry| {
            T::from_record(&entry.value, &entry.uri)
                .ok()
                .map(|item| (entry.uri.clone(), item))
        })
        .collect()
}

/// Human-readable age of `then` relative to `now`.
pub fn format_time_ago(then: OffsetDateTime, now: OffsetDateTime) -> String {
    let diff = now - then;

    if diff < Duration::MINUTE {
        return "just now".to_string();
    }
    if diff < Duration::HOUR {
        return plural(diff.whole_minutes(), "minute");
    }
    if diff < Duration::DAY {
        return plural(diff.whole_hours(), "hour");
    }
    if diff < Duration::days(2) {
        return "yesterday".to_string();
    }
    if diff < Duration::WEEK {
        return plural(diff.whole_days(), "day");
    }
    if diff < Duration::days(30) {
        return plural(diff.whole_weeks(), "week");
    }
    if diff < Duration::days(365) {
        return plural(diff.whole_days() / 30, "month");
    }
    plural(diff.whole_days() / 365, "year")
}

fn plural(n: i64, unit: &str) -> String {
    if n == 1 {
        format!("1 {unit} ago")
    } else {
        format!("{n} {unit}s ago")
    }
}
