//! Store facade: typed CRUD over one owner's repository.
//!
//! Writes are encoded through the record codec and invalidate the session
//! cache for the collection touched. Reads decode, resolve references, and
//! fill the cache.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use metrics::counter;
use serde::Serialize;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::application::repos::{RecordRepo, RepoError, Session};
use crate::cache::{Cached, METRIC_CACHE_HIT, METRIC_CACHE_MISS, SessionCache};
use crate::domain::entities::{
    Bean, BeanParams, Brew, BrewParams, Brewer, BrewerParams, Grinder, GrinderParams, Roaster,
    RoasterParams,
};
use crate::domain::error::DomainError;
use crate::domain::types::Collection;
use crate::infra::atproto::records::{
    self, BeanRefs, BrewRefs, CodecError, FromRecord, Record, ToRecord,
};
use crate::infra::atproto::resolver::{self, ResolveError};
use crate::infra::atproto::uri::{self, LocatorError};

const SOURCE: &str = "infra::atproto::store";
const LIST_RESOLVE_CONCURRENCY: usize = 8;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("missing required reference `{field}`")]
    MissingReference { field: &'static str },
    #[error("invalid record key `{key}`")]
    InvalidKey { key: String },
    #[error(transparent)]
    Validation(#[from] DomainError),
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{op} {collection} `{target}` failed")]
    Repo {
        op: &'static str,
        collection: Collection,
        target: String,
        #[source]
        source: RepoError,
    },
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Repo { source, .. } if source.is_not_found())
    }
}

/// How list reads treat the session cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadPolicy {
    /// Serve from cache only while the entry is within its TTL.
    #[default]
    Fresh,
    /// Serve any cached slice, however old.
    AllowStale,
    /// Skip the cache and refill it.
    Refresh,
}

/// Per-entity hooks the facade needs beyond the codec.
#[async_trait]
pub trait StoreEntity:
    FromRecord + ToRecord<Refs: Send + Sync> + Cached + Clone + Serialize + Send + Sync + 'static
{
    type Params: Send + Sync;

    /// Resolve references when listing, not only on single reads.
    const RESOLVE_IN_LIST: bool = false;

    /// Checks that must pass before any network call.
    fn check(params: &Self::Params) -> Result<(), StoreError>;

    fn build(params: &Self::Params, created_at: OffsetDateTime) -> Self;

    /// Reference locators for `params`, rooted at `owner`'s repository.
    fn refs(params: &Self::Params, owner: &str) -> Self::Refs;

    fn set_rkey(&mut self, rkey: String);

    async fn resolve(
        &mut self,
        _repo: &dyn RecordRepo,
        _session: &Session,
        _raw: &Record,
    ) -> Result<(), ResolveError> {
        Ok(())
    }
}

/// Key of the record an operation targets. Empty is just another bad key here.
fn ensure_record_key(rkey: &str) -> Result<(), StoreError> {
    if uri::validate_rkey(rkey) {
        Ok(())
    } else {
        Err(StoreError::InvalidKey {
            key: rkey.to_string(),
        })
    }
}

fn ensure_key(field: &'static str, rkey: &str) -> Result<(), StoreError> {
    if rkey.is_empty() {
        return Err(StoreError::MissingReference { field });
    }
    ensure_record_key(rkey)
}

fn ensure_optional_key(field: &'static str, rkey: Option<&str>) -> Result<(), StoreError> {
    match rkey.filter(|k| !k.is_empty()) {
        Some(key) => ensure_key(field, key),
        None => Ok(()),
    }
}

fn optional_ref(owner: &str, collection: Collection, rkey: Option<&str>) -> Option<String> {
    rkey.filter(|k| !k.is_empty())
        .map(|k| uri::build_for(owner, collection, k))
}

#[async_trait]
impl StoreEntity for Roaster {
    type Params = RoasterParams;

    fn check(params: &RoasterParams) -> Result<(), StoreError> {
        Ok(params.validate()?)
    }

    fn build(params: &RoasterParams, created_at: OffsetDateTime) -> Self {
        Roaster::from_params(params, created_at)
    }

    fn refs(_params: &RoasterParams, _owner: &str) {}

    fn set_rkey(&mut self, rkey: String) {
        self.rkey = rkey;
    }
}

#[async_trait]
impl StoreEntity for Grinder {
    type Params = GrinderParams;

    fn check(params: &GrinderParams) -> Result<(), StoreError> {
        Ok(params.validate()?)
    }

    fn build(params: &GrinderParams, created_at: OffsetDateTime) -> Self {
        Grinder::from_params(params, created_at)
    }

    fn refs(_params: &GrinderParams, _owner: &str) {}

    fn set_rkey(&mut self, rkey: String) {
        self.rkey = rkey;
    }
}

#[async_trait]
impl StoreEntity for Brewer {
    type Params = BrewerParams;

    fn check(params: &BrewerParams) -> Result<(), StoreError> {
        Ok(params.validate()?)
    }

    fn build(params: &BrewerParams, created_at: OffsetDateTime) -> Self {
        Brewer::from_params(params, created_at)
    }

    fn refs(_params: &BrewerParams, _owner: &str) {}

    fn set_rkey(&mut self, rkey: String) {
        self.rkey = rkey;
    }
}

#[async_trait]
impl StoreEntity for Bean {
    type Params = BeanParams;

    fn check(params: &BeanParams) -> Result<(), StoreError> {
        params.validate()?;
        ensure_optional_key("roaster_rkey", params.roaster_rkey.as_deref())
    }

    fn build(params: &BeanParams, created_at: OffsetDateTime) -> Self {
        Bean::from_params(params, created_at)
    }

    fn refs(params: &BeanParams, owner: &str) -> BeanRefs {
        BeanRefs {
            roaster: optional_ref(owner, Collection::Roasters, params.roaster_rkey.as_deref()),
        }
    }

    fn set_rkey(&mut self, rkey: String) {
        self.rkey = rkey;
    }

    async fn resolve(
        &mut self,
        repo: &dyn RecordRepo,
        session: &Session,
        raw: &Record,
    ) -> Result<(), ResolveError> {
        resolver::attach_roaster(repo, session, self, raw).await;
        Ok(())
    }
}

#[async_trait]
impl StoreEntity for Brew {
    type Params = BrewParams;

    const RESOLVE_IN_LIST: bool = true;

    fn check(params: &BrewParams) -> Result<(), StoreError> {
        ensure_key("bean_rkey", &params.bean_rkey)?;
        ensure_optional_key("grinder_rkey", params.grinder_rkey.as_deref())?;
        ensure_optional_key("brewer_rkey", params.brewer_rkey.as_deref())?;
        Ok(params.validate()?)
    }

    fn build(params: &BrewParams, created_at: OffsetDateTime) -> Self {
        Brew::from_params(params, created_at)
    }

    fn refs(params: &BrewParams, owner: &str) -> BrewRefs {
        BrewRefs {
            bean: uri::build_for(owner, Collection::Beans, &params.bean_rkey),
            grinder: optional_ref(owner, Collection::Grinders, params.grinder_rkey.as_deref()),
            brewer: optional_ref(owner, Collection::Brewers, params.brewer_rkey.as_deref()),
        }
    }

    fn set_rkey(&mut self, rkey: String) {
        self.rkey = rkey;
    }

    async fn resolve(
        &mut self,
        repo: &dyn RecordRepo,
        session: &Session,
        raw: &Record,
    ) -> Result<(), ResolveError> {
        resolver::resolve_brew_refs(repo, session, self, &records::brew_refs(raw)).await
    }
}

/// Repository-backed store for one session.
#[derive(Clone)]
pub struct AtprotoStore {
    repo: Arc<dyn RecordRepo>,
    cache: Arc<SessionCache>,
    session: Session,
    read_policy: ReadPolicy,
}

impl AtprotoStore {
    pub fn new(repo: Arc<dyn RecordRepo>, cache: Arc<SessionCache>, session: Session) -> Self {
        Self {
            repo,
            cache,
            session,
            read_policy: ReadPolicy::default(),
        }
    }

    pub fn with_read_policy(mut self, read_policy: ReadPolicy) -> Self {
        self.read_policy = read_policy;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    fn locator(&self, collection: Collection, rkey: &str) -> String {
        uri::build_for(&self.session.owner, collection, rkey)
    }

    fn repo_error(
        &self,
        op: &'static str,
        collection: Collection,
        rkey: &str,
    ) -> impl FnOnce(RepoError) -> StoreError + use<> {
        let target = if rkey.is_empty() {
            format!("{}{}/{}", uri::SCHEME, self.session.owner, collection.nsid())
        } else {
            self.locator(collection, rkey)
        };
        move |source| StoreError::Repo {
            op,
            collection,
            target,
            source,
        }
    }

    pub async fn create<E: StoreEntity>(&self, params: &E::Params) -> Result<E, StoreError> {
        E::check(params)?;

        let refs = E::refs(params, &self.session.owner);
        let mut item = E::build(params, OffsetDateTime::now_utc());
        let record = item.to_record(&refs)?;

        let locator = self
            .repo
            .create_record(&self.session, E::COLLECTION, record.clone())
            .await
            .map_err(self.repo_error("create", E::COLLECTION, ""))?;
        item.set_rkey(uri::resolve(&locator)?.rkey);
        self.cache
            .invalidate_collection(&self.session.session_id, E::COLLECTION);

        if let Err(err) = item.resolve(self.repo.as_ref(), &self.session, &record).await {
            warn!(
                target = SOURCE,
                locator = %locator,
                error = %err,
                "created record but could not resolve its references"
            );
        }
        Ok(item)
    }

    pub async fn get<E: StoreEntity>(&self, rkey: &str) -> Result<E, StoreError> {
        ensure_record_key(rkey)?;

        let entry = self
            .repo
            .get_record(&self.session, &self.session.owner, E::COLLECTION, rkey)
            .await
            .map_err(self.repo_error("get", E::COLLECTION, rkey))?;

        let locator = self.locator(E::COLLECTION, rkey);
        let mut item = E::from_record(&entry.value, &locator)?;
        if let Err(err) = item.resolve(self.repo.as_ref(), &self.session, &entry.value).await {
            warn!(
                target = SOURCE,
                locator = %locator,
                error = %err,
                "failed to resolve references"
            );
        }
        Ok(item)
    }

    /// Every record of a collection, skipping records that fail to decode.
    pub async fn list<E: StoreEntity>(&self) -> Result<Vec<E>, StoreError> {
        if let Some(cached) = self.cached::<E>() {
            counter!(METRIC_CACHE_HIT, "collection" => E::COLLECTION.as_str()).increment(1);
            debug!(target = SOURCE, collection = %E::COLLECTION, "serving list from cache");
            return Ok(cached.to_vec());
        }
        counter!(METRIC_CACHE_MISS, "collection" => E::COLLECTION.as_str()).increment(1);

        let fill = self.cache.begin_fill(&self.session.session_id);
        let entries = self
            .repo
            .list_all_records(&self.session, E::COLLECTION)
            .await
            .map_err(self.repo_error("list", E::COLLECTION, ""))?;

        let mut decoded: Vec<(E, Record)> = Vec::with_capacity(entries.len());
        for entry in entries {
            match E::from_record(&entry.value, &entry.uri) {
                Ok(item) => decoded.push((item, entry.value)),
                Err(err) => warn!(
                    target = SOURCE,
                    uri = %entry.uri,
                    error = %err,
                    "skipping malformed record"
                ),
            }
        }

        if E::RESOLVE_IN_LIST {
            let repo = self.repo.as_ref();
            let session = &self.session;
            stream::iter(decoded.iter_mut())
                .for_each_concurrent(LIST_RESOLVE_CONCURRENCY, |(item, raw)| async move {
                    if let Err(err) = item.resolve(repo, session, raw).await {
                        warn!(
                            target = SOURCE,
                            collection = %E::COLLECTION,
                            error = %err,
                            "failed to resolve references"
                        );
                    }
                })
                .await;
        }

        let items: Vec<E> = decoded.into_iter().map(|(item, _)| item).collect();
        self.cache
            .fill_collection(&self.session.session_id, fill, items.clone());
        Ok(items)
    }

    /// Replace a record, keeping its original creation time.
    ///
    /// There is no revision check: concurrent updates race and the last write wins.
    pub async fn update<E: StoreEntity>(
        &self,
        rkey: &str,
        params: &E::Params,
    ) -> Result<(), StoreError> {
        ensure_record_key(rkey)?;
        E::check(params)?;

        let existing = self
            .repo
            .get_record(&self.session, &self.session.owner, E::COLLECTION, rkey)
            .await
            .map_err(self.repo_error("get", E::COLLECTION, rkey))?;
        let created_at = records::created_at(&existing.value, E::COLLECTION)?;

        let refs = E::refs(params, &self.session.owner);
        let record = E::build(params, created_at).to_record(&refs)?;

        self.repo
            .put_record(&self.session, E::COLLECTION, rkey, record)
            .await
            .map_err(self.repo_error("put", E::COLLECTION, rkey))?;
        self.cache
            .invalidate_collection(&self.session.session_id, E::COLLECTION);
        Ok(())
    }

    /// Delete one record. Records referencing it are left dangling.
    pub async fn delete<E: StoreEntity>(&self, rkey: &str) -> Result<(), StoreError> {
        ensure_record_key(rkey)?;

        self.repo
            .delete_record(&self.session, E::COLLECTION, rkey)
            .await
            .map_err(self.repo_error("delete", E::COLLECTION, rkey))?;
        self.cache
            .invalidate_collection(&self.session.session_id, E::COLLECTION);
        Ok(())
    }

    fn cached<E: Cached>(&self) -> Option<Arc<[E]>> {
        if self.read_policy == ReadPolicy::Refresh {
            return None;
        }
        let entry = self.cache.get(&self.session.session_id)?;
        if self.read_policy == ReadPolicy::Fresh && !self.cache.is_valid(&entry) {
            return None;
        }
        entry.get::<E>()
    }
}
