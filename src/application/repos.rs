//! Repository traits describing the remote record store and the typed stores built on it.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::types::Collection;
use crate::infra::atproto::records::Record;

/// Maximum number of pagination rounds `list_all_records` will follow.
const MAX_LIST_PAGES: usize = 1_000;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("session is not authorized: {0}")]
    Unauthorized(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("repository returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode repository response: {0}")]
    Decode(String),
    #[error("identity resolution failed: {0}")]
    Identity(String),
}

impl RepoError {
    pub fn from_transport(err: impl std::fmt::Display) -> Self {
        Self::Transport(err.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

/// An authenticated scope: the repository owner plus an opaque session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    pub owner: String,
    pub session_id: String,
}

impl Session {
    pub fn new(owner: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            session_id: session_id.into(),
        }
    }
}

/// One record returned by a get or list call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordEntry {
    pub uri: String,
    pub value: Record,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordPage {
    pub records: Vec<RecordEntry>,
    pub cursor: Option<String>,
}

/// Authenticated access to one owner's repository.
#[async_trait]
pub trait RecordRepo: Send + Sync {
    /// Create a record and return the locator the repository assigned.
    async fn create_record(
        &self,
        session: &Session,
        collection: Collection,
        record: Record,
    ) -> Result<String, RepoError>;

    async fn get_record(
        &self,
        session: &Session,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError>;

    async fn put_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
        record: Record,
    ) -> Result<(), RepoError>;

    async fn delete_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
    ) -> Result<(), RepoError>;

    async fn list_records(
        &self,
        session: &Session,
        collection: Collection,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RepoError>;

    /// Follow pagination until the repository stops returning a cursor.
    async fn list_all_records(
        &self,
        session: &Session,
        collection: Collection,
    ) -> Result<Vec<RecordEntry>, RepoError> {
        let mut records = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_LIST_PAGES {
            let page = self
                .list_records(session, collection, cursor.as_deref())
                .await?;
            records.extend(page.records);

            match page.cursor {
                Some(next) if !next.is_empty() && cursor.as_deref() != Some(next.as_str()) => {
                    cursor = Some(next);
                }
                _ => return Ok(records),
            }
        }

        tracing::warn!(
            target = "application::repos",
            collection = %collection,
            pages = MAX_LIST_PAGES,
            "pagination limit reached"
        );
        Ok(records)
    }
}

/// Unauthenticated, read-only access to any owner's public records.
#[async_trait]
pub trait PublicRepo: Send + Sync {
    async fn get_profile(&self, actor: &str) -> Result<Profile, RepoError>;

    /// Newest records first.
    async fn list_records(
        &self,
        owner: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<RecordEntry>, RepoError>;

    async fn get_record(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub did: String,
    pub handle: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}
