//! Authenticated XRPC client for a personal data server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::application::repos::{RecordEntry, RecordPage, RecordRepo, RepoError, Session};
use crate::domain::types::Collection;
use crate::infra::atproto::records::Record;

const SOURCE: &str = "infra::atproto::client";

/// Records requested per `listRecords` round trip.
pub const LIST_PAGE_SIZE: u32 = 100;

/// Where to send a session's requests and the token to send with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub pds_url: Url,
    pub access_token: String,
}

/// Maps a session to the credentials its requests are signed with.
#[async_trait]
pub trait SessionAuth: Send + Sync {
    async fn credentials(&self, session: &Session) -> Result<Credentials, RepoError>;
}

/// A single session whose token is known up front.
#[derive(Debug, Clone)]
pub struct StaticSessionAuth {
    session_id: String,
    credentials: Credentials,
}

impl StaticSessionAuth {
    pub fn new(session_id: impl Into<String>, credentials: Credentials) -> Self {
        Self {
            session_id: session_id.into(),
            credentials,
        }
    }
}

#[async_trait]
impl SessionAuth for StaticSessionAuth {
    async fn credentials(&self, session: &Session) -> Result<Credentials, RepoError> {
        if session.session_id != self.session_id {
            return Err(RepoError::Unauthorized(format!(
                "unknown session `{}`",
                session.session_id
            )));
        }
        Ok(self.credentials.clone())
    }
}

/// Build the shared HTTP client used by both the authenticated and public clients.
pub fn http_client(timeout: Duration, user_agent: &str) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
}

/// Resolve `xrpc/<method>` against `base`, tolerating a base without a trailing slash.
pub(crate) fn xrpc_url(base: &Url, method: &str) -> Result<Url, RepoError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(&format!("xrpc/{method}"))
        .map_err(|err| RepoError::Transport(format!("invalid endpoint: {err}")))
}

pub(crate) fn with_query(mut url: Url, pairs: &[(&str, &str)]) -> Url {
    {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key, value);
        }
    }
    url
}

#[derive(Debug, Default, Deserialize)]
struct XrpcErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

fn status_error(status: StatusCode, body: &[u8]) -> RepoError {
    let parsed: XrpcErrorBody = serde_json::from_slice(body).unwrap_or_default();

    if status == StatusCode::NOT_FOUND || parsed.error.as_deref() == Some("RecordNotFound") {
        return RepoError::NotFound;
    }

    let message = parsed
        .message
        .or(parsed.error)
        .unwrap_or_else(|| String::from_utf8_lossy(body).into_owned());

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RepoError::Unauthorized(message),
        _ => RepoError::Status {
            status: status.as_u16(),
            message,
        },
    }
}

async fn checked_body(resp: Response) -> Result<Vec<u8>, RepoError> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(RepoError::from_transport)?;
    if !status.is_success() {
        return Err(status_error(status, &bytes));
    }
    Ok(bytes.to_vec())
}

pub(crate) async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T, RepoError> {
    let bytes = checked_body(resp).await?;
    serde_json::from_slice(&bytes).map_err(|err| RepoError::Decode(err.to_string()))
}

#[derive(Debug, Deserialize)]
struct CreateRecordOutput {
    uri: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RecordOutput {
    pub uri: String,
    pub value: Record,
}

impl From<RecordOutput> for RecordEntry {
    fn from(output: RecordOutput) -> Self {
        Self {
            uri: output.uri,
            value: output.value,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListRecordsOutput {
    #[serde(default)]
    pub records: Vec<RecordOutput>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// `RecordRepo` over the `com.atproto.repo.*` XRPC procedures.
#[derive(Clone)]
pub struct XrpcClient {
    http: Client,
    auth: Arc<dyn SessionAuth>,
}

impl XrpcClient {
    pub fn new(http: Client, auth: Arc<dyn SessionAuth>) -> Self {
        Self { http, auth }
    }

    async fn query<T: DeserializeOwned>(
        &self,
        session: &Session,
        method: &str,
        pairs: &[(&str, &str)],
    ) -> Result<T, RepoError> {
        let creds = self.auth.credentials(session).await?;
        let url = with_query(xrpc_url(&creds.pds_url, method)?, pairs);

        tracing::debug!(target = SOURCE, method, "xrpc query");
        let resp = self
            .http
            .get(url)
            .bearer_auth(&creds.access_token)
            .send()
            .await
            .map_err(RepoError::from_transport)?;
        read_json(resp).await
    }

    async fn procedure(
        &self,
        session: &Session,
        method: &str,
        body: serde_json::Value,
    ) -> Result<Vec<u8>, RepoError> {
        let creds = self.auth.credentials(session).await?;
        let url = xrpc_url(&creds.pds_url, method)?;

        tracing::debug!(target = SOURCE, method, "xrpc procedure");
        let resp = self
            .http
            .post(url)
            .bearer_auth(&creds.access_token)
            .json(&body)
            .send()
            .await
            .map_err(RepoError::from_transport)?;
        checked_body(resp).await
    }
}

#[async_trait]
impl RecordRepo for XrpcClient {
    async fn create_record(
        &self,
        session: &Session,
        collection: Collection,
        record: Record,
    ) -> Result<String, RepoError> {
        let body = self
            .procedure(
                session,
                "com.atproto.repo.createRecord",
                json!({
                    "repo": session.owner,
                    "collection": collection.nsid(),
                    "record": record,
                }),
            )
            .await?;
        let output: CreateRecordOutput =
            serde_json::from_slice(&body).map_err(|err| RepoError::Decode(err.to_string()))?;
        Ok(output.uri)
    }

    async fn get_record(
        &self,
        session: &Session,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError> {
        let output: RecordOutput = self
            .query(
                session,
                "com.atproto.repo.getRecord",
                &[
                    ("repo", owner),
                    ("collection", collection.nsid()),
                    ("rkey", rkey),
                ],
            )
            .await?;
        Ok(output.into())
    }

    async fn put_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
        record: Record,
    ) -> Result<(), RepoError> {
        self.procedure(
            session,
            "com.atproto.repo.putRecord",
            json!({
                "repo": session.owner,
                "collection": collection.nsid(),
                "rkey": rkey,
                "record": record,
            }),
        )
        .await?;
        Ok(())
    }

    async fn delete_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
    ) -> Result<(), RepoError> {
        self.procedure(
            session,
            "com.atproto.repo.deleteRecord",
            json!({
                "repo": session.owner,
                "collection": collection.nsid(),
                "rkey": rkey,
            }),
        )
        .await?;
        Ok(())
    }

    async fn list_records(
        &self,
        session: &Session,
        collection: Collection,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RepoError> {
        let limit = LIST_PAGE_SIZE.to_string();
        let mut pairs = vec![
            ("repo", session.owner.as_str()),
            ("collection", collection.nsid()),
            ("limit", limit.as_str()),
        ];
        if let Some(cursor) = cursor {
            pairs.push(("cursor", cursor));
        }

        let output: ListRecordsOutput = self
            .query(session, "com.atproto.repo.listRecords", &pairs)
            .await?;
        Ok(RecordPage {
            records: output.records.into_iter().map(RecordEntry::from).collect(),
            cursor: output.cursor,
        })
    }
}
