//! Unauthenticated reads against the public AppView and arbitrary PDS hosts.
//!
//! Owners are addressed by DID. Their PDS is discovered from the DID document
//! (`did:plc`) or from the DID itself (`did:web`) and memoised for the life of
//! the client.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::application::repos::{Profile, PublicRepo, RecordEntry, RepoError};
use crate::domain::types::Collection;
use crate::infra::atproto::client::{ListRecordsOutput, RecordOutput, read_json, with_query, xrpc_url};

const SOURCE: &str = "infra::atproto::public";

const PDS_SERVICE_ID: &str = "#atproto_pds";
const PDS_SERVICE_TYPE: &str = "AtprotoPersonalDataServer";
const CLOUD_METADATA: Ipv4Addr = Ipv4Addr::new(169, 254, 169, 254);

#[derive(Debug, Deserialize)]
struct DidDocument {
    #[serde(default)]
    service: Vec<DidService>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DidService {
    #[serde(default)]
    id: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    service_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct ResolveHandleOutput {
    did: String,
}

pub struct PublicClient {
    http: Client,
    public_api: Url,
    plc_directory: Url,
    pds_cache: DashMap<String, Url>,
}

impl PublicClient {
    pub fn new(http: Client, public_api: Url, plc_directory: Url) -> Self {
        Self {
            http,
            public_api,
            plc_directory,
            pds_cache: DashMap::new(),
        }
    }

    pub async fn resolve_handle(&self, handle: &str) -> Result<String, RepoError> {
        let url = with_query(
            xrpc_url(&self.public_api, "com.atproto.identity.resolveHandle")?,
            &[("handle", handle)],
        );
        let output: ResolveHandleOutput = self.get_json(url).await.map_err(|err| match err {
            RepoError::NotFound => RepoError::Identity(format!("handle not found: {handle}")),
            other => other,
        })?;
        Ok(output.did)
    }

    /// Locate the PDS hosting `did`.
    pub async fn resolve_pds(&self, did: &str) -> Result<Url, RepoError> {
        if let Some(cached) = self.pds_cache.get(did) {
            return Ok(cached.value().clone());
        }

        let endpoint = if did.starts_with("did:plc:") {
            self.resolve_plc(did).await?
        } else if did.starts_with("did:web:") {
            web_endpoint(did)?
        } else {
            return Err(RepoError::Identity(format!("unsupported DID method: {did}")));
        };

        tracing::debug!(target = SOURCE, did, pds = %endpoint, "resolved PDS endpoint");
        self.pds_cache.insert(did.to_string(), endpoint.clone());
        Ok(endpoint)
    }

    async fn resolve_plc(&self, did: &str) -> Result<Url, RepoError> {
        let mut url = self.plc_directory.clone();
        let path = format!("{}/{did}", url.path().trim_end_matches('/'));
        url.set_path(&path);
        let document: DidDocument = self.get_json(url).await.map_err(|err| match err {
            RepoError::NotFound => RepoError::Identity(format!("DID document not found: {did}")),
            other => other,
        })?;

        document
            .service
            .iter()
            .find(|svc| svc.id == PDS_SERVICE_ID || svc.kind == PDS_SERVICE_TYPE)
            .and_then(|svc| Url::parse(&svc.service_endpoint).ok())
            .ok_or_else(|| RepoError::Identity(format!("could not resolve PDS endpoint for {did}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, RepoError> {
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(RepoError::from_transport)?;
        read_json(resp).await
    }
}

#[async_trait]
impl PublicRepo for PublicClient {
    async fn get_profile(&self, actor: &str) -> Result<Profile, RepoError> {
        let url = with_query(
            xrpc_url(&self.public_api, "app.bsky.actor.getProfile")?,
            &[("actor", actor)],
        );
        self.get_json(url).await
    }

    async fn list_records(
        &self,
        owner: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<RecordEntry>, RepoError> {
        let pds = self.resolve_pds(owner).await?;
        let limit = limit.to_string();
        let url = with_query(
            xrpc_url(&pds, "com.atproto.repo.listRecords")?,
            &[
                ("repo", owner),
                ("collection", collection.nsid()),
                ("limit", limit.as_str()),
                ("reverse", "false"),
            ],
        );
        let output: ListRecordsOutput = self.get_json(url).await?;
        Ok(output.records.into_iter().map(RecordEntry::from).collect())
    }

    async fn get_record(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError> {
        let pds = self.resolve_pds(owner).await?;
        let url = with_query(
            xrpc_url(&pds, "com.atproto.repo.getRecord")?,
            &[
                ("repo", owner),
                ("collection", collection.nsid()),
                ("rkey", rkey),
            ],
        );
        let output: RecordOutput = self.get_json(url).await?;
        Ok(output.into())
    }
}

/// `did:web:<domain>` is served from `https://<domain>`; `%3A` encodes a port separator.
fn web_endpoint(did: &str) -> Result<Url, RepoError> {
    let encoded = did.trim_start_matches("did:web:");
    let decoded = encoded.replace("%3A", ":").replace("%3a", ":");
    let authority = decoded.split('/').next().unwrap_or_default();

    validate_domain(host_of(authority))?;

    Url::parse(&format!("https://{authority}"))
        .map_err(|err| RepoError::Identity(format!("invalid did:web `{did}`: {err}")))
}

fn host_of(authority: &str) -> &str {
    if let Some(rest) = authority.strip_prefix('[') {
        return rest.split(']').next().unwrap_or_default();
    }
    match authority.rsplit_once(':') {
        Some((host, port)) if port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Refuse hosts that would point an outbound request back into private address space.
fn validate_domain(host: &str) -> Result<(), RepoError> {
    let lowered = host.to_ascii_lowercase();
    if lowered.is_empty() || lowered == "localhost" || lowered.ends_with(".local") {
        return Err(blocked(host));
    }
    match lowered.parse::<IpAddr>() {
        Ok(ip) if is_private_ip(ip) => Err(blocked(host)),
        _ => Ok(()),
    }
}

fn blocked(host: &str) -> RepoError {
    RepoError::Identity(format!("refusing to contact internal host `{host}`"))
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => is_private_v4(v4),
            None => is_private_v6(v6),
        },
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    let [a, b, c, _] = ip.octets();
    ip.is_loopback()
        || ip.is_private()
        || ip.is_link_local()
        || ip.is_unspecified()
        || ip == CLOUD_METADATA
        || (a == 224 && b == 0 && c == 0)
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback()
        || ip.is_unspecified()
        || (first & 0xfe00) == 0xfc00
        || (first & 0xffc0) == 0xfe80
        || (first & 0xff0f) == 0xff02
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use httpmock::MockServer;
    use serde_json::json;

    use super::*;
    use crate::domain::types::NSID_BREW;
    use crate::infra::atproto::client::http_client;

    fn client(server: &MockServer) -> PublicClient {
        let base = Url::parse(&server.base_url()).expect("base url");
        let plc = base.join("/plc/").expect("plc url");
        let http = http_client(Duration::from_secs(5), "arabica-test").expect("http client");
        PublicClient::new(http, base, plc)
    }

    #[test]
    fn private_addresses_are_blocked() {
        for host in [
            "localhost",
            "printer.local",
            "127.0.0.1",
            "10.1.2.3",
            "172.16.0.9",
            "192.168.1.1",
            "169.254.169.254",
            "0.0.0.0",
            "::1",
            "fd00::1",
            "fe80::1",
            "::ffff:127.0.0.1",
        ] {
            assert!(validate_domain(host).is_err(), "{host} should be blocked");
        }
        for host in ["example.com", "8.8.8.8", "2606:4700::1111"] {
            assert!(validate_domain(host).is_ok(), "{host} should be allowed");
        }
    }

    #[test]
    fn did_web_decodes_port() {
        let url = web_endpoint("did:web:example.com%3A8080").expect("endpoint");
        assert_eq!(url.as_str(), "https://example.com:8080/");

        let url = web_endpoint("did:web:example.com").expect("endpoint");
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn did_web_rejects_internal_hosts() {
        assert!(web_endpoint("did:web:localhost%3A3000").is_err());
        assert!(web_endpoint("did:web:127.0.0.1").is_err());
        assert!(web_endpoint("did:web:10.0.0.8%3A443").is_err());
    }

    #[tokio::test]
    async fn unsupported_did_method_is_rejected() {
        let server = MockServer::start_async().await;
        let err = client(&server)
            .resolve_pds("did:key:z6Mk")
            .await
            .expect_err("unsupported");
        assert!(matches!(err, RepoError::Identity(_)));
    }

    #[tokio::test]
    async fn plc_resolution_is_cached_and_used_for_listing() {
        let server = MockServer::start_async().await;
        let pds = server.base_url();
        let plc = server
            .mock_async(|when, then| {
                when.method("GET").path("/plc/did:plc:alice");
                then.status(200)
                    .header("content-type", "application/json")
                    .json_body(json!({
                        "id": "did:plc:alice",
                        "service": [
                            {"id": "#bsky_chat", "type": "BskyChatService", "serviceEndpoint": "https://chat.example"},
                            {"id": "#atproto_pds", "type": "AtprotoPersonalDataServer", "serviceEndpoint": pds},
                        ],
                    }));
            })
            .await;
        let list = server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/xrpc/com.atproto.repo.listRecords")
                    .query_param("repo", "did:plc:alice")
                    .query_param("collection", NSID_BREW)
                    .query_param("limit", "5")
                    .query_param("reverse", "false");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"records":[{"uri":"at://did:plc:alice/social.arabica.alpha.brew/b1","cid":"c","value":{"rating":7}}]}"#);
            })
            .await;

        let client = client(&server);
        let first = client
            .list_records("did:plc:alice", Collection::Brews, 5)
            .await
            .expect("list");
        let second = client
            .list_records("did:plc:alice", Collection::Brews, 5)
            .await
            .expect("list again");

        plc.assert_hits_async(1).await;
        list.assert_hits_async(2).await;
        assert_eq!(first, second);
        assert_eq!(first[0].value["rating"], 7);
    }

    #[tokio::test]
    async fn profile_and_handle_come_from_public_api() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/xrpc/app.bsky.actor.getProfile")
                    .query_param("actor", "alice.example.com");
                then.status(200)
                    .header("content-type", "application/json")
                    .body(r#"{"did":"did:plc:alice","handle":"alice.example.com","displayName":"Alice","followersCount":3}"#);
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method("GET")
                    .path("/xrpc/com.atproto.identity.resolveHandle")
                    .query_param("handle", "ghost.example.com");
                then.status(404);
            })
            .await;

        let client = client(&server);
        let profile = client.get_profile("alice.example.com").await.expect("profile");
        assert_eq!(profile.did, "did:plc:alice");
        assert_eq!(profile.display_name.as_deref(), Some("Alice"));
        assert_eq!(profile.avatar, None);

        let err = client
            .resolve_handle("ghost.example.com")
            .await
            .expect_err("unknown handle");
        assert!(matches!(err, RepoError::Identity(_)));
    }
}
