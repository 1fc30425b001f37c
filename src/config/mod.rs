//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

mod cli;

pub use cli::{
    CliArgs, CollectionArgs, Command, CreateArgs, ExportArgs, FeedArgs, GlobalOverrides,
    ParamsArgs, RecordArgs, ResolveArgs, UpdateArgs,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "arabica";
const ENV_PREFIX: &str = "ARABICA";
const DEFAULT_CACHE_TTL_SECS: u64 = 120;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_STALE_MULTIPLIER: u64 = 2;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PUBLIC_API_URL: &str = "https://public.api.bsky.app";
const DEFAULT_PLC_DIRECTORY_URL: &str = "https://plc.directory";
const DEFAULT_FEED_LIMIT: u64 = 20;

fn default_user_agent() -> String {
    concat!("arabica/", env!("CARGO_PKG_VERSION")).to_string()
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub repository: RepositorySettings,
    pub cache: CacheSettings,
    pub http: HttpSettings,
    pub feed: FeedSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Where the authenticated repository lives. Every field is optional at load
/// time; commands that talk to the repository call [`RepositorySettings::require`].
#[derive(Debug, Clone)]
pub struct RepositorySettings {
    pub pds_url: Option<Url>,
    pub did: Option<String>,
    pub access_token: Option<String>,
    pub session_id: Option<String>,
}

/// Fully specified repository connection.
#[derive(Debug, Clone)]
pub struct RepositoryTarget {
    pub pds_url: Url,
    pub did: String,
    pub access_token: String,
    pub session_id: String,
}

impl RepositorySettings {
    pub fn require(&self) -> Result<RepositoryTarget, LoadError> {
        let pds_url = self
            .pds_url
            .clone()
            .ok_or_else(|| LoadError::invalid("repository.pds_url", "is required"))?;
        let did = self
            .did
            .clone()
            .ok_or_else(|| LoadError::invalid("repository.did", "is required"))?;
        let access_token = self
            .access_token
            .clone()
            .ok_or_else(|| LoadError::invalid("repository.access_token", "is required"))?;
        let session_id = self.session_id.clone().unwrap_or_else(|| did.clone());

        Ok(RepositoryTarget {
            pds_url,
            did,
            access_token,
            session_id,
        })
    }
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub sweep_interval: Duration,
    pub stale_multiplier: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct FeedSettings {
    pub public_api_url: Url,
    pub plc_directory_url: Url,
    pub dids: Vec<String>,
    pub limit: NonZeroU32,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator("__")
            .list_separator(",")
            .with_list_parse_key("feed.dids")
            .try_parsing(true),
    );

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_global_overrides(&cli.overrides);
    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    repository: RawRepositorySettings,
    cache: RawCacheSettings,
    http: RawHttpSettings,
    feed: RawFeedSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.pds_url.as_ref() {
            self.repository.pds_url = Some(url.clone());
        }
        if let Some(did) = overrides.did.as_ref() {
            self.repository.did = Some(did.clone());
        }
        if let Some(token) = overrides.access_token.as_ref() {
            self.repository.access_token = Some(token.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            repository,
            cache,
            http,
            feed,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            repository: build_repository_settings(repository)?,
            cache: build_cache_settings(cache)?,
            http: build_http_settings(http)?,
            feed: build_feed_settings(feed)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_repository_settings(
    repository: RawRepositorySettings,
) -> Result<RepositorySettings, LoadError> {
    let pds_url = non_empty(repository.pds_url)
        .map(|value| parse_url(&value, "repository.pds_url"))
        .transpose()?;

    let did = non_empty(repository.did);
    if let Some(did) = did.as_deref() {
        validate_did(did, "repository.did")?;
    }

    Ok(RepositorySettings {
        pds_url,
        did,
        access_token: non_empty(repository.access_token),
        session_id: non_empty(repository.session_id),
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let ttl = positive_duration(
        cache.ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.ttl_seconds",
    )?;
    let sweep_interval = positive_duration(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "cache.sweep_interval_seconds",
    )?;
    let stale_multiplier = non_zero_u32(
        cache.stale_multiplier.unwrap_or(DEFAULT_STALE_MULTIPLIER),
        "cache.stale_multiplier",
    )?;

    Ok(CacheSettings {
        ttl,
        sweep_interval,
        stale_multiplier,
    })
}

fn build_http_settings(http: RawHttpSettings) -> Result<HttpSettings, LoadError> {
    let timeout = positive_duration(
        http.timeout_seconds.unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS),
        "http.timeout_seconds",
    )?;
    let user_agent = non_empty(http.user_agent).unwrap_or_else(default_user_agent);

    Ok(HttpSettings {
        timeout,
        user_agent,
    })
}

fn build_feed_settings(feed: RawFeedSettings) -> Result<FeedSettings, LoadError> {
    let public_api_url = parse_url(
        feed.public_api_url
            .as_deref()
            .unwrap_or(DEFAULT_PUBLIC_API_URL),
        "feed.public_api_url",
    )?;
    let plc_directory_url = parse_url(
        feed.plc_directory_url
            .as_deref()
            .unwrap_or(DEFAULT_PLC_DIRECTORY_URL),
        "feed.plc_directory_url",
    )?;

    let mut dids = Vec::new();
    for did in feed.dids.unwrap_or_default() {
        let did = did.trim().to_string();
        if did.is_empty() || dids.contains(&did) {
            continue;
        }
        validate_did(&did, "feed.dids")?;
        dids.push(did);
    }

    let limit = non_zero_u32(feed.limit.unwrap_or(DEFAULT_FEED_LIMIT), "feed.limit")?;

    Ok(FeedSettings {
        public_api_url,
        plc_directory_url,
        dids,
        limit,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRepositorySettings {
    pds_url: Option<String>,
    did: Option<String>,
    access_token: Option<String>,
    session_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    ttl_seconds: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    stale_multiplier: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawHttpSettings {
    timeout_seconds: Option<u64>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawFeedSettings {
    public_api_url: Option<String>,
    plc_directory_url: Option<String>,
    dids: Option<Vec<String>>,
    limit: Option<u64>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn parse_url(value: &str, key: &'static str) -> Result<Url, LoadError> {
    let url = Url::parse(value)
        .map_err(|err| LoadError::invalid(key, format!("invalid URL `{value}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(LoadError::invalid(
            key,
            format!("unsupported scheme `{other}`"),
        )),
    }
}

fn validate_did(value: &str, key: &'static str) -> Result<(), LoadError> {
    let mut parts = value.splitn(3, ':');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("did"), Some(method), Some(id)) if !method.is_empty() && !id.is_empty() => Ok(()),
        _ => Err(LoadError::invalid(
            key,
            format!("`{value}` is not a DID"),
        )),
    }
}

fn positive_duration(seconds: u64, key: &'static str) -> Result<Duration, LoadError> {
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }

    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;

    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
