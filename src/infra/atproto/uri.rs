//! `at://` locators: building, parsing, and record-key validation.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::domain::types::Collection;

pub const SCHEME: &str = "at://";
pub const MAX_RKEY_LEN: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorError {
    #[error("malformed locator `{locator}`: {reason}")]
    Malformed {
        locator: String,
        reason: &'static str,
    },
}

impl LocatorError {
    fn malformed(locator: &str, reason: &'static str) -> Self {
        Self::Malformed {
            locator: locator.to_string(),
            reason,
        }
    }
}

/// Parsed form of an `at://owner/collection/rkey` string.
///
/// `collection` and `rkey` are empty for identity-only locators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Locator {
    pub owner: String,
    pub collection: String,
    pub rkey: String,
}

impl Locator {
    pub fn new(
        owner: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Self {
        Self {
            owner: owner.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }

    pub fn for_record(owner: &str, collection: Collection, rkey: &str) -> Self {
        Self::new(owner, collection.nsid(), rkey)
    }

    pub fn collection_kind(&self) -> Option<Collection> {
        Collection::from_nsid(&self.collection)
    }

    pub fn is_identity_only(&self) -> bool {
        self.collection.is_empty() && self.rkey.is_empty()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_identity_only() {
            write!(f, "{SCHEME}{}", self.owner)
        } else {
            f.write_str(&build(&self.owner, &self.collection, &self.rkey))
        }
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        resolve(value)
    }
}

/// Format a locator string. Inputs are not validated.
pub fn build(owner: &str, collection: &str, rkey: &str) -> String {
    format!("{SCHEME}{owner}/{collection}/{rkey}")
}

pub fn build_for(owner: &str, collection: Collection, rkey: &str) -> String {
    build(owner, collection.nsid(), rkey)
}

/// Split a locator string into its owner, collection, and record key.
pub fn resolve(locator: &str) -> Result<Locator, LocatorError> {
    let rest = locator
        .strip_prefix(SCHEME)
        .ok_or_else(|| LocatorError::malformed(locator, "missing `at://` scheme"))?;

    if rest.chars().any(char::is_whitespace) {
        return Err(LocatorError::malformed(locator, "contains whitespace"));
    }

    let mut parts = rest.splitn(3, '/');
    let owner = parts.next().unwrap_or_default();
    if owner.is_empty() {
        return Err(LocatorError::malformed(locator, "missing authority"));
    }
    if !is_valid_authority(owner) {
        return Err(LocatorError::malformed(locator, "invalid authority"));
    }

    let collection = parts.next().unwrap_or_default();
    let rkey = parts.next().unwrap_or_default();

    if collection.is_empty() && !rkey.is_empty() {
        return Err(LocatorError::malformed(locator, "record key without collection"));
    }
    if !collection.is_empty() && !is_valid_nsid(collection) {
        return Err(LocatorError::malformed(locator, "invalid collection"));
    }
    if !rkey.is_empty() && !validate_rkey(rkey) {
        return Err(LocatorError::malformed(locator, "invalid record key"));
    }

    Ok(Locator::new(owner, collection, rkey))
}

/// Record keys: 1-512 chars of `[A-Za-z0-9._:-]`, starting alphanumeric.
/// `.` and `..` are reserved.
pub fn validate_rkey(rkey: &str) -> bool {
    if rkey.is_empty() || rkey.len() > MAX_RKEY_LEN || rkey == "." || rkey == ".." {
        return false;
    }
    let mut chars = rkey.chars();
    let starts_alnum = chars.next().is_some_and(|c| c.is_ascii_alphanumeric());
    starts_alnum
        && rkey
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '-'))
}

fn is_valid_authority(owner: &str) -> bool {
    if let Some(did) = owner.strip_prefix("did:") {
        let mut segments = did.splitn(2, ':');
        let method = segments.next().unwrap_or_default();
        let id = segments.next().unwrap_or_default();
        return !method.is_empty()
            && method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
            && !id.is_empty();
    }
    // Handles: dotted hostnames.
    owner.contains('.')
        && owner.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

fn is_valid_nsid(collection: &str) -> bool {
    let segments: Vec<&str> = collection.split('.').collect();
    segments.len() >= 3
        && segments.iter().all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}
