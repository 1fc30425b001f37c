//! Repository collections and the namespace they live under.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Base namespace shared by every arabica collection.
pub const NSID_BASE: &str = "social.arabica.alpha";

pub const NSID_BEAN: &str = "social.arabica.alpha.bean";
pub const NSID_ROASTER: &str = "social.arabica.alpha.roaster";
pub const NSID_GRINDER: &str = "social.arabica.alpha.grinder";
pub const NSID_BREWER: &str = "social.arabica.alpha.brewer";
pub const NSID_BREW: &str = "social.arabica.alpha.brew";

/// One of the five record collections an owner's repository holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Beans,
    Roasters,
    Grinders,
    Brewers,
    Brews,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Beans,
        Collection::Roasters,
        Collection::Grinders,
        Collection::Brewers,
        Collection::Brews,
    ];

    /// The namespaced identifier used as the collection name and `$type` tag.
    pub fn nsid(self) -> &'static str {
        match self {
            Collection::Beans => NSID_BEAN,
            Collection::Roasters => NSID_ROASTER,
            Collection::Grinders => NSID_GRINDER,
            Collection::Brewers => NSID_BREWER,
            Collection::Brews => NSID_BREW,
        }
    }

    pub fn from_nsid(nsid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.nsid() == nsid)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Beans => "beans",
            Collection::Roasters => "roasters",
            Collection::Grinders => "grinders",
            Collection::Brewers => "brewers",
            Collection::Brews => "brews",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|c| {
                c.as_str() == normalized
                    || c.as_str().trim_end_matches('s') == normalized
                    || c.nsid() == normalized
            })
            .ok_or_else(|| format!("unknown collection `{value}`"))
    }
}
