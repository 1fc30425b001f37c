//! TOML archive of a whole journal.

use std::path::Path;

use serde::Serialize;
use time::OffsetDateTime;

use crate::application::error::AppError;
use crate::application::manage::{Journal, ManageService};
use crate::infra::error::InfraError;

const SOURCE: &str = "application::export";

#[derive(Debug, Serialize)]
struct JournalArchive {
    owner: String,
    #[serde(with = "time::serde::rfc3339")]
    exported_at: OffsetDateTime,
    #[serde(flatten)]
    journal: Journal,
}

/// Encode every collection as TOML. Resolved references are dropped so each
/// record appears once, under its own collection.
pub fn encode_journal(
    owner: &str,
    journal: Journal,
    exported_at: OffsetDateTime,
) -> Result<String, AppError> {
    let journal = Journal {
        beans: journal.beans.into_iter().map(|bean| bean.detached()).collect(),
        brews: journal.brews.into_iter().map(|brew| brew.detached()).collect(),
        ..journal
    };
    let archive = JournalArchive {
        owner: owner.to_string(),
        exported_at,
        journal,
    };

    toml::to_string_pretty(&archive).map_err(|err| {
        AppError::from(InfraError::serialization(format!(
            "failed to encode archive: {err}"
        )))
    })
}

/// Write the owner's full journal to `path`.
pub async fn export_journal(
    manage: &ManageService,
    owner: &str,
    path: &Path,
) -> Result<usize, AppError> {
    let journal = manage.load_all().await?;
    let count = journal.beans.len()
        + journal.roasters.len()
        + journal.grinders.len()
        + journal.brewers.len()
        + journal.brews.len();

    let encoded = encode_journal(owner, journal, OffsetDateTime::now_utc())?;
    tokio::fs::write(path, encoded)
        .await
        .map_err(|err| AppError::from(InfraError::Io(err)))?;

    tracing::info!(
        target = SOURCE,
        path = %path.display(),
        records = count,
        "journal exported"
    );
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::application::repos::RecordRepo;
    use crate::cache::{CacheConfig, SessionCache};
    use crate::domain::types::Collection;
    use crate::infra::atproto::records::BrewRefs;
    use crate::infra::atproto::store::AtprotoStore;
    use crate::testing::{
        MemoryRepo, OWNER, bean_record, brew_record, created, roaster_record, session,
    };

    fn manage(repo: &Arc<MemoryRepo>) -> ManageService {
        let repo_dyn: Arc<dyn RecordRepo> = repo.clone();
        let cache = Arc::new(SessionCache::new(CacheConfig::default()));
        ManageService::new(AtprotoStore::new(repo_dyn, cache, session()))
    }

    #[tokio::test]
    async fn export_writes_each_collection_once() {
        let repo = Arc::new(MemoryRepo::new());
        let roaster = repo.insert(OWNER, Collection::Roasters, "r1", roaster_record("Onyx"));
        let bean = repo.insert(OWNER, Collection::Beans, "b1", bean_record("Guji", Some(&roaster)));
        repo.insert(
            OWNER,
            Collection::Brews,
            "w1",
            brew_record(&BrewRefs {
                bean,
                ..Default::default()
            }),
        );

        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("journal.toml");
        let count = export_journal(&manage(&repo), OWNER, &path)
            .await
            .expect("export");
        assert_eq!(count, 3);

        let written = std::fs::read_to_string(&path).expect("read archive");
        let parsed: toml::Table = toml::from_str(&written).expect("valid toml");

        assert_eq!(parsed["owner"].as_str(), Some(OWNER));
        let beans = parsed["beans"].as_array().expect("beans");
        assert_eq!(beans.len(), 1);
        assert_eq!(beans[0]["roaster_rkey"].as_str(), Some("r1"));
        assert!(beans[0].get("roaster").is_none());

        let brews = parsed["brews"].as_array().expect("brews");
        assert_eq!(brews[0]["bean_rkey"].as_str(), Some("b1"));
        assert_eq!(brews[0]["temperature"].as_float(), Some(94.0));
        assert!(brews[0].get("bean").is_none());
        assert_eq!(parsed["roasters"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn empty_journal_encodes() {
        let encoded = encode_journal(OWNER, Journal::default(), created()).expect("encode");
        let parsed: toml::Table = toml::from_str(&encoded).expect("valid toml");
        assert_eq!(parsed["exported_at"].as_str(), Some("2024-03-01T08:30:00Z"));
    }
}
