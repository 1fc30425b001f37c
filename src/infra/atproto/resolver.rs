//! Reference resolution: turn stored locators back into populated entities.
//!
//! The repository enforces no referential integrity, so dangling references
//! are routine. Each call site picks a [`RefPolicy`]: required references
//! fail the read, optional ones are logged and left unset.

use thiserror::Error;
use tracing::warn;

use crate::application::repos::{RecordRepo, RepoError, Session};
use crate::domain::entities::{Bean, Brew, Brewer, Grinder, Roaster};
use crate::domain::types::Collection;
use crate::infra::atproto::records::{self, BrewRefs, CodecError, FromRecord, Record};
use crate::infra::atproto::uri::{self, LocatorError};

const SOURCE: &str = "infra::atproto::resolver";

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error(transparent)]
    Locator(#[from] LocatorError),
    #[error("reference `{locator}` names collection `{found}`, expected `{expected}`")]
    CollectionMismatch {
        locator: String,
        expected: Collection,
        found: String,
    },
    #[error("failed to fetch reference `{locator}`")]
    Fetch {
        locator: String,
        #[source]
        source: RepoError,
    },
    #[error("failed to decode reference `{locator}`")]
    Decode {
        locator: String,
        #[source]
        source: CodecError,
    },
}

impl ResolveError {
    /// True when the referenced record no longer exists.
    pub fn is_dangling(&self) -> bool {
        matches!(self, Self::Fetch { source, .. } if source.is_not_found())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefPolicy {
    Required,
    Optional,
}

impl RefPolicy {
    pub fn apply<T>(
        self,
        field: &'static str,
        locator: &str,
        result: Result<Option<T>, ResolveError>,
    ) -> Result<Option<T>, ResolveError> {
        match (result, self) {
            (Ok(value), _) => Ok(value),
            (Err(err), RefPolicy::Required) => Err(err),
            (Err(err), RefPolicy::Optional) => {
                warn!(
                    target = SOURCE,
                    field,
                    locator,
                    dangling = err.is_dangling(),
                    error = %err,
                    "optional reference could not be resolved"
                );
                Ok(None)
            }
        }
    }
}

async fn fetch<T: FromRecord>(
    repo: &dyn RecordRepo,
    session: &Session,
    locator: &str,
) -> Result<Option<(T, Record)>, ResolveError> {
    if locator.is_empty() {
        return Ok(None);
    }

    let parsed = uri::resolve(locator)?;
    if parsed.collection != T::COLLECTION.nsid() {
        return Err(ResolveError::CollectionMismatch {
            locator: locator.to_string(),
            expected: T::COLLECTION,
            found: parsed.collection,
        });
    }

    let entry = repo
        .get_record(session, &parsed.owner, T::COLLECTION, &parsed.rkey)
        .await
        .map_err(|source| ResolveError::Fetch {
            locator: locator.to_string(),
            source,
        })?;

    let value = T::from_record(&entry.value, locator).map_err(|source| ResolveError::Decode {
        locator: locator.to_string(),
        source,
    })?;
    Ok(Some((value, entry.value)))
}

/// Fetch and decode the record `locator` points at. An empty locator is `None`.
pub async fn resolve_ref<T: FromRecord>(
    repo: &dyn RecordRepo,
    session: &Session,
    locator: &str,
) -> Result<Option<T>, ResolveError> {
    Ok(fetch::<T>(repo, session, locator)
        .await?
        .map(|(value, _)| value))
}

/// Resolve a bean and, if it names one, its roaster.
///
/// Roaster failures never fail the bean.
pub async fn resolve_bean_with_roaster(
    repo: &dyn RecordRepo,
    session: &Session,
    locator: &str,
) -> Result<Option<Bean>, ResolveError> {
    let Some((mut bean, raw)) = fetch::<Bean>(repo, session, locator).await? else {
        return Ok(None);
    };
    attach_roaster(repo, session, &mut bean, &raw).await;
    Ok(Some(bean))
}

/// Populate `bean.roaster` from the roaster reference in its raw record.
pub async fn attach_roaster(repo: &dyn RecordRepo, session: &Session, bean: &mut Bean, raw: &Record) {
    let Some(roaster_ref) = records::bean_refs(raw).roaster else {
        return;
    };
    let roaster = resolve_ref::<Roaster>(repo, session, &roaster_ref).await;
    bean.roaster = RefPolicy::Optional
        .apply("roasterRef", &roaster_ref, roaster)
        .unwrap_or_default();
}

/// Populate a brew's bean, grinder, and brewer in one call.
///
/// The bean is required; grinder and brewer are optional.
pub async fn resolve_brew_refs(
    repo: &dyn RecordRepo,
    session: &Session,
    brew: &mut Brew,
    refs: &BrewRefs,
) -> Result<(), ResolveError> {
    let grinder_ref = refs.grinder.as_deref().unwrap_or_default();
    let brewer_ref = refs.brewer.as_deref().unwrap_or_default();

    let (bean, grinder, brewer) = tokio::join!(
        resolve_bean_with_roaster(repo, session, &refs.bean),
        resolve_ref::<Grinder>(repo, session, grinder_ref),
        resolve_ref::<Brewer>(repo, session, brewer_ref),
    );

    brew.bean = RefPolicy::Required
        .apply("beanRef", &refs.bean, bean)?
        .map(Box::new);
    brew.grinder = RefPolicy::Optional.apply("grinderRef", grinder_ref, grinder)?;
    brew.brewer = RefPolicy::Optional.apply("brewerRef", brewer_ref, brewer)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::atproto::records::ToRecord;
    use crate::testing::{
        MemoryRepo, OWNER, bean_record, brew_record, grinder_record, roaster_record, session,
    };

    fn brew_from(repo: &MemoryRepo, refs: &BrewRefs) -> Brew {
        let record = brew_record(refs);
        let locator = repo.insert(OWNER, Collection::Brews, "brew1", record.clone());
        Brew::from_record(&record, &locator).expect("brew")
    }

    #[tokio::test]
    async fn empty_locator_resolves_to_none() {
        let repo = MemoryRepo::new();
        let resolved = resolve_ref::<Grinder>(&repo, &session(), "")
            .await
            .expect("empty ref");
        assert!(resolved.is_none());
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn collection_mismatch_is_reported_before_fetching() {
        let repo = MemoryRepo::new();
        let locator = repo.insert(OWNER, Collection::Grinders, "g1", grinder_record("C40"));

        let err = resolve_ref::<Brewer>(&repo, &session(), &locator)
            .await
            .expect_err("mismatch");
        assert!(matches!(
            err,
            ResolveError::CollectionMismatch {
                expected: Collection::Brewers,
                ..
            }
        ));
        assert_eq!(repo.calls(), 0);
    }

    #[tokio::test]
    async fn malformed_locator_is_propagated() {
        let repo = MemoryRepo::new();
        let err = resolve_ref::<Roaster>(&repo, &session(), "roaster1")
            .await
            .expect_err("malformed");
        assert!(matches!(err, ResolveError::Locator(_)));
    }

    #[tokio::test]
    async fn bean_carries_its_roaster() {
        let repo = MemoryRepo::new();
        let roaster = repo.insert(OWNER, Collection::Roasters, "r1", roaster_record("Onyx"));
        let bean = repo.insert(
            OWNER,
            Collection::Beans,
            "b1",
            bean_record("Guji", Some(roaster.as_str())),
        );

        let bean = resolve_bean_with_roaster(&repo, &session(), &bean)
            .await
            .expect("resolve")
            .expect("bean");
        assert_eq!(bean.rkey, "b1");
        assert_eq!(bean.roaster_rkey.as_deref(), Some("r1"));
        assert_eq!(bean.roaster.expect("roaster").name, "Onyx");
    }

    #[tokio::test]
    async fn dangling_roaster_does_not_fail_the_bean() {
        let repo = MemoryRepo::new();
        let missing = uri::build_for(OWNER, Collection::Roasters, "gone");
        let bean = repo.insert(
            OWNER,
            Collection::Beans,
            "b1",
            bean_record("Guji", Some(missing.as_str())),
        );

        let bean = resolve_bean_with_roaster(&repo, &session(), &bean)
            .await
            .expect("resolve")
            .expect("bean");
        assert_eq!(bean.name, "Guji");
        assert!(bean.roaster.is_none());
    }

    #[tokio::test]
    async fn deleted_grinder_leaves_brew_readable() {
        let repo = MemoryRepo::new();
        let bean = repo.insert(OWNER, Collection::Beans, "b1", bean_record("Guji", None));
        let grinder = repo.insert(OWNER, Collection::Grinders, "g1", grinder_record("C40"));
        repo.remove(OWNER, Collection::Grinders, "g1");

        let refs = BrewRefs {
            bean,
            grinder: Some(grinder),
            brewer: None,
        };
        let mut brew = brew_from(&repo, &refs);

        resolve_brew_refs(&repo, &session(), &mut brew, &refs)
            .await
            .expect("non-fatal grinder");
        assert_eq!(brew.bean.as_ref().expect("bean").name, "Guji");
        assert!(brew.grinder.is_none());
        assert!(brew.brewer.is_none());
    }

    #[tokio::test]
    async fn missing_bean_fails_brew_resolution() {
        let repo = MemoryRepo::new();
        let refs = BrewRefs {
            bean: uri::build_for(OWNER, Collection::Beans, "gone"),
            ..Default::default()
        };
        let mut brew = brew_from(&repo, &refs);

        let err = resolve_brew_refs(&repo, &session(), &mut brew, &refs)
            .await
            .expect_err("bean is required");
        assert!(err.is_dangling());
    }

    #[tokio::test]
    async fn references_into_other_repositories_use_their_owner() {
        let repo = MemoryRepo::new();
        let other = "did:plc:friend";
        let grinder = Grinder {
            rkey: String::new(),
            name: "Niche".into(),
            grinder_type: None,
            burr_type: None,
            notes: None,
            created_at: crate::testing::created(),
        };
        let locator = repo.insert(
            other,
            Collection::Grinders,
            "g9",
            grinder.to_record(&()).expect("record"),
        );

        let resolved = resolve_ref::<Grinder>(&repo, &session(), &locator)
            .await
            .expect("resolve")
            .expect("grinder");
        assert_eq!(resolved.rkey, "g9");
        assert_eq!(resolved.name, "Niche");
    }
}
