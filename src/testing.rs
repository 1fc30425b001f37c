//! In-memory repository used by unit tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::application::repos::{
    Profile, PublicRepo, RecordEntry, RecordPage, RecordRepo, RepoError, Session,
};
use crate::domain::types::Collection;
use crate::infra::atproto::records::Record;
use crate::infra::atproto::uri;

type Key = (String, Collection, String);

/// Holds the next list page of one collection after it has been read.
#[derive(Default)]
pub(crate) struct ListGate {
    reached: Notify,
    release: Notify,
}

impl ListGate {
    /// Wait until the held list has read its page.
    pub(crate) async fn reached(&self) {
        self.reached.notified().await;
    }

    pub(crate) fn release(&self) {
        self.release.notify_one();
    }
}

pub(crate) struct MemoryRepo {
    records: Mutex<BTreeMap<Key, Record>>,
    failing: Mutex<HashSet<Collection>>,
    gates: Mutex<HashMap<Collection, Arc<ListGate>>>,
    profiles: Mutex<HashMap<String, Profile>>,
    next_id: AtomicUsize,
    calls: AtomicUsize,
    page_size: usize,
}

impl MemoryRepo {
    pub(crate) fn new() -> Self {
        Self::with_page_size(100)
    }

    pub(crate) fn with_page_size(page_size: usize) -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
            gates: Mutex::new(HashMap::new()),
            profiles: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            calls: AtomicUsize::new(0),
            page_size,
        }
    }

    pub(crate) fn insert(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
        record: Record,
    ) -> String {
        self.records
            .lock()
            .expect("records lock")
            .insert((owner.to_string(), collection, rkey.to_string()), record);
        uri::build_for(owner, collection, rkey)
    }

    pub(crate) fn remove(&self, owner: &str, collection: Collection, rkey: &str) {
        self.records
            .lock()
            .expect("records lock")
            .remove(&(owner.to_string(), collection, rkey.to_string()));
    }

    pub(crate) fn record(&self, owner: &str, collection: Collection, rkey: &str) -> Option<Record> {
        self.records
            .lock()
            .expect("records lock")
            .get(&(owner.to_string(), collection, rkey.to_string()))
            .cloned()
    }

    pub(crate) fn fail_collection(&self, collection: Collection) {
        self.failing.lock().expect("failing lock").insert(collection);
    }

    /// Hold the next `list_records` call for `collection` until released.
    /// A gate that is never released leaves that call pending forever.
    pub(crate) fn gate_next_list(&self, collection: Collection) -> Arc<ListGate> {
        let gate = Arc::new(ListGate::default());
        self.gates
            .lock()
            .expect("gates lock")
            .insert(collection, Arc::clone(&gate));
        gate
    }

    pub(crate) fn add_profile(&self, did: &str, handle: &str) {
        self.profiles.lock().expect("profiles lock").insert(
            did.to_string(),
            Profile {
                did: did.to_string(),
                handle: handle.to_string(),
                display_name: None,
                avatar: None,
            },
        );
    }

    /// Number of repository calls issued so far.
    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, collection: Collection) -> Result<(), RepoError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().expect("failing lock").contains(&collection) {
            return Err(RepoError::Status {
                status: 500,
                message: format!("{collection} unavailable"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl RecordRepo for MemoryRepo {
    async fn create_record(
        &self,
        session: &Session,
        collection: Collection,
        record: Record,
    ) -> Result<String, RepoError> {
        self.enter(collection)?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let rkey = format!("3k{id:011}");
        Ok(self.insert(&session.owner, collection, &rkey, record))
    }

    async fn get_record(
        &self,
        _session: &Session,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError> {
        self.enter(collection)?;
        let value = self
            .record(owner, collection, rkey)
            .ok_or(RepoError::NotFound)?;
        Ok(RecordEntry {
            uri: uri::build_for(owner, collection, rkey),
            value,
        })
    }

    async fn put_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
        record: Record,
    ) -> Result<(), RepoError> {
        self.enter(collection)?;
        self.insert(&session.owner, collection, rkey, record);
        Ok(())
    }

    async fn delete_record(
        &self,
        session: &Session,
        collection: Collection,
        rkey: &str,
    ) -> Result<(), RepoError> {
        self.enter(collection)?;
        self.remove(&session.owner, collection, rkey);
        Ok(())
    }

    async fn list_records(
        &self,
        session: &Session,
        collection: Collection,
        cursor: Option<&str>,
    ) -> Result<RecordPage, RepoError> {
        self.enter(collection)?;
        let (page, cursor) = {
            let records = self.records.lock().expect("records lock");
            let matching: Vec<(&Key, &Record)> = records
                .iter()
                .filter(|((owner, c, rkey), _)| {
                    owner == &session.owner
                        && *c == collection
                        && cursor.is_none_or(|after| rkey.as_str() > after)
                })
                .collect();

            let more = matching.len() > self.page_size;
            let page: Vec<RecordEntry> = matching
                .into_iter()
                .take(self.page_size)
                .map(|((owner, c, rkey), value)| RecordEntry {
                    uri: uri::build_for(owner, *c, rkey),
                    value: value.clone(),
                })
                .collect();
            let cursor = if more {
                page.last().and_then(|entry| uri::resolve(&entry.uri).ok()).map(|l| l.rkey)
            } else {
                None
            };
            (page, cursor)
        };

        let gate = self.gates.lock().expect("gates lock").remove(&collection);
        if let Some(gate) = gate {
            gate.reached.notify_one();
            gate.release.notified().await;
        }

        Ok(RecordPage {
            records: page,
            cursor,
        })
    }
}

/// Public reads see every owner's records, newest rkey first.
#[async_trait]
impl PublicRepo for MemoryRepo {
    async fn get_profile(&self, actor: &str) -> Result<Profile, RepoError> {
        self.profiles
            .lock()
            .expect("profiles lock")
            .get(actor)
            .cloned()
            .ok_or(RepoError::NotFound)
    }

    async fn list_records(
        &self,
        owner: &str,
        collection: Collection,
        limit: usize,
    ) -> Result<Vec<RecordEntry>, RepoError> {
        self.enter(collection)?;
        let records = self.records.lock().expect("records lock");
        Ok(records
            .iter()
            .rev()
            .filter(|((o, c, _), _)| o == owner && *c == collection)
            .take(limit)
            .map(|((o, c, rkey), value)| RecordEntry {
                uri: uri::build_for(o, *c, rkey),
                value: value.clone(),
            })
            .collect())
    }

    async fn get_record(
        &self,
        owner: &str,
        collection: Collection,
        rkey: &str,
    ) -> Result<RecordEntry, RepoError> {
        self.enter(collection)?;
        let value = self
            .record(owner, collection, rkey)
            .ok_or(RepoError::NotFound)?;
        Ok(RecordEntry {
            uri: uri::build_for(owner, collection, rkey),
            value,
        })
    }
}

pub(crate) const OWNER: &str = "did:plc:owner";

pub(crate) fn session() -> Session {
    Session::new(OWNER, "session-1")
}

pub(crate) fn created() -> time::OffsetDateTime {
    time::macros::datetime!(2024-03-01 08:30:00 UTC)
}

pub(crate) fn roaster_record(name: &str) -> Record {
    use crate::domain::entities::Roaster;
    use crate::infra::atproto::records::ToRecord;

    Roaster {
        rkey: String::new(),
        name: name.to_string(),
        location: Some("Portland".into()),
        website: None,
        created_at: created(),
    }
    .to_record(&())
    .expect("roaster record")
}

pub(crate) fn bean_record(name: &str, roaster: Option<&str>) -> Record {
    use crate::domain::entities::Bean;
    use crate::infra::atproto::records::{BeanRefs, ToRecord};

    Bean {
        rkey: String::new(),
        name: name.to_string(),
        origin: Some("Ethiopia".into()),
        roast_level: None,
        process: None,
        description: None,
        roaster_rkey: None,
        created_at: created(),
        roaster: None,
    }
    .to_record(&BeanRefs {
        roaster: roaster.map(str::to_string),
    })
    .expect("bean record")
}

pub(crate) fn grinder_record(name: &str) -> Record {
    use crate::domain::entities::Grinder;
    use crate::infra::atproto::records::ToRecord;

    Grinder {
        rkey: String::new(),
        name: name.to_string(),
        grinder_type: Some("Hand".into()),
        burr_type: None,
        notes: None,
        created_at: created(),
    }
    .to_record(&())
    .expect("grinder record")
}

pub(crate) fn brewer_record(name: &str) -> Record {
    use crate::domain::entities::Brewer;
    use crate::infra::atproto::records::ToRecord;

    Brewer {
        rkey: String::new(),
        name: name.to_string(),
        description: None,
        created_at: created(),
    }
    .to_record(&())
    .expect("brewer record")
}

pub(crate) fn brew_record(refs: &crate::infra::atproto::records::BrewRefs) -> Record {
    use crate::domain::entities::Brew;
    use crate::infra::atproto::records::ToRecord;

    Brew {
        rkey: String::new(),
        bean_rkey: String::new(),
        method: Some("V60".into()),
        temperature: Some(94.0),
        water_amount: Some(250),
        coffee_amount: Some(15),
        time_seconds: None,
        grind_size: None,
        grinder_rkey: None,
        brewer_rkey: None,
        tasting_notes: None,
        rating: Some(7),
        pours: Vec::new(),
        created_at: created(),
        bean: None,
        grinder: None,
        brewer: None,
    }
    .to_record(refs)
    .expect("brew record")
}
