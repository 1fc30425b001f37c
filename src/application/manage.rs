//! Bulk reads that assemble several collections at once.

use std::collections::HashMap;

use serde::Serialize;
use tokio::try_join;

use crate::domain::entities::{Bean, Brew, Brewer, Grinder, Roaster};
use crate::infra::atproto::store::{AtprotoStore, StoreError};

const SOURCE: &str = "application::manage";

/// Everything the equipment and beans management view shows.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ManageData {
    pub beans: Vec<Bean>,
    pub roasters: Vec<Roaster>,
    pub grinders: Vec<Grinder>,
    pub brewers: Vec<Brewer>,
}

/// Every collection of one repository.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Journal {
    pub beans: Vec<Bean>,
    pub roasters: Vec<Roaster>,
    pub grinders: Vec<Grinder>,
    pub brewers: Vec<Brewer>,
    pub brews: Vec<Brew>,
}

#[derive(Clone)]
pub struct ManageService {
    store: AtprotoStore,
}

impl ManageService {
    pub fn new(store: AtprotoStore) -> Self {
        Self { store }
    }

    /// Fetch the four reference collections concurrently; the first failure aborts the rest.
    pub async fn load_manage(&self) -> Result<ManageData, StoreError> {
        let (mut beans, roasters, grinders, brewers) = try_join!(
            self.store.list::<Bean>(),
            self.store.list::<Roaster>(),
            self.store.list::<Grinder>(),
            self.store.list::<Brewer>(),
        )?;
        link_beans_to_roasters(&mut beans, &roasters);

        tracing::debug!(
            target = SOURCE,
            beans = beans.len(),
            roasters = roasters.len(),
            grinders = grinders.len(),
            brewers = brewers.len(),
            "loaded manage data"
        );

        Ok(ManageData {
            beans,
            roasters,
            grinders,
            brewers,
        })
    }

    pub async fn load_all(&self) -> Result<Journal, StoreError> {
        let (manage, brews) = try_join!(self.load_manage(), self.store.list::<Brew>())?;

        Ok(Journal {
            beans: manage.beans,
            roasters: manage.roasters,
            grinders: manage.grinders,
            brewers: manage.brewers,
            brews,
        })
    }
}

/// Attach each bean's roaster from `roasters` by record key.
///
/// Beans without a roaster key, or whose roaster is absent, are left unlinked.
pub fn link_beans_to_roasters(beans: &mut [Bean], roasters: &[Roaster]) {
    let by_rkey: HashMap<&str, &Roaster> = roasters
        .iter()
        .map(|roaster| (roaster.rkey.as_str(), roaster))
        .collect();

    for bean in beans {
        bean.roaster = bean
            .roaster_rkey
            .as_deref()
            .and_then(|rkey| by_rkey.get(rkey))
            .map(|roaster| (*roaster).clone());
    }
}
