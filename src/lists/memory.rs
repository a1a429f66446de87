use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::advisor::Advisor;
use crate::error::ListError;
use crate::lists::{ListCollection, NamedListStore};

type Lists = BTreeMap<String, Vec<Advisor>>;

/// Process-local list store for tests and dry runs.
#[derive(Default)]
pub struct MemoryListStore {
    lists: RwLock<HashMap<(String, ListCollection), Lists>>,
}

impl MemoryListStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn key(owner: &str, collection: ListCollection) -> (String, ListCollection) {
    (owner.to_string(), collection)
}

#[async_trait]
impl NamedListStore for MemoryListStore {
    async fn list_names(
        &self,
        owner: &str,
        collection: ListCollection,
    ) -> Result<Vec<String>, ListError> {
        Ok(self
            .lists
            .read()
            .await
            .get(&key(owner, collection))
            .map(|lists| lists.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<Option<Vec<Advisor>>, ListError> {
        Ok(self
            .lists
            .read()
            .await
            .get(&key(owner, collection))
            .and_then(|lists| lists.get(name).cloned()))
    }

    async fn save_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        rows: &[Advisor],
    ) -> Result<(), ListError> {
        self.lists
            .write()
            .await
            .entry(key(owner, collection))
            .or_default()
            .insert(name.to_string(), rows.to_vec());
        Ok(())
    }

    async fn delete_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<bool, ListError> {
        Ok(self
            .lists
            .write()
            .await
            .get_mut(&key(owner, collection))
            .is_some_and(|lists| lists.remove(name).is_some()))
    }
}
