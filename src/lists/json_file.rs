//! One JSON blob per (owner, collection).
//!
//! Layout: `<root>/<owner>/favoriteLists.json` and `.../reportLists.json`,
//! each an object mapping list name to an array of advisor snapshots with
//! display-capitalized keys.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::advisor::{Advisor, AdvisorSnapshot};
use crate::error::ListError;
use crate::lists::{ListCollection, NamedListStore};

type Blob = BTreeMap<String, Vec<AdvisorSnapshot>>;

pub struct JsonFileListStore {
    root: PathBuf,
}

/// Owner ids become directory names; anything outside `[A-Za-z0-9_-]` is
/// replaced so an owner cannot escape the root.
fn owner_dir_name(owner: &str) -> String {
    let cleaned: String = owner
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

impl JsonFileListStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn blob_path(&self, owner: &str, collection: ListCollection) -> PathBuf {
        self.root
            .join(owner_dir_name(owner))
            .join(format!("{}.json", collection.storage_key()))
    }

    /// Missing files are empty. Unparseable files are logged and treated as
    /// empty; the next save replaces them.
    async fn load(&self, owner: &str, collection: ListCollection) -> Result<Blob, ListError> {
        let path = self.blob_path(owner, collection);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Blob::new()),
            Err(e) => return Err(e.into()),
        };
        if raw.trim().is_empty() {
            return Ok(Blob::new());
        }
        match serde_json::from_str::<Blob>(&raw) {
            Ok(blob) => Ok(blob),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "Ignoring unreadable {} blob: {}",
                    collection.storage_key(),
                    e
                );
                Ok(Blob::new())
            }
        }
    }

    async fn store(
        &self,
        owner: &str,
        collection: ListCollection,
        blob: &Blob,
    ) -> Result<(), ListError> {
        let path = self.blob_path(owner, collection);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(blob)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl NamedListStore for JsonFileListStore {
    async fn list_names(
        &self,
        owner: &str,
        collection: ListCollection,
    ) -> Result<Vec<String>, ListError> {
        Ok(self.load(owner, collection).await?.into_keys().collect())
    }

    async fn get_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<Option<Vec<Advisor>>, ListError> {
        let mut blob = self.load(owner, collection).await?;
        Ok(blob
            .remove(name)
            .map(|rows| rows.into_iter().map(Advisor::from).collect()))
    }

    async fn save_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        rows: &[Advisor],
    ) -> Result<(), ListError> {
        let mut blob = self.load(owner, collection).await?;
        blob.insert(
            name.to_string(),
            rows.iter().map(AdvisorSnapshot::from).collect(),
        );
        self.store(owner, collection, &blob).await
    }

    async fn delete_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<bool, ListError> {
        let mut blob = self.load(owner, collection).await?;
        if blob.remove(name).is_none() {
            return Ok(false);
        }
        self.store(owner, collection, &blob).await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advisor::sample_advisor;

    #[tokio::test]
    async fn blob_uses_collection_key_and_display_fields() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileListStore::new(dir.path());
        store
            .save_list(
                "user-1",
                ListCollection::Favorites,
                "Shortlist",
                &[sample_advisor("Jane", "Smith", Some("jane@example.com"))],
            )
            .await
            .expect("save");

        let raw = std::fs::read_to_string(dir.path().join("user-1").join("favoriteLists.json"))
            .expect("blob written");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["Shortlist"][0]["First Name"], "Jane");
        assert_eq!(value["Shortlist"][0]["Email"], "jane@example.com");

        let rows = store
            .get_list("user-1", ListCollection::Favorites, "Shortlist")
            .await
            .expect("get")
            .expect("present");
        assert_eq!(rows[0].last_name, "Smith");
        assert!(
            store
                .get_list("user-1", ListCollection::Reports, "Shortlist")
                .await
                .expect("get")
                .is_none()
        );
    }

    #[tokio::test]
    async fn corrupt_blob_reads_as_empty_and_is_replaced_on_save() {
        let dir = tempfile::tempdir().expect("tempdir");
        let owner_dir = dir.path().join("local");
        std::fs::create_dir_all(&owner_dir).expect("mkdir");
        std::fs::write(owner_dir.join("reportLists.json"), "{not json").expect("write");

        let store = JsonFileListStore::new(dir.path());
        assert!(
            store
                .list_names("local", ListCollection::Reports)
                .await
                .expect("names")
                .is_empty()
        );
        store
            .save_list("local", ListCollection::Reports, "Q1", &[])
            .await
            .expect("save");
        assert_eq!(
            store
                .list_names("local", ListCollection::Reports)
                .await
                .expect("names"),
            vec!["Q1".to_string()]
        );
    }

    #[tokio::test]
    async fn delete_leaves_other_lists_untouched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = JsonFileListStore::new(dir.path());
        for name in ["A", "B"] {
            store
                .save_list("local", ListCollection::Favorites, name, &[])
                .await
                .expect("save");
        }
        assert!(
            store
                .delete_list("local", ListCollection::Favorites, "A")
                .await
                .expect("delete")
        );
        assert!(
            !store
                .delete_list("local", ListCollection::Favorites, "A")
                .await
                .expect("delete again")
        );
        assert_eq!(
            store
                .list_names("local", ListCollection::Favorites)
                .await
                .expect("names"),
            vec!["B".to_string()]
        );
    }

    #[test]
    fn owner_names_cannot_traverse() {
        assert_eq!(owner_dir_name("../etc"), "___etc");
        assert_eq!(owner_dir_name("  "), "_");
        assert_eq!(
            owner_dir_name("6f1c6f0e-2f5f-4a63-9d1c-0d4f7d2b8e11"),
            "6f1c6f0e-2f5f-4a63-9d1c-0d4f7d2b8e11"
        );
    }
}
