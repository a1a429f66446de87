//! Named favorites and report lists.
//!
//! Storage sits behind [`NamedListStore`] so the medium can change without
//! touching list policy. Policy (name validation, duplicate detection,
//! write serialization) lives in [`ListService`].

mod json_file;
#[cfg(feature = "libsql")]
mod libsql_store;
mod memory;

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::advisor::filter::{FilterState, PageSlice, paginate};
use crate::advisor::{Advisor, DedupKey};
use crate::config::{ListStoreConfig, ListStoreKind};
use crate::error::ListError;

pub use json_file::JsonFileListStore;
#[cfg(feature = "libsql")]
pub use libsql_store::LibSqlListStore;
pub use memory::MemoryListStore;

/// Owner used by the CLI when no user is signed in.
pub const LOCAL_OWNER: &str = "local";

/// Which named-list collection an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ListCollection {
    Favorites,
    Reports,
}

impl ListCollection {
    /// Key of the persisted blob for this collection.
    pub fn storage_key(self) -> &'static str {
        match self {
            Self::Favorites => "favoriteLists",
            Self::Reports => "reportLists",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Favorites => "favorites",
            Self::Reports => "reports",
        }
    }
}

impl FromStr for ListCollection {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "favorites" | "favourites" | "favoritelists" => Ok(Self::Favorites),
            "reports" | "reportlists" => Ok(Self::Reports),
            other => Err(format!("expected 'favorites' or 'reports', got '{other}'")),
        }
    }
}

/// Repository for named lists of advisors, scoped by owner and collection.
#[async_trait]
pub trait NamedListStore: Send + Sync {
    /// Names in ascending order.
    async fn list_names(
        &self,
        owner: &str,
        collection: ListCollection,
    ) -> Result<Vec<String>, ListError>;

    async fn get_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<Option<Vec<Advisor>>, ListError>;

    /// Create or replace `name`.
    async fn save_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        rows: &[Advisor],
    ) -> Result<(), ListError>;

    /// Returns whether a list was removed.
    async fn delete_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<bool, ListError>;

    /// Remove one row by position and return it.
    async fn remove_row(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        index: usize,
    ) -> Result<Advisor, ListError> {
        let mut rows = self
            .get_list(owner, collection, name)
            .await?
            .ok_or_else(|| ListError::NotFound(name.to_string()))?;
        if index >= rows.len() {
            return Err(ListError::RowOutOfRange {
                name: name.to_string(),
                index,
                len: rows.len(),
            });
        }
        let removed = rows.remove(index);
        self.save_list(owner, collection, name, &rows).await?;
        Ok(removed)
    }
}

/// Open the store described by `config`.
pub async fn open_store(config: &ListStoreConfig) -> Result<Arc<dyn NamedListStore>, ListError> {
    match config.kind {
        ListStoreKind::Json => Ok(Arc::new(JsonFileListStore::new(&config.path))),
        ListStoreKind::Memory => Ok(Arc::new(MemoryListStore::new())),
        #[cfg(feature = "libsql")]
        ListStoreKind::LibSql => Ok(Arc::new(LibSqlListStore::open(&config.path).await?)),
        #[cfg(not(feature = "libsql"))]
        ListStoreKind::LibSql => Err(ListError::Storage(
            "the libsql list store requires building with the 'libsql' feature".to_string(),
        )),
    }
}

/// Result of adding an advisor to a favorites list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AddOutcome {
    Added { len: usize },
    /// Already present; the list is unchanged.
    Duplicate { len: usize },
}

impl AddOutcome {
    pub fn len(self) -> usize {
        match self {
            Self::Added { len } | Self::Duplicate { len } => len,
        }
    }

    pub fn is_duplicate(self) -> bool {
        matches!(self, Self::Duplicate { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListSummary {
    pub name: String,
    pub count: usize,
}

/// Trim a list name; blank names are rejected.
pub fn validate_name(name: &str) -> Result<String, ListError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(ListError::NameRequired);
    }
    Ok(trimmed.to_string())
}

/// List policy over a [`NamedListStore`].
///
/// Mutations are serialized within the process so read-modify-write cycles
/// do not interleave. Separate processes sharing a store are last writer
/// wins.
pub struct ListService {
    store: Arc<dyn NamedListStore>,
    write_lock: tokio::sync::Mutex<()>,
}

impl ListService {
    pub fn new(store: Arc<dyn NamedListStore>) -> Self {
        Self {
            store,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub async fn summaries(
        &self,
        owner: &str,
        collection: ListCollection,
    ) -> Result<Vec<ListSummary>, ListError> {
        let names = self.store.list_names(owner, collection).await?;
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            let count = self
                .store
                .get_list(owner, collection, &name)
                .await?
                .map(|rows| rows.len())
                .unwrap_or(0);
            out.push(ListSummary { name, count });
        }
        Ok(out)
    }

    pub async fn exists(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<bool, ListError> {
        Ok(self
            .store
            .get_list(owner, collection, name.trim())
            .await?
            .is_some())
    }

    pub async fn get_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<Vec<Advisor>, ListError> {
        let name = validate_name(name)?;
        self.store
            .get_list(owner, collection, &name)
            .await?
            .ok_or(ListError::NotFound(name))
    }

    /// Filter and page a stored list in memory.
    pub async fn view(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        filter: &FilterState,
        page: usize,
        per_page: usize,
    ) -> Result<PageSlice<Advisor>, ListError> {
        let rows = self.get_list(owner, collection, name).await?;
        Ok(paginate(&filter.apply(&rows), page, per_page))
    }

    /// Create a new list. Fails if the name is blank or already used.
    pub async fn create_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        rows: Vec<Advisor>,
    ) -> Result<ListSummary, ListError> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        if self.store.get_list(owner, collection, &name).await?.is_some() {
            return Err(ListError::NameTaken(name));
        }
        let rows = match collection {
            ListCollection::Favorites => dedup(rows),
            ListCollection::Reports => rows,
        };
        self.store.save_list(owner, collection, &name, &rows).await?;
        tracing::debug!(owner, list = %name, rows = rows.len(), "Created {} list", collection.as_str());
        Ok(ListSummary {
            name,
            count: rows.len(),
        })
    }

    /// Append to a favorites list, creating it on first add. An advisor
    /// already present (same dedup key) is reported, not added again.
    pub async fn add_to_favorites(
        &self,
        owner: &str,
        name: &str,
        advisor: Advisor,
    ) -> Result<AddOutcome, ListError> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        let mut rows = self
            .store
            .get_list(owner, ListCollection::Favorites, &name)
            .await?
            .unwrap_or_default();
        let key = advisor.dedup_key();
        if rows.iter().any(|row| row.dedup_key() == key) {
            return Ok(AddOutcome::Duplicate { len: rows.len() });
        }
        rows.push(advisor);
        self.store
            .save_list(owner, ListCollection::Favorites, &name, &rows)
            .await?;
        Ok(AddOutcome::Added { len: rows.len() })
    }

    pub async fn remove_row(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        index: usize,
    ) -> Result<Advisor, ListError> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        self.store.remove_row(owner, collection, &name, index).await
    }

    pub async fn delete_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<(), ListError> {
        let name = validate_name(name)?;
        let _guard = self.write_lock.lock().await;
        if self.store.delete_list(owner, collection, &name).await? {
            Ok(())
        } else {
            Err(ListError::NotFound(name))
        }
    }
}

fn dedup(rows: Vec<Advisor>) -> Vec<Advisor> {
    let mut seen: HashSet<DedupKey> = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row.dedup_key()))
        .collect()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::advisor::filter::{SortColumn, SortDirection};
    use crate::advisor::sample_advisor;

    fn service() -> ListService {
        ListService::new(Arc::new(MemoryListStore::new()))
    }

    #[tokio::test]
    async fn adding_same_email_twice_reports_duplicate() {
        let lists = service();
        let jane = sample_advisor("Jane", "Smith", Some("jane@example.com"));
        let mut jane_again = jane.clone();
        jane_again.email = Some(" JANE@example.com".to_string());
        jane_again.city = "Ottawa".to_string();

        let first = lists
            .add_to_favorites("u1", "Shortlist", jane)
            .await
            .expect("add");
        let second = lists
            .add_to_favorites("u1", " Shortlist ", jane_again)
            .await
            .expect("add again");
        assert_eq!(first, AddOutcome::Added { len: 1 });
        assert_eq!(second, AddOutcome::Duplicate { len: 1 });
        assert_eq!(
            lists
                .get_list("u1", ListCollection::Favorites, "Shortlist")
                .await
                .expect("list")
                .len(),
            1
        );
    }

    #[tokio::test]
    async fn delete_removes_exactly_one_list() {
        let lists = service();
        for name in ["A", "B", "C"] {
            lists
                .create_list("u1", ListCollection::Favorites, name, Vec::new())
                .await
                .expect("create");
        }
        lists
            .delete_list("u1", ListCollection::Favorites, "B")
            .await
            .expect("delete");
        let names: Vec<String> = lists
            .summaries("u1", ListCollection::Favorites)
            .await
            .expect("summaries")
            .into_iter()
            .map(|s| s.name)
            .collect();
        assert_eq!(names, vec!["A".to_string(), "C".to_string()]);
        assert!(matches!(
            lists.delete_list("u1", ListCollection::Favorites, "B").await,
            Err(ListError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn names_are_validated_and_unique_per_collection_and_owner() {
        let lists = service();
        assert!(matches!(
            lists
                .create_list("u1", ListCollection::Reports, "  ", Vec::new())
                .await,
            Err(ListError::NameRequired)
        ));
        lists
            .create_list("u1", ListCollection::Reports, "Q3", Vec::new())
            .await
            .expect("create");
        let err = lists
            .create_list("u1", ListCollection::Reports, "Q3 ", Vec::new())
            .await
            .expect_err("duplicate name");
        assert_eq!(err.to_string(), "A list named 'Q3' already exists");

        // Same name in another collection or for another owner is fine.
        lists
            .create_list("u1", ListCollection::Favorites, "Q3", Vec::new())
            .await
            .expect("other collection");
        lists
            .create_list("u2", ListCollection::Reports, "Q3", Vec::new())
            .await
            .expect("other owner");
    }

    #[tokio::test]
    async fn remove_row_checks_bounds() {
        let lists = service();
        lists
            .create_list(
                "u1",
                ListCollection::Favorites,
                "Mine",
                vec![
                    sample_advisor("A", "One", Some("a@x.ca")),
                    sample_advisor("B", "Two", Some("b@x.ca")),
                ],
            )
            .await
            .expect("create");
        let removed = lists
            .remove_row("u1", ListCollection::Favorites, "Mine", 0)
            .await
            .expect("remove");
        assert_eq!(removed.first_name, "A");
        let err = lists
            .remove_row("u1", ListCollection::Favorites, "Mine", 5)
            .await
            .expect_err("out of range");
        assert!(matches!(err, ListError::RowOutOfRange { len: 1, .. }));
    }

    #[tokio::test]
    async fn view_filters_and_pages_in_memory() {
        let lists = service();
        let mut rows: Vec<Advisor> = (0..5)
            .map(|i| sample_advisor("Pat", &format!("Lee{i}"), Some(&format!("p{i}@x.ca"))))
            .collect();
        rows[4].province = "Quebec".to_string();
        lists
            .create_list("u1", ListCollection::Reports, "All", rows)
            .await
            .expect("create");

        let filter = FilterState {
            provinces: ["Ontario".to_string()].into(),
            ..Default::default()
        };
        let page = lists
            .view("u1", ListCollection::Reports, "All", &filter, 2, 3)
            .await
            .expect("view");
        assert_eq!(page.total, 4);
        assert_eq!(page.rows.len(), 1);
        assert_eq!(page.total_pages, 2);
    }

    #[test]
    fn collection_keys_match_persisted_blob_names() {
        assert_eq!(ListCollection::Favorites.storage_key(), "favoriteLists");
        assert_eq!(ListCollection::Reports.storage_key(), "reportLists");
        assert_eq!("Reports".parse::<ListCollection>(), Ok(ListCollection::Reports));
        assert_eq!(" favourites ".parse::<ListCollection>(), Ok(ListCollection::Favorites));
        assert!("archive".parse::<ListCollection>().is_err());
    }

    #[tokio::test]
    async fn unfiltered_view_still_applies_the_sort() {
        let lists = service();
        lists
            .create_list(
                "u1",
                ListCollection::Favorites,
                "Picks",
                vec![
                    sample_advisor("Zed", "Adams", Some("zed@x.ca")),
                    sample_advisor("Amy", "Brown", Some("amy@x.ca")),
                ],
            )
            .await
            .expect("create");

        let by_first_name = FilterState {
            sort: SortColumn::FirstName,
            ..Default::default()
        };
        let page = lists
            .view("u1", ListCollection::Favorites, "Picks", &by_first_name, 1, 10)
            .await
            .expect("view");
        let names: Vec<&str> = page.rows.iter().map(|a| a.first_name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Zed"]);

        let descending = FilterState {
            sort: SortColumn::FirstName,
            direction: SortDirection::Desc,
            ..Default::default()
        };
        let page = lists
            .view("u1", ListCollection::Favorites, "Picks", &descending, 1, 10)
            .await
            .expect("view");
        let names: Vec<&str> = page.rows.iter().map(|a| a.first_name.as_str()).collect();
        assert_eq!(names, vec!["Zed", "Amy"]);
    }
}
