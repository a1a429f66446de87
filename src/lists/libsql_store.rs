//! Embedded libSQL list store: one row per named list.

use std::path::Path;

use async_trait::async_trait;
use libsql::params;

use crate::advisor::{Advisor, AdvisorSnapshot};
use crate::error::ListError;
use crate::lists::{ListCollection, NamedListStore};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS named_lists (
    owner TEXT NOT NULL,
    collection TEXT NOT NULL,
    name TEXT NOT NULL,
    rows_json TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (owner, collection, name)
);
";

pub struct LibSqlListStore {
    db: libsql::Database,
}

fn decode_rows(raw: &str, name: &str) -> Vec<Advisor> {
    match serde_json::from_str::<Vec<AdvisorSnapshot>>(raw) {
        Ok(rows) => rows.into_iter().map(Advisor::from).collect(),
        Err(e) => {
            tracing::warn!(list = name, "Ignoring unreadable list rows: {}", e);
            Vec::new()
        }
    }
}

impl LibSqlListStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, ListError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = libsql::Builder::new_local(path).build().await?;
        let store = Self { db };
        store.connect()?.execute_batch(SCHEMA).await?;
        Ok(store)
    }

    fn connect(&self) -> Result<libsql::Connection, ListError> {
        Ok(self.db.connect()?)
    }
}

#[async_trait]
impl NamedListStore for LibSqlListStore {
    async fn list_names(
        &self,
        owner: &str,
        collection: ListCollection,
    ) -> Result<Vec<String>, ListError> {
        let conn = self.connect()?;
        let mut rows = conn
            .query(
                "SELECT name FROM named_lists WHERE owner = ?1 AND collection = ?2 ORDER BY name",
                params![owner, collection.storage_key()],
            )
            .await?;
        let mut names = Vec::new();
        while let Some(row) = rows.next().await? {
            names.push(row.get::<String>(0)?);
        }
        Ok(names)
    }

    async fn get_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<Option<Vec<Advisor>>, ListError> {
        let conn = self.connect()?;
        let row = conn
            .query(
                "SELECT rows_json FROM named_lists \
                 WHERE owner = ?1 AND collection = ?2 AND name = ?3 LIMIT 1",
                params![owner, collection.storage_key(), name],
            )
            .await?
            .next()
            .await?;
        match row {
            Some(row) => Ok(Some(decode_rows(&row.get::<String>(0)?, name))),
            None => Ok(None),
        }
    }

    async fn save_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
        rows: &[Advisor],
    ) -> Result<(), ListError> {
        let snapshots: Vec<AdvisorSnapshot> = rows.iter().map(AdvisorSnapshot::from).collect();
        let json = serde_json::to_string(&snapshots)?;
        self.connect()?
            .execute(
                "INSERT INTO named_lists (owner, collection, name, rows_json, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, datetime('now')) \
                 ON CONFLICT (owner, collection, name) DO UPDATE SET \
                   rows_json = excluded.rows_json, \
                   updated_at = excluded.updated_at",
                params![owner, collection.storage_key(), name, json],
            )
            .await?;
        Ok(())
    }

    async fn delete_list(
        &self,
        owner: &str,
        collection: ListCollection,
        name: &str,
    ) -> Result<bool, ListError> {
        let affected = self
            .connect()?
            .execute(
                "DELETE FROM named_lists WHERE owner = ?1 AND collection = ?2 AND name = ?3",
                params![owner, collection.storage_key(), name],
            )
            .await?;
        Ok(affected > 0)
    }
}
