//! Fixture reset and seeding.

use std::path::Path;

use futures::future::join_all;

use crate::error::{Error, Result};
use crate::files;
use crate::storage::{Row, Storage, Table};

use super::case::StagedUpload;
use super::normalize::NormalizedTable;

/// Brings tables and the upload directory to a known state before a case.
pub struct FixtureController<'a> {
    storage: &'a dyn Storage,
    upload_dir: Option<&'a Path>,
}

impl<'a> FixtureController<'a> {
    pub fn new(storage: &'a dyn Storage, upload_dir: Option<&'a Path>) -> Self {
        Self { storage, upload_dir }
    }

    /// Empties the upload directory, then deletes every row of each table
    /// and resets its identity counter. Stops at the first failure.
    pub async fn reset(&self, tables: &[&str]) -> Result<()> {
        if let Some(dir) = self.upload_dir {
            tracing::debug!(dir = %dir.display(), "recreating upload directory");
            files::recreate_empty(dir).await?;
        }
        for name in tables {
            tracing::debug!(table = name, "resetting table");
            Table::bind(self.storage, name)
                .reset()
                .await
                .map_err(|source| Error::Storage {
                    table: name.to_string(),
                    source,
                })?;
        }
        Ok(())
    }

    /// Inserts mock rows and stages mock uploads. Tables and uploads are
    /// seeded concurrently; rows within one table keep their order.
    pub async fn seed(&self, tables: &[NormalizedTable<'_>]) -> Result<()> {
        let row_tasks = tables
            .iter()
            .filter(|table| !table.mock_rows.is_empty())
            .map(|table| self.insert_rows(table.name, &table.mock_rows));
        let upload_tasks = tables
            .iter()
            .flat_map(|table| table.staged_uploads.iter())
            .map(|upload| self.stage(upload));

        let (rows, uploads) = futures::join!(join_all(row_tasks), join_all(upload_tasks));
        match Error::collect(rows.into_iter().chain(uploads).filter_map(Result::err)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn insert_rows(&self, name: &str, rows: &[Row]) -> Result<()> {
        let table = Table::bind(self.storage, name);
        for row in rows {
            table
                .insert(row.clone())
                .await
                .map_err(|source| Error::Storage {
                    table: name.to_string(),
                    source,
                })?;
        }
        tracing::debug!(table = name, rows = rows.len(), "seeded table");
        Ok(())
    }

    async fn stage(&self, upload: &StagedUpload) -> Result<()> {
        let dir = self
            .upload_dir
            .ok_or_else(|| Error::configuration("staging uploads requires an upload directory"))?;
        let dest = dir.join(&upload.dest);
        tracing::debug!(src = %upload.src.display(), dest = %dest.display(), "staging upload");
        files::copy(&upload.src, &dest).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;
    use crate::testing::case::{TableSpec, TestCase};
    use crate::testing::normalize::normalize;
    use crate::config::HarnessConfig;
    use serde_json::json;

    fn storage() -> SqliteStorage {
        let storage = SqliteStorage::open_in_memory().unwrap();
        storage
            .execute_batch(
                "CREATE TABLE items (id INTEGER PRIMARY KEY AUTOINCREMENT, name TEXT);
                 CREATE TABLE tags (id INTEGER PRIMARY KEY AUTOINCREMENT, label TEXT);",
            )
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn reset_then_seed_assigns_ids_in_insertion_order() {
        let storage = storage();
        storage
            .execute_batch("INSERT INTO items (name) VALUES ('stale'), ('stale');")
            .unwrap();

        let case = TestCase::get("/items")
            .table(TableSpec::new("items").mock_rows([json!({ "name": "a" }), json!({ "name": "b" })]))
            .table(TableSpec::new("tags").mock_row(json!({ "label": "x" })));
        let config = HarnessConfig::new("http://localhost");
        let normalized = normalize(&case, &config, true).unwrap();

        let fixtures = FixtureController::new(&storage, None);
        fixtures.reset(&normalized.table_names()).await.unwrap();
        fixtures.seed(&normalized.tables).await.unwrap();

        let mut rows = storage.fetch_all("items").await.unwrap();
        crate::storage::sort_by_id(&mut rows);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["id"], json!(1));
        assert_eq!(rows[0]["name"], json!("a"));
        assert_eq!(rows[1]["id"], json!(2));
        assert_eq!(storage.fetch_all("tags").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn reset_recreates_upload_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let uploads = tmp.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        std::fs::write(uploads.join("old.png"), b"x").unwrap();

        let storage = storage();
        FixtureController::new(&storage, Some(&uploads))
            .reset(&["items"])
            .await
            .unwrap();
        assert_eq!(std::fs::read_dir(&uploads).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn seed_stages_uploads_under_upload_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("cat.png");
        std::fs::write(&src, b"meow").unwrap();
        let uploads = tmp.path().join("uploads");

        let case = TestCase::get("/items")
            .table(TableSpec::new("items").stage_upload(&src, "pets/cat.png"));
        let config = HarnessConfig::new("http://localhost")
            .with_upload_dir(&uploads)
            .with_log_dir(tmp.path().join("logs"));
        let normalized = normalize(&case, &config, true).unwrap();

        let storage = storage();
        let fixtures = FixtureController::new(&storage, normalized.upload_dir);
        fixtures.reset(&normalized.table_names()).await.unwrap();
        fixtures.seed(&normalized.tables).await.unwrap();

        assert_eq!(std::fs::read(uploads.join("pets/cat.png")).unwrap(), b"meow");
    }

    #[tokio::test]
    async fn seed_failure_names_the_table() {
        let case = TestCase::get("/items")
            .table(TableSpec::new("missing").mock_row(json!({ "name": "a" })));
        let config = HarnessConfig::new("http://localhost");
        let normalized = normalize(&case, &config, true).unwrap();

        let storage = storage();
        let err = FixtureController::new(&storage, None)
            .seed(&normalized.tables)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage { ref table, .. } if table == "missing"));
    }

    #[tokio::test]
    async fn reset_of_unknown_table_aborts() {
        let storage = storage();
        let err = FixtureController::new(&storage, None)
            .reset(&["items", "nope"])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
