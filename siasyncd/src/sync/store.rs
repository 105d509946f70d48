use std::{fs, path::Path};

use sqlx::{Row, SqlitePool, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions};
use thiserror::Error;

use super::record::{SyncRecord, SyncState};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sync state: {0}")]
    InvalidState(String),
}

/// One conflict-copy event, journaled for later inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRecord {
    pub id: i64,
    pub name: String,
    pub copy_name: String,
    pub created: i64,
}

/// Persisted table of per-file sync records. Every write is durable as soon
/// as the statement returns; `commit` is the explicit flush boundary called
/// before pipeline tasks are enqueued.
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    /// Single-connection in-memory store, used by tests.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                name TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                local_modified INTEGER,
                local_digest TEXT,
                cloud_path TEXT,
                cloud_size INTEGER,
                temporary_path TEXT
            );",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS conflicts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                copy_name TEXT NOT NULL,
                created INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert(&self, record: &SyncRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO records (
                name, state, local_modified, local_digest, cloud_path, cloud_size, temporary_path
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                local_modified = excluded.local_modified,
                local_digest = excluded.local_digest,
                cloud_path = excluded.cloud_path,
                cloud_size = excluded.cloud_size,
                temporary_path = excluded.temporary_path;",
        )
        .bind(&record.name)
        .bind(record.state.as_str())
        .bind(record.local_modified)
        .bind(&record.local_digest)
        .bind(&record.cloud_path)
        .bind(record.cloud_size)
        .bind(&record.temporary_path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get(&self, name: &str) -> Result<Option<SyncRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT name, state, local_modified, local_digest, cloud_path, cloud_size, temporary_path
             FROM records WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(record_from_row(&row)?))
    }

    pub async fn delete(&self, name: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM records WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn list_all(&self) -> Result<Vec<SyncRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, state, local_modified, local_digest, cloud_path, cloud_size, temporary_path
             FROM records ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(record_from_row(&row)?);
        }
        Ok(out)
    }

    pub async fn list_in_states(
        &self,
        states: &[SyncState],
    ) -> Result<Vec<SyncRecord>, StoreError> {
        let all = self.list_all().await?;
        Ok(all
            .into_iter()
            .filter(|record| states.contains(&record.state))
            .collect())
    }

    /// True iff no record is in a state that still needs work. Failed
    /// records rest until the next reconciler pass and do not count.
    pub async fn is_synced(&self) -> Result<bool, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS pending FROM records
             WHERE state NOT IN ('synced', 'upload_failed', 'download_failed')",
        )
        .fetch_one(&self.pool)
        .await?;
        let pending: i64 = row.try_get("pending")?;
        Ok(pending == 0)
    }

    /// Explicit flush boundary. Statements are individually durable; for
    /// file-backed WAL databases this also checkpoints the log.
    pub async fn commit(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA wal_checkpoint(PASSIVE);")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_conflict(
        &self,
        name: &str,
        copy_name: &str,
        created: i64,
    ) -> Result<i64, StoreError> {
        let result = sqlx::query("INSERT INTO conflicts (name, copy_name, created) VALUES (?1, ?2, ?3)")
            .bind(name)
            .bind(copy_name)
            .bind(created)
            .execute(&self.pool)
            .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn list_conflicts(&self) -> Result<Vec<ConflictRecord>, StoreError> {
        let rows = sqlx::query("SELECT id, name, copy_name, created FROM conflicts ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(ConflictRecord {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                copy_name: row.try_get("copy_name")?,
                created: row.try_get("created")?,
            });
        }
        Ok(out)
    }
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<SyncRecord, StoreError> {
    let state: String = row.try_get("state")?;
    Ok(SyncRecord {
        name: row.try_get("name")?,
        state: SyncState::parse(&state)?,
        local_modified: row.try_get("local_modified")?,
        local_digest: row.try_get("local_digest")?,
        cloud_path: row.try_get("cloud_path")?,
        cloud_size: row.try_get("cloud_size")?,
        temporary_path: row.try_get("temporary_path")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, state: SyncState) -> SyncRecord {
        SyncRecord {
            name: name.into(),
            state,
            local_modified: Some(1_700_000_000),
            local_digest: Some("digest".into()),
            cloud_path: Some(format!("sync/{name}/1700000000")),
            cloud_size: Some(12),
            temporary_path: None,
        }
    }

    #[tokio::test]
    async fn upsert_and_get_round_trip() {
        let store = RecordStore::in_memory().await.unwrap();
        let rec = record("docs/a.txt", SyncState::Synced);

        store.upsert(&rec).await.unwrap();
        let fetched = store.get("docs/a.txt").await.unwrap().unwrap();

        assert_eq!(fetched, rec);
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_replaces_existing_record() {
        let store = RecordStore::in_memory().await.unwrap();
        let mut rec = record("docs/a.txt", SyncState::Modified);
        store.upsert(&rec).await.unwrap();

        rec.state = SyncState::ForUpload;
        rec.cloud_path = Some("sync/docs/a.txt/1700000999".into());
        store.upsert(&rec).await.unwrap();

        let fetched = store.get("docs/a.txt").await.unwrap().unwrap();
        assert_eq!(fetched.state, SyncState::ForUpload);
        assert_eq!(fetched.cloud_created(), Some(1_700_000_999));
    }

    #[tokio::test]
    async fn delete_removes_record() {
        let store = RecordStore::in_memory().await.unwrap();
        store
            .upsert(&record("docs/a.txt", SyncState::Deleted))
            .await
            .unwrap();

        store.delete("docs/a.txt").await.unwrap();

        assert!(store.get("docs/a.txt").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn is_synced_ignores_resting_failures() {
        let store = RecordStore::in_memory().await.unwrap();
        assert!(store.is_synced().await.unwrap());

        store
            .upsert(&record("a.txt", SyncState::Synced))
            .await
            .unwrap();
        store
            .upsert(&record("b.txt", SyncState::UploadFailed))
            .await
            .unwrap();
        assert!(store.is_synced().await.unwrap());

        store
            .upsert(&record("c.txt", SyncState::Uploading))
            .await
            .unwrap();
        assert!(!store.is_synced().await.unwrap());
    }

    #[tokio::test]
    async fn list_in_states_filters() {
        let store = RecordStore::in_memory().await.unwrap();
        store
            .upsert(&record("a.txt", SyncState::ForUpload))
            .await
            .unwrap();
        store
            .upsert(&record("b.txt", SyncState::Synced))
            .await
            .unwrap();
        store
            .upsert(&record("c.txt", SyncState::ForCloudDelete))
            .await
            .unwrap();

        let pending = store
            .list_in_states(&[SyncState::ForUpload, SyncState::ForCloudDelete])
            .await
            .unwrap();
        let names: Vec<&str> = pending.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "c.txt"]);
    }

    #[tokio::test]
    async fn commit_is_callable_on_any_backend() {
        let store = RecordStore::in_memory().await.unwrap();
        store.commit().await.unwrap();
    }

    #[tokio::test]
    async fn records_and_lists_conflicts() {
        let store = RecordStore::in_memory().await.unwrap();
        store
            .record_conflict(
                "docs/a.txt",
                "docs/a (conflicted copy alice 2026-08-29).txt",
                123,
            )
            .await
            .unwrap();

        let conflicts = store.list_conflicts().await.unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].name, "docs/a.txt");
        assert_eq!(conflicts[0].created, 123);
    }
}
