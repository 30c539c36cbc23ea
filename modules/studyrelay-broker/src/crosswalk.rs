//! The durable crosswalk: a single-file sqlite store holding identifier
//! mappings, the append-only operation log, and sticky date shifts.
//!
//! The store is the sole mutator of its file. Concurrent readers see WAL
//! snapshots; writers upsert on the unique key, so a mapping's `id_out`
//! is immutable once created.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use tracing::warn;

use studyrelay_common::IdType;

use crate::error::{BrokerError, Result};

/// One identifier mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrosswalkEntry {
    pub broker: String,
    pub id_in: String,
    pub id_out: String,
    pub id_type: IdType,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Append-only log actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogAction {
    Lookup,
    Create,
    ReverseLookup,
    Route,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogAction::Lookup => "lookup",
            LogAction::Create => "create",
            LogAction::ReverseLookup => "reverse_lookup",
            LogAction::Route => "route",
        }
    }
}

/// One log row, as read back for audit queries.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub action: String,
    pub broker: String,
    pub id_in: Option<String>,
    pub id_out: Option<String>,
    pub id_type: Option<String>,
    pub route: Option<String>,
    pub destination: Option<String>,
    pub study_uid: Option<String>,
    pub details: Option<String>,
    pub created: DateTime<Utc>,
}

/// Context attached to a log append.
#[derive(Debug, Clone, Default)]
pub struct LogContext {
    pub route: Option<String>,
    pub destination: Option<String>,
    pub study_uid: Option<String>,
    pub details: Option<String>,
}

#[derive(Clone)]
pub struct CrosswalkStore {
    pool: SqlitePool,
    path: PathBuf,
}

impl CrosswalkStore {
    /// Open (creating if needed) the store at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let store = Self {
            pool,
            path: path.to_path_buf(),
        };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crosswalk (
                broker   TEXT NOT NULL,
                id_in    TEXT NOT NULL,
                id_out   TEXT NOT NULL,
                id_type  TEXT NOT NULL,
                created  TEXT NOT NULL,
                updated  TEXT NOT NULL,
                UNIQUE (broker, id_in, id_type)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_crosswalk_reverse
             ON crosswalk (broker, id_out, id_type)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS crosswalk_log (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                action      TEXT NOT NULL,
                broker      TEXT NOT NULL,
                id_in       TEXT,
                id_out      TEXT,
                id_type     TEXT,
                route       TEXT,
                destination TEXT,
                study_uid   TEXT,
                details     TEXT,
                created     TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS date_shifts (
                broker     TEXT NOT NULL,
                patient_id TEXT NOT NULL,
                shift_days INTEGER NOT NULL,
                created    TEXT NOT NULL,
                UNIQUE (broker, patient_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forward lookup.
    pub async fn lookup(
        &self,
        broker: &str,
        id_in: &str,
        id_type: IdType,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT id_out FROM crosswalk WHERE broker = ? AND id_in = ? AND id_type = ?",
        )
        .bind(broker)
        .bind(id_in)
        .bind(id_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("id_out")))
    }

    /// Reverse lookup via the secondary unique index.
    pub async fn reverse(
        &self,
        broker: &str,
        id_out: &str,
        id_type: IdType,
    ) -> Result<Option<String>> {
        let row = sqlx::query(
            "SELECT id_in FROM crosswalk WHERE broker = ? AND id_out = ? AND id_type = ?",
        )
        .bind(broker)
        .bind(id_out)
        .bind(id_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<String, _>("id_in")))
    }

    /// Create a mapping. First write wins: a concurrent creator's value is
    /// returned unchanged, and an `id_out` collision with a different
    /// `id_in` is an integrity error.
    pub async fn store(
        &self,
        broker: &str,
        id_in: &str,
        id_out: &str,
        id_type: IdType,
    ) -> Result<String> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            r#"
            INSERT INTO crosswalk (broker, id_in, id_out, id_type, created, updated)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (broker, id_in, id_type) DO NOTHING
            "#,
        )
        .bind(broker)
        .bind(id_in)
        .bind(id_out)
        .bind(id_type.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                // The reverse-uniqueness index fired: this id_out already
                // belongs to a different id_in.
                return Err(BrokerError::Integrity(format!(
                    "pseudonym `{id_out}` already maps to another {} under broker `{broker}`",
                    id_type.as_str()
                )));
            }
            Err(e) => return Err(e.into()),
        }

        self.lookup(broker, id_in, id_type).await?.ok_or_else(|| {
            BrokerError::Integrity(format!(
                "mapping for ({broker}, {id_in}, {}) vanished after insert",
                id_type.as_str()
            ))
        })
    }

    pub async fn mapping_count(&self, broker: &str) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM crosswalk WHERE broker = ?")
            .bind(broker)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n") as u64)
    }

    pub async fn total_counts(&self) -> Result<(u64, u64)> {
        let mappings = sqlx::query("SELECT COUNT(*) AS n FROM crosswalk")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n") as u64;
        let logs = sqlx::query("SELECT COUNT(*) AS n FROM crosswalk_log")
            .fetch_one(&self.pool)
            .await?
            .get::<i64, _>("n") as u64;
        Ok((mappings, logs))
    }

    /// Append to the operation log. A log write failure is warned about,
    /// never propagated: the mapping itself is the record of truth.
    pub async fn log(
        &self,
        action: LogAction,
        broker: &str,
        id_in: Option<&str>,
        id_out: Option<&str>,
        id_type: Option<IdType>,
        ctx: &LogContext,
    ) {
        let result = sqlx::query(
            r#"
            INSERT INTO crosswalk_log
                (action, broker, id_in, id_out, id_type, route, destination,
                 study_uid, details, created)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(action.as_str())
        .bind(broker)
        .bind(id_in)
        .bind(id_out)
        .bind(id_type.map(|t| t.as_str()))
        .bind(&ctx.route)
        .bind(&ctx.destination)
        .bind(&ctx.study_uid)
        .bind(&ctx.details)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            warn!(broker, action = action.as_str(), error = %e, "Failed to append crosswalk log");
        }
    }

    /// Most recent log rows for a broker, newest first.
    pub async fn recent_log(&self, broker: &str, limit: u32) -> Result<Vec<LogEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT action, broker, id_in, id_out, id_type, route, destination,
                   study_uid, details, created
            FROM crosswalk_log WHERE broker = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )
        .bind(broker)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| LogEntry {
                action: r.get("action"),
                broker: r.get("broker"),
                id_in: r.get("id_in"),
                id_out: r.get("id_out"),
                id_type: r.get("id_type"),
                route: r.get("route"),
                destination: r.get("destination"),
                study_uid: r.get("study_uid"),
                details: r.get("details"),
                created: r
                    .get::<String, _>("created")
                    .parse::<DateTime<Utc>>()
                    .unwrap_or_else(|_| Utc::now()),
            })
            .collect())
    }

    /// Existing date shift for a patient, if one was ever allocated.
    pub async fn date_shift(&self, broker: &str, patient_id: &str) -> Result<Option<i64>> {
        let row = sqlx::query(
            "SELECT shift_days FROM date_shifts WHERE broker = ? AND patient_id = ?",
        )
        .bind(broker)
        .bind(patient_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.get::<i64, _>("shift_days")))
    }

    /// Allocate-once date shift: the first stored value wins forever.
    pub async fn store_date_shift(
        &self,
        broker: &str,
        patient_id: &str,
        shift_days: i64,
    ) -> Result<i64> {
        sqlx::query(
            r#"
            INSERT INTO date_shifts (broker, patient_id, shift_days, created)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (broker, patient_id) DO NOTHING
            "#,
        )
        .bind(broker)
        .bind(patient_id)
        .bind(shift_days)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        self.date_shift(broker, patient_id).await?.ok_or_else(|| {
            BrokerError::Integrity(format!(
                "date shift for ({broker}, {patient_id}) vanished after insert"
            ))
        })
    }

    /// Force a durable checkpoint (WAL truncate). Used by backups so the
    /// copied file is complete on its own.
    pub async fn checkpoint(&self) -> Result<()> {
        sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Close the pool, releasing the file for replacement on restore.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(dir: &TempDir) -> CrosswalkStore {
        CrosswalkStore::open(&dir.path().join("crosswalk.db"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn store_and_lookup_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        let out = store
            .store("b1", "P1", "SUBJ-00001", IdType::PatientId)
            .await
            .unwrap();
        assert_eq!(out, "SUBJ-00001");
        assert_eq!(
            store.lookup("b1", "P1", IdType::PatientId).await.unwrap(),
            Some("SUBJ-00001".to_string())
        );
        assert_eq!(
            store
                .reverse("b1", "SUBJ-00001", IdType::PatientId)
                .await
                .unwrap(),
            Some("P1".to_string())
        );
        // Scoped by broker and type.
        assert_eq!(store.lookup("b2", "P1", IdType::PatientId).await.unwrap(), None);
        assert_eq!(store.lookup("b1", "P1", IdType::Accession).await.unwrap(), None);
    }

    #[tokio::test]
    async fn first_mapping_wins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.store("b1", "P1", "A", IdType::PatientId).await.unwrap();
        let second = store.store("b1", "P1", "B", IdType::PatientId).await.unwrap();
        assert_eq!(second, "A");
        assert_eq!(store.mapping_count("b1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn id_out_collision_is_integrity_error() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;

        store.store("b1", "P1", "SAME", IdType::PatientId).await.unwrap();
        let err = store
            .store("b1", "P2", "SAME", IdType::PatientId)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::Integrity(_)), "{err}");
    }

    #[tokio::test]
    async fn mappings_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crosswalk.db");
        {
            let store = CrosswalkStore::open(&path).await.unwrap();
            store.store("b1", "P1", "X", IdType::PatientId).await.unwrap();
            store.checkpoint().await.unwrap();
            store.close().await;
        }
        let store = CrosswalkStore::open(&path).await.unwrap();
        assert_eq!(
            store.lookup("b1", "P1", IdType::PatientId).await.unwrap(),
            Some("X".to_string())
        );
    }

    #[tokio::test]
    async fn date_shift_sticks() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        assert_eq!(store.date_shift("b1", "P1").await.unwrap(), None);
        let first = store.store_date_shift("b1", "P1", -42).await.unwrap();
        assert_eq!(first, -42);
        // A later allocation attempt returns the original value.
        let second = store.store_date_shift("b1", "P1", 99).await.unwrap();
        assert_eq!(second, -42);
    }

    #[tokio::test]
    async fn log_appends_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir).await;
        store
            .log(
                LogAction::Create,
                "b1",
                Some("P1"),
                Some("SUBJ-00001"),
                Some(IdType::PatientId),
                &LogContext {
                    details: Some("new_mapping".into()),
                    ..Default::default()
                },
            )
            .await;
        store
            .log(
                LogAction::Route,
                "b1",
                Some("P1"),
                None,
                Some(IdType::PatientId),
                &LogContext {
                    route: Some("R1".into()),
                    destination: Some("xnat".into()),
                    study_uid: Some("1.2.3".into()),
                    ..Default::default()
                },
            )
            .await;

        let entries = store.recent_log("b1", 10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "route");
        assert_eq!(entries[0].route.as_deref(), Some("R1"));
        assert_eq!(entries[1].action, "create");
        assert_eq!(entries[1].details.as_deref(), Some("new_mapping"));

        let (mappings, logs) = store.total_counts().await.unwrap();
        assert_eq!(mappings, 0);
        assert_eq!(logs, 2);
    }
}
