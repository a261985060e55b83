//! SQLite storage implementation
//!
//! This module provides the SQLite-backed [`BulkStore`] together with run
//! bookkeeping and the counters used by `--stats`.

use crate::extract::{ExtractedRecord, SearchQuery};
use crate::storage::format::format_fields;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{BulkStore, StorageError, StorageResult};
use crate::storage::{RunRecord, RunStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// Records inserted per chunk inside the store transaction
const INSERT_CHUNK_SIZE: usize = 1_000;

/// SQLite storage backend
pub struct SqliteStore {
    conn: Connection,
    active_run: Option<i64>,
}

impl SqliteStore {
    /// Opens or creates the database at `path`
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        // Configure SQLite for better performance
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self {
            conn,
            active_run: None,
        })
    }

    /// Creates an in-memory database (for testing)
    #[cfg(test)]
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self {
            conn,
            active_run: None,
        })
    }

    // ===== Run Management =====

    /// Starts a run; records stored afterwards belong to it
    pub fn begin_run(&mut self, config_hash: &str, query: &SearchQuery) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO runs (started_at, config_hash, query, status) VALUES (?1, ?2, ?3, ?4)",
            params![
                now,
                config_hash,
                query.to_query_string(),
                RunStatus::Running.to_db_string()
            ],
        )?;
        let run_id = self.conn.last_insert_rowid();
        self.active_run = Some(run_id);
        Ok(run_id)
    }

    /// Closes a run with its final status
    pub fn finish_run(&mut self, run_id: i64, status: RunStatus) -> StorageResult<()> {
        let now = Utc::now().to_rfc3339();
        let updated = self.conn.execute(
            "UPDATE runs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), now, run_id],
        )?;
        if updated == 0 {
            return Err(StorageError::RunNotFound(run_id));
        }
        if self.active_run == Some(run_id) {
            self.active_run = None;
        }
        Ok(())
    }

    pub fn active_run(&self) -> Option<i64> {
        self.active_run
    }

    fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunRecord> {
        Ok(RunRecord {
            id: row.get(0)?,
            started_at: row.get(1)?,
            finished_at: row.get(2)?,
            config_hash: row.get(3)?,
            query: row.get(4)?,
            status: RunStatus::from_db_string(&row.get::<_, String>(5)?)
                .unwrap_or(RunStatus::Failed),
        })
    }

    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, query, status
                 FROM runs WHERE id = ?1",
                params![run_id],
                Self::run_from_row,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
    }

    pub fn get_latest_run(&self) -> StorageResult<Option<RunRecord>> {
        let run = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, query, status
                 FROM runs ORDER BY id DESC LIMIT 1",
                [],
                Self::run_from_row,
            )
            .optional()?;
        Ok(run)
    }

    // ===== Statistics =====

    pub fn count_contracts(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_contracts_with_detail(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM contracts WHERE run_id = ?1 AND detail IS NOT NULL",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_pages(&self, run_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(DISTINCT page) FROM contracts WHERE run_id = ?1",
            params![run_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn count_total_contracts(&self) -> StorageResult<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM contracts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Award keys stored for a run, in page order
    pub fn award_keys(&self, run_id: i64) -> StorageResult<Vec<Option<String>>> {
        let mut stmt = self.conn.prepare(
            "SELECT award_key FROM contracts WHERE run_id = ?1 ORDER BY page, position",
        )?;
        let keys = stmt
            .query_map(params![run_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(keys)
    }
}

impl BulkStore for SqliteStore {
    fn store_many(&mut self, records: &[ExtractedRecord]) -> StorageResult<Vec<i64>> {
        let run_id = self.active_run.ok_or(StorageError::NoActiveRun)?;
        let now = Utc::now().to_rfc3339();
        let mut ids = Vec::with_capacity(records.len());

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO contracts (run_id, page, position, award_key, summary, detail, stored_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for (index, chunk) in records.chunks(INSERT_CHUNK_SIZE).enumerate() {
                for record in chunk {
                    let summary = serde_json::to_string(&format_fields(record.fields()))?;
                    let detail = record
                        .detail()
                        .map(|detail| serde_json::to_string(&format_fields(detail)))
                        .transpose()?;

                    stmt.execute(params![
                        run_id,
                        record.page() as i64,
                        record.position() as i64,
                        record.award_key(),
                        summary,
                        detail,
                        now
                    ])?;
                    ids.push(tx.last_insert_rowid());
                }
                tracing::debug!(chunk = index + 1, records = chunk.len(), "Inserted chunk");
            }
        }
        tx.commit()?;

        tracing::info!(run_id, records = ids.len(), "Stored records");
        Ok(ids)
    }
}
