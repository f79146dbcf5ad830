use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{
    ClaimOutcome, FailureRecord, FileRecord, FileStatus, PeerCursor, StoreError, UpsertOutcome,
};

/// Handle to the SQLite-backed file and peer-cursor database.
///
/// The database file lives under the XDG state directory:
/// `~/.local/state/tgaudio/tgaudio.db`.
#[derive(Clone)]
pub struct Store {
    pool: Pool<Sqlite>,
}

impl Store {
    /// Opens (or creates) the default database and runs migrations.
    pub async fn open_default() -> Result<Self, StoreError> {
        let xdg_dirs = xdg::BaseDirectories::with_prefix("tgaudio")
            .map_err(|e| StoreError::Sql(sqlx::Error::Configuration(e.into())))?;
        let state_dir = xdg_dirs.get_state_home();
        let db_path: PathBuf = state_dir.join("tgaudio.db");
        tokio::fs::create_dir_all(&state_dir)
            .await
            .map_err(|e| StoreError::Sql(sqlx::Error::Io(e)))?;

        let uri = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePoolOptions::new().max_connections(8).connect(&uri).await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Opens an in-memory database. Used by tests and by the `--no-persist`
    /// (lite) escape hatch, were it ever wired in.
    pub async fn open_memory() -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Store { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS files (
                file_id TEXT PRIMARY KEY,
                peer_id TEXT NOT NULL,
                message_id INTEGER NOT NULL,
                declared_size INTEGER NOT NULL,
                mime TEXT NOT NULL,
                format TEXT NOT NULL,
                target_path TEXT NOT NULL,
                status TEXT NOT NULL,
                downloaded_bytes INTEGER NOT NULL DEFAULT 0,
                partial_checksum TEXT,
                final_checksum TEXT,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_error_kind TEXT,
                last_error_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_peer_status ON files(peer_id, status);")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_status ON files(status);")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS peer_cursors (
                peer_id TEXT PRIMARY KEY,
                last_scanned_message_id INTEGER NOT NULL,
                last_scan_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Inserts a new record if `file_id` is unseen; otherwise returns the
    /// existing record untouched. Idempotent by design so the enumerator can
    /// call this unconditionally.
    pub async fn upsert_file(&self, record: &FileRecord) -> Result<UpsertOutcome, StoreError> {
        if let Some(existing) = self.get_file(&record.file_id).await? {
            return Ok(UpsertOutcome::AlreadyExists(existing));
        }

        let now = unix_timestamp();
        let inserted = sqlx::query(
            r#"
            INSERT INTO files (
                file_id, peer_id, message_id, declared_size, mime, format,
                target_path, status, downloaded_bytes, partial_checksum,
                final_checksum, attempts, last_error_kind, last_error_at,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, NULL, NULL, 0, NULL, NULL, ?9, ?9)
            ON CONFLICT(file_id) DO NOTHING
            "#,
        )
        .bind(&record.file_id)
        .bind(&record.peer_id)
        .bind(record.message_id)
        .bind(record.declared_size as i64)
        .bind(&record.mime)
        .bind(&record.format)
        .bind(record.target_path.to_string_lossy().to_string())
        .bind(record.status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        if inserted.rows_affected() == 0 {
            // Lost a race with a concurrent upsert of the same file_id.
            let existing = self
                .get_file(&record.file_id)
                .await?
                .expect("row just failed to insert on conflict, so it exists");
            return Ok(UpsertOutcome::AlreadyExists(existing));
        }

        Ok(UpsertOutcome::Inserted)
    }

    pub async fn get_file(&self, file_id: &str) -> Result<Option<FileRecord>, StoreError> {
        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_record))
    }

    /// Atomically transitions a PENDING record to IN_PROGRESS. At most one
    /// concurrent caller observes `Claimed` for a given `file_id`.
    pub async fn try_claim(&self, file_id: &str) -> Result<ClaimOutcome, StoreError> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status FROM files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            tx.commit().await?;
            return Ok(ClaimOutcome::NotFound);
        };
        let status: String = row.get("status");
        if FileStatus::from_str(&status) != FileStatus::Pending {
            tx.commit().await?;
            return Ok(ClaimOutcome::NotPending);
        }

        let updated = sqlx::query(
            r#"
            UPDATE files SET status = 'in_progress', updated_at = ?1
            WHERE file_id = ?2 AND status = 'pending'
            "#,
        )
        .bind(now)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.commit().await?;
            return Ok(ClaimOutcome::NotPending);
        }

        let row = sqlx::query("SELECT * FROM files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(row_to_record(&row)))
    }

    /// Persists a new validated offset and the running prefix checksum.
    /// Rejects any offset lower than the current one.
    pub async fn record_progress(
        &self,
        file_id: &str,
        new_offset: u64,
        partial_checksum: &str,
    ) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query("SELECT downloaded_bytes FROM files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                file_id: file_id.to_string(),
            });
        };
        let current: i64 = row.get("downloaded_bytes");
        if (new_offset as i64) < current {
            return Err(StoreError::NonMonotonicOffset {
                file_id: file_id.to_string(),
                current: current as u64,
                attempted: new_offset,
            });
        }

        sqlx::query(
            r#"
            UPDATE files
            SET downloaded_bytes = ?1, partial_checksum = ?2, updated_at = ?3
            WHERE file_id = ?4
            "#,
        )
        .bind(new_offset as i64)
        .bind(partial_checksum)
        .bind(now)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    /// Transitions IN_PROGRESS to COMPLETED. Idempotent if already completed
    /// with the same checksum; rejects any other starting status so a stale
    /// or duplicate completion can never force-complete a PENDING, FAILED or
    /// SKIPPED record.
    pub async fn complete(
        &self,
        file_id: &str,
        final_checksum: &str,
        final_size: u64,
    ) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT status, final_checksum FROM files WHERE file_id = ?1")
            .bind(file_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(StoreError::NotFound {
                file_id: file_id.to_string(),
            });
        };

        let status_str: String = row.get("status");
        let status = FileStatus::from_str(&status_str);
        if status == FileStatus::Completed {
            let existing_checksum: Option<String> = row.get("final_checksum");
            tx.commit().await?;
            if existing_checksum.as_deref() == Some(final_checksum) {
                return Ok(());
            }
            return Err(StoreError::ConflictingCompletion {
                file_id: file_id.to_string(),
            });
        }

        let updated = sqlx::query(
            r#"
            UPDATE files
            SET status = 'completed', downloaded_bytes = ?1, final_checksum = ?2,
                partial_checksum = ?2, updated_at = ?3
            WHERE file_id = ?4 AND status = 'in_progress'
            "#,
        )
        .bind(final_size as i64)
        .bind(final_checksum)
        .bind(now)
        .bind(file_id)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.commit().await?;
            return Err(StoreError::NotInProgress {
                file_id: file_id.to_string(),
                status: status_str,
            });
        }

        tx.commit().await?;
        Ok(())
    }

    /// Records a failure. Retriable failures under the attempt cap return to
    /// PENDING for another worker to claim; everything else becomes FAILED.
    pub async fn fail(
        &self,
        file_id: &str,
        failure: &FailureRecord,
        max_attempts: u32,
    ) -> Result<(), StoreError> {
        let now = unix_timestamp();
        let existing = self.get_file(file_id).await?.ok_or_else(|| StoreError::NotFound {
            file_id: file_id.to_string(),
        })?;
        let attempts = existing.attempts + 1;
        let next_status = if failure.kind.is_retriable() && attempts < max_attempts {
            FileStatus::Pending
        } else {
            FileStatus::Failed
        };

        sqlx::query(
            r#"
            UPDATE files
            SET status = ?1, attempts = ?2, last_error_kind = ?3, last_error_at = ?4, updated_at = ?4
            WHERE file_id = ?5
            "#,
        )
        .bind(next_status.as_str())
        .bind(attempts as i64)
        .bind(failure.kind.to_string())
        .bind(now)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Marks a still-pending record SKIPPED without counting it as a
    /// failure, e.g. when the filesystem contract rejects it for
    /// insufficient headroom before a worker ever claims it.
    pub async fn skip(&self, file_id: &str, reason: &FailureRecord) -> Result<(), StoreError> {
        let now = unix_timestamp();
        sqlx::query(
            r#"
            UPDATE files
            SET status = 'skipped', last_error_kind = ?1, last_error_at = ?2, updated_at = ?2
            WHERE file_id = ?3
            "#,
        )
        .bind(reason.kind.to_string())
        .bind(now)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reverts any record stranded IN_PROGRESS (e.g. after a crash) back to
    /// PENDING so it can be reclaimed. Called once at coordinator startup.
    pub async fn recover_in_progress(&self) -> Result<u64, StoreError> {
        let now = unix_timestamp();
        let r = sqlx::query(
            "UPDATE files SET status = 'pending', updated_at = ?1 WHERE status = 'in_progress'",
        )
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(r.rows_affected())
    }

    pub async fn get_peer_cursor(&self, peer_id: &str) -> Result<Option<PeerCursor>, StoreError> {
        let row = sqlx::query("SELECT last_scanned_message_id FROM peer_cursors WHERE peer_id = ?1")
            .bind(peer_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| PeerCursor {
            last_scanned_message_id: r.get("last_scanned_message_id"),
        }))
    }

    /// Sets the peer cursor. Rejects any attempt to move it backward.
    pub async fn set_peer_cursor(&self, peer_id: &str, message_id: i64) -> Result<(), StoreError> {
        let now = unix_timestamp();
        if let Some(existing) = self.get_peer_cursor(peer_id).await? {
            if message_id < existing.last_scanned_message_id {
                return Err(StoreError::NonMonotonicCursor {
                    peer_id: peer_id.to_string(),
                    current: existing.last_scanned_message_id,
                    attempted: message_id,
                });
            }
        }

        sqlx::query(
            r#"
            INSERT INTO peer_cursors (peer_id, last_scanned_message_id, last_scan_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(peer_id) DO UPDATE SET
                last_scanned_message_id = excluded.last_scanned_message_id,
                last_scan_at = excluded.last_scan_at
            "#,
        )
        .bind(peer_id)
        .bind(message_id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Lists records in a given status, newest-updated first. Used by the
    /// search/stats/groups CLI commands.
    pub async fn iter_by_status(&self, status: FileStatus) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files WHERE status = ?1 ORDER BY updated_at DESC")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    /// Lists every record for a peer, regardless of status.
    pub async fn list_for_peer(&self, peer_id: &str) -> Result<Vec<FileRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM files WHERE peer_id = ?1 ORDER BY message_id DESC")
            .bind(peer_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    pub async fn all_peers(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT DISTINCT peer_id FROM files").fetch_all(&self.pool).await?;
        Ok(rows.iter().map(|r| r.get("peer_id")).collect())
    }
}

pub(crate) fn unix_timestamp() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

fn row_to_record(row: &sqlx::sqlite::SqliteRow) -> FileRecord {
    let downloaded_bytes: i64 = row.get("downloaded_bytes");
    let declared_size: i64 = row.get("declared_size");
    let status: String = row.get("status");
    let attempts: i64 = row.get("attempts");
    let target_path: String = row.get("target_path");
    FileRecord {
        file_id: row.get("file_id"),
        peer_id: row.get("peer_id"),
        message_id: row.get("message_id"),
        declared_size: declared_size as u64,
        mime: row.get("mime"),
        format: row.get("format"),
        target_path: PathBuf::from(target_path),
        status: FileStatus::from_str(&status),
        downloaded_bytes: downloaded_bytes as u64,
        partial_checksum: row.get("partial_checksum"),
        final_checksum: row.get("final_checksum"),
        attempts: attempts as u32,
        last_error_kind: row.get("last_error_kind"),
    }
}
