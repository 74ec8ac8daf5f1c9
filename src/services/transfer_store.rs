use crate::models::{Transfer, TransferFile};
use crate::utils::hash::{ChecksumError, copy_with_digest};
use crate::utils::validation::{Packaging, is_safe_relative_path};
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncRead;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum CommitError {
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("upload truncated: declared {expected} bytes, received {received}")]
    Truncated { expected: u64, received: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Removes the partially written file unless defused. Covers every abort
/// path, including the request future being dropped mid-stream.
struct PartialFileGuard {
    path: Option<PathBuf>,
}

impl PartialFileGuard {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn defuse(mut self) {
        self.path = None;
    }
}

impl Drop for PartialFileGuard {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!("failed to remove partial file {}: {}", path.display(), e);
                }
            }
        }
    }
}

/// Persists transfer metadata and package bytes. Storage paths are a
/// deterministic function of (project id, transfer id); identifiers are
/// freshly allocated UUIDs and never reused, so concurrent deposits never
/// share a directory.
pub struct TransferStore {
    db: SqlitePool,
    root: PathBuf,
}

impl TransferStore {
    pub fn new(db: SqlitePool, root: PathBuf) -> Self {
        Self { db, root }
    }

    pub fn storage_root(&self) -> &Path {
        &self.root
    }

    pub fn transfer_dir(&self, project_id: &str, transfer_id: &str) -> PathBuf {
        self.root.join(project_id).join(transfer_id)
    }

    pub fn file_path(&self, transfer: &Transfer, filename: &str) -> PathBuf {
        self.transfer_dir(&transfer.project_id, &transfer.id)
            .join(filename)
    }

    /// Allocates a transfer identifier and its storage directory. The
    /// transfer is not complete until a file commit succeeds.
    pub async fn begin_transfer(
        &self,
        project_id: &str,
        user_id: &str,
        packaging: Packaging,
    ) -> Result<Transfer, CommitError> {
        let transfer = Transfer {
            id: Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            user_id: user_id.to_string(),
            packaging: packaging.uri().to_string(),
            created_at: Some(Utc::now()),
            completed_at: None,
        };

        fs::create_dir_all(self.transfer_dir(project_id, &transfer.id)).await?;

        sqlx::query(
            "INSERT INTO transfers (id, project_id, user_id, packaging, created_at) \
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&transfer.id)
        .bind(&transfer.project_id)
        .bind(&transfer.user_id)
        .bind(&transfer.packaging)
        .bind(transfer.created_at)
        .execute(&self.db)
        .await?;

        tracing::info!(
            transfer_id = %transfer.id,
            project_id = %project_id,
            "transfer started"
        );

        Ok(transfer)
    }

    /// Streams the package bytes to disk, verifies the digest and records
    /// the TransferFile. On any failure the partial file is removed and no
    /// metadata row exists afterwards.
    pub async fn commit_file<R>(
        &self,
        transfer: &Transfer,
        filename: &str,
        mimetype: &str,
        expected_md5: &str,
        reader: &mut R,
        declared_len: u64,
    ) -> Result<TransferFile, CommitError>
    where
        R: AsyncRead + Unpin + Send,
    {
        // The validator guarantees this already; a second check keeps the
        // store safe to call on its own.
        if !is_safe_relative_path(filename) {
            return Err(CommitError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsafe filename: {filename}"),
            )));
        }

        let path = self.file_path(transfer, filename);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let guard = PartialFileGuard::new(path.clone());
        let mut file = fs::File::create(&path).await?;

        let computed = match copy_with_digest(reader, &mut file, declared_len).await {
            Ok(digest) => digest,
            Err(ChecksumError::Truncated { expected, received }) => {
                return Err(CommitError::Truncated { expected, received });
            }
            Err(ChecksumError::Io(e)) => return Err(CommitError::Io(e)),
        };
        drop(file);

        if !computed.eq_ignore_ascii_case(expected_md5) {
            tracing::warn!(
                transfer_id = %transfer.id,
                expected = %expected_md5,
                computed = %computed,
                "rejecting upload with checksum mismatch"
            );
            return Err(CommitError::ChecksumMismatch {
                expected: expected_md5.to_lowercase(),
                computed,
            });
        }

        let record = TransferFile {
            id: Uuid::new_v4().to_string(),
            transfer_id: transfer.id.clone(),
            filename: filename.to_string(),
            mimetype: mimetype.to_string(),
            md5: computed,
            created_at: Some(Utc::now()),
        };

        let mut tx = self.db.begin().await?;
        sqlx::query(
            "INSERT INTO transfer_files (id, transfer_id, filename, mimetype, md5, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.transfer_id)
        .bind(&record.filename)
        .bind(&record.mimetype)
        .bind(&record.md5)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE transfers SET completed_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(&transfer.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        guard.defuse();
        tracing::info!(
            transfer_id = %transfer.id,
            filename = %record.filename,
            md5 = %record.md5,
            "transfer file committed"
        );

        Ok(record)
    }

    /// Removes a transfer's directory and rows. Used by the purge orphan
    /// policy and the background sweeper.
    pub async fn rollback_transfer(&self, transfer: &Transfer) -> Result<(), CommitError> {
        let dir = self.transfer_dir(&transfer.project_id, &transfer.id);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM transfer_files WHERE transfer_id = ?")
            .bind(&transfer.id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM transfers WHERE id = ?")
            .bind(&transfer.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        tracing::info!(transfer_id = %transfer.id, "transfer rolled back");
        Ok(())
    }

    pub async fn transfers_for_project(
        &self,
        project_id: &str,
    ) -> Result<Vec<Transfer>, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            "SELECT id, project_id, user_id, packaging, created_at, completed_at \
             FROM transfers WHERE project_id = ? ORDER BY created_at DESC",
        )
        .bind(project_id)
        .fetch_all(&self.db)
        .await
    }

    pub async fn find_transfer(
        &self,
        project_id: &str,
        transfer_id: &str,
    ) -> Result<Option<Transfer>, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            "SELECT id, project_id, user_id, packaging, created_at, completed_at \
             FROM transfers WHERE project_id = ? AND id = ?",
        )
        .bind(project_id)
        .bind(transfer_id)
        .fetch_optional(&self.db)
        .await
    }

    pub async fn files_for_transfer(
        &self,
        transfer_id: &str,
    ) -> Result<Vec<TransferFile>, sqlx::Error> {
        sqlx::query_as::<_, TransferFile>(
            "SELECT id, transfer_id, filename, mimetype, md5, created_at \
             FROM transfer_files WHERE transfer_id = ? ORDER BY created_at",
        )
        .bind(transfer_id)
        .fetch_all(&self.db)
        .await
    }

    /// Transfers that never completed and are older than the cutoff.
    pub async fn stale_incomplete_transfers(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Transfer>, sqlx::Error> {
        sqlx::query_as::<_, Transfer>(
            "SELECT id, project_id, user_id, packaging, created_at, completed_at \
             FROM transfers WHERE completed_at IS NULL AND created_at < ?",
        )
        .bind(cutoff)
        .fetch_all(&self.db)
        .await
    }
}
