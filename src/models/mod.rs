use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub is_staff: bool,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// Per-project upload cap in bytes. NULL falls back to the global limit.
    pub max_upload_size: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Transfer {
    pub id: String,
    pub project_id: String,
    pub user_id: String,
    pub packaging: String,
    pub created_at: Option<DateTime<Utc>>,
    /// Set once the package file is fully written and checksum-verified.
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct TransferFile {
    pub id: String,
    pub transfer_id: String,
    /// Relative path beneath the transfer directory. Never absolute, never
    /// contains parent-directory segments.
    pub filename: String,
    pub mimetype: String,
    pub md5: String,
    pub created_at: Option<DateTime<Utc>>,
}
