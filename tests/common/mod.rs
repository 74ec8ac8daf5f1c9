#![allow(dead_code)]

use argon2::{
    Argon2,
    password_hash::{PasswordHasher, SaltString, rand_core::OsRng},
};
use axum::Router;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use sword_deposit::config::DepositConfig;
use sword_deposit::services::transfer_store::TransferStore;
use sword_deposit::{AppState, create_app};
use tempfile::TempDir;
use uuid::Uuid;

pub struct TestApp {
    pub app: Router,
    pub db: SqlitePool,
    pub store: Arc<TransferStore>,
    // Held so the storage root outlives the test
    pub storage: TempDir,
}

pub async fn spawn_app(mut config: DepositConfig) -> TestApp {
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&db).await.unwrap();

    let storage = TempDir::new().unwrap();
    config.storage_root = storage.path().to_path_buf();

    let store = Arc::new(TransferStore::new(db.clone(), storage.path().to_path_buf()));
    let state = AppState {
        db: db.clone(),
        store: store.clone(),
        config,
    };

    TestApp {
        app: create_app(state),
        db,
        store,
        storage,
    }
}

pub async fn seed_user(db: &SqlitePool, username: &str, password: &str, is_staff: bool) -> String {
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .unwrap()
        .to_string();

    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO users (id, username, password_hash, is_staff) VALUES (?, ?, ?, ?)")
        .bind(&id)
        .bind(username)
        .bind(password_hash)
        .bind(is_staff)
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn seed_project(db: &SqlitePool, name: &str, max_upload_size: Option<i64>) -> String {
    let id = Uuid::new_v4().to_string();
    sqlx::query("INSERT INTO projects (id, name, max_upload_size) VALUES (?, ?, ?)")
        .bind(&id)
        .bind(name)
        .bind(max_upload_size)
        .execute(db)
        .await
        .unwrap();
    id
}

pub async fn add_member(db: &SqlitePool, project_id: &str, user_id: &str) {
    sqlx::query("INSERT INTO project_members (project_id, user_id) VALUES (?, ?)")
        .bind(project_id)
        .bind(user_id)
        .execute(db)
        .await
        .unwrap();
}

pub fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}
