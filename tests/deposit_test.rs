mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use common::{add_member, basic, seed_project, seed_user, spawn_app};
use futures::StreamExt;
use http_body_util::BodyExt;
use sword_deposit::config::{DepositConfig, OrphanPolicy};
use sword_deposit::utils::validation::BAGIT_PACKAGING_URI;
use tower::ServiceExt;

const FOOBAR_MD5: &str = "3858f62230ac3c915f300c664312c63f";

fn deposit_request(
    project_id: &str,
    auth: &str,
    filename: &str,
    md5: &str,
    body: &'static str,
) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(format!("/api/collection/{project_id}"))
        .header(header::AUTHORIZATION, auth)
        .header(header::CONTENT_TYPE, "application/zip")
        .header("Content-MD5", md5)
        .header(header::CONTENT_LENGTH, body.len().to_string())
        .header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename={filename}"),
        )
        .header("X-Packaging", BAGIT_PACKAGING_URI)
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_deposit_end_to_end() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;
    let auth = basic("jane", "jane");

    let response = t
        .app
        .clone()
        .oneshot(deposit_request(
            &project_id,
            &auth,
            "foobar.zip",
            FOOBAR_MD5,
            "foobar",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);

    let location = response.headers()[header::LOCATION]
        .to_str()
        .unwrap()
        .to_string();
    let transfer_id = location.rsplit('/').next().unwrap().to_string();
    assert_eq!(location, format!("/api/collection/{project_id}/{transfer_id}"));

    let body = response.into_body().collect().await.unwrap().to_bytes();
    let xml = String::from_utf8(body.to_vec()).unwrap();
    assert!(xml.contains(&format!("urn:uuid:{transfer_id}")));
    assert!(xml.contains("foobar.zip"));

    // Bytes landed at the deterministic storage path
    let stored = t
        .storage
        .path()
        .join(&project_id)
        .join(&transfer_id)
        .join("foobar.zip");
    assert_eq!(std::fs::read(&stored).unwrap(), b"foobar");

    // And the package can be streamed back with its recorded mimetype
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!(
                    "/api/collection/{project_id}/{transfer_id}/package"
                ))
                .header(header::AUTHORIZATION, &auth)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/zip"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"foobar");
}

#[tokio::test]
async fn test_deposit_checksum_mismatch_leaves_no_file() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let response = t
        .app
        .clone()
        .oneshot(deposit_request(
            &project_id,
            &basic("jane", "jane"),
            "foobar.zip",
            "00000000000000000000000000000000",
            "foobar",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    // No file anywhere beneath the project directory
    let project_dir = t.storage.path().join(&project_id);
    if project_dir.exists() {
        for entry in walk(&project_dir) {
            assert!(entry.is_dir(), "unexpected leftover file: {entry:?}");
        }
    }

    // No TransferFile row was ever committed
    let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_files")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(file_count, 0);

    // Default policy retains the incomplete transfer row
    let transfer_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(transfer_count, 1);
}

#[tokio::test]
async fn test_deposit_checksum_mismatch_purge_policy() {
    let config = DepositConfig {
        orphan_policy: OrphanPolicy::Purge,
        ..DepositConfig::default()
    };
    let t = spawn_app(config).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let response = t
        .app
        .clone()
        .oneshot(deposit_request(
            &project_id,
            &basic("jane", "jane"),
            "foobar.zip",
            "00000000000000000000000000000000",
            "foobar",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let transfer_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(transfer_count, 0);

    // The transfer directory was removed with the row
    let project_dir = t.storage.path().join(&project_id);
    assert!(
        !project_dir.exists() || std::fs::read_dir(&project_dir).unwrap().next().is_none()
    );
}

#[tokio::test]
async fn test_deposit_too_large_reads_nothing() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    // Project cap of 4 bytes, smaller than the 6-byte payload
    let project_id = seed_project(&t.db, "NDIIPP", Some(4)).await;
    add_member(&t.db, &project_id, &user_id).await;

    let response = t
        .app
        .clone()
        .oneshot(deposit_request(
            &project_id,
            &basic("jane", "jane"),
            "foobar.zip",
            FOOBAR_MD5,
            "foobar",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);

    // Refused before begin_transfer: no row, no directory
    let transfer_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(transfer_count, 0);
    assert!(!t.storage.path().join(&project_id).exists());
}

#[tokio::test]
async fn test_deposit_wrong_media_type() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let mut request = deposit_request(
        &project_id,
        &basic("jane", "jane"),
        "foobar.zip",
        FOOBAR_MD5,
        "foobar",
    );
    request
        .headers_mut()
        .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    assert!(!t.storage.path().join(&project_id).exists());
}

#[tokio::test]
async fn test_deposit_missing_checksum() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let mut request = deposit_request(
        &project_id,
        &basic("jane", "jane"),
        "foobar.zip",
        FOOBAR_MD5,
        "foobar",
    );
    request.headers_mut().remove("Content-MD5");

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
}

#[tokio::test]
async fn test_deposit_missing_content_length() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let mut request = deposit_request(
        &project_id,
        &basic("jane", "jane"),
        "foobar.zip",
        FOOBAR_MD5,
        "foobar",
    );
    request.headers_mut().remove(header::CONTENT_LENGTH);

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::LENGTH_REQUIRED);
}

#[tokio::test]
async fn test_deposit_unknown_packaging() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let mut request = deposit_request(
        &project_id,
        &basic("jane", "jane"),
        "foobar.zip",
        FOOBAR_MD5,
        "foobar",
    );
    request.headers_mut().insert(
        "X-Packaging",
        "http://purl.org/net/sword-types/mets".parse().unwrap(),
    );

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_deposit_traversal_filename() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    for filename in ["../../etc/passwd", "/etc/passwd"] {
        let response = t
            .app
            .clone()
            .oneshot(deposit_request(
                &project_id,
                &basic("jane", "jane"),
                filename,
                FOOBAR_MD5,
                "foobar",
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);
    }

    // Rejected before any storage path was touched
    assert!(!t.storage.path().join(&project_id).exists());
}

#[tokio::test]
async fn test_deposit_nested_filename_creates_subdirectory() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    let response = t
        .app
        .clone()
        .oneshot(deposit_request(
            &project_id,
            &basic("jane", "jane"),
            "foo/bar.zip",
            FOOBAR_MD5,
            "foobar",
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response.headers()[header::LOCATION].to_str().unwrap();
    let transfer_id = location.rsplit('/').next().unwrap();

    let stored = t
        .storage
        .path()
        .join(&project_id)
        .join(transfer_id)
        .join("foo")
        .join("bar.zip");
    assert_eq!(std::fs::read(&stored).unwrap(), b"foobar");
}

#[tokio::test]
async fn test_deposit_truncated_body() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    // Declares 10 bytes but the body carries only 6
    let mut request = deposit_request(
        &project_id,
        &basic("jane", "jane"),
        "foobar.zip",
        FOOBAR_MD5,
        "foobar",
    );
    request
        .headers_mut()
        .insert(header::CONTENT_LENGTH, "10".parse().unwrap());

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PRECONDITION_FAILED);

    let file_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfer_files")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(file_count, 0);
}

#[tokio::test]
async fn test_stalled_upload_times_out_without_partial_file() {
    let config = DepositConfig {
        upload_timeout: std::time::Duration::from_millis(100),
        ..DepositConfig::default()
    };
    let t = spawn_app(config).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    // 3 of 6 declared bytes arrive, then the stream stalls forever
    let stream = futures::stream::iter([Ok::<&'static [u8], std::io::Error>(b"foo")])
        .chain(futures::stream::pending());
    let request = Request::builder()
        .method("POST")
        .uri(format!("/api/collection/{project_id}"))
        .header(header::AUTHORIZATION, basic("jane", "jane"))
        .header(header::CONTENT_TYPE, "application/zip")
        .header("Content-MD5", FOOBAR_MD5)
        .header(header::CONTENT_LENGTH, "6")
        .header(
            header::CONTENT_DISPOSITION,
            "attachment; filename=foobar.zip",
        )
        .header("X-Packaging", BAGIT_PACKAGING_URI)
        .body(Body::from_stream(stream))
        .unwrap();

    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

    // The dropped commit removed the partial file; only directories remain
    let project_dir = t.storage.path().join(&project_id);
    if project_dir.exists() {
        for entry in walk(&project_dir) {
            assert!(entry.is_dir(), "unexpected leftover file: {entry:?}");
        }
    }

    // Default policy keeps the incomplete transfer row
    let transfer_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM transfers")
        .fetch_one(&t.db)
        .await
        .unwrap();
    assert_eq!(transfer_count, 1);
}

#[tokio::test]
async fn test_rejection_is_idempotent() {
    let t = spawn_app(DepositConfig::default()).await;
    let user_id = seed_user(&t.db, "jane", "jane", false).await;
    let project_id = seed_project(&t.db, "NDIIPP", None).await;
    add_member(&t.db, &project_id, &user_id).await;

    for _ in 0..2 {
        let mut request = deposit_request(
            &project_id,
            &basic("jane", "jane"),
            "foobar.zip",
            FOOBAR_MD5,
            "foobar",
        );
        request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "text/plain".parse().unwrap());
        let response = t.app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}

fn walk(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            out.push(path.clone());
            out.extend(walk(&path));
        } else {
            out.push(path);
        }
    }
    out
}
