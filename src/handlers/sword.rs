use crate::api::error::DepositError;
use crate::config::OrphanPolicy;
use crate::middleware::auth::AuthUser;
use crate::models::{Project, Transfer, TransferFile};
use crate::services::atom;
use crate::utils::validation::validate_upload;
use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use sqlx::SqlitePool;
use tokio_util::io::{ReaderStream, StreamReader};

/// Projects the user may deposit into. Staff see every project.
async fn accessible_projects(
    db: &SqlitePool,
    user: &crate::models::User,
) -> Result<Vec<Project>, sqlx::Error> {
    if user.is_staff {
        sqlx::query_as::<_, Project>(
            "SELECT id, name, max_upload_size, created_at FROM projects ORDER BY name",
        )
        .fetch_all(db)
        .await
    } else {
        sqlx::query_as::<_, Project>(
            "SELECT p.id, p.name, p.max_upload_size, p.created_at \
             FROM projects p \
             JOIN project_members m ON m.project_id = p.id \
             WHERE m.user_id = ? ORDER BY p.name",
        )
        .bind(&user.id)
        .fetch_all(db)
        .await
    }
}

/// Loads a project and enforces membership: 404 for unknown projects,
/// 403 for authenticated users outside the project.
async fn load_authorized_project(
    db: &SqlitePool,
    user: &crate::models::User,
    project_id: &str,
) -> Result<Project, DepositError> {
    let project = sqlx::query_as::<_, Project>(
        "SELECT id, name, max_upload_size, created_at FROM projects WHERE id = ?",
    )
    .bind(project_id)
    .fetch_optional(db)
    .await?
    .ok_or_else(|| DepositError::NotFound(format!("no such project: {project_id}")))?;

    if user.is_staff {
        return Ok(project);
    }

    let is_member: Option<(i64,)> =
        sqlx::query_as("SELECT 1 FROM project_members WHERE project_id = ? AND user_id = ?")
            .bind(project_id)
            .bind(&user.id)
            .fetch_optional(db)
            .await?;
    if is_member.is_none() {
        return Err(DepositError::Forbidden);
    }

    Ok(project)
}

async fn transfers_with_files(
    state: &crate::AppState,
    project_id: &str,
) -> Result<Vec<(Transfer, Vec<TransferFile>)>, DepositError> {
    let transfers = state.store.transfers_for_project(project_id).await?;
    let mut out = Vec::with_capacity(transfers.len());
    for transfer in transfers {
        let files = state.store.files_for_transfer(&transfer.id).await?;
        out.push((transfer, files));
    }
    Ok(out)
}

fn xml_response(media_type: &'static str, xml: String) -> Response {
    ([(header::CONTENT_TYPE, media_type)], xml).into_response()
}

#[utoipa::path(
    get,
    path = "/api/service",
    responses(
        (status = 200, description = "Atom service document listing the user's collections"),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn service_document(
    State(state): State<crate::AppState>,
    axum::Extension(AuthUser(user)): axum::Extension<AuthUser>,
) -> Result<Response, DepositError> {
    let projects = accessible_projects(&state.db, &user).await?;
    let xml = atom::service_document(&projects)?;
    Ok(xml_response(atom::SERVICE_MEDIA_TYPE, xml))
}

#[utoipa::path(
    get,
    path = "/api/collection/{project_id}",
    params(("project_id" = String, Path, description = "Project ID")),
    responses(
        (status = 200, description = "Atom feed of the project's transfers"),
        (status = 401, description = "Unauthenticated"),
        (status = 403, description = "Not a project member"),
        (status = 404, description = "Unknown project")
    )
)]
pub async fn collection(
    State(state): State<crate::AppState>,
    axum::Extension(AuthUser(user)): axum::Extension<AuthUser>,
    Path(project_id): Path<String>,
) -> Result<Response, DepositError> {
    let project = load_authorized_project(&state.db, &user, &project_id).await?;
    let entries = transfers_with_files(&state, &project.id).await?;
    let xml = atom::collection_feed(&project, &entries)?;
    Ok(xml_response(atom::ATOM_MEDIA_TYPE, xml))
}

#[utoipa::path(
    post,
    path = "/api/collection/{project_id}",
    params(("project_id" = String, Path, description = "Project ID")),
    request_body(content = Vec<u8>, content_type = "application/zip",
        description = "Package bytes; Content-MD5, Content-Disposition and X-Packaging headers required"),
    responses(
        (status = 201, description = "Transfer created; Location points at the entry"),
        (status = 411, description = "Content-Length missing or invalid"),
        (status = 412, description = "Disposition/checksum precondition failed"),
        (status = 413, description = "Declared length exceeds the project limit"),
        (status = 415, description = "Media type or packaging not accepted")
    )
)]
pub async fn deposit(
    State(state): State<crate::AppState>,
    axum::Extension(AuthUser(user)): axum::Extension<AuthUser>,
    Path(project_id): Path<String>,
    req: Request,
) -> Result<Response, DepositError> {
    let project = load_authorized_project(&state.db, &user, &project_id).await?;

    // Header validation happens before the body is polled: oversized or
    // malformed requests are refused without reading a single byte.
    let max = state
        .config
        .effective_max_upload_size(project.max_upload_size);
    let intent = validate_upload(req.headers(), max)?;

    let body_stream = req.into_body().into_data_stream();
    let mut reader = StreamReader::new(body_stream.map_err(std::io::Error::other));

    let transfer = state
        .store
        .begin_transfer(&project.id, &user.id, intent.packaging)
        .await?;

    let commit = tokio::time::timeout(
        state.config.upload_timeout,
        state.store.commit_file(
            &transfer,
            &intent.filename,
            &intent.content_type,
            &intent.expected_md5,
            &mut reader,
            intent.declared_length,
        ),
    )
    .await;

    let file = match commit {
        Ok(Ok(file)) => file,
        Ok(Err(e)) => {
            abandon_transfer(&state, &transfer).await;
            return Err(e.into());
        }
        Err(_elapsed) => {
            // The dropped commit future already removed the partial file.
            abandon_transfer(&state, &transfer).await;
            return Err(DepositError::UploadTimeout);
        }
    };

    let transfer = state
        .store
        .find_transfer(&project.id, &transfer.id)
        .await?
        .unwrap_or(transfer);
    let xml = atom::transfer_entry(&project, &transfer, std::slice::from_ref(&file))?;

    Ok((
        StatusCode::CREATED,
        [
            (header::CONTENT_TYPE, atom::ATOM_MEDIA_TYPE.to_string()),
            (
                header::LOCATION,
                atom::entry_href(&project.id, &transfer.id),
            ),
        ],
        xml,
    )
        .into_response())
}

/// Applies the configured orphan policy after a failed commit.
async fn abandon_transfer(state: &crate::AppState, transfer: &Transfer) {
    match state.config.orphan_policy {
        OrphanPolicy::Retain => {
            tracing::debug!(transfer_id = %transfer.id, "retaining incomplete transfer");
        }
        OrphanPolicy::Purge => {
            if let Err(e) = state.store.rollback_transfer(transfer).await {
                tracing::error!(transfer_id = %transfer.id, "purge after failed commit: {}", e);
            }
        }
    }
}

#[utoipa::path(
    get,
    path = "/api/collection/{project_id}/{transfer_id}",
    params(
        ("project_id" = String, Path, description = "Project ID"),
        ("transfer_id" = String, Path, description = "Transfer ID")
    ),
    responses(
        (status = 200, description = "Atom entry for the transfer"),
        (status = 404, description = "Unknown project or transfer")
    )
)]
pub async fn entry(
    State(state): State<crate::AppState>,
    axum::Extension(AuthUser(user)): axum::Extension<AuthUser>,
    Path((project_id, transfer_id)): Path<(String, String)>,
) -> Result<Response, DepositError> {
    let project = load_authorized_project(&state.db, &user, &project_id).await?;
    let transfer = state
        .store
        .find_transfer(&project.id, &transfer_id)
        .await?
        .ok_or_else(|| DepositError::NotFound(format!("no such transfer: {transfer_id}")))?;
    let files = state.store.files_for_transfer(&transfer.id).await?;
    let xml = atom::transfer_entry(&project, &transfer, &files)?;
    Ok(xml_response(atom::ATOM_MEDIA_TYPE, xml))
}

#[utoipa::path(
    get,
    path = "/api/collection/{project_id}/{transfer_id}/package",
    params(
        ("project_id" = String, Path, description = "Project ID"),
        ("transfer_id" = String, Path, description = "Transfer ID")
    ),
    responses(
        (status = 200, description = "Stored package bytes with their recorded mimetype"),
        (status = 404, description = "No package stored yet"),
        (status = 501, description = "Multi-file packages are unsupported")
    )
)]
pub async fn package(
    State(state): State<crate::AppState>,
    axum::Extension(AuthUser(user)): axum::Extension<AuthUser>,
    Path((project_id, transfer_id)): Path<(String, String)>,
) -> Result<Response, DepositError> {
    let project = load_authorized_project(&state.db, &user, &project_id).await?;
    let transfer = state
        .store
        .find_transfer(&project.id, &transfer_id)
        .await?
        .ok_or_else(|| DepositError::NotFound(format!("no such transfer: {transfer_id}")))?;

    let files = state.store.files_for_transfer(&transfer.id).await?;
    let file = match files.as_slice() {
        [] => {
            return Err(DepositError::NotFound(
                "no package stored for this transfer".to_string(),
            ));
        }
        [file] => file,
        _ => {
            return Err(DepositError::NotImplemented(
                "multi-file packages are not supported".to_string(),
            ));
        }
    };

    let path = state.store.file_path(&transfer, &file.filename);
    let handle = tokio::fs::File::open(&path).await.map_err(|e| {
        tracing::error!("stored package missing at {}: {}", path.display(), e);
        DepositError::Internal(anyhow::anyhow!("stored package unavailable"))
    })?;

    let body = Body::from_stream(ReaderStream::new(handle));
    Ok((
        [
            (header::CONTENT_TYPE, file.mimetype.clone()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", file.filename),
            ),
        ],
        body,
    )
        .into_response())
}
