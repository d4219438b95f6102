//! Delta sync handlers.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use notevault_common::{NoteChange, UserId, WorkspaceId};
use notevault_realtime::{SyncRequestPayload, SyncResponsePayload};
use notevault_sync::{BatchDiffRequest, BatchDiffResponse, Manifest};

use crate::error::ApiError;
use crate::state::AppState;

pub async fn process_sync(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Json(req): Json<SyncRequestPayload>,
) -> Result<Json<SyncResponsePayload>, ApiError> {
    let response = state
        .coordinator
        .process_cursor_sync(&user, &req.device_id, &req.note_versions)
        .await?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct ChangesQuery {
    pub since: Option<DateTime<Utc>>,
}

#[derive(Serialize)]
pub struct ChangesResponse {
    pub changes: Vec<NoteChange>,
    pub sync_time: DateTime<Utc>,
}

pub async fn changes(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Query(query): Query<ChangesQuery>,
) -> Result<Json<ChangesResponse>, ApiError> {
    let since = query.since.unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
    let changes = state.coordinator.get_changes_since(&user, since).await?;
    Ok(Json(ChangesResponse {
        changes,
        sync_time: Utc::now(),
    }))
}

#[derive(Deserialize)]
pub struct ManifestQuery {
    pub workspace_id: Option<String>,
}

pub async fn manifest(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Query(query): Query<ManifestQuery>,
) -> Result<Json<Manifest>, ApiError> {
    let workspace = query
        .workspace_id
        .filter(|w| !w.is_empty())
        .map(WorkspaceId::new)
        .transpose()?;
    let manifest = state
        .coordinator
        .get_manifest(&user, workspace.as_ref())
        .await?;
    Ok(Json(manifest))
}

pub async fn batch_diff(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Json(req): Json<BatchDiffRequest>,
) -> Result<Json<BatchDiffResponse>, ApiError> {
    let diff = state.coordinator.process_batch_diff(&user, &req).await?;
    Ok(Json(diff))
}
