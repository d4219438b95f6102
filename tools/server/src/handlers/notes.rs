//! Note CRUD and version log handlers.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use notevault_common::{NewNote, Note, NoteId, NotePatch, NoteVersion, UserId};

use crate::error::ApiError;
use crate::handlers::device_or_default;
use crate::state::AppState;

const DEFAULT_VERSION_LIMIT: usize = 50;

pub async fn create(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Json(req): Json<NewNote>,
) -> Result<(StatusCode, Json<Note>), ApiError> {
    let note = state.coordinator.create_note(&user, req).await?;
    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
) -> Result<Json<Vec<Note>>, ApiError> {
    Ok(Json(state.coordinator.list_notes(&user).await?))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<NoteId>,
) -> Result<Json<Note>, ApiError> {
    Ok(Json(state.coordinator.get_note(&user, &id).await?))
}

#[derive(Deserialize)]
pub struct UpdateNoteRequest {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(flatten)]
    pub patch: NotePatch,
}

pub async fn update(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<NoteId>,
    Json(req): Json<UpdateNoteRequest>,
) -> Result<Json<Note>, ApiError> {
    let device = device_or_default(req.device_id)?;
    let note = state
        .coordinator
        .update_note(&user, &id, &device, req.patch)
        .await?;
    Ok(Json(note))
}

#[derive(Deserialize)]
pub struct DeleteQuery {
    pub device_id: Option<String>,
    pub expected_version: Option<i64>,
}

pub async fn delete(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<NoteId>,
    Query(query): Query<DeleteQuery>,
) -> Result<Json<Note>, ApiError> {
    let device = device_or_default(query.device_id)?;
    let note = state
        .coordinator
        .delete_note(&user, &id, &device, query.expected_version)
        .await?;
    Ok(Json(note))
}

#[derive(Deserialize)]
pub struct VersionsQuery {
    pub limit: Option<usize>,
}

pub async fn versions(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<NoteId>,
    Query(query): Query<VersionsQuery>,
) -> Result<Json<Vec<NoteVersion>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_VERSION_LIMIT);
    Ok(Json(state.coordinator.list_versions(&user, &id, limit).await?))
}

#[derive(Deserialize)]
pub struct PruneRequest {
    pub keep_last: usize,
}

#[derive(Serialize)]
pub struct PruneResponse {
    pub removed: usize,
}

pub async fn prune_versions(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<NoteId>,
    Json(req): Json<PruneRequest>,
) -> Result<Json<PruneResponse>, ApiError> {
    let removed = state
        .coordinator
        .prune_versions(&user, &id, req.keep_last)
        .await?;
    Ok(Json(PruneResponse { removed }))
}
