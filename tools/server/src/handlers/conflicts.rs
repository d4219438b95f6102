//! Conflict handlers.

use axum::extract::{Path, Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};

use notevault_common::{Conflict, ConflictId, Note, NoteId, NotePatch, ResolutionStrategy, UserId};

use crate::error::ApiError;
use crate::handlers::device_or_default;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub note_id: Option<NoteId>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Conflict>>, ApiError> {
    let conflicts = match query.note_id {
        Some(note) => state.resolver.list_note_conflicts(&user, &note).await?,
        None => state.resolver.list_conflicts(&user).await?,
    };
    Ok(Json(conflicts))
}

pub async fn get(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<ConflictId>,
) -> Result<Json<Conflict>, ApiError> {
    Ok(Json(state.resolver.get_conflict(&user, &id).await?))
}

#[derive(Deserialize)]
pub struct ResolveRequest {
    pub strategy: String,
    #[serde(default)]
    pub note_data: Option<NotePatch>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Serialize)]
pub struct ResolveResponse {
    pub message: &'static str,
    pub note: Note,
}

pub async fn resolve(
    State(state): State<AppState>,
    Extension(user): Extension<UserId>,
    Path(id): Path<ConflictId>,
    Json(req): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, ApiError> {
    let strategy: ResolutionStrategy = req.strategy.parse()?;
    let device = device_or_default(req.device_id)?;
    let note = state
        .resolver
        .apply_resolution(&user, &id, strategy, req.note_data, &device)
        .await?;
    Ok(Json(ResolveResponse {
        message: "conflict resolved",
        note,
    }))
}
