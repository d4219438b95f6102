//! Axum router setup.

use axum::extract::State;
use axum::middleware;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::handlers::{conflicts, notes, sync, ws};
use crate::identity::identity_middleware;
use crate::state::AppState;

pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    // Routes that need a caller identity
    let identified = Router::new()
        .route("/api/v1/sync", post(sync::process_sync))
        .route("/api/v1/sync/changes", get(sync::changes))
        .route("/api/v1/sync/manifest", get(sync::manifest))
        .route("/api/v1/sync/diff", post(sync::batch_diff))
        .route("/api/v1/conflicts", get(conflicts::list))
        .route("/api/v1/conflicts/{id}", get(conflicts::get))
        .route("/api/v1/conflicts/{id}/resolve", post(conflicts::resolve))
        .route("/api/v1/notes", get(notes::list).post(notes::create))
        .route(
            "/api/v1/notes/{id}",
            get(notes::get).put(notes::update).delete(notes::delete),
        )
        .route("/api/v1/notes/{id}/versions", get(notes::versions))
        .route(
            "/api/v1/notes/{id}/versions/prune",
            post(notes::prune_versions),
        )
        .route("/api/v1/ws", get(ws::upgrade))
        .layer(middleware::from_fn(identity_middleware));

    let public = Router::new().route("/health", get(health));

    Router::new()
        .merge(identified)
        .merge(public)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.total_connections(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use http_body_util::BodyExt;
    use notevault_common::{Conflict, Note};
    use notevault_storage::{MemoryStore, Stores};
    use std::sync::Arc;
    use tower::ServiceExt;

    fn app() -> Router {
        let config = ServerConfig::default();
        let (state, _dispatcher) = AppState::new(
            Stores::from_backend(Arc::new(MemoryStore::new())),
            config.realtime.clone(),
            config.sync.clone(),
        );
        build_router(state, &config)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", "alice");
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    fn new_note_body() -> Value {
        json!({
            "workspace_id": "ws",
            "type": "file",
            "encrypted_title": "t",
            "encrypted_content": "c",
            "encryption_algo": "xchacha20poly1305",
            "nonce": "n",
            "content_hash": "h1",
            "device_id": "laptop"
        })
    }

    #[tokio::test]
    async fn test_health_is_public() {
        let response = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_missing_identity_is_unauthorized() {
        let response = app()
            .oneshot(Request::get("/api/v1/conflicts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_note_lifecycle_and_conflict_resolution() {
        let app = app();

        let (status, created) = call(&app, Method::POST, "/api/v1/notes", Some(new_note_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        let note: Note = serde_json::from_value(created).unwrap();
        assert_eq!(note.version, 1);
        let uri = format!("/api/v1/notes/{}", note.id);

        let (status, updated) = call(
            &app,
            Method::PUT,
            &uri,
            Some(json!({"device_id": "laptop", "encrypted_content": "c2", "expected_version": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["version"], 2);

        let (status, body) = call(
            &app,
            Method::PUT,
            &uri,
            Some(json!({"device_id": "phone", "encrypted_content": "c3", "expected_version": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        let conflict: Conflict = serde_json::from_value(body["conflict"].clone()).unwrap();
        assert_eq!(conflict.base_version, 1);
        assert_eq!(conflict.server_version, 2);

        let (status, listed) = call(&app, Method::GET, "/api/v1/conflicts", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let resolve_uri = format!("/api/v1/conflicts/{}/resolve", conflict.id);
        let (status, _) = call(&app, Method::POST, &resolve_uri, Some(json!({"strategy": "merge"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, resolved) = call(
            &app,
            Method::POST,
            &resolve_uri,
            Some(json!({"strategy": "client", "device_id": "phone"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(resolved["note"]["version"], 3);
        assert_eq!(resolved["note"]["encrypted_content"], "c3");

        let (status, versions) = call(&app, Method::GET, &format!("{uri}/versions?limit=5"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(versions.as_array().unwrap().len(), 2);

        let (status, deleted) = call(
            &app,
            Method::DELETE,
            &format!("{uri}?device_id=laptop&expected_version=3"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(deleted["is_deleted"], true);
        assert_eq!(deleted["version"], 4);

        let (status, pruned) = call(
            &app,
            Method::POST,
            &format!("{uri}/versions/prune"),
            Some(json!({"keep_last": 1})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(pruned["removed"], 2);
    }

    #[tokio::test]
    async fn test_sync_endpoints() {
        let app = app();
        let (_, created) = call(&app, Method::POST, "/api/v1/notes", Some(new_note_body())).await;
        let id = created["id"].as_str().unwrap().to_string();

        let (status, sync) = call(
            &app,
            Method::POST,
            "/api/v1/sync",
            Some(json!({
                "device_id": "phone",
                "last_sync_time": "2024-01-01T00:00:00Z",
                "note_versions": {}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(sync["changes"].as_array().unwrap().len(), 1);
        assert_eq!(sync["changes"][0]["operation"], "update");
        assert_eq!(sync["has_more"], false);

        let (status, changes) = call(&app, Method::GET, "/api/v1/sync/changes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(changes["changes"].as_array().unwrap().len(), 1);

        let (status, manifest) =
            call(&app, Method::GET, "/api/v1/sync/manifest?workspace_id=ws", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(manifest["notes"][0]["content_hash"], "h1");

        let (status, diff) = call(
            &app,
            Method::POST,
            "/api/v1/sync/diff",
            Some(json!({"local_notes": [{"id": id, "content_hash": "h2", "version": 1}]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(diff["to_upload"][0], id.as_str());
        assert!(diff["conflicts"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_notes_is_scoped_to_caller() {
        let app = app();
        call(&app, Method::POST, "/api/v1/notes", Some(new_note_body())).await;
        call(&app, Method::POST, "/api/v1/notes", Some(new_note_body())).await;

        let response = app
            .clone()
            .oneshot(
                Request::post("/api/v1/notes")
                    .header("x-user-id", "bob")
                    .header("content-type", "application/json")
                    .body(Body::from(new_note_body().to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let (status, notes) = call(&app, Method::GET, "/api/v1/notes", None).await;
        assert_eq!(status, StatusCode::OK);
        let notes = notes.as_array().unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|n| n["owner_id"] == "alice"));
        assert_eq!(notes[0]["encrypted_content"], "c");
    }

    #[tokio::test]
    async fn test_other_users_note_is_forbidden() {
        let app = app();
        let (_, created) = call(&app, Method::POST, "/api/v1/notes", Some(new_note_body())).await;
        let uri = format!("/api/v1/notes/{}", created["id"].as_str().unwrap());

        let response = app
            .clone()
            .oneshot(
                Request::get(uri.as_str())
                    .header("x-user-id", "mallory")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let (status, _) = call(&app, Method::GET, "/api/v1/notes/missing", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
