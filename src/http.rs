use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::error::StationError;
use crate::ingest::{import_local, ImportRequest};
use crate::model::{parse_timestamp, MediaItem, ScheduleEntry, StatusResponse};
use crate::station::{MediaUpdate, NewMedia, Station};

type AppState = Arc<Station>;
type ApiResult<T> = Result<T, StationError>;
type JsonValue = Json<serde_json::Value>;

impl IntoResponse for StationError {
    fn into_response(self) -> Response {
        let code = match &self {
            StationError::MediaNotFound(_) | StationError::ScheduleEntryNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            StationError::Storage(e) => {
                error!("storage failure: {e:#}");
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        };
        (code, Json(json!({"ok": false, "error": self.to_string()}))).into_response()
    }
}

pub fn build_router(station: Arc<Station>) -> Router {
    let media = ServeDir::new(&station.config().media_dir);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/v1/status", get(status))
        .route("/api/v1/heartbeat", post(heartbeat))
        .route("/api/v1/library", get(library).post(library_add))
        .route("/api/v1/library/import", post(library_import))
        .route("/api/v1/library/:id", patch(library_update).delete(library_remove))
        .route("/api/v1/queue/add", post(queue_add))
        .route("/api/v1/queue/remove", post(queue_remove))
        .route("/api/v1/queue/reorder", post(queue_reorder))
        .route("/api/v1/schedule", get(schedule_list).post(schedule_add))
        .route("/api/v1/schedule/:id", delete(schedule_remove))
        .route("/api/v1/vote", post(vote))
        .route("/api/v1/transport/skip", post(transport_skip))
        .route("/api/v1/danger/clear_queue", post(danger_clear_queue))
        .route("/api/v1/danger/force_next", post(danger_force_next))
        .nest_service("/media", media)
        .layer(TraceLayer::new_for_http())
        .with_state(station)
}

#[derive(Debug, Deserialize)]
struct StatusQuery {
    listener: Option<String>,
}

async fn status(
    State(station): State<AppState>,
    Query(q): Query<StatusQuery>,
) -> Json<StatusResponse> {
    Json(station.status(q.listener.as_deref()).await)
}

#[derive(Debug, Deserialize)]
struct HeartbeatReq {
    listener_id: String,
}

async fn heartbeat(
    State(station): State<AppState>,
    Json(req): Json<HeartbeatReq>,
) -> ApiResult<JsonValue> {
    let listeners = station.heartbeat(&req.listener_id).await?;
    Ok(Json(json!({"ok": true, "listeners": listeners})))
}

// --- Library ----------------------------------------------------------------

async fn library(State(station): State<AppState>) -> Json<Vec<MediaItem>> {
    Json(station.library().await)
}

async fn library_add(
    State(station): State<AppState>,
    Json(req): Json<NewMedia>,
) -> ApiResult<(StatusCode, Json<MediaItem>)> {
    let item = station.add_item(req).await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn library_import(
    State(station): State<AppState>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<(StatusCode, JsonValue)> {
    // The probe runs detached; the item shows up in the library when it is done.
    import_local(station, req).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({"ok": true, "status": "processing"}))))
}

async fn library_update(
    State(station): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MediaUpdate>,
) -> ApiResult<Json<MediaItem>> {
    Ok(Json(station.update_item(&id, req).await?))
}

async fn library_remove(
    State(station): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<JsonValue> {
    let removed = station.remove_item(&id).await?;
    Ok(Json(json!({"ok": true, "id": removed.id})))
}

// --- Queue ------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct QueueIdReq {
    id: String,
}

#[derive(Debug, Deserialize)]
struct QueueReorderReq {
    order: Vec<String>,
}

async fn queue_add(
    State(station): State<AppState>,
    Json(req): Json<QueueIdReq>,
) -> ApiResult<JsonValue> {
    station.enqueue(&req.id).await?;
    Ok(Json(json!({"ok": true})))
}

async fn queue_remove(
    State(station): State<AppState>,
    Json(req): Json<QueueIdReq>,
) -> ApiResult<JsonValue> {
    let removed = station.dequeue(&req.id).await?;
    Ok(Json(json!({"ok": true, "removed": removed})))
}

async fn queue_reorder(
    State(station): State<AppState>,
    Json(req): Json<QueueReorderReq>,
) -> ApiResult<JsonValue> {
    let queue = station.reorder_queue(req.order).await?;
    Ok(Json(json!({"ok": true, "queue": queue})))
}

// --- Schedule ---------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ScheduleReq {
    media_id: String,
    /// UNIX seconds or RFC 3339.
    run_at: serde_json::Value,
}

async fn schedule_list(State(station): State<AppState>) -> Json<Vec<ScheduleEntry>> {
    Json(station.schedule().await)
}

async fn schedule_add(
    State(station): State<AppState>,
    Json(req): Json<ScheduleReq>,
) -> ApiResult<(StatusCode, Json<ScheduleEntry>)> {
    let run_at = parse_timestamp(&req.run_at)
        .ok_or_else(|| StationError::InvalidRunAt(req.run_at.to_string()))?;
    let entry = station.add_schedule_entry(&req.media_id, run_at).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn schedule_remove(
    State(station): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<JsonValue> {
    station.remove_schedule_entry(&id).await?;
    Ok(Json(json!({"ok": true})))
}

// --- Votes & transport ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct VoteReq {
    track_id: String,
    listener_id: String,
    rating: i64,
}

async fn vote(State(station): State<AppState>, Json(req): Json<VoteReq>) -> ApiResult<JsonValue> {
    let vote = station.record_vote(&req.track_id, &req.listener_id, req.rating).await?;
    Ok(Json(json!({"ok": true, "rating": vote.rating})))
}

async fn transport_skip(State(station): State<AppState>) -> ApiResult<JsonValue> {
    station.skip().await?;
    Ok(Json(json!({"ok": true})))
}

async fn danger_clear_queue(State(station): State<AppState>) -> ApiResult<JsonValue> {
    station.clear_queue().await?;
    Ok(Json(json!({"ok": true})))
}

async fn danger_force_next(State(station): State<AppState>) -> ApiResult<JsonValue> {
    station.force_next().await?;
    Ok(Json(json!({"ok": true})))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::tests::{music, test_config};

    #[test]
    fn errors_map_to_http_status() {
        let status = |e: StationError| e.into_response().status();
        assert_eq!(status(StationError::MediaNotFound("x".into())), StatusCode::NOT_FOUND);
        assert_eq!(status(StationError::InvalidRating(9)), StatusCode::BAD_REQUEST);
        assert_eq!(status(StationError::MissingListener), StatusCode::BAD_REQUEST);
        assert_eq!(status(StationError::Tombstoned("a.mp3".into())), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(StationError::Storage(anyhow::anyhow!("disk full"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn schedule_handler_accepts_rfc3339() {
        let station = Station::open(test_config()).await.unwrap();
        let a = station.add_item(music("a", 5.0)).await.unwrap();

        let req = ScheduleReq { media_id: a.id.clone(), run_at: json!("2030-01-01T00:00:00Z") };
        let (code, Json(entry)) = schedule_add(State(station.clone()), Json(req)).await.unwrap();
        assert_eq!(code, StatusCode::CREATED);
        assert_eq!(entry.run_at, 1_893_456_000.0);

        let bad = ScheduleReq { media_id: a.id, run_at: json!("whenever") };
        assert!(matches!(
            schedule_add(State(station), Json(bad)).await,
            Err(StationError::InvalidRunAt(_))
        ));
    }

    #[tokio::test]
    async fn router_builds_with_state() {
        let station = Station::open(test_config()).await.unwrap();
        let _router = build_router(station);
    }
}
