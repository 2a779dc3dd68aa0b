use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::Result;
use crate::sync::runner::SharedEngine;
use crate::sync::task_queue::QueueStatus;
use crate::sync::{AutoSync, GroupSchedule, GroupingMode, HistoryEntry, TrackedItem};
use crate::web;

/// Full control surface: `/api/*` plus the `/ws` event stream.
pub fn app(engine: SharedEngine) -> Router {
    Router::new()
        .nest("/api", routes())
        .nest("/ws", web::websocket::routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(engine)
}

pub fn routes() -> Router<SharedEngine> {
    Router::new()
        .route("/status", get(get_status))
        .route("/items", post(mark_item).delete(clear_items))
        .route("/items/enabled", post(set_all_enabled))
        .route("/items/:id", delete(unmark_item))
        .route("/items/:id/enabled", post(set_item_enabled))
        .route("/items/:id/category", post(set_item_category))
        .route("/destination", post(set_destination))
        .route("/sync", post(sync_all))
        .route("/sync/group", post(sync_group))
        .route("/queue", post(control_queue))
        .route("/history", get(get_history).delete(clear_history))
        .route("/schedule", post(save_schedule))
        .route("/groups/schedule", post(save_group_schedule))
        .route("/groups/rename", post(rename_group))
}

#[derive(Serialize)]
struct StatusResponse {
    items: Vec<TrackedItem>,
    destination: String,
    auto_sync: AutoSync,
    group_schedules: Vec<GroupSchedule>,
    queue: QueueStatus,
    history_len: usize,
}

fn respond<T>(result: Result<T>, body: impl FnOnce(T) -> Value) -> Json<Value> {
    match result {
        Ok(value) => Json(body(value)),
        Err(e) => Json(json!({"error": e.to_string()})),
    }
}

fn ok() -> Value {
    json!({"status": "ok"})
}

async fn get_status(State(engine): State<SharedEngine>) -> Json<Value> {
    let mut engine = engine.lock().await;
    let queue = engine.queue_status();

    respond(engine.snapshot().await, |state| {
        let status = StatusResponse {
            history_len: state.history.len(),
            items: state.items,
            destination: state.destination_path,
            auto_sync: state.auto_sync,
            group_schedules: state.group_schedules,
            queue,
        };
        serde_json::to_value(status).unwrap_or_else(|e| json!({"error": e.to_string()}))
    })
}

#[derive(Deserialize)]
struct MarkRequest {
    id: String,
    path: String,
}

async fn mark_item(State(engine): State<SharedEngine>, Json(req): Json<MarkRequest>) -> Json<Value> {
    let result = engine.lock().await.mark_item(&req.id, &req.path).await;
    respond(result, |added| json!({"status": "ok", "added": added}))
}

async fn unmark_item(State(engine): State<SharedEngine>, Path(id): Path<String>) -> Json<Value> {
    let result = engine.lock().await.unmark_item(&id).await;
    respond(result, |removed| json!({"status": "ok", "removed": removed}))
}

async fn clear_items(State(engine): State<SharedEngine>) -> Json<Value> {
    let result = engine.lock().await.clear_items().await;
    respond(result, |cleared| json!({"status": "ok", "cleared": cleared}))
}

#[derive(Deserialize)]
struct EnabledRequest {
    enabled: bool,
}

async fn set_item_enabled(
    State(engine): State<SharedEngine>,
    Path(id): Path<String>,
    Json(req): Json<EnabledRequest>,
) -> Json<Value> {
    let result = engine.lock().await.set_item_enabled(&id, req.enabled).await;
    respond(result, |found| {
        if found {
            ok()
        } else {
            json!({"error": format!("Unknown item {}", id)})
        }
    })
}

async fn set_all_enabled(State(engine): State<SharedEngine>, Json(req): Json<EnabledRequest>) -> Json<Value> {
    let result = engine.lock().await.set_all_enabled(req.enabled).await;
    respond(result, |_| ok())
}

#[derive(Deserialize)]
struct CategoryRequest {
    category: String,
}

async fn set_item_category(
    State(engine): State<SharedEngine>,
    Path(id): Path<String>,
    Json(req): Json<CategoryRequest>,
) -> Json<Value> {
    let result = engine.lock().await.set_item_category(&id, &req.category).await;
    respond(result, |found| {
        if found {
            ok()
        } else {
            json!({"error": format!("Unknown item {}", id)})
        }
    })
}

#[derive(Deserialize)]
struct DestinationRequest {
    path: String,
}

async fn set_destination(State(engine): State<SharedEngine>, Json(req): Json<DestinationRequest>) -> Json<Value> {
    let result = engine.lock().await.set_destination(&req.path).await;
    respond(result, |_| ok())
}

#[derive(Deserialize)]
struct SyncRequest {
    #[serde(default)]
    force: bool,
    #[serde(default)]
    silent: bool,
    category: Option<String>,
}

async fn sync_all(State(engine): State<SharedEngine>, Json(req): Json<SyncRequest>) -> Json<Value> {
    let result = engine
        .lock()
        .await
        .sync_all(req.force, req.silent, req.category.as_deref())
        .await;
    respond(result, |queued| json!({"status": "ok", "queued": queued}))
}

#[derive(Deserialize)]
struct GroupSyncRequest {
    key: String,
    mode: GroupingMode,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    silent: bool,
}

async fn sync_group(State(engine): State<SharedEngine>, Json(req): Json<GroupSyncRequest>) -> Json<Value> {
    let result = engine
        .lock()
        .await
        .sync_group(&req.key, req.mode, req.force, req.silent)
        .await;
    respond(result, |queued| json!({"status": "ok", "queued": queued}))
}

#[derive(Deserialize)]
struct QueueRequest {
    action: String,
}

async fn control_queue(State(engine): State<SharedEngine>, Json(req): Json<QueueRequest>) -> Json<Value> {
    let mut engine = engine.lock().await;

    match req.action.as_str() {
        "pause" => engine.pause_queue(),
        "resume" => engine.resume_queue(),
        "cancel" => {
            let dropped = engine.cancel_queue();
            return Json(json!({"status": "ok", "cancelled": dropped}));
        }
        _ => return Json(json!({"error": "Invalid action"})),
    }

    Json(json!({"status": "ok", "queue": engine.queue_status()}))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn get_history(State(engine): State<SharedEngine>, Query(query): Query<HistoryQuery>) -> Json<Value> {
    let result: Result<Vec<HistoryEntry>> = engine.lock().await.history(query.limit).await;
    respond(result, |history| json!({"history": history}))
}

async fn clear_history(State(engine): State<SharedEngine>) -> Json<Value> {
    let result = engine.lock().await.clear_history().await;
    respond(result, |_| ok())
}

#[derive(Deserialize)]
struct ScheduleRequest {
    enabled: bool,
    interval_minutes: u32,
}

async fn save_schedule(State(engine): State<SharedEngine>, Json(req): Json<ScheduleRequest>) -> Json<Value> {
    let result = engine
        .lock()
        .await
        .set_auto_sync(req.enabled, req.interval_minutes)
        .await;
    respond(result, |_| ok())
}

#[derive(Deserialize)]
struct GroupScheduleRequest {
    key: String,
    mode: GroupingMode,
    enabled: bool,
    interval_minutes: u32,
    #[serde(default)]
    destination_override: String,
}

async fn save_group_schedule(
    State(engine): State<SharedEngine>,
    Json(req): Json<GroupScheduleRequest>,
) -> Json<Value> {
    let result = engine
        .lock()
        .await
        .update_group_schedule(
            &req.key,
            req.mode,
            req.enabled,
            req.interval_minutes,
            &req.destination_override,
        )
        .await;
    respond(result, |schedule| json!({"status": "ok", "schedule": schedule}))
}

#[derive(Deserialize)]
struct RenameRequest {
    old: String,
    new: String,
}

async fn rename_group(State(engine): State<SharedEngine>, Json(req): Json<RenameRequest>) -> Json<Value> {
    let result = engine.lock().await.rename_group(&req.old, &req.new).await;
    respond(result, |renamed| json!({"status": "ok", "renamed": renamed}))
}
