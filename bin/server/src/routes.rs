//! Control verbs and the event streaming channel.
//!
//! Every verb is an HTTP POST with a JSON body; the streaming channel is a
//! WebSocket that sends one JSON-encoded event per message. Inbound WebSocket
//! frames are treated as keep-alives; disconnection removes the client from
//! the bus.

use crate::error::ApiError;
use crate::state::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::{any, post};
use axum::{Json, Router};
use cascade_core::ExecutionId;
use cascade_events::EventFilter;
use cascade_workflow::Workflow;
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue, json};
use tokio::sync::mpsc;

/// Builds the control-surface router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ping", post(ping))
        .route("/schema", post(schema))
        .route("/shutdown", post(shutdown))
        .route("/workflow/add", post(add_workflow))
        .route("/workflow/remove", post(remove_workflow))
        .route("/workflow/get", post(get_workflow))
        .route("/workflow/list", post(list_workflows))
        .route("/workflow/start", post(start_workflow))
        .route("/workflow/exec_list", post(exec_list))
        .route("/workflow/exec_state", post(exec_state))
        .route("/workflow/exec_cancel", post(exec_cancel))
        .route("/workflow/exec_input", post(exec_input))
        .route("/workflow/events", any(events_ws))
        .with_state(state)
}

async fn ping() -> Json<JsonValue> {
    Json(json!({
        "message": "pong",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

async fn schema(State(state): State<AppState>) -> Json<JsonValue> {
    Json(state.engine.catalog().describe())
}

async fn shutdown(State(state): State<AppState>) -> Json<JsonValue> {
    state.engine.cancel_all();
    state.shutdown.cancel();
    Json(json!({
        "status": "shutting_down",
        "message": "server shut down",
    }))
}

#[derive(Debug, Deserialize)]
struct AddRequest {
    workflow: Workflow,
    #[serde(default)]
    name: Option<String>,
}

async fn add_workflow(
    State(state): State<AppState>,
    Json(request): Json<AddRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let name = state
        .registry
        .add(request.workflow, request.name.as_deref())?;
    Ok(Json(json!({"name": name, "status": "added"})))
}

#[derive(Debug, Default, Deserialize)]
struct NameRequest {
    #[serde(default)]
    name: Option<String>,
}

async fn remove_workflow(
    State(state): State<AppState>,
    Json(request): Json<NameRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    match request.name.as_deref() {
        Some(name) => {
            if !state.registry.remove(Some(name)) {
                return Err(ApiError::not_found(format!("workflow '{name}' not found")));
            }
            Ok(Json(json!({"name": name, "status": "removed"})))
        }
        None => {
            state.registry.remove(None);
            Ok(Json(json!({"name": JsonValue::Null, "status": "cleared"})))
        }
    }
}

async fn get_workflow(
    State(state): State<AppState>,
    Json(request): Json<NameRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    match request.name.as_deref() {
        Some(name) => {
            let workflow = state
                .registry
                .get(name)
                .ok_or_else(|| ApiError::not_found(format!("workflow '{name}' not found")))?;
            Ok(Json(json!({"name": name, "workflow": workflow})))
        }
        None => {
            let workflows: Map<String, JsonValue> = state
                .registry
                .get_all()
                .into_iter()
                .map(|(name, workflow)| {
                    (name, serde_json::to_value(workflow).unwrap_or(JsonValue::Null))
                })
                .collect();
            Ok(Json(json!({"workflows": workflows})))
        }
    }
}

async fn list_workflows(State(state): State<AppState>) -> Json<JsonValue> {
    Json(json!({"names": state.registry.list()}))
}

#[derive(Debug, Deserialize)]
struct StartRequest {
    name: String,
    #[serde(default)]
    initial_data: Option<Map<String, JsonValue>>,
}

async fn start_workflow(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let prepared = state.registry.implementation(&request.name).ok_or_else(|| {
        ApiError::not_found(format!("workflow '{}' not found", request.name))
    })?;

    let execution_id = state.engine.start(
        prepared.workflow,
        prepared.backend,
        prepared.handles,
        request.initial_data.unwrap_or_default(),
    )?;

    Ok(Json(json!({
        "execution_id": execution_id.to_string(),
        "status": "started",
    })))
}

async fn exec_list(State(state): State<AppState>) -> Json<JsonValue> {
    let execution_ids: Vec<String> = state
        .engine
        .list()
        .into_iter()
        .map(|exec| exec.execution_id.to_string())
        .collect();
    Json(json!({"execution_ids": execution_ids}))
}

#[derive(Debug, Default, Deserialize)]
struct ExecRequest {
    #[serde(default)]
    execution_id: Option<String>,
}

fn parse_execution_id(raw: &str) -> Result<ExecutionId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::not_found(format!("execution '{raw}' not found")))
}

async fn exec_state(
    State(state): State<AppState>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    match request.execution_id.as_deref() {
        Some(raw) => {
            let execution_id = parse_execution_id(raw)?;
            let exec = state
                .engine
                .status(execution_id)
                .ok_or_else(|| ApiError::not_found(format!("execution '{raw}' not found")))?;
            Ok(Json(json!({"execution_id": raw, "state": exec})))
        }
        None => Ok(Json(json!({"executions": state.engine.list()}))),
    }
}

async fn exec_cancel(
    State(state): State<AppState>,
    Json(request): Json<ExecRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    match request.execution_id.as_deref() {
        Some(raw) => {
            let execution_id = parse_execution_id(raw)?;
            let exec = state.engine.cancel(execution_id)?;
            Ok(Json(json!({
                "execution_id": raw,
                "status": "cancelled",
                "state": exec,
            })))
        }
        None => {
            state.engine.cancel_all();
            Ok(Json(json!({
                "execution_id": JsonValue::Null,
                "status": "cancelled",
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
struct InputRequest {
    execution_id: String,
    node_id: String,
    input_data: JsonValue,
}

async fn exec_input(
    State(state): State<AppState>,
    Json(request): Json<InputRequest>,
) -> Result<Json<JsonValue>, ApiError> {
    let execution_id = parse_execution_id(&request.execution_id)?;
    state
        .engine
        .provide_user_input(execution_id, &request.node_id, request.input_data)?;
    Ok(Json(json!({"status": "input_received"})))
}

#[derive(Debug, Default, Deserialize)]
struct EventsParams {
    #[serde(default)]
    execution_id: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
}

async fn events_ws(
    ws: WebSocketUpgrade,
    Query(params): Query<EventsParams>,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let mut filter = EventFilter::default();
    if let Some(raw) = &params.execution_id {
        filter.execution_id = Some(parse_execution_id(raw)?);
    }
    if let Some(raw) = &params.event_type {
        filter.event_type = Some(
            serde_json::from_value(JsonValue::String(raw.clone()))
                .map_err(|_| ApiError::bad_request(format!("unknown event type '{raw}'")))?,
        );
    }

    Ok(ws.on_upgrade(move |socket| stream_events(socket, state, filter)))
}

async fn stream_events(socket: WebSocket, state: AppState, filter: EventFilter) {
    let (sender, mut events) = mpsc::unbounded_channel();
    let client_id = state.bus.add_streaming_client(sender, filter);
    let (mut sink, mut inbound) = socket.split();

    loop {
        tokio::select! {
            framed = events.recv() => {
                match framed {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            message = inbound.next() => {
                match message {
                    // Inbound frames are keep-alives.
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }

    state.bus.remove_streaming_client(client_id);
    tracing::debug!(client = %client_id, "event stream closed");
}
