//! HTTP ingress: JSON-RPC 2.0 command handlers and the SSE stream endpoint
//! (spec.md §4.8, §6). One POST route per RPC method, dispatched from a
//! single body-parsing entry point, grounded on the relay server's
//! `websocket_handler`/`enlist_handler` style of thin axum handlers wired
//! through `State<Arc<AppState>>`.

use std::time::Duration;

use axum::extract::{FromRequest, Request, State};
use axum::http::header;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_stream::wrappers::ReceiverStream;
use tower_http::trace::TraceLayer;

use protocol::{
    compute_position, json_merge_patch_diff, start_movement, stop_movement,
    update_position_from_movement, DomainEvent, Direction, Player, ServerError, UserId,
};

use crate::auth::AuthUser;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/rpc/trainer.Move", post(move_handler))
        .route("/rpc/trainer.FetchPosition", post(fetch_position_handler))
        .route("/rpc/trainer.Get", post(get_handler))
        .route("/rpc/trainer.Create", post(create_handler))
        .route("/rpc/trainer.Status", post(status_handler))
        .route("/rpc/trainer.List", post(list_handler))
        .route("/stream", get(stream_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct JsonRpcRequest {
    #[allow(dead_code)]
    jsonrpc: String,
    #[allow(dead_code)]
    method: String,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Serialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct JsonRpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<JsonRpcErrorBody>,
    id: Value,
}

impl JsonRpcResponse {
    fn ok(id: Value, result: Value) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn err(id: Value, error: &ServerError) -> Self {
        let (code, message) = error.to_json_rpc();
        JsonRpcResponse {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcErrorBody {
                code,
                message: message.to_owned(),
            }),
            id,
        }
    }

    fn raw_err(id: Value, code: i64, message: &str) -> Self {
        JsonRpcResponse {
            jsonrpc: "2.0",
            result: None,
            error: Some(JsonRpcErrorBody {
                code,
                message: message.to_owned(),
            }),
            id,
        }
    }
}

/// Every JSON-RPC handler always replies HTTP 200 per spec.md §6; the
/// result/error split lives in the JSON-RPC envelope, not the status code.
fn respond(id: Value, result: Result<Value, ServerError>) -> impl IntoResponse {
    let body = match result {
        Ok(value) => JsonRpcResponse::ok(id, value),
        Err(err) => JsonRpcResponse::err(id, &err),
    };
    Json(body)
}

fn rpc_error_response(id: Value, code: i64, message: &str) -> Response {
    (axum::http::StatusCode::OK, Json(JsonRpcResponse::raw_err(id, code, message))).into_response()
}

/// Parses and structurally validates the JSON-RPC envelope before any
/// handler runs, so malformed bodies still get a JSON-RPC `-32700`/`-32600`
/// response (spec.md §6: "Responses are always HTTP 200").
struct JsonRpcBody(JsonRpcRequest);

impl<S> FromRequest<S> for JsonRpcBody
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value): Json<Value> = Json::from_request(req, state)
            .await
            .map_err(|_| rpc_error_response(Value::Null, -32700, "Parse error"))?;

        let id = value.get("id").cloned().unwrap_or(Value::Null);

        let is_well_formed = value.is_object()
            && value.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
            && value.get("method").is_some_and(Value::is_string);
        if !is_well_formed {
            return Err(rpc_error_response(id, -32600, "Invalid Request"));
        }

        let request: JsonRpcRequest = serde_json::from_value(value)
            .map_err(|_| rpc_error_response(id.clone(), -32600, "Invalid Request"))?;
        Ok(JsonRpcBody(request))
    }
}

async fn load_or_create_player(state: &AppState, user_id: &UserId) -> Result<Player, ServerError> {
    if let Some(player) = state.player_store.get_by_id(user_id).await? {
        return Ok(player);
    }
    let now = Utc::now();
    let factory = Player::new(
        user_id.clone(),
        Player::default_nickname(user_id),
        protocol::random_color().to_owned(),
        now,
    );
    match state.player_store.find_one_and_insert(factory).await {
        Ok(player) => {
            state
                .event_bus
                .publish(DomainEvent::Created {
                    user_id: player.id.clone(),
                    player: player.clone(),
                    timestamp: now,
                    request_id: DomainEvent::command_request_id(&player.id, now),
                })
                .await?;
            Ok(player)
        }
        // Lost the create race to a concurrent request; read it back.
        Err(ServerError::AlreadyExists) => state
            .player_store
            .get_by_id(user_id)
            .await?
            .ok_or_else(|| {
                ServerError::Internal(
                    "player vanished immediately after a concurrent create".into(),
                )
            }),
        Err(err) => Err(err),
    }
}

#[derive(Debug, Deserialize)]
struct MoveParams {
    direction_x: Value,
    direction_y: Value,
    action: String,
}

async fn move_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    respond(id, move_command(&state, auth, request).await)
}

async fn move_command(
    state: &AppState,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    request: JsonRpcRequest,
) -> Result<Value, ServerError> {
    let AuthUser(user_id) = auth.map_err(|_| ServerError::AuthRequired)?;
    let params: MoveParams = serde_json::from_value(request.params)
        .map_err(|e| ServerError::InvalidInput(e.to_string()))?;

    let dx = parse_direction_component(&params.direction_x)?;
    let dy = parse_direction_component(&params.direction_y)?;
    let direction = Direction::new(dx, dy)?;
    if !matches!(params.action.as_str(), "start" | "stop") {
        return Err(ServerError::InvalidInput(format!(
            "action must be \"start\" or \"stop\", got {:?}",
            params.action
        )));
    }

    load_or_create_player(state, &user_id).await?;

    let snapshot = state
        .player_store
        .get_by_id(&user_id)
        .await?
        .ok_or(ServerError::NotFound)?;
    let before = serde_json::to_value(&snapshot).map_err(|e| ServerError::Internal(e.to_string()))?;

    let action = params.action.clone();
    let updated = state
        .player_store
        .find_one_and_update(
            &user_id,
            &mut |mut player| {
                let now = Utc::now();
                update_position_from_movement(&mut player.movement, now);
                match action.as_str() {
                    "start" => start_movement(&mut player.movement, direction, now)?,
                    "stop" => stop_movement(&mut player.movement, now),
                    _ => unreachable!("validated before the mutator ran"),
                }
                player.position = player.movement.start_pos;
                player.updated_at = now;
                Ok(Some(player))
            },
        )
        .await?;

    let after = serde_json::to_value(&updated).map_err(|e| ServerError::Internal(e.to_string()))?;
    let changes = json_merge_patch_diff(&before, &after);

    if params.action == "start" {
        state.moving_registry.add(&user_id, &updated.color).await?;
    } else {
        state.moving_registry.remove(&user_id).await?;
    }

    let now = Utc::now();
    let request_id = DomainEvent::command_request_id(&user_id, now);
    let event = if params.action == "start" {
        DomainEvent::Moved {
            user_id: user_id.clone(),
            nickname: updated.nickname.clone(),
            color: updated.color.clone(),
            position: updated.position,
            movement: updated.movement.clone(),
            timestamp: now,
            request_id,
            changes: Some(changes.clone()),
        }
    } else {
        DomainEvent::Stopped {
            user_id: user_id.clone(),
            nickname: updated.nickname.clone(),
            color: updated.color.clone(),
            position: updated.position,
            movement: updated.movement.clone(),
            timestamp: now,
            request_id,
            changes: Some(changes.clone()),
        }
    };
    state.event_bus.publish(event).await?;

    Ok(json!({
        "changes": changes,
        "next_request_allowed_at": (now + chrono::Duration::milliseconds(100)).timestamp_millis(),
    }))
}

fn parse_direction_component(value: &Value) -> Result<i8, ServerError> {
    let as_f64 = value.as_f64().ok_or_else(|| {
        ServerError::InvalidInput(format!("direction component must be a number, got {value}"))
    })?;
    if as_f64.fract() != 0.0 {
        return Err(ServerError::InvalidInput(format!(
            "direction component must be an integer in {{-1,0,1}}, got {as_f64}"
        )));
    }
    Ok(as_f64 as i8)
}

async fn fetch_position_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    respond(id, fetch_position(&state, auth).await)
}

async fn fetch_position(
    state: &AppState,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
) -> Result<Value, ServerError> {
    let AuthUser(user_id) = auth.map_err(|_| ServerError::AuthRequired)?;
    load_or_create_player(state, &user_id).await?;

    // Idempotent: collapses in-flight motion without changing `is_moving`.
    let updated = state
        .player_store
        .find_one_and_update(&user_id, &mut |mut player| {
            update_position_from_movement(&mut player.movement, Utc::now());
            player.position = player.movement.start_pos;
            Ok(Some(player))
        })
        .await?;

    Ok(json!({
        "position": updated.position,
        "movement": updated.movement,
    }))
}

async fn get_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    let result = get_or_create(&state, auth).await;
    respond(id, result)
}

async fn create_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    let result = get_or_create(&state, auth).await;
    respond(id, result)
}

async fn get_or_create(
    state: &AppState,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
) -> Result<Value, ServerError> {
    let AuthUser(user_id) = auth.map_err(|_| ServerError::AuthRequired)?;
    let player = load_or_create_player(state, &user_id).await?;
    serde_json::to_value(player).map_err(|e| ServerError::Internal(e.to_string()))
}

async fn status_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    let result = status(&state, auth).await;
    respond(id, result)
}

async fn status(
    state: &AppState,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
) -> Result<Value, ServerError> {
    let AuthUser(user_id) = auth.map_err(|_| ServerError::AuthRequired)?;
    let player = load_or_create_player(state, &user_id).await?;
    let now = Utc::now();
    Ok(json!({
        "user_id": player.id,
        "position": compute_position(&player.movement, now),
        "is_moving": player.movement.is_moving,
    }))
}

#[derive(Debug, Deserialize, Default)]
struct ListParams {
    #[serde(default)]
    online_only: bool,
}

async fn list_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    JsonRpcBody(request): JsonRpcBody,
) -> impl IntoResponse {
    let id = request.id.clone();
    let result = list(&state, auth, request.params).await;
    respond(id, result)
}

async fn list(
    state: &AppState,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
    params: Value,
) -> Result<Value, ServerError> {
    auth.map_err(|_| ServerError::AuthRequired)?;
    let params: ListParams = if params.is_null() {
        ListParams::default()
    } else {
        serde_json::from_value(params).map_err(|e| ServerError::InvalidInput(e.to_string()))?
    };

    let players = state.player_store.get_all().await?;
    let players = if params.online_only {
        let moving: std::collections::HashSet<UserId> = state
            .moving_registry
            .enumerate()
            .await?
            .into_iter()
            .map(|entry| entry.user_id)
            .collect();
        players.into_iter().filter(|p| moving.contains(&p.id)).collect()
    } else {
        players
    };

    serde_json::to_value(players).map_err(|e| ServerError::Internal(e.to_string()))
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

async fn stream_handler(
    State(state): State<AppState>,
    auth: Result<AuthUser, crate::auth::AuthRejected>,
) -> Result<impl IntoResponse, crate::auth::AuthRejected> {
    let AuthUser(user_id) = auth?;
    let client_id = uuid::Uuid::new_v4().to_string();

    let mut inbox = state
        .connections
        .add_client(client_id.clone(), user_id)
        .await;

    let (out_tx, out_rx) = tokio::sync::mpsc::channel::<Event>(32);

    let connected = Event::default().data(json!({"type": "connected", "client_id": client_id}).to_string());
    // Errors here only mean the client already disconnected before the
    // first frame went out; the forwarding task below will notice and
    // clean up.
    let _ = out_tx.send(connected).await;

    let connections = state.connections.clone();
    let forwarder_client_id = client_id.clone();
    tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // first tick fires immediately; skip it
        loop {
            tokio::select! {
                message = inbox.recv() => {
                    match message {
                        Some(event) => {
                            connections.touch(&forwarder_client_id).await;
                            if out_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    connections.touch(&forwarder_client_id).await;
                    let frame = Event::default().data(
                        json!({"type": "heartbeat", "timestamp": Utc::now().to_rfc3339()}).to_string(),
                    );
                    if out_tx.send(frame).await.is_err() {
                        break;
                    }
                }
            }
        }
        connections.remove_client(&forwarder_client_id).await;
    });

    let stream = ReceiverStream::new(out_rx).map(Ok::<Event, std::convert::Infallible>);
    let sse = Sse::new(stream).keep_alive(KeepAlive::new().interval(HEARTBEAT_INTERVAL));

    // axum's Sse response already sets Content-Type: text/event-stream, but
    // spec.md §6 also requires these proxy/caching-defeating headers.
    let headers = [
        (header::CONTENT_TYPE, "text/event-stream; charset=utf-8"),
        (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
        (header::CONNECTION, "keep-alive"),
        (header::TRANSFER_ENCODING, "chunked"),
        (
            axum::http::HeaderName::from_static("x-accel-buffering"),
            "no",
        ),
    ];

    Ok((headers, sse))
}
