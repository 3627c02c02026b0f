//! Axum request handlers for the full endpoint table in spec.md §6.
//!
//! Every transactional handler follows the same five-step shape documented
//! in spec.md §4.C: merge the body, resolve `(ip, port, ecrId)`, build the
//! envelope (amount normalization happens inside the `envelope::*`
//! factories), allocate a `requestId`, and hand off to the Protocol Engine
//! under the terminal's `SessionLock`. This mirrors the teacher's
//! `news_handlers` shape (`src/wireframe/routes/news_handlers.rs`): thin
//! handlers that delegate encoding/decoding to dedicated helpers and never
//! inline protocol logic.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use axum::{
    Json,
    extract::{Query, State},
};
use serde_json::{Map, Value, json};
use tracing::{Instrument, info_span};

use crate::{
    engine::{self, Event, EngineError},
    envelope::Envelope,
    gateway::{envelope, errors::GatewayError, state::GatewayState},
};

type AppState = State<Arc<GatewayState>>;

/// Resolved `(ip, port, ecrId)` triple for one request.
struct Target {
    ip: IpAddr,
    port: u16,
    ecr_id: String,
}

/// Merge a JSON body that may carry its fields nested under `nest_key`
/// (e.g. `{sale: {...}}`), and within that nested object (or the top level,
/// if `nest_key` is absent) may further nest fields under `params`/
/// `transaction`. More specific always overrides less specific, the same
/// rule `emulator::payload::merge` applies to the wire payload (spec.md
/// §4.C.1, §9) — so `{sale: {transaction: {baseAmount: "10.00"}}}` resolves
/// `baseAmount` just like a flat `{baseAmount: "10.00"}` body would.
fn merge_body(raw: &Value, nest_key: &str) -> Map<String, Value> {
    let mut merged = Map::new();
    let Some(obj) = raw.as_object() else { return merged };

    flatten_layer(&mut merged, obj, &[nest_key]);
    if let Some(nested) = obj.get(nest_key).and_then(Value::as_object) {
        flatten_layer(&mut merged, nested, &[]);
    }
    merged
}

/// Insert `obj`'s own fields (other than `skip` and the `params`/
/// `transaction` wrapper keys themselves), then let `params` override those,
/// then let `transaction` override both.
fn flatten_layer(merged: &mut Map<String, Value>, obj: &Map<String, Value>, skip: &[&str]) {
    for (key, value) in obj {
        if key != "params" && key != "transaction" && !skip.contains(&key.as_str()) {
            merged.insert(key.clone(), value.clone());
        }
    }
    for nested_key in ["params", "transaction"] {
        if let Some(nested) = obj.get(nested_key).and_then(Value::as_object) {
            for (key, value) in nested {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
}

async fn resolve_target(fields: &Map<String, Value>, state: &GatewayState) -> Result<Target, GatewayError> {
    let defaults = state.defaults.read().await;
    let ip_raw = fields.get("ip").and_then(Value::as_str).map_or_else(|| defaults.terminal_ip.clone(), str::to_owned);
    let ip = ip_raw
        .parse::<IpAddr>()
        .map_err(|_err| GatewayError::BadRequest(format!("invalid ip '{ip_raw}'")))?;
    let port = fields
        .get("port")
        .and_then(Value::as_u64)
        .and_then(|p| u16::try_from(p).ok())
        .unwrap_or(defaults.terminal_port);
    let ecr_id = fields.get("ecrId").and_then(Value::as_str).map_or_else(|| defaults.ecr_id.clone(), str::to_owned);
    Ok(Target { ip, port, ecr_id })
}

fn resolve_target_from_query(query: &HashMap<String, String>, defaults_ip: &str, defaults_port: u16, defaults_ecr: &str) -> Result<Target, GatewayError> {
    let ip_raw = query.get("ip").map_or_else(|| defaults_ip.to_owned(), Clone::clone);
    let ip = ip_raw
        .parse::<IpAddr>()
        .map_err(|_err| GatewayError::BadRequest(format!("invalid ip '{ip_raw}'")))?;
    let port = query.get("port").and_then(|p| p.parse::<u16>().ok()).unwrap_or(defaults_port);
    let ecr_id = query.get("ecrId").map_or_else(|| defaults_ecr.to_owned(), Clone::clone);
    Ok(Target { ip, port, ecr_id })
}

/// Allocate a six-digit zero-padded decimal `requestId` from the current
/// epoch-millisecond clock, per spec.md §4.C.4.
fn allocate_request_id() -> String {
    let millis = SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
    #[allow(clippy::cast_possible_truncation, reason = "modulo already bounds the value to 0..1_000_000")]
    let bounded = (millis % 1_000_000) as u32;
    format!("{bounded:06}")
}

fn events_to_json(events: &[Event]) -> Vec<Value> {
    events
        .iter()
        .map(|event| match event {
            Event::Connected => json!({"event": "TCP CONNECT"}),
            Event::Sent(value) => json!({"direction": "sent", "frame": value}),
            Event::Received(value) => json!({"direction": "received", "frame": value}),
            Event::InvalidFrame { raw_hex, reason } => {
                json!({"direction": "received", "invalid": true, "rawHex": raw_hex, "reason": reason})
            }
        })
        .collect()
}

async fn run_session(state: &GatewayState, target: &Target, envelope: Envelope, exclusive: bool) -> Json<Value> {
    let request_id = envelope.data.request_id.clone();
    let addr = SocketAddr::new(target.ip, target.port);
    let span = info_span!("terminal_session", %request_id, ip = %target.ip, port = target.port);

    async move {
        let timeouts = state.defaults.read().await.timeouts();
        let session_lock = if exclusive {
            Some(state.sessions.lock_for(target.ip, target.port).await)
        } else {
            None
        };
        let _guard = match &session_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        match engine::send_command(addr, &envelope, timeouts).await {
            Ok(outcome) => {
                tracing::debug!(log = ?outcome.events, "terminal session completed");
                Json(json!({
                    "success": true,
                    "requestId": request_id,
                    "ok": true,
                    "rsp": outcome.response,
                    "log": events_to_json(&outcome.events),
                }))
            }
            Err(failure) => {
                tracing::debug!(err = %failure.error, "terminal session failed");
                Json(json!({
                    "success": true,
                    "requestId": request_id,
                    "ok": false,
                    "error": describe_engine_error(&failure.error),
                    "log": events_to_json(&failure.events),
                }))
            }
        }
    }
    .instrument(span)
    .await
}

fn describe_engine_error(err: &EngineError) -> &'static str {
    match err {
        EngineError::ConnectTimeout(_) => "connect-timeout",
        EngineError::OverallTimeout(_) => "read-timeout",
        EngineError::IdleTimeout(_) => "idle-timeout",
        EngineError::ConnectionClosed => "socket-error",
        EngineError::Encode(_) | EngineError::Io(_) => "socket-error",
    }
}

async fn transactional(
    state: &AppState,
    raw: Value,
    nest_key: &str,
    build: impl FnOnce(&Map<String, Value>, &str, &str) -> Result<Envelope, GatewayError>,
) -> Result<Json<Value>, GatewayError> {
    let fields = merge_body(&raw, nest_key);
    let target = resolve_target(&fields, state).await?;
    let request_id = allocate_request_id();
    let envelope = build(&fields, &target.ecr_id, &request_id)?;
    Ok(run_session(state, &target, envelope, true).await)
}

/// `GET /health` — availability probe plus a dump of the active defaults.
pub async fn health(state: AppState, Query(query): Query<HashMap<String, String>>) -> Json<Value> {
    let defaults = state.defaults.read().await;
    let target = resolve_target_from_query(&query, &defaults.terminal_ip, defaults.terminal_port, &defaults.ecr_id);
    let connected = match target {
        Ok(target) => tokio::net::TcpStream::connect(SocketAddr::new(target.ip, target.port)).await.is_ok(),
        Err(_) => false,
    };
    Json(json!({
        "success": true,
        "connected": connected,
        "config": {
            "terminalIp": defaults.terminal_ip,
            "terminalPort": defaults.terminal_port,
            "terminalPortAlt": defaults.terminal_port_alt,
            "ecrId": defaults.ecr_id,
            "connectTimeoutMs": defaults.connect_timeout.as_millis(),
            "readTimeoutMs": defaults.read_timeout.as_millis(),
            "idleByteTimeoutMs": defaults.idle_byte_timeout.as_millis(),
        },
    }))
}

/// `GET /availability` — bare TCP connect probe.
pub async fn availability(state: AppState, Query(query): Query<HashMap<String, String>>) -> Result<Json<Value>, GatewayError> {
    let defaults = state.defaults.read().await;
    let target = resolve_target_from_query(&query, &defaults.terminal_ip, defaults.terminal_port, &defaults.ecr_id)?;
    let connected = tokio::net::TcpStream::connect(SocketAddr::new(target.ip, target.port)).await.is_ok();
    Ok(Json(json!({ "success": true, "connected": connected })))
}

/// `GET /ping` — terminal ping, bypassing the per-terminal session lock per
/// spec.md §5.
pub async fn ping(state: AppState, Query(query): Query<HashMap<String, String>>) -> Result<Json<Value>, GatewayError> {
    let defaults = state.defaults.read().await;
    let target = resolve_target_from_query(&query, &defaults.terminal_ip, defaults.terminal_port, &defaults.ecr_id)?;
    drop(defaults);
    let request_id = allocate_request_id();
    let envelope = envelope::ping(&target.ecr_id, &request_id);
    Ok(run_session(&state, &target, envelope, false).await)
}

/// `POST /sale`.
pub async fn sale(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "sale", envelope::sale).await
}

/// `POST /sale/lodging` — identical body shape to `/sale`, nested under
/// `sale` exactly like the bare endpoint; `lodging` rides along as a regular
/// field since `envelope::sale` already forwards it when present.
pub async fn sale_lodging(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "sale", envelope::sale).await
}

/// `POST /preauth`.
pub async fn preauth(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "preauth", envelope::preauth).await
}

/// `POST /auth-completion`.
pub async fn auth_completion(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "authCompletion", envelope::auth_completion).await
}

/// `POST /void`.
pub async fn void(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "void", envelope::void).await
}

/// `POST /refund`.
pub async fn refund(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "refund", envelope::refund).await
}

/// `POST /tip-adjust`.
pub async fn tip_adjust(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "tipAdjust", envelope::tip_adjust).await
}

/// `POST /batch-close`.
pub async fn batch_close(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    let fields = merge_body(&raw, "batchClose");
    let target = resolve_target(&fields, &state).await?;
    let request_id = allocate_request_id();
    let envelope = envelope::batch_close(&target.ecr_id, &request_id);
    Ok(run_session(&state, &target, envelope, true).await)
}

/// `POST /command` — generic passthrough.
pub async fn command(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    transactional(&state, raw, "command", envelope::command).await
}

/// `POST /config` — partial runtime override of the Gateway's defaults.
pub async fn config(state: AppState, Json(raw): Json<Value>) -> Result<Json<Value>, GatewayError> {
    let fields = raw.as_object().cloned().unwrap_or_default();
    let mut defaults = state.defaults.write().await;
    if let Some(ip) = fields.get("terminalIp").and_then(Value::as_str) {
        defaults.terminal_ip = ip.to_owned();
    }
    if let Some(port) = fields.get("terminalPort").and_then(Value::as_u64).and_then(|p| u16::try_from(p).ok()) {
        defaults.terminal_port = port;
    }
    if let Some(port) = fields.get("terminalPortAlt").and_then(Value::as_u64).and_then(|p| u16::try_from(p).ok()) {
        defaults.terminal_port_alt = port;
    }
    if let Some(ecr_id) = fields.get("ecrId").and_then(Value::as_str) {
        defaults.ecr_id = ecr_id.to_owned();
    }
    Ok(Json(json!({ "success": true })))
}
