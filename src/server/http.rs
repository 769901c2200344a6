//! Plain HTTP handlers: liveness, counters, TwiML, outbound calls.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::server::ServerState;
use crate::telephony::{greeting_twiml, TelephonyClient};

pub async fn health(State(state): State<ServerState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "active_calls": state.gateway.registry.active_count(),
    }))
}

pub async fn metrics(State(state): State<ServerState>) -> String {
    state
        .gateway
        .metrics
        .render(state.gateway.registry.active_count())
}

/// TwiML the provider fetches when a call comes in: greet, then connect the
/// media stream back to this host's `/ws`.
pub async fn twiml(headers: HeaderMap) -> Response {
    let body = greeting_twiml(&ws_url_from(&headers));
    ([(header::CONTENT_TYPE, "application/xml")], body).into_response()
}

#[derive(Debug, Deserialize)]
pub struct OutboundCallRequest {
    /// Destination in E.164 format, e.g. "+15551234567".
    pub to: String,
}

pub async fn outbound_call(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(request): Json<OutboundCallRequest>,
) -> Response {
    let client = TelephonyClient::new(&state.gateway.config.telephony);
    match client.create_call(&request.to, &ws_url_from(&headers)).await {
        Ok(call) => Json(json!({
            "call_sid": call.sid,
            "status": call.status,
            "to": request.to,
        }))
        .into_response(),
        Err(e) => {
            error!("outbound call failed: {e:#}");
            state.gateway.metrics.record_error();
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

fn ws_url_from(headers: &HeaderMap) -> String {
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    format!("wss://{host}/ws")
}
