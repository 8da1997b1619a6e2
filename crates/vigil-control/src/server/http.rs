//! HTTP REST surface for operators, served on the same listener as the
//! WebSocket endpoint.
//!
//! Every `/v1` route takes a session token as `Authorization: Bearer`.
//! Reads accept observer tokens; mutations need an operator token.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use vigil_types::{FileOperation, ProjectId, ProtectionZone, VigilError, ZoneLevel};

use crate::auth::SessionClaims;
use crate::command::{Command, CommandResponse};
use crate::plane::ControlPlane;
use crate::protocol::{ClientRole, ErrorPayload};

fn error_response(e: VigilError) -> Response {
    let status = match &e {
        VigilError::ValidationError(_) => StatusCode::BAD_REQUEST,
        VigilError::AuthError(_) => StatusCode::UNAUTHORIZED,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(CommandResponse::error(e.to_string()))).into_response()
}

fn invalid_payload(message: &str, details: String) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorPayload {
            message: message.to_string(),
            details: Some(details),
        }),
    )
        .into_response()
}

/// Verify the bearer session token for `role` on `project`.
fn check_auth(
    plane: &ControlPlane,
    headers: &HeaderMap,
    role: ClientRole,
    project: &ProjectId,
) -> Result<SessionClaims, Response> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(CommandResponse::error("missing session token")),
            )
                .into_response()
        })?;
    plane
        .auth()
        .authorize_session(token, role, project)
        .map_err(|e| (StatusCode::UNAUTHORIZED, Json(CommandResponse::error(e.to_string()))).into_response())
}

pub(crate) async fn health_handler(State(plane): State<Arc<ControlPlane>>) -> impl IntoResponse {
    let data = json!({
        "connections": plane.registry().len(),
        "shuttingDown": plane.is_shutting_down(),
    });
    (StatusCode::OK, Json(CommandResponse::ok_with_data("ok", data)))
}

pub(crate) async fn state_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Response {
    let project = ProjectId::new(project);
    if let Err(resp) = check_auth(&plane, &headers, ClientRole::Observer, &project) {
        return resp;
    }
    match plane.snapshot(&project).await {
        Ok(state) => {
            let data = serde_json::to_value(&state).unwrap_or_default();
            (StatusCode::OK, Json(CommandResponse::ok_with_data(state.state().as_str(), data)))
                .into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct TransitionParams {
    last: Option<usize>,
}

pub(crate) async fn transitions_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
    Query(params): Query<TransitionParams>,
) -> Response {
    let project = ProjectId::new(project);
    if let Err(resp) = check_auth(&plane, &headers, ClientRole::Observer, &project) {
        return resp;
    }
    match plane.transitions(&project, params.last) {
        Ok(rows) => {
            let message = format!("{} transition(s)", rows.len());
            let data = serde_json::to_value(&rows).unwrap_or_default();
            (StatusCode::OK, Json(CommandResponse::ok_with_data(message, data))).into_response()
        }
        Err(e) => error_response(e),
    }
}

pub(crate) async fn connections_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Response {
    let project = ProjectId::new(project);
    if let Err(resp) = check_auth(&plane, &headers, ClientRole::Observer, &project) {
        return resp;
    }
    let connections = plane.connections(&project);
    let message = format!("{} connection(s)", connections.len());
    let data = serde_json::to_value(&connections).unwrap_or_default();
    (StatusCode::OK, Json(CommandResponse::ok_with_data(message, data))).into_response()
}

pub(crate) async fn list_zones_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
) -> Response {
    let project = ProjectId::new(project);
    if let Err(resp) = check_auth(&plane, &headers, ClientRole::Observer, &project) {
        return resp;
    }
    match plane.zones(&project) {
        Ok(zones) => {
            let message = format!("{} zone(s)", zones.len());
            let data = serde_json::to_value(&zones).unwrap_or_default();
            (StatusCode::OK, Json(CommandResponse::ok_with_data(message, data))).into_response()
        }
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NewZone {
    path_pattern: String,
    level: ZoneLevel,
    #[serde(default)]
    allowed_operations: Option<Vec<FileOperation>>,
    #[serde(default)]
    reason: Option<String>,
}

pub(crate) async fn add_zone_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
    body: Result<Json<NewZone>, JsonRejection>,
) -> Response {
    let project = ProjectId::new(project);
    let claims = match check_auth(&plane, &headers, ClientRole::Operator, &project) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Json(body) = match body {
        Ok(b) => b,
        Err(e) => return invalid_payload("invalid protection zone", e.body_text()),
    };

    let mut zone = ProtectionZone::new(project, body.path_pattern, body.level, claims.sub);
    zone.allowed_operations = body.allowed_operations;
    zone.reason = body.reason;
    match plane.add_zone(zone).await {
        Ok(zone) => {
            let data = serde_json::to_value(&zone).unwrap_or_default();
            (
                StatusCode::CREATED,
                Json(CommandResponse::ok_with_data("zone created", data)),
            )
                .into_response()
        }
        Err(VigilError::ValidationError(details)) => {
            invalid_payload("invalid protection zone", details)
        }
        Err(e) => error_response(e),
    }
}

pub(crate) async fn delete_zone_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path((project, zone_id)): Path<(String, Uuid)>,
) -> Response {
    let project = ProjectId::new(project);
    if let Err(resp) = check_auth(&plane, &headers, ClientRole::Operator, &project) {
        return resp;
    }
    match plane.remove_zone(&project, &zone_id).await {
        Ok(true) => (StatusCode::OK, Json(CommandResponse::ok("zone deleted"))).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::error(format!("no zone {zone_id}"))),
        )
            .into_response(),
        Err(VigilError::ValidationError(details)) => (
            StatusCode::CONFLICT,
            Json(CommandResponse::error(details)),
        )
            .into_response(),
        Err(e) => error_response(e),
    }
}

pub(crate) async fn command_handler(
    State(plane): State<Arc<ControlPlane>>,
    headers: HeaderMap,
    Path(project): Path<String>,
    body: Result<Json<Command>, JsonRejection>,
) -> Response {
    let project = ProjectId::new(project);
    let claims = match check_auth(&plane, &headers, ClientRole::Operator, &project) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let Json(command) = match body {
        Ok(b) => b,
        Err(e) => return invalid_payload("invalid command", e.body_text()),
    };

    let actor = format!("{}:{}", ClientRole::Operator, claims.sub);
    match plane.command(&project, command, &actor).await {
        Ok(state) => {
            let data = serde_json::to_value(&state).unwrap_or_default();
            (StatusCode::OK, Json(CommandResponse::ok_with_data(state.state().as_str(), data)))
                .into_response()
        }
        Err(e) => error_response(e),
    }
}
