//! Session lifecycle endpoints.

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use relay_core::SessionCode;
use relay_core::metrics::SESSIONS_CREATED_TOTAL;
use relay_queue::SessionInfo;
use serde::Deserialize;
use tracing::instrument;

use super::parse_code;
use crate::errors::ApiError;
use crate::server::AppState;

/// Optional body of `POST /api/sessions`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionBody {
    /// Caller-chosen code; generated when absent.
    #[serde(default)]
    pub code: Option<String>,
}

/// POST /api/sessions
#[instrument(skip_all)]
pub async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<(StatusCode, Json<SessionInfo>), ApiError> {
    let body: CreateSessionBody = if body.iter().all(u8::is_ascii_whitespace) {
        CreateSessionBody::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::InvalidRequest(e.to_string()))?
    };
    let info = match body.code {
        Some(raw) => {
            let code = SessionCode::parse(&raw).map_err(|e| ApiError::InvalidRequest(e.message))?;
            state.sessions.create_with_code(code).await?
        }
        None => state.sessions.create().await?,
    };
    metrics::counter!(SESSIONS_CREATED_TOTAL).increment(1);
    Ok((StatusCode::CREATED, Json(info)))
}

/// GET /api/sessions/{code}
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn get_session(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let code = parse_code(&raw)?;
    Ok(Json(state.sessions.validate(&code).await?))
}

/// POST /api/sessions/{code}/ack
///
/// Explicit client activity ping.
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn ack(
    State(state): State<AppState>,
    Path(raw): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    let code = parse_code(&raw)?;
    Ok(Json(state.client_activity(&code).await?))
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use axum::http::StatusCode;
    use serde_json::json;

    #[tokio::test]
    async fn create_generates_code() {
        let app = server().router();
        let code = create_session(&app).await;
        assert_eq!(code.len(), 8);

        let resp = send(&app, get(&format!("/api/sessions/{code}"))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["code"], code.as_str());
        assert!(body["expiresAt"].is_string());
    }

    #[tokio::test]
    async fn create_with_chosen_code_then_conflict() {
        let app = server().router();
        let req = json_request("POST", "/api/sessions", &json!({ "code": "abcd2345" }));
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        assert_eq!(json_body(resp).await["code"], "ABCD2345");

        let req = json_request("POST", "/api/sessions", &json!({ "code": "ABCD2345" }));
        let resp = send(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_code_is_unauthorized() {
        let app = server().router();
        let resp = send(&app, get("/api/sessions/not-a-code")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["code"], "INVALID_SESSION");
    }

    #[tokio::test]
    async fn unknown_session_is_unauthorized() {
        let app = server().router();
        let resp = send(&app, get("/api/sessions/ABCD2345")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(resp).await["code"], "SESSION_NOT_FOUND");
    }

    #[tokio::test]
    async fn ack_refreshes_session() {
        let app = server().router();
        let code = create_session(&app).await;
        let resp = send(&app, json_request("POST", &format!("/api/sessions/{code}/ack"), &json!({}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(json_body(resp).await["lastActivityAt"].is_string());
    }
}
