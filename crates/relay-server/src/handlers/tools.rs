//! Tool manifest publication and version-negotiated metadata.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use axum::response::{IntoResponse, Response};
use relay_core::constants::{API_VERSION, SUPPORTED_API_VERSIONS};
use relay_core::{StreamEvent, ToolManifest};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::parse_code;
use crate::errors::ApiError;
use crate::server::AppState;

/// Request header naming the metadata API version the caller wants.
pub const ACCEPT_VERSION: HeaderName = HeaderName::from_static("accept-version");
/// Response header: API version served.
pub const API_VERSION_HEADER: HeaderName = HeaderName::from_static("api-version");
/// Response header: the client's tool-set version.
pub const TOOL_MANIFEST_VERSION_HEADER: HeaderName =
    HeaderName::from_static("tool-manifest-version");
/// Response header: every API version this server serves.
pub const SUPPORTED_VERSIONS_HEADER: HeaderName = HeaderName::from_static("supported-versions");

/// Reply to a manifest publication.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishReply {
    /// Tools now on offer.
    pub tool_count: usize,
    /// Version of the stored manifest.
    pub tool_manifest_version: String,
}

/// PUT /api/sessions/{code}/tools
///
/// Stores the manifest and pushes a `tool-availability-update` to the
/// session's open streams.
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn publish_tools(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    Json(manifest): Json<ToolManifest>,
) -> Result<Json<PublishReply>, ApiError> {
    let code = parse_code(&raw)?;
    let _ = state.client_activity(&code).await?;

    if !SUPPORTED_API_VERSIONS.contains(&manifest.api_version.as_str()) {
        return Err(ApiError::VersionNotSupported {
            requested: manifest.api_version,
        });
    }
    state.manifests.publish(&code, &manifest).await?;

    let notified = state
        .registry
        .broadcast_to_session(&code, StreamEvent::ToolAvailabilityUpdate(manifest.clone()));
    info!(
        tools = manifest.tools.len(),
        version = %manifest.tool_manifest_version,
        notified,
        "tool manifest published"
    );

    Ok(Json(PublishReply {
        tool_count: manifest.tools.len(),
        tool_manifest_version: manifest.tool_manifest_version,
    }))
}

/// GET /api/sessions/{code}/metadata
///
/// An `Accept-Version` outside the supported set is refused with 406
/// before the session is looked at.
#[instrument(skip_all, fields(session_code = %raw))]
pub async fn metadata(
    State(state): State<AppState>,
    Path(raw): Path<String>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let version = negotiate_version(&headers)?;
    let code = parse_code(&raw)?;
    let _ = state.sessions.validate(&code).await?;

    let manifest = state.manifests.get(&code).await?.unwrap_or_default();
    let manifest_version = HeaderValue::from_str(&manifest.tool_manifest_version)
        .map_err(|_| ApiError::InvalidRequest("tool manifest version is not header-safe".into()))?;

    let mut response = Json(manifest).into_response();
    let out = response.headers_mut();
    let _ = out.insert(API_VERSION_HEADER, HeaderValue::from_static(version));
    let _ = out.insert(TOOL_MANIFEST_VERSION_HEADER, manifest_version);
    let _ = out.insert(
        SUPPORTED_VERSIONS_HEADER,
        HeaderValue::from_str(&SUPPORTED_API_VERSIONS.join(", "))
            .unwrap_or_else(|_| HeaderValue::from_static(API_VERSION)),
    );
    Ok(response)
}

/// Resolve the requested API version; absent means the current one.
fn negotiate_version(headers: &HeaderMap) -> Result<&'static str, ApiError> {
    let Some(raw) = headers.get(&ACCEPT_VERSION) else {
        return Ok(API_VERSION);
    };
    let requested = raw.to_str().unwrap_or_default().trim();
    SUPPORTED_API_VERSIONS
        .iter()
        .copied()
        .find(|v| *v == requested)
        .ok_or_else(|| ApiError::VersionNotSupported {
            requested: requested.to_owned(),
        })
}
