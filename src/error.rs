//! Error taxonomy and JSON error responses for the hub

use http_body_util::{combinators::BoxBody, BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;
use thiserror::Error;

/// Errors produced by the session pool and its collaborators.
///
/// Every resource-acquisition failure during session creation is fully rolled
/// back (port released, process stopped) before one of these surfaces.
#[derive(Debug, Error)]
pub enum HubError {
    /// The pool is already at its configured maximum session count
    #[error("maximum session count ({0}) reached")]
    CapacityExceeded(usize),
    /// Every port in the configured range is held by a live session
    #[error("no available ports in the configured range")]
    NoPortsAvailable,
    /// The backend server process could not be spawned
    #[error("failed to launch backend server: {0}")]
    LaunchError(String),
    /// The backend server never answered its status endpoint in time
    #[error("backend server did not become ready within {0}s")]
    ReadinessTimeout(u64),
    /// The backend refused the nested session-creation request
    #[error("backend rejected session creation: {0}")]
    BackendRejected(String),
    /// Unknown or already-destroyed session identity
    #[error("session not found")]
    NotFound,
    /// The backend process is dead or unreachable
    #[error("backend unreachable: {0}")]
    BackendUnavailable(String),
    /// The backend process was already stopped
    #[error("backend process already stopped")]
    AlreadyDestroyed,
}

impl HubError {
    /// Machine-readable code for this error
    pub fn code(&self) -> HubErrorCode {
        match self {
            HubError::CapacityExceeded(_) => HubErrorCode::CapacityExceeded,
            HubError::NoPortsAvailable => HubErrorCode::NoPortsAvailable,
            HubError::LaunchError(_) => HubErrorCode::LaunchError,
            HubError::ReadinessTimeout(_) => HubErrorCode::ReadinessTimeout,
            HubError::BackendRejected(_) => HubErrorCode::BackendRejected,
            HubError::NotFound => HubErrorCode::SessionNotFound,
            HubError::BackendUnavailable(_) => HubErrorCode::BackendUnavailable,
            HubError::AlreadyDestroyed => HubErrorCode::SessionNotFound,
        }
    }
}

/// Error codes carried in JSON error bodies and the X-Hub-Error header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HubErrorCode {
    /// Session capacity reached
    CapacityExceeded,
    /// Port range exhausted
    NoPortsAvailable,
    /// Backend process failed to launch
    LaunchError,
    /// Backend never became ready
    ReadinessTimeout,
    /// Backend refused the nested session creation
    BackendRejected,
    /// Unknown session identity
    SessionNotFound,
    /// Backend process dead or unreachable
    BackendUnavailable,
    /// Malformed request body or path
    BadRequest,
    /// Proxied request timed out
    RequestTimeout,
    /// Internal hub error
    InternalError,
}

impl HubErrorCode {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            HubErrorCode::CapacityExceeded => StatusCode::CONFLICT,
            HubErrorCode::NoPortsAvailable => StatusCode::SERVICE_UNAVAILABLE,
            HubErrorCode::LaunchError => StatusCode::SERVICE_UNAVAILABLE,
            HubErrorCode::ReadinessTimeout => StatusCode::SERVICE_UNAVAILABLE,
            HubErrorCode::BackendRejected => StatusCode::BAD_GATEWAY,
            HubErrorCode::SessionNotFound => StatusCode::NOT_FOUND,
            HubErrorCode::BackendUnavailable => StatusCode::BAD_GATEWAY,
            HubErrorCode::BadRequest => StatusCode::BAD_REQUEST,
            HubErrorCode::RequestTimeout => StatusCode::GATEWAY_TIMEOUT,
            HubErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get the error code as a string for the X-Hub-Error header
    pub fn as_header_value(&self) -> &'static str {
        match self {
            HubErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            HubErrorCode::NoPortsAvailable => "NO_PORTS_AVAILABLE",
            HubErrorCode::LaunchError => "LAUNCH_ERROR",
            HubErrorCode::ReadinessTimeout => "READINESS_TIMEOUT",
            HubErrorCode::BackendRejected => "BACKEND_REJECTED",
            HubErrorCode::SessionNotFound => "SESSION_NOT_FOUND",
            HubErrorCode::BackendUnavailable => "BACKEND_UNAVAILABLE",
            HubErrorCode::BadRequest => "BAD_REQUEST",
            HubErrorCode::RequestTimeout => "REQUEST_TIMEOUT",
            HubErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }
}

/// JSON error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// The error code
    pub code: HubErrorCode,
    /// Human-readable error message
    pub message: String,
    /// HTTP status code (for reference)
    pub status: u16,
}

impl ErrorResponse {
    /// Create a new error response
    pub fn new(code: HubErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status_code().as_u16(),
            code,
            message: message.into(),
        }
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                r#"{{"code":"{}","message":"{}","status":{}}}"#,
                self.code.as_header_value(),
                self.message.replace('\"', "\\\""),
                self.status
            )
        })
    }
}

/// Create a JSON error response with X-Hub-Error header
pub fn json_error_response(
    code: HubErrorCode,
    message: impl Into<String>,
) -> Response<BoxBody<Bytes, hyper::Error>> {
    let error = ErrorResponse::new(code, message);
    let status = code.status_code();
    let body = error.to_json();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("X-Hub-Error", code.as_header_value())
        .body(Full::new(Bytes::from(body)).map_err(|e| match e {}).boxed())
        .expect("valid response with StatusCode enum and static headers")
}

/// Translate a pool error into the equivalent JSON error response
pub fn hub_error_response(err: &HubError) -> Response<BoxBody<Bytes, hyper::Error>> {
    json_error_response(err.code(), err.to_string())
}
