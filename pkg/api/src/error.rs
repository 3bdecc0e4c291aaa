use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use pkg_container::BackendError;
use pkg_controllers::ReclaimError;
use pkg_network::AllocationError;
use pkg_spawner::SpawnError;
use serde_json::json;
use tracing::error;

/// Error returned by every handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    Unauthorized,
    Forbidden(String),
    NotFound(String),
    BadRequest(String),
    NotImplemented(String),
    Unavailable(String),
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            ApiError::Unauthorized => "missing or invalid token",
            ApiError::Forbidden(m)
            | ApiError::NotFound(m)
            | ApiError::BadRequest(m)
            | ApiError::NotImplemented(m)
            | ApiError::Unavailable(m)
            | ApiError::Internal(m) => m,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}: {}", status, self.message());
        }
        (status, Json(json!({ "error": self.message() }))).into_response()
    }
}

fn from_backend(e: &BackendError) -> ApiError {
    match e {
        BackendError::InvalidSpec(_) => ApiError::BadRequest(e.to_string()),
        BackendError::Unsupported { .. } => ApiError::NotImplemented(e.to_string()),
        e if e.is_unavailable() => ApiError::Unavailable(e.to_string()),
        e => ApiError::Internal(e.to_string()),
    }
}

impl From<SpawnError> for ApiError {
    fn from(e: SpawnError) -> Self {
        match &e {
            SpawnError::InvalidOptions(_) => ApiError::BadRequest(e.to_string()),
            SpawnError::Allocation(AllocationError::AddressSpaceExhausted { .. })
            | SpawnError::Allocation(AllocationError::Contended { .. }) => {
                ApiError::Unavailable(e.to_string())
            }
            SpawnError::Allocation(AllocationError::Backend(inner))
            | SpawnError::Backend(inner) => from_backend(inner),
            SpawnError::HubConnect { .. } if e.is_unavailable() => {
                ApiError::Unavailable(e.to_string())
            }
            SpawnError::HubConnect { .. } => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ReclaimError> for ApiError {
    fn from(e: ReclaimError) -> Self {
        match &e {
            ReclaimError::UnsupportedInMode { .. } => ApiError::NotImplemented(e.to_string()),
            ReclaimError::Session(_) => ApiError::Unavailable(e.to_string()),
            ReclaimError::Backend(inner) => from_backend(inner),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e.to_string())
    }
}
