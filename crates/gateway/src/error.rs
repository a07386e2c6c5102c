use {
    axum::{
        Json,
        http::StatusCode,
        response::{IntoResponse, Response},
    },
    serde_json::json,
    tracing::error,
};

use {tether_auth::TokenError, tether_simulation::SimulationError};

/// Every failure an HTTP handler can surface. Each variant maps to exactly
/// one status code and a `{ "error": ... }` body.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Authentication required")]
    MissingHeader,
    #[error("Invalid or expired token")]
    Malformed,
    #[error("Invalid or expired token")]
    Expired,
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Invalid companion ID format")]
    InvalidUuid,
    #[error("{0}")]
    MissingField(&'static str),
    #[error("{0}")]
    MalformedBody(String),

    #[error("Not authorized to command this companion")]
    Forbidden,
    #[error("Companion not found")]
    UnknownEntity,
    #[error("Unknown endpoint")]
    UnknownRoute,
    #[error("Skin file exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: usize },
    #[error("Simulation unavailable")]
    SimulationUnavailable,

    /// Detail is logged, never sent to the client.
    #[error("Internal server error")]
    Internal(anyhow::Error),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::MissingHeader | Self::Malformed | Self::Expired | Self::InvalidCredentials => {
                StatusCode::UNAUTHORIZED
            },
            Self::InvalidUuid | Self::MissingField(_) | Self::MalformedBody(_) => {
                StatusCode::BAD_REQUEST
            },
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::UnknownEntity | Self::UnknownRoute => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            Self::SimulationUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn internal(err: impl Into<anyhow::Error>) -> Self {
        Self::Internal(err.into())
    }
}

impl From<TokenError> for GatewayError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => Self::Expired,
            TokenError::Malformed | TokenError::EmptySubject | TokenError::EmptyKey => {
                Self::Malformed
            },
        }
    }
}

impl From<SimulationError> for GatewayError {
    fn from(err: SimulationError) -> Self {
        match err {
            SimulationError::Unavailable => Self::SimulationUnavailable,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        if let Self::Internal(detail) = &self {
            error!(error = ?detail, "request failed");
        }
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
