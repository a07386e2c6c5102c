use std::sync::Arc;

use {
    axum::{
        Extension, Json,
        body::Bytes,
        extract::{Request, State},
        http::{HeaderMap, header::AUTHORIZATION},
        middleware::Next,
        response::{IntoResponse, Response},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{info, warn},
};

use tether_auth::{Claims, TokenService};

use crate::{
    error::{GatewayError, GatewayResult},
    state::GatewayState,
};

#[derive(Deserialize)]
struct LoginRequest {
    username: String,
    password: String,
}

/// `POST /auth/login`
pub async fn login_handler(
    State(state): State<Arc<GatewayState>>,
    body: Bytes,
) -> GatewayResult<Json<Value>> {
    let LoginRequest { username, password } = serde_json::from_slice(&body)
        .map_err(|_| GatewayError::MalformedBody("Invalid request format".into()))?;

    let credentials = Arc::clone(&state.credentials);
    let (ok, username) = tokio::task::spawn_blocking(move || {
        let ok = credentials.verify(&username, &password);
        (ok, username)
    })
    .await
    .map_err(GatewayError::internal)?;

    if !ok {
        warn!(username, "rejected login attempt");
        return Err(GatewayError::InvalidCredentials);
    }

    let token = state.tokens.issue(&username).map_err(GatewayError::internal)?;
    info!(username, "login succeeded");
    Ok(Json(json!({ "token": token, "username": username })))
}

/// `GET /auth/validate`; the bearer middleware has already checked the token.
pub async fn validate_handler(Extension(claims): Extension<Claims>) -> Json<Value> {
    Json(json!({
        "valid": true,
        "username": claims.sub,
        "expiresAt": claims.exp,
    }))
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> GatewayResult<&str> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(GatewayError::MissingHeader)
}

pub fn authenticate(tokens: &TokenService, headers: &HeaderMap) -> GatewayResult<Claims> {
    Ok(tokens.validate(bearer_token(headers)?)?)
}

/// Middleware guarding every REST route. Valid claims are attached to the
/// request as an extension.
pub async fn require_bearer(
    State(state): State<Arc<GatewayState>>,
    mut req: Request,
    next: Next,
) -> Response {
    match authenticate(&state.tokens, req.headers()) {
        Ok(claims) => {
            req.extensions_mut().insert(claims);
            next.run(req).await
        },
        Err(e) => e.into_response(),
    }
}
