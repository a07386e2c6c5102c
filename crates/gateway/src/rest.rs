//! Authenticated REST surface over companions.

use std::sync::Arc;

use {
    axum::{
        Extension, Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
        http::{StatusCode, header::CONTENT_TYPE},
        routing::{get, post},
    },
    serde::Deserialize,
    serde_json::{Value, json},
    tracing::{debug, info},
    uuid::Uuid,
};

use {
    tether_auth::Claims,
    tether_simulation::{CommandIntent, CompanionSnapshot},
};

use crate::{
    error::{GatewayError, GatewayResult},
    state::GatewayState,
};

/// Room for multipart framing and the `skinType` field on top of the file.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Companion routes, without the auth layer.
pub fn companion_routes(max_skin_bytes: usize) -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/companions", get(list_handler))
        .route("/companions/{id}", get(get_handler))
        .route("/companions/{id}/command", post(command_handler))
        .route(
            "/companions/{id}/skin",
            post(skin_handler)
                .layer(DefaultBodyLimit::max(max_skin_bytes.saturating_add(MULTIPART_OVERHEAD))),
        )
}

fn parse_id(raw: &str) -> GatewayResult<Uuid> {
    Uuid::parse_str(raw).map_err(|_| GatewayError::InvalidUuid)
}

async fn require_companion(state: &GatewayState, id: Uuid) -> GatewayResult<CompanionSnapshot> {
    state
        .simulation
        .lookup(id)
        .await
        .ok_or(GatewayError::UnknownEntity)
}

async fn list_handler(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    let companions = state.simulation.list().await;
    Json(json!({ "companions": companions }))
}

async fn get_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
) -> GatewayResult<Json<CompanionSnapshot>> {
    let id = parse_id(&id)?;
    Ok(Json(require_companion(&state, id).await?))
}

// ── Commands ─────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CommandRequest {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    payload: Option<Value>,
}

async fn command_handler(
    State(state): State<Arc<GatewayState>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
    body: Bytes,
) -> GatewayResult<Json<Value>> {
    let id = parse_id(&id)?;
    require_companion(&state, id).await?;

    let request: CommandRequest = serde_json::from_slice(&body)
        .map_err(|_| GatewayError::MalformedBody("Invalid request format".into()))?;
    let command = request
        .command
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .ok_or(GatewayError::MissingField("Missing command parameter"))?;

    if state.enforce_ownership && !state.simulation.is_owned_by(id, &claims.sub).await {
        info!(companion = %id, subject = claims.sub, command, "command refused, not owner");
        return Err(GatewayError::Forbidden);
    }

    let intent = CommandIntent {
        entity_id: id,
        command,
        payload: request.payload,
    };
    debug!(companion = %id, subject = claims.sub, command = intent.command, "enqueueing command");
    state.simulation.enqueue_command(intent)?;

    Ok(Json(json!({ "success": true, "message": "Command sent" })))
}

// ── Skins ────────────────────────────────────────────────────────────────────

/// Body of a skin request: either JSON `{skinType}` or a multipart form with
/// a `skinType` text field and an optional `skin` file.
#[derive(Debug)]
pub enum SkinUpload {
    Json { skin_type: Option<String> },
    Multipart { skin_type: Option<String>, file: Option<Vec<u8>> },
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkinJson {
    #[serde(default)]
    skin_type: Option<String>,
}

impl FromRequest<Arc<GatewayState>> for SkinUpload {
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &Arc<GatewayState>) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();

        if content_type.starts_with("multipart/form-data") {
            let limit = state.skins.max_bytes();
            let mut multipart = Multipart::from_request(req, state)
                .await
                .map_err(|e| GatewayError::MalformedBody(e.body_text()))?;

            let mut skin_type = None;
            let mut file = None;
            while let Some(field) = multipart
                .next_field()
                .await
                .map_err(|e| multipart_error(e, limit))?
            {
                match field.name() {
                    Some("skinType") => {
                        let text = field.text().await.map_err(|e| multipart_error(e, limit))?;
                        skin_type = Some(text);
                    },
                    Some("skin") => {
                        let bytes = field.bytes().await.map_err(|e| multipart_error(e, limit))?;
                        if !bytes.is_empty() {
                            file = Some(bytes.to_vec());
                        }
                    },
                    _ => {},
                }
            }
            Ok(Self::Multipart { skin_type, file })
        } else if content_type.starts_with("application/json") {
            let body = Bytes::from_request(req, state)
                .await
                .map_err(|e| GatewayError::MalformedBody(e.body_text()))?;
            let parsed: SkinJson = serde_json::from_slice(&body)
                .map_err(|_| GatewayError::MalformedBody("Invalid request format".into()))?;
            Ok(Self::Json {
                skin_type: parsed.skin_type,
            })
        } else {
            Err(GatewayError::MalformedBody(
                "Expected a JSON or multipart/form-data body".into(),
            ))
        }
    }
}

fn multipart_error(err: axum::extract::multipart::MultipartError, limit: usize) -> GatewayError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge { limit }
    } else {
        GatewayError::MalformedBody(err.body_text())
    }
}

const CUSTOM_SKIN: &str = "custom";

async fn skin_handler(
    State(state): State<Arc<GatewayState>>,
    Path(id): Path<String>,
    upload: SkinUpload,
) -> GatewayResult<Json<Value>> {
    let id = parse_id(&id)?;
    require_companion(&state, id).await?;

    let (skin_type, file, uploaded) = match upload {
        SkinUpload::Json { skin_type } => {
            let skin_type = skin_type
                .filter(|s| !s.trim().is_empty())
                .ok_or(GatewayError::MissingField("Missing skinType parameter"))?;
            (skin_type, None, false)
        },
        SkinUpload::Multipart { skin_type, file } => {
            let uploaded = file.is_some();
            let skin_type = skin_type
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| "default".into());
            (skin_type, file, uploaded)
        },
    };

    let (skin_type, skin_path) = match file {
        Some(bytes) => {
            let path = state.skins.store(id, bytes).await?;
            (CUSTOM_SKIN.to_string(), Some(path.to_string_lossy().into_owned()))
        },
        None if skin_type == CUSTOM_SKIN => {
            return Err(GatewayError::MissingField("A custom skin requires a skin file"));
        },
        None => {
            state.skins.remove(id).await?;
            (skin_type, None)
        },
    };

    let mut payload = json!({ "skinType": skin_type });
    if let Some(path) = &skin_path {
        payload["skinPath"] = json!(path);
    }
    state
        .simulation
        .enqueue_command(CommandIntent::new(id, "set_skin").with_payload(payload))?;

    let message = if uploaded {
        "Skin uploaded successfully".to_string()
    } else {
        format!("Skin updated to {skin_type}")
    };
    info!(companion = %id, skin_type, "skin changed");

    let mut body = json!({
        "success": true,
        "message": message,
        "skinType": skin_type,
    });
    if let Some(path) = skin_path {
        body["skinPath"] = json!(path);
    }
    Ok(Json(body))
}
