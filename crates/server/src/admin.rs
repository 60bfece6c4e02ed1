//! Admin read surface
//!
//! Bearer-token (JWT, HS256) gated endpoints returning aggregate stats,
//! profiles, guardrail events, command patterns, and model configuration.
//! Disabled entirely when no signing secret is configured.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    iat: u64,
    exp: u64,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/stats", get(stats))
        .route("/profiles", get(profiles))
        .route("/guardrails/events", get(guardrail_events))
        .route("/guardrails/patterns", get(jailbreak_patterns))
        .route("/patterns", get(command_patterns))
        .route("/voice-enrolments", get(voice_enrolments).post(enrol_voice))
        .route("/models", get(models))
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    /// The configured admin secret
    key: String,
}

async fn login(State(state): State<AppState>, Json(request): Json<LoginRequest>) -> Response {
    let secret = &state.settings.admin.jwt_secret;
    if secret.is_empty() {
        return (StatusCode::SERVICE_UNAVAILABLE, "admin surface disabled").into_response();
    }
    if request.key != *secret {
        return (StatusCode::UNAUTHORIZED, "invalid key").into_response();
    }

    let now = chrono::Utc::now().timestamp() as u64;
    let claims = Claims {
        sub: "admin".to_string(),
        iat: now,
        exp: now + state.settings.admin.jwt_expiry_secs,
    };
    match encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())) {
        Ok(token) => Json(serde_json::json!({
            "token": token,
            "expires_in": state.settings.admin.jwt_expiry_secs,
        }))
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "token issuance failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Validate the bearer token; `Err` is the ready-made rejection response
fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let secret = &state.settings.admin.jwt_secret;
    if secret.is_empty() {
        return Err((StatusCode::SERVICE_UNAVAILABLE, "admin surface disabled").into_response());
    }

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let Some(token) = token else {
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token").into_response());
    };

    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|_| ())
    .map_err(|_| (StatusCode::UNAUTHORIZED, "invalid or expired token").into_response())
}

async fn stats(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(serde_json::json!({
        "interactions": state.log.len(),
        "layers": state.log.layer_counts(),
        "memory_records": state.memory.record_count(),
        "jailbreak_patterns_active": state.guardrails.pattern_count(),
        "provider_health": state.registry.health_snapshot(),
    }))
    .into_response()
}

async fn profiles(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.profiles.all_profiles()).into_response()
}

async fn guardrail_events(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.guardrails.recent_events(200)).into_response()
}

async fn jailbreak_patterns(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.guardrails.all_patterns()).into_response()
}

async fn command_patterns(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.actions.all_patterns()).into_response()
}

async fn voice_enrolments(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(state.profiles.voice_enrolments()).into_response()
}

#[derive(Debug, Deserialize)]
struct EnrolVoiceRequest {
    user_id: String,
    #[serde(default = "default_enrolment_label")]
    label: String,
    /// Speaker embedding from the enrolment capture flow
    embedding: Vec<f32>,
}

fn default_enrolment_label() -> String {
    "default".to_string()
}

async fn enrol_voice(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<EnrolVoiceRequest>,
) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    if request.user_id.trim().is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "user_id required").into_response();
    }
    if request.embedding.is_empty() {
        return (StatusCode::UNPROCESSABLE_ENTITY, "embedding must be non-empty").into_response();
    }

    let summary =
        state.profiles.enrol_voice(&request.user_id, &request.label, request.embedding);
    (StatusCode::CREATED, Json(summary)).into_response()
}

async fn models(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&state, &headers) {
        return rejection;
    }
    Json(serde_json::json!({
        "roles": state.settings.providers.roles,
        "primary": {
            "kind": state.settings.providers.primary.kind,
            "url": state.settings.providers.primary.url,
        },
        "health": state.registry.health_snapshot(),
    }))
    .into_response()
}
