use std::io::Cursor;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        multipart::MultipartRejection, rejection::FormRejection, DefaultBodyLimit, Multipart,
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use image::{DynamicImage, ImageReader, Limits};
use serde_json::json;
use time::Duration;
use tokio::task::JoinError;
use tower_sessions::{Expiry, MemoryStore, Session, SessionManagerLayer};

use crate::accounts::{AccountError, AccountStore};
use crate::diagnosis::DiagnosisRequester;
use crate::models::Credentials;

const LOGGED_IN_KEY: &str = "logged_in";
const USERNAME_KEY: &str = "username";
const IMAGE_FIELD: &str = "image";
const MAX_DECODED_BYTES: u64 = 256 * 1024 * 1024;
const MAX_IMAGE_SIDE: u32 = 16_384;

#[derive(Clone)]
pub struct AppState {
    pub requester: Arc<DiagnosisRequester>,
    pub accounts: Arc<AccountStore>,
}

pub fn router(state: AppState, max_upload_bytes: usize, secure_cookies: bool) -> Router {
    let session_layer = SessionManagerLayer::new(MemoryStore::default())
        .with_secure(secure_cookies)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)));

    Router::new()
        .route("/health", get(health))
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/logout", get(logout).post(logout))
        .route(
            "/analyze",
            post(analyze).layer(DefaultBodyLimit::max(max_upload_bytes)),
        )
        .layer(session_layer)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"error": message.into()}))).into_response()
}

fn credentials(form: Result<Form<Credentials>, FormRejection>) -> Result<Credentials, Response> {
    form.map(|Form(creds)| creds).map_err(|rejection| {
        tracing::debug!(error = %rejection, "malformed credentials form");
        error_response(StatusCode::BAD_REQUEST, AccountError::InvalidInput.to_string())
    })
}

async fn is_authenticated(session: &Session) -> bool {
    matches!(session.get::<bool>(LOGGED_IN_KEY).await, Ok(Some(true)))
}

// ── Health ───────────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "model_configured": state.requester.is_configured(),
    }))
}

// ── Accounts ─────────────────────────────────────────────────────────────────

async fn register(
    State(state): State<AppState>,
    form: Result<Form<Credentials>, FormRejection>,
) -> Response {
    let creds = match credentials(form) {
        Ok(creds) => creds,
        Err(response) => return response,
    };
    let accounts = state.accounts.clone();
    let username = creds.username.clone();
    let outcome =
        tokio::task::spawn_blocking(move || accounts.create(&creds.username, &creds.password))
            .await;

    match outcome {
        Ok(Ok(())) => {
            tracing::info!(username = %username, "account created");
            (
                StatusCode::CREATED,
                Json(json!({"message": "Account created! You can now login."})),
            )
                .into_response()
        }
        Ok(Err(e @ AccountError::UsernameTaken)) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Ok(Err(e @ AccountError::InvalidInput)) => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(username = %username, error = %e, "account creation failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not create account")
        }
        Err(e) => {
            tracing::error!(error = %e, "account task panicked");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not create account")
        }
    }
}

async fn login(
    State(state): State<AppState>,
    session: Session,
    form: Result<Form<Credentials>, FormRejection>,
) -> Response {
    let creds = match credentials(form) {
        Ok(creds) => creds,
        Err(response) => return response,
    };
    let accounts = state.accounts.clone();
    let username = creds.username.clone();
    let outcome =
        tokio::task::spawn_blocking(move || accounts.verify(&creds.username, &creds.password))
            .await;
    let verified = credentials_accepted(outcome, &username);

    if !verified {
        tracing::info!(username = %username, "login rejected");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid credentials");
    }

    let stored = async {
        session.cycle_id().await?;
        session.insert(LOGGED_IN_KEY, true).await?;
        session.insert(USERNAME_KEY, &username).await
    }
    .await;

    if let Err(e) = stored {
        tracing::error!(username = %username, error = %e, "could not store session");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Session error");
    }

    tracing::info!(username = %username, "logged in");
    Json(json!({"message": "Logged in", "username": username})).into_response()
}

/// A failed verification task counts as a rejection, but is logged.
fn credentials_accepted(outcome: Result<bool, JoinError>, username: &str) -> bool {
    outcome.unwrap_or_else(|e| {
        tracing::error!(username = %username, error = %e, "credential check task failed");
        false
    })
}

async fn logout(session: Session) -> impl IntoResponse {
    if let Err(e) = session.flush().await {
        tracing::warn!(error = %e, "could not flush session");
    }
    Json(json!({"message": "Logged out"}))
}

// ── Analysis ─────────────────────────────────────────────────────────────────

enum ImageField {
    Missing,
    TooLarge,
    Present(Bytes),
}

async fn read_image_field(mut multipart: Multipart) -> ImageField {
    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => return ImageField::Missing,
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => return ImageField::TooLarge,
            Err(_) => return ImageField::Missing,
        };
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        return match field.bytes().await {
            Ok(bytes) => ImageField::Present(bytes),
            Err(e) if e.status() == StatusCode::PAYLOAD_TOO_LARGE => ImageField::TooLarge,
            Err(_) => ImageField::Missing,
        };
    }
}

fn upload_limits() -> Limits {
    let mut limits = Limits::default();
    limits.max_alloc = Some(MAX_DECODED_BYTES);
    limits.max_image_width = Some(MAX_IMAGE_SIDE);
    limits.max_image_height = Some(MAX_IMAGE_SIDE);
    limits
}

/// Sniffs the format from the bytes and decodes within `limits`. Blocking.
fn decode_upload(bytes: &[u8], limits: Limits) -> Result<DynamicImage, image::ImageError> {
    let mut reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(limits);
    reader.decode()
}

async fn analyze(
    State(state): State<AppState>,
    session: Session,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    if !is_authenticated(&session).await {
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let bytes = match multipart {
        Ok(multipart) => match read_image_field(multipart).await {
            ImageField::Present(bytes) => bytes,
            ImageField::Missing => {
                return error_response(StatusCode::BAD_REQUEST, "No image file found")
            }
            ImageField::TooLarge => {
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Image file too large")
            }
        },
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "No image file found"),
    };

    let size = bytes.len();
    let decoded =
        tokio::task::spawn_blocking(move || decode_upload(&bytes, upload_limits())).await;
    let image = match decoded {
        Ok(Ok(image)) => image,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, bytes = size, "upload is not a decodable image");
            return error_response(StatusCode::BAD_REQUEST, "Invalid image file");
        }
        Err(e) => {
            tracing::error!(error = %e, "image decoding task failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not process image");
        }
    };

    match state.requester.diagnose(image).await {
        Ok(diagnosis) => (StatusCode::OK, Json(diagnosis)).into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
