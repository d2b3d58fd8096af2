//! HTTP API over the secret store.
//!
//! Sealing and opening are CPU-bound (Argon2id), so every store call runs on
//! the blocking pool.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{
        rejection::JsonRejection, ConnectInfo, DefaultBodyLimit, Multipart, Path, Request, State,
    },
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use shhh_core::{store::sanitize_name, EphemeralStore, StoreError, StoreReceipt};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::timeout::TimeoutLayer;
use zeroize::Zeroizing;

use crate::config::LimitsSection;
use crate::validate::{max_chars, not_blank, Validator};

/// Slack on top of the largest payload for multipart framing and form fields
const REQUEST_OVERHEAD: usize = 10 * 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Name given to uploads that arrive without a usable filename
const FALLBACK_FILENAME: &str = "secret.bin";

const CONTENT_SECURITY_POLICY: &str = "default-src 'self'; script-src 'self' 'unsafe-inline'; \
     style-src 'self' 'unsafe-inline' 'unsafe-hashes'";

/// Shared state threaded through the handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<EphemeralStore>,
    pub limits: Arc<LimitsSection>,
}

impl AppState {
    fn ttl(&self, exp_secs: i64) -> chrono::Duration {
        chrono::Duration::seconds(exp_secs.min(self.limits.max_retention_secs as i64))
    }
}

pub fn router(state: AppState) -> Router {
    let body_limit = usize::try_from(state.limits.max_file_size)
        .unwrap_or(usize::MAX)
        .saturating_add(REQUEST_OVERHEAD);

    let routes = Router::new()
        .route("/healthz", get(health))
        .route("/api/params", get(params))
        .route("/api/secret", post(save_secret))
        .route("/api/file", post(upload_file))
        .route("/api/secret/{id}/{passphrase}", get(retrieve_secret))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit));
    harden(routes)
}

/// Wrap `routes` in panic recovery, request logging, the request timeout and
/// the security headers every response carries.
fn harden(routes: Router) -> Router {
    routes
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(middleware::from_fn(log_request))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static(CONTENT_SECURITY_POLICY),
        ))
}

// ── Responses ────────────────────────────────────────────────────────────────

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn validation_response(v: Validator) -> Response {
    log::warn!("validation failed: {:?}", v.errors);
    (StatusCode::BAD_REQUEST, Json(v)).into_response()
}

fn store_error_response(e: StoreError) -> Response {
    log::warn!("can't store secret: {}", e);
    let status = match e {
        StoreError::InvalidTtl => StatusCode::BAD_REQUEST,
        StoreError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        StoreError::StoreFull { .. } => StatusCode::SERVICE_UNAVAILABLE,
        StoreError::RandomSourceFailure | StoreError::Encryption(_) => {
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "can't store secret");
        }
    };
    error_response(status, &e.to_string())
}

fn panic_response(_: Box<dyn std::any::Any + Send + 'static>) -> Response {
    log::error!("handler panicked");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn not_found() -> Response {
    error_response(StatusCode::NOT_FOUND, "secret not found")
}

fn internal_error(e: impl std::fmt::Display) -> Response {
    log::error!("internal error: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn created(receipt: &StoreReceipt, exp: i64, filename: Option<&str>) -> Response {
    let mut body = json!({
        "key": receipt.id,
        "exp": exp,
        "expires_at": receipt.expires_at.to_rfc3339(),
    });
    if let Some(filename) = filename {
        body["filename"] = json!(filename);
    }
    (StatusCode::CREATED, Json(body)).into_response()
}

// ── Health & params ──────────────────────────────────────────────────────────

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn params(State(state): State<AppState>) -> impl IntoResponse {
    log::debug!("params requested");
    Json(json!({
        "max_phrase_size": state.limits.max_phrase_size,
        "max_items": state.limits.max_items,
        "max_file_size": state.limits.max_file_size,
        "max_retention": state.limits.max_retention_secs,
    }))
}

// ── Create ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct SaveSecretRequest {
    secret: String,
    exp: i64,
    passphrase: String,
}

fn check_passphrase(v: &mut Validator, passphrase: &str, limits: &LimitsSection) {
    v.check_field(
        not_blank(passphrase),
        "passphrase",
        "passphrase is required",
    );
    v.check_field(
        max_chars(passphrase, limits.max_phrase_size),
        "passphrase",
        "passphrase exceeds maximum size",
    );
}

fn check_exp(v: &mut Validator, exp: i64) {
    v.check_field(exp >= 1, "exp", "expiration must be at least 1 second");
}

pub async fn save_secret(
    State(state): State<AppState>,
    payload: Result<Json<SaveSecretRequest>, JsonRejection>,
) -> Response {
    let Json(req) = match payload {
        Ok(req) => req,
        Err(e) => {
            log::warn!("can't bind request: {}", e.body_text());
            return error_response(StatusCode::BAD_REQUEST, "can't decode request");
        }
    };
    let secret = Zeroizing::new(req.secret);
    let passphrase = Zeroizing::new(req.passphrase);

    let mut v = Validator::new();
    v.check_field(not_blank(&secret), "secret", "secret is required");
    v.check_field(
        secret.len() as u64 <= state.limits.max_file_size,
        "secret",
        "secret exceeds maximum size",
    );
    check_passphrase(&mut v, &passphrase, &state.limits);
    check_exp(&mut v, req.exp);
    if !v.is_valid() {
        return validation_response(v);
    }

    let ttl = state.ttl(req.exp);
    let store = Arc::clone(&state.store);
    let result =
        tokio::task::spawn_blocking(move || store.store(secret.as_bytes(), "", &passphrase, ttl))
            .await;

    match result {
        Ok(Ok(receipt)) => {
            log::info!(
                "created secret {} (expires {})",
                receipt.id,
                receipt.expires_at.to_rfc3339()
            );
            created(&receipt, ttl.num_seconds(), None)
        }
        Ok(Err(e)) => store_error_response(e),
        Err(e) => internal_error(e),
    }
}

pub async fn upload_file(State(state): State<AppState>, mut multipart: Multipart) -> Response {
    let mut file: Option<(Option<String>, Zeroizing<Vec<u8>>)> = None;
    let mut passphrase = Zeroizing::new(String::new());
    let mut exp_raw = String::new();
    let mut form_filename = String::new();

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                log::warn!("can't parse multipart form: {}", e);
                return error_response(StatusCode::BAD_REQUEST, "can't parse multipart form");
            }
        };

        let name = field.name().unwrap_or_default().to_string();
        let read = match name.as_str() {
            "file" => {
                let upload_name = field.file_name().map(str::to_string);
                field
                    .bytes()
                    .await
                    .map(|data| file = Some((upload_name, Zeroizing::new(data.to_vec()))))
            }
            "passphrase" => field.text().await.map(|t| passphrase = Zeroizing::new(t)),
            "exp" => field.text().await.map(|t| exp_raw = t),
            "filename" => field.text().await.map(|t| form_filename = t),
            _ => Ok(()),
        };
        if let Err(e) = read {
            log::warn!("can't read form field {}: {}", name, e);
            return error_response(StatusCode::BAD_REQUEST, "can't parse multipart form");
        }
    }

    let Some((upload_name, data)) = file else {
        let mut v = Validator::new();
        v.add_field_error("file", "file is required");
        return validation_response(v);
    };

    let exp = exp_raw.trim().parse::<i64>().unwrap_or(0);
    let mut v = Validator::new();
    check_passphrase(&mut v, &passphrase, &state.limits);
    check_exp(&mut v, exp);
    if !v.is_valid() {
        return validation_response(v);
    }

    // A file must keep a name, otherwise it would come back as a text secret
    let filename = upload_name
        .filter(|n| !n.is_empty())
        .unwrap_or(form_filename);
    let filename = match sanitize_name(&filename) {
        clean if clean.is_empty() => FALLBACK_FILENAME.to_string(),
        clean => clean,
    };

    let ttl = state.ttl(exp);
    let store = Arc::clone(&state.store);
    let result =
        tokio::task::spawn_blocking(move || store.store(&data, &filename, &passphrase, ttl)).await;

    match result {
        Ok(Ok(receipt)) => {
            log::info!(
                "uploaded file {} as {} (expires {})",
                receipt.name,
                receipt.id,
                receipt.expires_at.to_rfc3339()
            );
            created(&receipt, ttl.num_seconds(), Some(&receipt.name))
        }
        Ok(Err(e)) => store_error_response(e),
        Err(e) => internal_error(e),
    }
}

// ── Retrieve ─────────────────────────────────────────────────────────────────

pub async fn retrieve_secret(
    State(state): State<AppState>,
    Path((id, passphrase)): Path<(String, String)>,
) -> Response {
    let passphrase = Zeroizing::new(passphrase);
    let store = Arc::clone(&state.store);
    let lookup_id = id.clone();
    let result =
        tokio::task::spawn_blocking(move || store.retrieve(&lookup_id, &passphrase)).await;

    let mut secret = match result {
        Ok(Ok(secret)) => secret,
        Ok(Err(e)) => {
            // Every failure looks the same from outside
            log::warn!("secret retrieval failed for {}: {}", id, e);
            return not_found();
        }
        Err(e) => return internal_error(e),
    };

    if secret.is_file() {
        let disposition = match HeaderValue::from_str(&content_disposition(&secret.name)) {
            Ok(value) => value,
            Err(e) => return internal_error(e),
        };
        let data = std::mem::take(&mut *secret.payload);
        log::info!("retrieved file {} ({})", id, secret.name);
        return (
            StatusCode::OK,
            [
                (
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/octet-stream"),
                ),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            data,
        )
            .into_response();
    }

    log::info!("retrieved secret {}", id);
    let text = Zeroizing::new(String::from_utf8_lossy(&secret.payload).into_owned());
    Json(json!({ "secret": text.as_str() })).into_response()
}

/// `attachment` disposition with an ASCII fallback name and the exact UTF-8
/// name in `filename*` (RFC 5987).
fn content_disposition(name: &str) -> String {
    let fallback: String = name
        .chars()
        .map(|c| match c {
            '"' => '\'',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        percent_encode(name)
    )
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for b in value.bytes() {
        match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'!'
            | b'#'
            | b'$'
            | b'&'
            | b'+'
            | b'-'
            | b'.'
            | b'^'
            | b'_'
            | b'`'
            | b'|'
            | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

// ── Request logging ──────────────────────────────────────────────────────────

async fn log_request(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = mask_path(req.uri().path());
    let ip = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());
    let start = Instant::now();

    let response = next.run(req).await;

    log::info!(
        "{} {} from {} -> {} in {:?}",
        method,
        path,
        ip,
        response.status().as_u16(),
        start.elapsed()
    );
    response
}

/// Hide the passphrase and shorten the id in `/api/secret/{id}/{passphrase}`.
fn mask_path(path: &str) -> String {
    let segments: Vec<&str> = path.split('/').collect();
    match segments.iter().position(|s| *s == "secret") {
        Some(i) if i + 2 < segments.len() => {
            let id = segments[i + 1];
            let id = match id.char_indices().nth(8) {
                Some((cut, _)) => format!("{}...", &id[..cut]),
                None => id.to_string(),
            };
            format!("{}/{}/*****", segments[..=i].join("/"), id)
        }
        _ => path.to_string(),
    }
}
