pub mod formatter;
pub mod handlers;
pub mod headers;
pub mod models;
pub mod sandbox;
pub mod server;
pub mod tls;

use std::path::PathBuf;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::formatter::CaptureMode;

/// Static index document, loaded once at compile time and injected into
/// the router through [`AppState`].
pub static INDEX_HTML: &str = include_str!("../assets/index.html");

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub formatter_path: PathBuf,
    pub timeout_ms: u64,
    pub capture_mode: CaptureMode,
    pub sandbox_enabled: bool,
    pub tls_cert_path: Option<PathBuf>,
    pub tls_key_path: Option<PathBuf>,
    pub shutdown_grace_ms: u64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            formatter_path: PathBuf::from(
                std::env::var("FORMATTER_PATH").unwrap_or_else(|_| "indent".into()),
            ),
            timeout_ms: std::env::var("FORMAT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(1_000),
            capture_mode: match std::env::var("CAPTURE_MODE").as_deref() {
                Ok("combined") => CaptureMode::Combined,
                _ => CaptureMode::Stdout,
            },
            sandbox_enabled: std::env::var("SANDBOX_ENABLED")
                .unwrap_or_else(|_| "true".into())
                .to_lowercase()
                == "true",
            tls_cert_path: std::env::var("TLS_CERT_PATH").ok().map(PathBuf::from),
            tls_key_path: std::env::var("TLS_KEY_PATH").ok().map(PathBuf::from),
            shutdown_grace_ms: std::env::var("SHUTDOWN_GRACE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
        }
    }
}

#[derive(Debug)]
pub struct AppState {
    pub config: Config,
    pub index_html: &'static str,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            index_html: INDEX_HTML,
        }
    }
}

/// Request-scoped failures. Each maps to a status and a short plain-text
/// diagnostic; one request's failure never affects another.
#[derive(Debug, thiserror::Error)]
pub enum FmtdError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("formatter timed out after {0} ms")]
    Timeout(u64),
    #[error("formatter error: {0}")]
    Formatter(String),
}

impl IntoResponse for FmtdError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            FmtdError::BadRequest(_) => StatusCode::BAD_REQUEST,
            FmtdError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            FmtdError::Formatter(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Startup invariants. Any of these terminates the process before a single
/// connection is accepted.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("tls: {0}")]
    Tls(String),
}

pub fn create_app(state: Arc<AppState>) -> Router {
    let index = Router::new()
        .route("/", get(handlers::index))
        .layer(middleware::from_fn(headers::index_policy));
    let format = Router::new()
        .route("/format", post(handlers::format))
        .layer(middleware::from_fn(headers::format_policy));

    index
        .merge(format)
        .layer(middleware::from_fn(headers::common_policy))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env();
    tracing::info!(
        port = config.port,
        formatter = %config.formatter_path.display(),
        timeout_ms = config.timeout_ms,
        capture_mode = ?config.capture_mode,
        sandbox_enabled = config.sandbox_enabled,
        tls = config.tls_cert_path.is_some(),
        "starting fmtd"
    );

    // The sandbox must be in place before the listener exists, and it must
    // still allow reading the TLS material loaded right after it.
    if config.sandbox_enabled {
        if let Err(e) = sandbox::apply(&config) {
            tracing::error!(error = %e, "sandbox initialization failed");
            return Err(e.into());
        }
    } else {
        tracing::warn!("sandbox is disabled");
    }

    let acceptor = match tls::build_acceptor(&config) {
        Ok(a) => a,
        Err(e) => {
            tracing::error!(error = %e, "tls initialization failed");
            return Err(e.into());
        }
    };

    let state = Arc::new(AppState::new(config.clone()));
    let app = create_app(state);

    server::serve(&config, app, acceptor).await
}
