use std::sync::Arc;

use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::Form;

use crate::formatter::{run_formatter, sanitize};
use crate::models::{FormatForm, FormatOutcome};
use crate::{AppState, FmtdError};

/// `GET /` — the static submission form, identical for every request.
pub async fn index(State(state): State<Arc<AppState>>) -> Html<&'static str> {
    Html(state.index_html)
}

/// `POST /format` — sanitize the submitted source, run the formatter under
/// its deadline, and return the classified outcome.
///
/// Empty input (after sanitization) short-circuits to an empty 200 body
/// without spawning a subprocess.
pub async fn format(
    State(state): State<Arc<AppState>>,
    form: Result<Form<FormatForm>, FormRejection>,
) -> Result<impl IntoResponse, FmtdError> {
    let Form(payload) = form.map_err(|e| FmtdError::BadRequest(e.body_text()))?;

    let source = sanitize(&payload.src);
    if source.is_empty() {
        return Ok((StatusCode::OK, Vec::new()));
    }

    match run_formatter(&state.config, &source).await {
        FormatOutcome::Succeeded(bytes) => Ok((StatusCode::OK, bytes)),
        FormatOutcome::TimedOut => {
            tracing::warn!(
                timeout_ms = state.config.timeout_ms,
                "formatter exceeded its deadline"
            );
            Err(FmtdError::Timeout(state.config.timeout_ms))
        }
        FormatOutcome::Failed(msg) => {
            tracing::warn!(error = %msg, "formatter failed");
            Err(FmtdError::Formatter(msg))
        }
    }
}
