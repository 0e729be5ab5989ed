//! Hardening headers applied to every response, with a per-view content
//! policy: the index view may use inline styling, the format view is fully
//! locked down and always plain text.

use axum::extract::Request;
use axum::http::header::{self, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;

const INDEX_CSP: &str = "default-src 'none'; style-src 'unsafe-inline'";
const FORMAT_CSP: &str = "default-src 'none'";

fn apply_common(resp: &mut Response) {
    let headers = resp.headers_mut();
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::STRICT_TRANSPORT_SECURITY,
        HeaderValue::from_static("max-age=63072000; includeSubDomains"),
    );
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::X_XSS_PROTECTION,
        HeaderValue::from_static("1; mode=block"),
    );
}

/// Baseline hardening headers for every response the service produces.
pub async fn common_policy(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    apply_common(&mut resp);
    resp
}

pub async fn index_policy(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(INDEX_CSP),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/html; charset=utf-8"),
    );
    resp
}

/// The format view only ever returns raw formatter output or a short
/// diagnostic; nothing from it may be interpreted as HTML.
pub async fn format_policy(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(FORMAT_CSP),
    );
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    resp
}
