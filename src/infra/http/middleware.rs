use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::render::TASK_ID_HEADER;
use crate::application::error::ErrorReport;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

const MAX_REQUEST_ID_LEN: usize = 128;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

impl RequestContext {
    /// Reuses a caller-supplied request id when it is short printable ASCII.
    fn from_headers(headers: &HeaderMap) -> Self {
        let supplied = headers
            .get(REQUEST_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|id| {
                !id.is_empty()
                    && id.len() <= MAX_REQUEST_ID_LEN
                    && id.bytes().all(|b| b.is_ascii_graphic())
            });
        Self {
            request_id: supplied
                .map(str::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
        }
    }
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext::from_headers(request.headers());
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response.extensions_mut().insert(ctx);
    response
}

/// What the access log records about one finished request.
#[derive(Debug)]
struct ResponseSummary {
    status: StatusCode,
    task_id: Option<String>,
    source: &'static str,
    messages: Vec<String>,
}

impl ResponseSummary {
    /// Takes the diagnostic report off the response so it never reaches the client.
    fn take(response: &mut Response) -> Self {
        let task_id = response
            .headers()
            .get(TASK_ID_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let (source, messages) = match response.extensions_mut().remove::<ErrorReport>() {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        Self {
            status: response.status(),
            task_id,
            source,
            messages,
        }
    }

    fn detail(&self) -> &str {
        self.messages
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let summary = ResponseSummary::take(&mut response);
    let elapsed_ms = start.elapsed().as_millis() as u64;
    record(&summary, &method, uri.path(), &request_id, elapsed_ms);
    response
}

fn record(
    summary: &ResponseSummary,
    method: &Method,
    path: &str,
    request_id: &str,
    elapsed_ms: u64,
) {
    let task_id = summary.task_id.as_deref().unwrap_or("");
    if summary.status.is_server_error() {
        error!(
            target = "texrender::http::response",
            status = summary.status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            source = summary.source,
            detail = %summary.detail(),
            chain = ?summary.messages,
            request_id,
            task_id,
            "Render request failed; task artifacts retained",
        );
    } else if summary.status.is_client_error() {
        warn!(
            target = "texrender::http::response",
            status = summary.status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            source = summary.source,
            detail = %summary.detail(),
            request_id,
            "Client request rejected",
        );
    } else {
        debug!(
            target = "texrender::http::response",
            status = summary.status.as_u16(),
            method = %method,
            path,
            elapsed_ms,
            request_id,
            task_id,
            "Request served",
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::{Router, middleware::from_fn, response::IntoResponse, routing::get};
    use tower::ServiceExt;

    use super::*;

    fn failing_response() -> Response {
        let mut response = (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        response
            .headers_mut()
            .insert(TASK_ID_HEADER, HeaderValue::from_static("task-42"));
        ErrorReport::from_message("test", StatusCode::INTERNAL_SERVER_ERROR, "compiler exploded")
            .attach(&mut response);
        response
    }

    fn router() -> Router {
        Router::new()
            .route("/fail", get(|| async { failing_response() }))
            .route("/ok", get(|| async { "fine" }))
            .layer(from_fn(log_responses))
            .layer(from_fn(set_request_context))
    }

    #[test]
    fn summary_reads_task_header_and_strips_the_report() {
        let mut response = failing_response();

        let summary = ResponseSummary::take(&mut response);

        assert_eq!(summary.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(summary.task_id.as_deref(), Some("task-42"));
        assert_eq!(summary.source, "test");
        assert_eq!(summary.detail(), "compiler exploded");
        assert!(response.extensions().get::<ErrorReport>().is_none());
    }

    #[test]
    fn summary_without_report_has_a_fallback_detail() {
        let mut response = StatusCode::NOT_FOUND.into_response();

        let summary = ResponseSummary::take(&mut response);

        assert!(summary.task_id.is_none());
        assert_eq!(summary.source, "unknown");
        assert_eq!(summary.detail(), "no diagnostic available");
    }

    #[test]
    fn supplied_request_ids_are_reused_only_when_printable() {
        let mut headers = HeaderMap::new();
        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static(" abc-123 "));
        assert_eq!(RequestContext::from_headers(&headers).request_id, "abc-123");

        headers.insert(REQUEST_ID_HEADER, HeaderValue::from_static("has space"));
        let generated = RequestContext::from_headers(&headers).request_id;
        assert!(Uuid::parse_str(&generated).is_ok(), "{generated}");

        let long = "a".repeat(MAX_REQUEST_ID_LEN + 1);
        headers.insert(
            REQUEST_ID_HEADER,
            HeaderValue::from_str(&long).expect("ascii header"),
        );
        assert_ne!(RequestContext::from_headers(&headers).request_id, long);
    }

    #[tokio::test]
    async fn failed_responses_keep_task_header_and_echo_request_id() {
        let response = router()
            .oneshot(
                Request::builder()
                    .uri("/fail")
                    .header(REQUEST_ID_HEADER, "req-7")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-7");
        assert_eq!(response.headers()[TASK_ID_HEADER], "task-42");
        assert!(response.extensions().get::<ErrorReport>().is_none());
    }

    #[tokio::test]
    async fn successful_responses_get_a_generated_request_id() {
        let response = router()
            .oneshot(Request::builder().uri("/ok").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let id = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .expect("ascii id");
        assert!(Uuid::parse_str(id).is_ok(), "{id}");
    }
}
