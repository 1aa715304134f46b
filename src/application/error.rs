use std::error::Error as StdError;

use axum::{
    Json,
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    application::render::{OptionsError, RenderFailure},
    infra::{error::InfraError, http::TASK_ID_HEADER},
};

/// Diagnostic chain attached to error responses for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// JSON error body: `{"error": ..., "taskId": ...}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    #[serde(rename = "taskId", skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

/// An HTTP-facing error with a public message and a private diagnostic report.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: String,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message: public_message.into(),
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn bad_request(source: &'static str, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(source, StatusCode::BAD_REQUEST, message.clone(), message)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.public_message,
            task_id: None,
        };
        let mut response = (self.status, Json(body)).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Render(#[from] RenderFailure),
    #[error(transparent)]
    Options(#[from] OptionsError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Options(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Render(_) | AppError::Infra(_) | AppError::Unexpected(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to callers. Render failures carry the tool diagnostics,
    /// which is what a formula author needs to fix their input.
    fn presentation_message(&self) -> String {
        match self {
            AppError::Render(failure) => failure.source.to_string(),
            AppError::Options(err) => err.to_string(),
            AppError::Validation(message) => message.clone(),
            AppError::Infra(InfraError::Configuration { .. }) => {
                "Service misconfigured".to_string()
            }
            AppError::Infra(InfraError::Toolchain { .. }) => {
                "Render toolchain unavailable".to_string()
            }
            AppError::Infra(InfraError::Telemetry(_)) => {
                "Logging subsystem could not start".to_string()
            }
            AppError::Infra(InfraError::Bind { .. } | InfraError::Output { .. }) => {
                "I/O failure during request".to_string()
            }
            AppError::Unexpected(_) => "Unexpected error occurred".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody {
            error: self.presentation_message(),
            task_id: match &self {
                AppError::Render(failure) => Some(failure.task_id.to_string()),
                _ => None,
            },
        };
        let report = ErrorReport::from_error("application::error::AppError", status, &self);
        let mut response = (status, Json(body)).into_response();
        if let AppError::Render(failure) = &self {
            if let Ok(value) = HeaderValue::from_str(failure.task_id.as_str()) {
                response.headers_mut().insert(TASK_ID_HEADER, value);
            }
        }
        report.attach(&mut response);
        response
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::application::render::{RenderError, TaskId};

    async fn json_body(response: Response) -> serde_json::Value {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("collect body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn render_failure_maps_to_500_with_task_id() {
        let task_id = TaskId::generate();
        let failure = RenderFailure {
            task_id: task_id.clone(),
            source: RenderError::Compile {
                lines: vec!["! Undefined control sequence.".into()],
            },
        };
        let response = AppError::from(failure).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .cloned()
            .expect("report attached");
        assert!(report.messages.len() >= 2);

        assert_eq!(response.headers()[TASK_ID_HEADER], task_id.as_str());

        let body = json_body(response).await;
        assert_eq!(body["taskId"], task_id.as_str());
        assert!(
            body["error"]
                .as_str()
                .expect("error string")
                .contains("Undefined control sequence")
        );
    }

    #[tokio::test]
    async fn infra_errors_hide_their_detail_from_callers() {
        let err = AppError::from(InfraError::toolchain("compiler not found at /opt/tex"));
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!response.headers().contains_key(TASK_ID_HEADER));
        let report = response
            .extensions()
            .get::<ErrorReport>()
            .cloned()
            .expect("report attached");
        assert!(report.messages[0].contains("/opt/tex"));

        let body = json_body(response).await;
        assert_eq!(body["error"], "Render toolchain unavailable");
    }

    #[tokio::test]
    async fn options_error_maps_to_400_without_task_id() {
        let response =
            AppError::from(OptionsError::InvalidColor("}".into())).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body.get("taskId").is_none());
    }
}
