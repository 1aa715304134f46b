use axum::{
    Form, Json,
    extract::{FromRequest, Query, Request, State, rejection::QueryRejection},
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::application::{
    error::{AppError, HttpError},
    render::{FieldValue, RawRenderOptions, RenderOutput},
};

use super::HttpState;

pub const TASK_ID_HEADER: &str = "x-texrender-task-id";
pub const SIZE_ESTIMATE_HEADER: &str = "x-texrender-size-estimate";
const DPI_HEADER: &str = "x-texrender-dpi";
pub const CACHE_CONTROL_VALUE: &str = "public, max-age=3600";

const MISSING_FORMULA: &str = "Missing formula parameter";

/// Query string, JSON body or form body of a render request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RenderParams {
    pub formula: Option<FieldValue>,
    #[serde(flatten)]
    pub options: RawRenderOptions,
}

impl RenderParams {
    fn formula(&self) -> Option<String> {
        let formula = match self.formula.as_ref()? {
            FieldValue::Text(text) => text.clone(),
            FieldValue::Integer(value) => value.to_string(),
            FieldValue::Float(value) => value.to_string(),
            FieldValue::Bool(_) => return None,
        };
        (!formula.trim().is_empty()).then_some(formula)
    }
}

/// POST body: JSON when declared as such, otherwise a urlencoded form.
pub struct RenderPayload(pub RenderParams);

impl<S> FromRequest<S> for RenderPayload
where
    S: Send + Sync,
{
    type Rejection = HttpError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        const SOURCE: &str = "infra::http::render::RenderPayload";

        let content_type = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_ascii_lowercase())
            .unwrap_or_default();

        if content_type.starts_with("application/json") {
            let Json(params) = Json::<RenderParams>::from_request(req, state)
                .await
                .map_err(|rejection| {
                    HttpError::new(
                        SOURCE,
                        rejection.status(),
                        rejection.body_text(),
                        rejection.body_text(),
                    )
                })?;
            return Ok(Self(params));
        }

        if content_type.starts_with("application/x-www-form-urlencoded") {
            let Form(params) = Form::<RenderParams>::from_request(req, state)
                .await
                .map_err(|rejection| {
                    HttpError::new(
                        SOURCE,
                        rejection.status(),
                        rejection.body_text(),
                        rejection.body_text(),
                    )
                })?;
            return Ok(Self(params));
        }

        // Anything else carries no parameters.
        Ok(Self(RenderParams::default()))
    }
}

pub(super) async fn render_get(
    State(state): State<HttpState>,
    query: Result<Query<RenderParams>, QueryRejection>,
) -> Response {
    match query {
        Ok(Query(params)) => render(state, params).await,
        Err(rejection) => {
            HttpError::bad_request("infra::http::render::render_get", rejection.body_text())
                .into_response()
        }
    }
}

pub(super) async fn render_post(
    State(state): State<HttpState>,
    RenderPayload(params): RenderPayload,
) -> Response {
    render(state, params).await
}

async fn render(state: HttpState, params: RenderParams) -> Response {
    match render_inner(state, params).await {
        Ok(output) => image_response(output),
        Err(err) => err.into_response(),
    }
}

async fn render_inner(state: HttpState, params: RenderParams) -> Result<RenderOutput, AppError> {
    let formula = params
        .formula()
        .ok_or_else(|| AppError::validation(MISSING_FORMULA))?;
    let options = params.options.normalize()?;
    let output = state.renderer.render(&formula, &options).await?;
    Ok(output)
}

fn image_response(output: RenderOutput) -> Response {
    let placeholder = output
        .size_estimate
        .as_ref()
        .is_some_and(|estimate| estimate.is_placeholder());

    let mut response = (StatusCode::OK, output.content).into_response();
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(output.content_type),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(CACHE_CONTROL_VALUE),
    );
    if let Ok(value) = HeaderValue::from_str(output.task_id.as_str()) {
        headers.insert(TASK_ID_HEADER, value);
    }
    headers.insert(DPI_HEADER, HeaderValue::from(output.dpi));
    if placeholder {
        headers.insert(SIZE_ESTIMATE_HEADER, HeaderValue::from_static("placeholder"));
    }
    response
}
