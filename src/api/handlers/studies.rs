use crate::AppState;
use crate::api::error::AppError;
use crate::multipart::{HeaderParser, MultipartReader};
use crate::services::response::ResponseFormat;
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::TryStreamExt;
use http_body_util::Limited;
use tokio_util::io::StreamReader;

/// `POST /studies`
pub async fn store_instances(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    store(state, None, headers, body).await
}

/// `POST /studies/{StudyInstanceUID}`: every instance must belong to the study.
pub async fn store_study_instances(
    State(state): State<AppState>,
    Path(study_uid): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    store(state, Some(study_uid), headers, body).await
}

async fn store(
    state: AppState,
    study: Option<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<Response, AppError> {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::BadRequest("Content-Type header is required".to_string()))?;
    let format = ResponseFormat::from_accept(
        headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()),
    );

    // `Body` is not covered by DefaultBodyLimit
    let body = Body::new(Limited::new(body, state.config.max_request_body));
    let stream = body.into_data_stream().map_err(std::io::Error::other);
    let reader = MultipartReader::new(content_type, StreamReader::new(stream))?
        .with_header_parser(HeaderParser::new(state.config.max_header_field_size))
        .with_decoded_limit(state.config.max_decoded_part);

    let outcome = state.stow.receive(reader, study.as_deref()).await;
    let document = outcome.render(format)?;

    if !state.config.response_delay.is_zero() {
        tracing::debug!(
            transaction = %outcome.transaction_id,
            delay = ?state.config.response_delay,
            "Delaying STOW-RS response"
        );
        tokio::time::sleep(state.config.response_delay).await;
    }

    let status = StatusCode::from_u16(outcome.status.http_status())
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        status,
        [(header::CONTENT_TYPE, format.content_type())],
        document,
    )
        .into_response())
}
