//! Render Route
//!
//! - GET|POST /render/?target=..[&target=..]&from=..&until=..[&format=..&step=..&consolidateBy=..]
//!
//! `from` defaults to 24 hours before `until`, `until` to now.

use axum::{
    extract::{RawQuery, State},
    http::header,
    response::{IntoResponse, Response},
    Extension,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::routes::{format, params};
use crate::api::state::{AppState, RequestId};
use crate::engine::RenderRequest;
use crate::render::Aggregation;

pub async fn render(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    RawQuery(query): RawQuery,
    body: String,
) -> ApiResult<Response> {
    let params = params(query, &body);
    let format = format(&params, &request_id)?;
    let invalid = |e: String| ApiError::validation(&request_id, e);

    let targets = params.all("target");
    if targets.is_empty() {
        return Err(invalid("target is required".to_string()));
    }

    let now = chrono::Utc::now().timestamp();
    let until = params.time("until", now).map_err(invalid)?.unwrap_or(now);
    let from = params
        .time("from", now)
        .map_err(invalid)?
        .unwrap_or(until.saturating_sub(86_400));
    let step = params
        .usize("step")
        .map_err(invalid)?
        .map_or(0, |s| i64::try_from(s).unwrap_or(i64::MAX));
    let aggregation = match params.get("consolidateBy").filter(|v| !v.is_empty()) {
        Some(name) => Some(
            Aggregation::from_str(name)
                .ok_or_else(|| invalid(format!("unknown consolidation function '{}'", name)))?,
        ),
        None => None,
    };

    let request = RenderRequest {
        targets,
        from,
        until,
        step,
        aggregation,
    };
    let ctx = state.engine.context(request_id.clone());
    let series = state
        .engine
        .render(&request, now, &ctx)
        .await
        .map_err(|e| ApiError::engine(&request_id, e))?;

    let body = format
        .encode_render(&series)
        .map_err(|e| ApiError::engine(&request_id, e.into()))?;

    tracing::debug!(
        request_id = %request_id,
        targets = request.targets.len(),
        series = series.len(),
        format = %format,
        bytes = body.len(),
        "Render answered"
    );
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}
