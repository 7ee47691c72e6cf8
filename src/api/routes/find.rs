//! Find Route
//!
//! - GET|POST /metrics/find/?query=<pattern>[&from=..&until=..&format=..]

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

pub async fn find(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    RawQuery(query): RawQuery,
    body: String,
) -> ApiResult<Response> {
    let params = params(query, &body);
    let format = format(&params, &request_id)?;
    let pattern = params
        .get("query")
        .filter(|q| !q.is_empty())
        .ok_or_else(|| ApiError::validation(&request_id, "query is required"))?;

    let now = chrono::Utc::now().timestamp();
    let from = params
        .time("from", now)
        .map_err(|e| ApiError::validation(&request_id, e))?;
    let until = params
        .time("until", now)
        .map_err(|e| ApiError::validation(&request_id, e))?;

    let ctx = state.engine.context(request_id.clone());
    let matches = state
        .engine
        .find(pattern, from, until, now, &ctx)
        .await
        .map_err(|e| ApiError::engine(&request_id, e))?;

    let body = format
        .encode_find(pattern, &matches)
        .map_err(|e| ApiError::engine(&request_id, e.into()))?;

    tracing::debug!(
        request_id = %request_id,
        pattern,
        matched = matches.len(),
        format = %format,
        "Find answered"
    );
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}
