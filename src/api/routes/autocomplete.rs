//! Tag Autocomplete Routes
//!
//! - GET|POST /tags/autoComplete/tags?tagPrefix=..&limit=..&expr=..
//! - GET|POST /tags/autoComplete/values?tag=..&valuePrefix=..&limit=..&expr=..
//!
//! `expr` may repeat; each is one tag filter (`dc=east`, `host=~web.*`).

use axum::{
    extract::{RawQuery, State},
    Extension, Json,
};
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::params::Params;
use crate::api::routes::params;
use crate::api::state::{AppState, RequestId};
use crate::autocomplete::{CompleteMode, CompleteRequest};
use crate::pattern::{PatternNode, TagQuery};

/// Compile `expr` parameters into one tag query
fn narrowing(state: &AppState, params: &Params, request_id: &str) -> ApiResult<Option<TagQuery>> {
    let exprs = params.all("expr");
    if exprs.is_empty() {
        return Ok(None);
    }
    let quoted: Vec<String> = exprs
        .iter()
        .map(|e| if e.contains('\'') { format!("\"{}\"", e) } else { format!("'{}'", e) })
        .collect();
    let raw = format!("seriesByTag({})", quoted.join(","));
    let node = state
        .engine
        .compile(&raw)
        .map_err(|e| ApiError::engine(request_id, e))?;
    match node.as_ref() {
        PatternNode::Tagged(query) => Ok(Some(query.clone())),
        PatternNode::Glob(_) => Err(ApiError::validation(request_id, "expr must be tag filters")),
    }
}

async fn complete(
    state: &AppState,
    mut request: CompleteRequest,
    params: &Params,
    request_id: &str,
) -> ApiResult<Json<Vec<String>>> {
    if let Some(expr) = narrowing(state, params, request_id)? {
        request = request.with_expr(expr);
    }
    let today = chrono::Utc::now().date_naive();
    let ctx = state.engine.context(request_id);
    let values = state
        .engine
        .complete(request, today, &ctx)
        .await
        .map_err(|e| ApiError::engine(request_id, e))?;
    Ok(Json(values.as_ref().clone()))
}

pub async fn tag_names(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    RawQuery(query): RawQuery,
    body: String,
) -> ApiResult<Json<Vec<String>>> {
    let params = params(query, &body);
    let limit = params
        .usize("limit")
        .map_err(|e| ApiError::validation(&request_id, e))?
        .unwrap_or(0);
    let request = CompleteRequest::tag_names(CompleteMode::from_param(params.get("tagPrefix")), limit);
    complete(&state, request, &params, &request_id).await
}

pub async fn tag_values(
    State(state): State<Arc<AppState>>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    RawQuery(query): RawQuery,
    body: String,
) -> ApiResult<Json<Vec<String>>> {
    let params = params(query, &body);
    let key = params
        .get("tag")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::validation(&request_id, "tag is required"))?
        .to_string();
    let limit = params
        .usize("limit")
        .map_err(|e| ApiError::validation(&request_id, e))?
        .unwrap_or(0);
    let request = CompleteRequest::tag_values(key, CompleteMode::from_param(params.get("valuePrefix")), limit);
    complete(&state, request, &params, &request_id).await
}
