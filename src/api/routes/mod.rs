//! API Routes
//!
//! Route handlers organized by functionality.

pub mod autocomplete;
pub mod find;
pub mod health;
pub mod render;

use crate::api::error::ApiError;
use crate::api::params::Params;
use crate::encoding::Format;

/// Query string and form body parameters, in that order
pub(crate) fn params(query: Option<String>, body: &str) -> Params {
    let mut params = Params::parse(query.as_deref().unwrap_or_default());
    params.extend(Params::parse(body));
    params
}

pub(crate) fn format(params: &Params, request_id: &str) -> Result<Format, ApiError> {
    Format::from_param(params.get("format").unwrap_or_default())
        .map_err(|e| ApiError::validation(request_id, e.to_string()))
}
