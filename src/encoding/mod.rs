//! Wire formats for render and find answers
//!
//! The set of formats is closed: [`Format`] selects one of the encoders
//! below, each turning [`RenderedSeries`] (or find matches) into bytes.

pub mod error;
pub mod json;
pub mod pickle;
pub mod protobuf;

pub use error::{EncodeError, EncodeResult};

use crate::index::FindMatch;
use crate::render::RenderedSeries;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Format {
    #[default]
    Json,
    Pickle,
    Protobuf,
}

impl Format {
    /// Parse the `format` request parameter
    pub fn from_param(s: &str) -> EncodeResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "" | "json" | "treejson" => Ok(Format::Json),
            "pickle" => Ok(Format::Pickle),
            "protobuf" | "carbonapi_v2_pb" => Ok(Format::Protobuf),
            other => Err(EncodeError::UnknownFormat(other.to_string())),
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Format::Json => "application/json",
            Format::Pickle => "application/pickle",
            Format::Protobuf => "application/x-protobuf",
        }
    }

    pub fn encode_render(&self, series: &[RenderedSeries]) -> EncodeResult<Vec<u8>> {
        match self {
            Format::Json => json::encode_render(series),
            Format::Pickle => pickle::encode_render(series),
            Format::Protobuf => protobuf::encode_render(series),
        }
    }

    pub fn decode_render(&self, data: &[u8]) -> EncodeResult<Vec<RenderedSeries>> {
        match self {
            Format::Json => json::decode_render(data),
            Format::Pickle => pickle::decode_render(data),
            Format::Protobuf => protobuf::decode_render(data),
        }
    }

    /// Encode a find answer for the pattern `query`
    pub fn encode_find(&self, query: &str, matches: &[FindMatch]) -> EncodeResult<Vec<u8>> {
        match self {
            Format::Json => json::encode_find(matches),
            Format::Pickle => pickle::encode_find(matches),
            Format::Protobuf => protobuf::encode_find(query, matches),
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Json => write!(f, "json"),
            Format::Pickle => write!(f, "pickle"),
            Format::Protobuf => write!(f, "protobuf"),
        }
    }
}
