//! Encoding error types

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("Unknown format: {0}")]
    UnknownFormat(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Pickle error: {0}")]
    Pickle(String),

    #[error("Protobuf error: {0}")]
    Protobuf(String),

    /// A value does not fit the wire type (e.g. a timestamp beyond int32)
    #[error("Value out of range for {format}: {detail}")]
    OutOfRange { format: &'static str, detail: String },
}

impl From<serde_json::Error> for EncodeError {
    fn from(err: serde_json::Error) -> Self {
        EncodeError::Json(err.to_string())
    }
}

impl From<prost::DecodeError> for EncodeError {
    fn from(err: prost::DecodeError) -> Self {
        EncodeError::Protobuf(err.to_string())
    }
}

pub type EncodeResult<T> = Result<T, EncodeError>;
