//! carbonapi v2 protobuf encoding
//!
//! ```protobuf
//! message FetchResponse {
//!   string name = 1;
//!   int32 startTime = 2;
//!   int32 stopTime = 3;
//!   int32 stepTime = 4;
//!   repeated double values = 5;
//!   repeated bool isAbsent = 6;
//! }
//!
//! message MultiFetchResponse {
//!   repeated FetchResponse metrics = 1;
//! }
//!
//! message GlobMatch {
//!   string path = 1;
//!   bool isLeaf = 2;
//! }
//!
//! message GlobResponse {
//!   string name = 1;
//!   repeated GlobMatch matches = 2;
//! }
//! ```

use prost::Message;

use crate::encoding::error::{EncodeError, EncodeResult};
use crate::index::FindMatch;
use crate::render::{RenderedSeries, SeriesPoint};

#[derive(Clone, PartialEq, Message)]
pub struct FetchResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(int32, tag = "2")]
    pub start_time: i32,
    #[prost(int32, tag = "3")]
    pub stop_time: i32,
    #[prost(int32, tag = "4")]
    pub step_time: i32,
    #[prost(double, repeated, tag = "5")]
    pub values: Vec<f64>,
    #[prost(bool, repeated, tag = "6")]
    pub is_absent: Vec<bool>,
}

#[derive(Clone, PartialEq, Message)]
pub struct MultiFetchResponse {
    #[prost(message, repeated, tag = "1")]
    pub metrics: Vec<FetchResponse>,
}

#[derive(Clone, PartialEq, Message)]
pub struct GlobMatch {
    #[prost(string, tag = "1")]
    pub path: String,
    #[prost(bool, tag = "2")]
    pub is_leaf: bool,
}

#[derive(Clone, PartialEq, Message)]
pub struct GlobResponse {
    #[prost(string, tag = "1")]
    pub name: String,
    #[prost(message, repeated, tag = "2")]
    pub matches: Vec<GlobMatch>,
}

fn to_i32(value: i64, field: &str) -> EncodeResult<i32> {
    i32::try_from(value).map_err(|_| EncodeError::OutOfRange {
        format: "protobuf",
        detail: format!("{} = {}", field, value),
    })
}

pub fn encode_render(series: &[RenderedSeries]) -> EncodeResult<Vec<u8>> {
    let metrics = series
        .iter()
        .map(|s| {
            Ok(FetchResponse {
                name: s.name.clone(),
                start_time: to_i32(s.start, "startTime")?,
                stop_time: to_i32(s.stop, "stopTime")?,
                step_time: to_i32(s.step, "stepTime")?,
                values: s.points.iter().map(|p| p.value).collect(),
                is_absent: s.points.iter().map(|p| !p.present).collect(),
            })
        })
        .collect::<EncodeResult<Vec<_>>>()?;
    Ok(MultiFetchResponse { metrics }.encode_to_vec())
}

pub fn decode_render(data: &[u8]) -> EncodeResult<Vec<RenderedSeries>> {
    let response = MultiFetchResponse::decode(data)?;
    response
        .metrics
        .into_iter()
        .map(|m| {
            if m.values.len() != m.is_absent.len() {
                return Err(EncodeError::Protobuf(format!(
                    "{}: {} values but {} absence flags",
                    m.name,
                    m.values.len(),
                    m.is_absent.len()
                )));
            }
            let (start, step) = (i64::from(m.start_time), i64::from(m.step_time));
            let points = m
                .values
                .iter()
                .zip(&m.is_absent)
                .enumerate()
                .map(|(i, (&value, &absent))| {
                    let ts = start + i as i64 * step;
                    if absent {
                        SeriesPoint::absent(ts)
                    } else {
                        SeriesPoint::present(ts, value)
                    }
                })
                .collect();
            Ok(RenderedSeries {
                name: m.name,
                start,
                stop: i64::from(m.stop_time),
                step,
                points,
            })
        })
        .collect()
}

/// Encode a find answer; `query` is the pattern that produced it
pub fn encode_find(query: &str, matches: &[FindMatch]) -> EncodeResult<Vec<u8>> {
    let response = GlobResponse {
        name: query.to_string(),
        matches: matches
            .iter()
            .map(|m| GlobMatch {
                path: m.path.clone(),
                is_leaf: m.is_leaf,
            })
            .collect(),
    };
    Ok(response.encode_to_vec())
}
