//! JSON encoding
//!
//! Render answers use the Graphite JSON layout, find answers the Graphite
//! tree JSON layout:
//!
//! ```text
//! [{"target":"a.b","start":0,"stop":30,"step":10,"datapoints":[[2.0,0],[null,10],[4.0,20]]}]
//! [{"id":"a.b","text":"b","leaf":0,"expandable":1,"allowChildren":1}]
//! ```
//!
//! JSON has no infinity, so `+inf`/`-inf` are written as `1e9999`/`-1e9999`
//! like Graphite does and read back as infinities. NaN is written as `null`.

use serde::{Deserialize, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::encoding::error::{EncodeError, EncodeResult};
use crate::index::FindMatch;
use crate::render::{RenderedSeries, SeriesPoint};

#[derive(Debug, Serialize, Deserialize)]
struct JsonSeries<V> {
    target: String,
    start: i64,
    stop: i64,
    step: i64,
    datapoints: Vec<(V, i64)>,
}

/// A datapoint value on the way out
#[derive(Debug, Clone, Copy)]
struct JsonValue(Option<f64>);

impl Serialize for JsonValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let literal = match self.0 {
            None => return serializer.serialize_none(),
            Some(v) if v.is_nan() => return serializer.serialize_none(),
            Some(v) if v.is_finite() => return serializer.serialize_f64(v),
            Some(v) if v > 0.0 => "1e9999",
            Some(_) => "-1e9999",
        };
        RawValue::from_string(literal.to_string())
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

/// Read a datapoint value back; overflowing literals become infinities
fn parse_value(raw: &RawValue) -> EncodeResult<Option<f64>> {
    match raw.get().trim() {
        "null" => Ok(None),
        text => text
            .parse::<f64>()
            .map(Some)
            .map_err(|_| EncodeError::Json(format!("invalid datapoint value {}", text))),
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeNode {
    id: String,
    text: String,
    leaf: u8,
    expandable: u8,
    allow_children: u8,
}

pub fn encode_render(series: &[RenderedSeries]) -> EncodeResult<Vec<u8>> {
    let out: Vec<JsonSeries<JsonValue>> = series
        .iter()
        .map(|s| JsonSeries {
            target: s.name.clone(),
            start: s.start,
            stop: s.stop,
            step: s.step,
            datapoints: s.points.iter().map(|p| (JsonValue(p.value()), p.timestamp)).collect(),
        })
        .collect();
    Ok(serde_json::to_vec(&out)?)
}

pub fn decode_render(data: &[u8]) -> EncodeResult<Vec<RenderedSeries>> {
    let parsed: Vec<JsonSeries<Box<RawValue>>> = serde_json::from_slice(data)?;
    parsed
        .into_iter()
        .map(|s| {
            let points = s
                .datapoints
                .iter()
                .map(|(raw, ts)| {
                    Ok(match parse_value(raw)? {
                        Some(v) => SeriesPoint::present(*ts, v),
                        None => SeriesPoint::absent(*ts),
                    })
                })
                .collect::<EncodeResult<Vec<_>>>()?;
            Ok(RenderedSeries {
                name: s.target,
                start: s.start,
                stop: s.stop,
                step: s.step,
                points,
            })
        })
        .collect()
}

pub fn encode_find(matches: &[FindMatch]) -> EncodeResult<Vec<u8>> {
    let nodes: Vec<TreeNode> = matches
        .iter()
        .map(|m| {
            let text = m.path.rsplit('.').next().unwrap_or(&m.path).to_string();
            let branch = u8::from(!m.is_leaf);
            TreeNode {
                id: m.path.clone(),
                text,
                leaf: u8::from(m.is_leaf),
                expandable: branch,
                allow_children: branch,
            }
        })
        .collect();
    Ok(serde_json::to_vec(&nodes)?)
}
