//! Graphite pickle encoding (protocol 2)
//!
//! Render answers are a list of dicts
//! `{name, pathExpression, start, end, step, values}` with `None` for gaps;
//! find answers are a list of `{metric_path, isLeaf}` dicts.
//!
//! Only the opcodes needed for these shapes are written. The reader also
//! accepts the memo and framing opcodes other pickle writers emit.

use std::collections::HashMap;

use crate::encoding::error::{EncodeError, EncodeResult};
use crate::index::FindMatch;
use crate::render::{RenderedSeries, SeriesPoint};

const PROTO: u8 = 0x80;
const FRAME: u8 = 0x95;
const STOP: u8 = b'.';
const MARK: u8 = b'(';
const EMPTY_LIST: u8 = b']';
const EMPTY_DICT: u8 = b'}';
const APPEND: u8 = b'a';
const APPENDS: u8 = b'e';
const SETITEM: u8 = b's';
const SETITEMS: u8 = b'u';
const NONE: u8 = b'N';
const NEWTRUE: u8 = 0x88;
const NEWFALSE: u8 = 0x89;
const BININT: u8 = b'J';
const BININT1: u8 = b'K';
const BININT2: u8 = b'M';
const LONG1: u8 = 0x8a;
const BINFLOAT: u8 = b'G';
const BINUNICODE: u8 = b'X';
const SHORT_BINUNICODE: u8 = 0x8c;
const BINPUT: u8 = b'q';
const LONG_BINPUT: u8 = b'r';
const BINGET: u8 = b'h';
const LONG_BINGET: u8 = b'j';
const MEMOIZE: u8 = 0x94;

/// A decoded pickle value
#[derive(Debug, Clone, PartialEq)]
pub enum PickleValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<PickleValue>),
    Dict(Vec<(PickleValue, PickleValue)>),
}

impl PickleValue {
    fn get(&self, key: &str) -> Option<&PickleValue> {
        match self {
            PickleValue::Dict(items) => items
                .iter()
                .find(|(k, _)| matches!(k, PickleValue::Str(s) if s == key))
                .map(|(_, v)| v),
            _ => None,
        }
    }

    fn as_int(&self) -> Option<i64> {
        match self {
            PickleValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            PickleValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Self {
            buf: vec![PROTO, 2],
        }
    }

    fn op(&mut self, op: u8) {
        self.buf.push(op);
    }

    fn str(&mut self, s: &str) {
        self.buf.push(BINUNICODE);
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn int(&mut self, v: i64) {
        if let Ok(small) = i32::try_from(v) {
            self.buf.push(BININT);
            self.buf.extend_from_slice(&small.to_le_bytes());
        } else {
            self.buf.push(LONG1);
            self.buf.push(8);
            self.buf.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn float(&mut self, v: f64) {
        self.buf.push(BINFLOAT);
        self.buf.extend_from_slice(&v.to_be_bytes());
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(if v { NEWTRUE } else { NEWFALSE });
    }

    fn key(&mut self, k: &str) {
        self.str(k);
    }

    fn finish(mut self) -> Vec<u8> {
        self.buf.push(STOP);
        self.buf
    }
}

pub fn encode_render(series: &[RenderedSeries]) -> EncodeResult<Vec<u8>> {
    let mut w = Writer::new();
    w.op(EMPTY_LIST);
    if !series.is_empty() {
        w.op(MARK);
        for s in series {
            w.op(EMPTY_DICT);
            w.op(MARK);
            w.key("name");
            w.str(&s.name);
            w.key("pathExpression");
            w.str(&s.name);
            w.key("start");
            w.int(s.start);
            w.key("end");
            w.int(s.stop);
            w.key("step");
            w.int(s.step);
            w.key("values");
            w.op(EMPTY_LIST);
            if !s.points.is_empty() {
                w.op(MARK);
                for p in &s.points {
                    match p.value() {
                        Some(v) => w.float(v),
                        None => w.op(NONE),
                    }
                }
                w.op(APPENDS);
            }
            w.op(SETITEMS);
        }
        w.op(APPENDS);
    }
    Ok(w.finish())
}

pub fn encode_find(matches: &[FindMatch]) -> EncodeResult<Vec<u8>> {
    let mut w = Writer::new();
    w.op(EMPTY_LIST);
    if !matches.is_empty() {
        w.op(MARK);
        for m in matches {
            w.op(EMPTY_DICT);
            w.op(MARK);
            w.key("metric_path");
            w.str(&m.path);
            w.key("isLeaf");
            w.bool(m.is_leaf);
            w.op(SETITEMS);
        }
        w.op(APPENDS);
    }
    Ok(w.finish())
}

fn err(msg: impl Into<String>) -> EncodeError {
    EncodeError::Pickle(msg.into())
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> EncodeResult<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|&e| e <= self.data.len());
        let end = end.ok_or_else(|| err(format!("truncated at byte {}", self.pos)))?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn byte(&mut self) -> EncodeResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn array<const N: usize>(&mut self) -> EncodeResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn utf8(&mut self, n: usize) -> EncodeResult<String> {
        let bytes = self.take(n)?;
        String::from_utf8(bytes.to_vec()).map_err(|e| err(e.to_string()))
    }
}

enum Slot {
    Mark,
    Value(PickleValue),
}

fn pop_value(stack: &mut Vec<Slot>) -> EncodeResult<PickleValue> {
    match stack.pop() {
        Some(Slot::Value(v)) => Ok(v),
        _ => Err(err("stack underflow")),
    }
}

fn pop_to_mark(stack: &mut Vec<Slot>) -> EncodeResult<Vec<PickleValue>> {
    let mut items = Vec::new();
    loop {
        match stack.pop() {
            Some(Slot::Mark) => break,
            Some(Slot::Value(v)) => items.push(v),
            None => return Err(err("missing mark")),
        }
    }
    items.reverse();
    Ok(items)
}

fn top_mut(stack: &mut [Slot]) -> EncodeResult<&mut PickleValue> {
    match stack.last_mut() {
        Some(Slot::Value(v)) => Ok(v),
        _ => Err(err("expected a container on the stack")),
    }
}

fn extend(target: &mut PickleValue, items: Vec<PickleValue>) -> EncodeResult<()> {
    match target {
        PickleValue::List(list) => {
            list.extend(items);
            Ok(())
        }
        PickleValue::Dict(dict) => {
            if items.len() % 2 != 0 {
                return Err(err("odd number of dict items"));
            }
            let mut it = items.into_iter();
            while let (Some(k), Some(v)) = (it.next(), it.next()) {
                dict.push((k, v));
            }
            Ok(())
        }
        _ => Err(err("append to a non-container")),
    }
}

/// Decode a pickle stream into a value tree
pub fn decode(data: &[u8]) -> EncodeResult<PickleValue> {
    let mut r = Reader { data, pos: 0 };
    let mut stack: Vec<Slot> = Vec::new();
    let mut memo: HashMap<u32, PickleValue> = HashMap::new();

    loop {
        let op = r.byte()?;
        match op {
            PROTO => {
                r.byte()?;
            }
            FRAME => {
                r.take(8)?;
            }
            STOP => return pop_value(&mut stack),
            MARK => stack.push(Slot::Mark),
            EMPTY_LIST => stack.push(Slot::Value(PickleValue::List(Vec::new()))),
            EMPTY_DICT => stack.push(Slot::Value(PickleValue::Dict(Vec::new()))),
            NONE => stack.push(Slot::Value(PickleValue::None)),
            NEWTRUE => stack.push(Slot::Value(PickleValue::Bool(true))),
            NEWFALSE => stack.push(Slot::Value(PickleValue::Bool(false))),
            BININT => {
                let v = i32::from_le_bytes(r.array()?);
                stack.push(Slot::Value(PickleValue::Int(i64::from(v))));
            }
            BININT1 => stack.push(Slot::Value(PickleValue::Int(i64::from(r.byte()?)))),
            BININT2 => {
                let v = u16::from_le_bytes(r.array()?);
                stack.push(Slot::Value(PickleValue::Int(i64::from(v))));
            }
            LONG1 => {
                let n = r.byte()? as usize;
                let bytes = r.take(n)?;
                if n > 8 {
                    return Err(err("integer wider than 64 bits"));
                }
                let negative = bytes.last().map_or(false, |b| b & 0x80 != 0);
                let mut buf = if negative { [0xffu8; 8] } else { [0u8; 8] };
                buf[..n].copy_from_slice(bytes);
                stack.push(Slot::Value(PickleValue::Int(i64::from_le_bytes(buf))));
            }
            BINFLOAT => {
                let v = f64::from_be_bytes(r.array()?);
                stack.push(Slot::Value(PickleValue::Float(v)));
            }
            BINUNICODE => {
                let n = u32::from_le_bytes(r.array()?) as usize;
                stack.push(Slot::Value(PickleValue::Str(r.utf8(n)?)));
            }
            SHORT_BINUNICODE => {
                let n = r.byte()? as usize;
                stack.push(Slot::Value(PickleValue::Str(r.utf8(n)?)));
            }
            APPEND => {
                let v = pop_value(&mut stack)?;
                extend(top_mut(&mut stack)?, vec![v])?;
            }
            SETITEM => {
                let v = pop_value(&mut stack)?;
                let k = pop_value(&mut stack)?;
                extend(top_mut(&mut stack)?, vec![k, v])?;
            }
            APPENDS | SETITEMS => {
                let items = pop_to_mark(&mut stack)?;
                extend(top_mut(&mut stack)?, items)?;
            }
            BINPUT | LONG_BINPUT | MEMOIZE => {
                let idx = match op {
                    BINPUT => u32::from(r.byte()?),
                    LONG_BINPUT => u32::from_le_bytes(r.array()?),
                    _ => memo.len() as u32,
                };
                let top = top_mut(&mut stack)?.clone();
                memo.insert(idx, top);
            }
            BINGET | LONG_BINGET => {
                let idx = match op {
                    BINGET => u32::from(r.byte()?),
                    _ => u32::from_le_bytes(r.array()?),
                };
                let v = memo.get(&idx).cloned().ok_or_else(|| err(format!("memo {} missing", idx)))?;
                stack.push(Slot::Value(v));
            }
            other => return Err(err(format!("unsupported opcode 0x{:02x}", other))),
        }
    }
}

pub fn decode_render(data: &[u8]) -> EncodeResult<Vec<RenderedSeries>> {
    let PickleValue::List(items) = decode(data)? else {
        return Err(err("expected a list"));
    };

    items
        .iter()
        .map(|item| {
            let int = |k: &str| item.get(k).and_then(PickleValue::as_int).ok_or_else(|| err(format!("missing {}", k)));
            let name = item
                .get("name")
                .and_then(PickleValue::as_str)
                .ok_or_else(|| err("missing name"))?
                .to_string();
            let (start, stop, step) = (int("start")?, int("end")?, int("step")?);
            let Some(PickleValue::List(values)) = item.get("values") else {
                return Err(err("missing values"));
            };
            let points = values
                .iter()
                .enumerate()
                .map(|(i, v)| {
                    let ts = start + i as i64 * step;
                    match v {
                        PickleValue::Float(f) => Ok(SeriesPoint::present(ts, *f)),
                        PickleValue::Int(n) => Ok(SeriesPoint::present(ts, *n as f64)),
                        PickleValue::None => Ok(SeriesPoint::absent(ts)),
                        other => Err(err(format!("bad value {:?}", other))),
                    }
                })
                .collect::<EncodeResult<Vec<_>>>()?;
            Ok(RenderedSeries {
                name,
                start,
                stop,
                step,
                points,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_list() {
        assert_eq!(encode_render(&[]).unwrap(), vec![PROTO, 2, EMPTY_LIST, STOP]);
        assert_eq!(decode(&[PROTO, 2, EMPTY_LIST, STOP]).unwrap(), PickleValue::List(vec![]));
    }

    #[test]
    fn test_find_answer() {
        let matches = vec![
            FindMatch { path: "a.b".into(), is_leaf: false },
            FindMatch { path: "a.b.c".into(), is_leaf: true },
        ];
        let decoded = decode(&encode_find(&matches).unwrap()).unwrap();
        let PickleValue::List(items) = decoded else { panic!("not a list") };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].get("metric_path"), Some(&PickleValue::Str("a.b.c".into())));
        assert_eq!(items[1].get("isLeaf"), Some(&PickleValue::Bool(true)));
        assert_eq!(items[0].get("isLeaf"), Some(&PickleValue::Bool(false)));
    }

    #[test]
    fn test_large_ints_use_long1() {
        let series = RenderedSeries::empty("x", 5_000_000_000, 5_000_000_060, 60);
        let back = decode_render(&encode_render(&[series.clone()]).unwrap()).unwrap();
        assert_eq!(back, vec![series]);

        let mut w = Writer::new();
        w.int(-3_000_000_000);
        let bytes = w.finish();
        assert_eq!(decode(&bytes).unwrap(), PickleValue::Int(-3_000_000_000));
    }

    #[test]
    fn test_reads_python_memo_opcodes() {
        // pickle.dumps([{'a': 1}], protocol=2)
        let bytes = [
            0x80, 0x02, b']', b'q', 0x00, b'}', b'q', 0x01, b'X', 0x01, 0x00, 0x00, 0x00, b'a',
            b'q', 0x02, b'K', 0x01, b's', b'a', b'.',
        ];
        let value = decode(&bytes).unwrap();
        assert_eq!(
            value,
            PickleValue::List(vec![PickleValue::Dict(vec![(
                PickleValue::Str("a".into()),
                PickleValue::Int(1)
            )])])
        );
    }

    #[test]
    fn test_truncated_input() {
        assert!(decode(&[PROTO, 2, BINUNICODE, 5, 0, 0, 0, b'a']).is_err());
        assert!(decode(&[PROTO, 2, 0xff]).is_err());
    }
}
