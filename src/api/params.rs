//! Request parameter parsing
//!
//! Graphite clients repeat keys (`target=a&target=b`) and send parameters
//! either in the query string or as a form body, so parameters are kept as
//! an ordered multimap.
//!
//! Time values accept unix seconds, `now`, and relative offsets:
//!
//! ```text
//! time   := 'now' offset? | offset | digits
//! offset := ('-' | '+') digits unit
//! unit   := s | sec | min | m | h | hour | d | day | w | week | mon | month | y | year  (plurals too)
//! ```

use nom::{
    branch::alt,
    bytes::complete::tag,
    character::complete::{char, digit1},
    combinator::{all_consuming, map, map_res, opt, value},
    sequence::{pair, preceded, tuple},
    IResult,
};

/// Ordered `key=value` pairs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params {
    pairs: Vec<(String, String)>,
}

fn decode(s: &str) -> String {
    let spaced = s.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|c| c.into_owned())
        .unwrap_or(spaced)
}

impl Params {
    /// Parse `application/x-www-form-urlencoded` text
    pub fn parse(raw: &str) -> Self {
        let pairs = raw
            .split('&')
            .filter(|p| !p.is_empty())
            .map(|p| match p.split_once('=') {
                Some((k, v)) => (decode(k), decode(v)),
                None => (decode(p), String::new()),
            })
            .collect();
        Self { pairs }
    }

    /// Append another set (e.g. the form body after the query string)
    pub fn extend(&mut self, other: Params) {
        self.pairs.extend(other.pairs);
    }

    /// First value of `key`
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every non-empty value of `key`, in order
    pub fn all(&self, key: &str) -> Vec<String> {
        self.pairs
            .iter()
            .filter(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn usize(&self, key: &str) -> Result<Option<usize>, String> {
        match self.get(key).filter(|v| !v.is_empty()) {
            Some(v) => v
                .parse()
                .map(Some)
                .map_err(|_| format!("{} must be a non-negative integer, got '{}'", key, v)),
            None => Ok(None),
        }
    }

    /// A time parameter relative to `now`
    pub fn time(&self, key: &str, now: i64) -> Result<Option<i64>, String> {
        match self.get(key).filter(|v| !v.is_empty()) {
            Some(v) => parse_time(v, now).map(Some),
            None => Ok(None),
        }
    }
}

fn unit(input: &str) -> IResult<&str, i64> {
    // longest spellings first
    alt((
        value(31_536_000, alt((tag("years"), tag("year"), tag("y")))),
        value(2_592_000, alt((tag("months"), tag("month"), tag("mon")))),
        value(604_800, alt((tag("weeks"), tag("week"), tag("w")))),
        value(86_400, alt((tag("days"), tag("day"), tag("d")))),
        value(3_600, alt((tag("hours"), tag("hour"), tag("h")))),
        value(60, alt((tag("minutes"), tag("minute"), tag("min"), tag("m")))),
        value(1, alt((tag("seconds"), tag("second"), tag("sec"), tag("s")))),
    ))(input)
}

fn number(input: &str) -> IResult<&str, i64> {
    map_res(digit1, str::parse::<i64>)(input)
}

fn offset(input: &str) -> IResult<&str, i64> {
    map(
        tuple((alt((char('-'), char('+'))), number, unit)),
        |(sign, n, secs)| {
            let delta = n.saturating_mul(secs);
            if sign == '-' {
                -delta
            } else {
                delta
            }
        },
    )(input)
}

enum Time {
    Relative(i64),
    Absolute(i64),
}

fn time(input: &str) -> IResult<&str, Time> {
    alt((
        map(preceded(tag("now"), opt(offset)), |o| Time::Relative(o.unwrap_or(0))),
        map(offset, Time::Relative),
        map(pair(opt(char('-')), number), |(neg, n)| {
            Time::Absolute(if neg.is_some() { -n } else { n })
        }),
    ))(input)
}

/// Parse a Graphite time value against `now` (unix seconds)
pub fn parse_time(raw: &str, now: i64) -> Result<i64, String> {
    let input = raw.trim().to_ascii_lowercase();
    let parsed = all_consuming(time)(input.as_str());
    match parsed {
        Ok((_, Time::Relative(delta))) => Ok(now.saturating_add(delta)),
        Ok((_, Time::Absolute(ts))) => Ok(ts),
        Err(_) => Err(format!("invalid time '{}'", raw)),
    }
}
