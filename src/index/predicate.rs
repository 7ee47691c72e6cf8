//! Index Predicate Builder
//!
//! Lowers a compiled pattern and a date range into an index-table predicate.
//! The predicate is always a superset of the exact answer; when it is not
//! exact, the returned [`IndexPredicate`] carries the pattern as a post-filter.
//!
//! # Lowering
//!
//! ```text
//! a.b.c            -> Level = 3 AND Path IN ('a.b.c', 'a.b.c.')
//! a.{b,c}.d        -> Level = 3 AND Path IN ('a.b.d', 'a.b.d.', 'a.c.d', 'a.c.d.')
//! a.b?.c*          -> Level = 3 AND Path LIKE 'a.b_.c%' AND match(Path, '^a\.b[^.]\.c[^.]*[.]?$')
//! a.**.z           -> Level >= 2 AND Path LIKE 'a.%' AND match(Path, '^a(?:\.[^.]+)*\.z[.]?$')
//! ```

use chrono::{Duration, NaiveDate};
use std::sync::Arc;

use crate::index::sql::{like_escape, CmpOp, Expr, Value};
use crate::index::tagged;
use crate::pattern::{GlobPattern, Matcher, PatternNode, Segment, SEPARATOR};

/// Date bucket used for every row when the index is not partitioned by day
pub fn dateless_bucket() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 2, 12).unwrap_or_default()
}

/// Inclusive range of date buckets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    pub from: NaiveDate,
    pub until: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, until: NaiveDate) -> Self {
        Self { from, until }
    }

    /// Buckets covering the unix-second interval `[from, until]`
    pub fn from_timestamps(from: i64, until: i64) -> Self {
        let day = |ts: i64| {
            chrono::DateTime::from_timestamp(ts, 0)
                .map(|dt| dt.date_naive())
                .unwrap_or_default()
        };
        Self::new(day(from), day(until))
    }

    /// The last `days` buckets ending at `until`
    pub fn last_days(until: NaiveDate, days: u32) -> Self {
        let from = until - Duration::days(i64::from(days.saturating_sub(1)));
        Self::new(from, until)
    }

    pub fn is_empty(&self) -> bool {
        self.from > self.until
    }
}

/// Knobs that shape predicate lowering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PredicateOptions {
    /// Emit `match()` regexes; when false every wildcard relies on the post-filter
    pub regex_in_store: bool,
    /// Index table is partitioned by day
    pub index_daily: bool,
    /// Largest literal expansion rendered as an `IN` list
    pub max_in_list: usize,
    /// Table holding `Tag1 -> Path` rows
    pub tagged_table: String,
}

impl Default for PredicateOptions {
    fn default() -> Self {
        Self {
            regex_in_store: true,
            index_daily: true,
            max_in_list: 256,
            tagged_table: "graphite_tagged".to_string(),
        }
    }
}

/// A predicate plus the exactness fallback
#[derive(Debug, Clone)]
pub struct IndexPredicate {
    pub expr: Expr,
    pub post_filter: Option<Arc<PatternNode>>,
}

impl IndexPredicate {
    /// Apply the post-filter, if any, to a candidate path list
    pub fn filter_paths(&self, paths: Vec<String>) -> Vec<String> {
        match &self.post_filter {
            Some(node) => paths.into_iter().filter(|p| node.matches(p)).collect(),
            None => paths,
        }
    }

    /// True when the store need not be contacted
    pub fn is_empty(&self) -> bool {
        self.expr.is_false()
    }
}

/// Date filter for a table partitioned by `Date`
pub fn date_filter(range: &DateRange, daily: bool) -> Expr {
    if range.is_empty() {
        return Expr::False;
    }
    if !daily {
        return Expr::eq("Date", Value::Date(dateless_bucket()));
    }
    Expr::and(vec![
        Expr::cmp("Date", CmpOp::Ge, Value::Date(range.from)),
        Expr::cmp("Date", CmpOp::Le, Value::Date(range.until)),
    ])
}

/// Build the predicate for a compiled pattern
pub fn build_predicate(
    node: &Arc<PatternNode>,
    range: &DateRange,
    opts: &PredicateOptions,
) -> IndexPredicate {
    match node.as_ref() {
        PatternNode::Glob(glob) => {
            let (path_expr, exact) = glob_expr(glob, opts);
            IndexPredicate {
                expr: Expr::and(vec![date_filter(range, opts.index_daily), path_expr]),
                post_filter: if exact { None } else { Some(Arc::clone(node)) },
            }
        }
        PatternNode::Tagged(query) => IndexPredicate {
            expr: tagged::tag_query_expr(query, range, opts),
            post_filter: None,
        },
    }
}

/// Path predicate for a glob and whether it is exact
fn glob_expr(glob: &GlobPattern, opts: &PredicateOptions) -> (Expr, bool) {
    let level = match glob.recurse_position() {
        None => Expr::eq("Level", Value::Int(glob.len() as i64)),
        Some(_) => Expr::cmp("Level", CmpOp::Ge, Value::Int(glob.min_depth() as i64)),
    };

    if let Some(paths) = literal_expansion(glob, opts.max_in_list) {
        let values = paths
            .into_iter()
            .flat_map(|p| {
                let branch = format!("{}{}", p, SEPARATOR);
                [Value::Str(p), Value::Str(branch)]
            })
            .collect();
        return (Expr::and(vec![level, Expr::in_list("Path", values)]), true);
    }

    let like = like_pattern(glob);
    let like_expr = if like == "%" {
        Expr::True
    } else {
        Expr::like("Path", like)
    };

    if !opts.regex_in_store {
        return (Expr::and(vec![level, like_expr]), false);
    }

    let (regex, exact) = glob_regex(glob);
    let regex_expr = match regex {
        Some(re) => Expr::regex("Path", re),
        None => Expr::True,
    };
    (Expr::and(vec![level, like_expr, regex_expr]), exact)
}

/// Every concrete path of an all-literal pattern, bounded by `limit`
fn literal_expansion(glob: &GlobPattern, limit: usize) -> Option<Vec<String>> {
    let mut acc = vec![String::new()];
    for (i, segment) in glob.segments().iter().enumerate() {
        let options = segment.literal_options()?;
        if acc.len() * options.len() > limit {
            return None;
        }
        acc = acc
            .iter()
            .flat_map(|prefix| {
                options.iter().map(move |opt| {
                    if i == 0 {
                        opt.to_string()
                    } else {
                        format!("{}{}{}", prefix, SEPARATOR, opt)
                    }
                })
            })
            .collect();
    }
    Some(acc)
}

/// LIKE superset: literal text as-is, `?`/`[..]` as `_`, `*` as `%`; stops at
/// the first alternation or recursion
fn like_pattern(glob: &GlobPattern) -> String {
    let mut out = String::new();
    let mut truncated = false;

    'segments: for (i, segment) in glob.segments().iter().enumerate() {
        if i > 0 {
            out.push(SEPARATOR);
        }
        match segment {
            Segment::Glob(matchers) => {
                for m in matchers {
                    match m {
                        Matcher::Literal(s) => out.push_str(&like_escape(s)),
                        Matcher::AnyOne | Matcher::AnySet { .. } => out.push('_'),
                        Matcher::AnyRun => out.push('%'),
                    }
                }
            }
            Segment::Alternation(_) | Segment::Recurse => {
                truncated = true;
                break 'segments;
            }
        }
    }

    if truncated || !out.ends_with('%') {
        out.push('%');
    }
    out
}

/// Anchored regex for a glob; `None` when it would match everything.
/// The flag is false when a character class had to be widened.
fn glob_regex(glob: &GlobPattern) -> (Option<String>, bool) {
    let mut exact = true;
    let mut render = |segments: &[Segment]| -> Vec<String> {
        segments
            .iter()
            .map(|s| {
                let (re, ok) = segment_regex(s);
                exact &= ok;
                re
            })
            .collect()
    };

    let body = match glob.recurse_position() {
        None => render(glob.segments()).join(r"\."),
        Some(pos) => {
            let head = render(&glob.segments()[..pos]).join(r"\.");
            let tail = render(&glob.segments()[pos + 1..]).join(r"\.");
            match (head.is_empty(), tail.is_empty()) {
                (true, true) => return (None, exact),
                (false, false) => format!(r"{}(?:\.[^.]+)*\.{}", head, tail),
                (true, false) => format!(r"(?:[^.]+\.)*{}", tail),
                (false, true) => format!(r"{}(?:\.[^.]+)*", head),
            }
        }
    };

    (Some(format!("^{}[.]?$", body)), exact)
}

fn segment_regex(segment: &Segment) -> (String, bool) {
    match segment {
        Segment::Glob(matchers) => matchers_regex(matchers),
        Segment::Alternation(options) => {
            let mut exact = true;
            let parts: Vec<String> = options
                .iter()
                .map(|opt| {
                    let (re, ok) = matchers_regex(opt);
                    exact &= ok;
                    re
                })
                .collect();
            (format!("(?:{})", parts.join("|")), exact)
        }
        Segment::Recurse => (r"[^.]+(?:\.[^.]+)*".to_string(), true),
    }
}

fn matchers_regex(matchers: &[Matcher]) -> (String, bool) {
    // a lone `*` must not match the empty tail of a branch row
    if matchers == [Matcher::AnyRun] {
        return ("[^.]+".to_string(), true);
    }

    let mut out = String::new();
    let mut exact = true;
    for m in matchers {
        match m {
            Matcher::Literal(s) => out.push_str(&regex::escape(s)),
            Matcher::AnyOne => out.push_str("[^.]"),
            Matcher::AnyRun => out.push_str("[^.]*"),
            Matcher::AnySet { ranges, negated } => match class_regex(ranges, *negated) {
                Some(class) => out.push_str(&class),
                None => {
                    out.push_str("[^.]");
                    exact = false;
                }
            },
        }
    }
    (out, exact)
}

fn class_char_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | ':' | '@' | '#' | '=' | '+' | '~' | '%' | '$' | '&' | '!' | ',' | ';')
}

/// Bracket expression for a character set, if it renders safely
fn class_regex(ranges: &[(char, char)], negated: bool) -> Option<String> {
    if ranges
        .iter()
        .any(|(lo, hi)| !class_char_safe(*lo) || !class_char_safe(*hi))
    {
        return None;
    }
    let mut out = String::from(if negated { "[^." } else { "[" });
    for (lo, hi) in ranges {
        out.push(*lo);
        if lo != hi {
            out.push('-');
            out.push(*hi);
        }
    }
    out.push(']');
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::sql::eval;
    use crate::index::sql::{Projection, Select};
    use crate::pattern::{compile, CompileOptions};
    use std::collections::HashMap;

    fn node(p: &str) -> Arc<PatternNode> {
        Arc::new(compile(p, &CompileOptions::default()).unwrap())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    const PATHS: &[&str] = &[
        "a.b.c",
        "a.b.d",
        "a.x.c",
        "a.b.",
        "a.",
        "a.b.c.d",
        "a.b_.c",
        "a.bb.c",
        "host1.cpu",
        "host2.cpu",
        "host3.cpu",
        "hostx.cpu",
        "host-1.cpu",
        "servers.web1.cpu.user",
        "servers.web2.cpu.",
        "servers.web2.cpu.system",
        "z",
    ];

    fn index_table() -> HashMap<String, Vec<eval::Row>> {
        let rows = PATHS
            .iter()
            .map(|p| {
                let level = p.trim_end_matches('.').split('.').count() as i64;
                HashMap::from([
                    ("Date".to_string(), Value::Date(day(5))),
                    ("Level".to_string(), Value::Int(level)),
                    ("Path".to_string(), Value::str(*p)),
                ])
            })
            .collect();
        HashMap::from([("idx".to_string(), rows)])
    }

    fn run(pred: &IndexPredicate) -> Vec<String> {
        let select = Select::new("idx", vec![Projection::column("Path")]).filter(pred.expr.clone());
        let mut out: Vec<String> = eval::run(&select, &index_table())
            .into_iter()
            .filter_map(|r| r[0].as_str().map(String::from))
            .collect();
        out.sort();
        out
    }

    fn reference(p: &str) -> Vec<String> {
        let n = node(p);
        let mut out: Vec<String> = PATHS
            .iter()
            .filter(|path| n.matches(path))
            .map(|s| s.to_string())
            .collect();
        out.sort();
        out
    }

    const PATTERNS: &[&str] = &[
        "a.b.*",
        "a.b.c",
        "a.{b,x}.c",
        "a.b?.c",
        "a.b*.c",
        "host[1-2].cpu",
        "host[!1-2].cpu",
        "host[-1].cpu",
        "host?.cpu",
        "{host1,host*}.cpu",
        "a.**",
        "**.cpu",
        "servers.**.cpu.*",
        "**",
        "a.b_.*",
        "*",
    ];

    #[test]
    fn test_predicate_superset_and_post_filter_exact() {
        let range = DateRange::new(day(1), day(31));
        for regex_in_store in [true, false] {
            let opts = PredicateOptions {
                regex_in_store,
                ..Default::default()
            };
            for p in PATTERNS {
                let pred = build_predicate(&node(p), &range, &opts);
                let candidates = run(&pred);
                let expected = reference(p);

                for e in &expected {
                    assert!(candidates.contains(e), "{} lost {} (regex={})", p, e, regex_in_store);
                }
                assert_eq!(pred.filter_paths(candidates), expected, "pattern {}", p);
            }
        }
    }

    #[test]
    fn test_a_b_star_resolves_two_paths() {
        let pred = build_predicate(
            &node("a.b.*"),
            &DateRange::new(day(1), day(2)),
            &PredicateOptions::default(),
        );
        assert!(pred.post_filter.is_none());
        let leaves: Vec<String> = run(&pred).into_iter().filter(|p| !p.ends_with('.')).collect();
        assert_eq!(leaves, vec!["a.b.c".to_string(), "a.b.d".to_string()]);
    }

    #[test]
    fn test_literal_uses_in_list() {
        let pred = build_predicate(
            &node("a.{b,x}.c"),
            &DateRange::new(day(1), day(2)),
            &PredicateOptions::default(),
        );
        assert_eq!(
            pred.expr.to_string(),
            "(Date >= '2024-03-01') AND (Date <= '2024-03-02') AND (Level = 3) AND \
             (Path IN ('a.b.c','a.b.c.','a.x.c','a.x.c.'))"
        );
    }

    #[test]
    fn test_wildcard_sql_text() {
        let opts = PredicateOptions {
            index_daily: false,
            ..Default::default()
        };
        let pred = build_predicate(&node("a.b?.c*"), &DateRange::new(day(1), day(2)), &opts);
        assert_eq!(
            pred.expr.to_string(),
            r"(Date = '1970-02-12') AND (Level = 3) AND (Path LIKE 'a.b_.c%') AND (match(Path, '^a\\.b[^.]\\.c[^.]*[.]?$'))"
        );
    }

    #[test]
    fn test_unsafe_class_degrades() {
        let pred = build_predicate(
            &node("host[-1].cpu"),
            &DateRange::new(day(1), day(2)),
            &PredicateOptions::default(),
        );
        assert!(pred.post_filter.is_some());
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let pred = build_predicate(
            &node("a.b.*"),
            &DateRange::new(day(5), day(1)),
            &PredicateOptions::default(),
        );
        assert!(pred.is_empty());
    }

    #[test]
    fn test_date_range_helpers() {
        let r = DateRange::from_timestamps(0, 86_400 * 2);
        assert_eq!(r.from, NaiveDate::from_ymd_opt(1970, 1, 1).unwrap());
        assert_eq!(r.until, NaiveDate::from_ymd_opt(1970, 1, 3).unwrap());
        let r = DateRange::last_days(day(10), 3);
        assert_eq!(r.from, day(8));
    }
}
