//! Direct evaluation of compiled patterns against metric paths
//!
//! This is the reference semantics: the post-filter applied after an index
//! lookup calls into these functions, and tests compare SQL results against them.

use std::collections::BTreeMap;

use crate::pattern::ast::*;

impl Segment {
    /// Match a single path segment
    pub fn matches(&self, segment: &str) -> bool {
        let chars: Vec<char> = segment.chars().collect();
        match self {
            Self::Glob(matchers) => match_chars(matchers, &chars),
            Self::Alternation(options) => options.iter().any(|opt| match_chars(opt, &chars)),
            Self::Recurse => true,
        }
    }
}

/// Width of the text a fixed-width matcher consumes at the start of `text`
fn consume(matcher: &Matcher, text: &[char]) -> Option<usize> {
    match matcher {
        Matcher::Literal(lit) => {
            let n = lit.chars().count();
            (text.len() >= n && text[..n].iter().copied().eq(lit.chars())).then_some(n)
        }
        Matcher::AnyOne => (!text.is_empty()).then_some(1),
        Matcher::AnySet { ranges, negated } => text
            .first()
            .filter(|c| Matcher::set_contains(ranges, *negated, **c))
            .map(|_| 1),
        Matcher::AnyRun => None,
    }
}

/// Greedy matcher that only ever resumes from the most recent `*`
///
/// Runs in O(text * matchers) regardless of how many `*` the glob holds.
fn match_chars(matchers: &[Matcher], text: &[char]) -> bool {
    let (mut m, mut t) = (0, 0);
    // (matcher after the last `*`, text position that `*` currently stops at)
    let mut resume: Option<(usize, usize)> = None;

    loop {
        match matchers.get(m) {
            Some(Matcher::AnyRun) => {
                resume = Some((m + 1, t));
                m += 1;
                continue;
            }
            Some(matcher) => {
                if let Some(n) = consume(matcher, &text[t..]) {
                    m += 1;
                    t += n;
                    continue;
                }
            }
            None if t == text.len() => return true,
            None => {}
        }

        match resume {
            Some((after_run, stop)) if stop < text.len() => {
                resume = Some((after_run, stop + 1));
                m = after_run;
                t = stop + 1;
            }
            _ => return false,
        }
    }
}

impl GlobPattern {
    /// Match a full metric path; a trailing separator (branch marker) is ignored
    pub fn matches(&self, path: &str) -> bool {
        let path = path.strip_suffix(SEPARATOR).unwrap_or(path);
        let parts: Vec<&str> = path.split(SEPARATOR).collect();
        let segments = self.segments();

        match self.recurse_position() {
            None => {
                parts.len() == segments.len()
                    && segments.iter().zip(&parts).all(|(s, p)| s.matches(p))
            }
            Some(pos) => {
                let (head, tail) = (&segments[..pos], &segments[pos + 1..]);
                if parts.len() < head.len() + tail.len() {
                    return false;
                }
                let tail_start = parts.len() - tail.len();
                head.iter().zip(&parts[..pos]).all(|(s, p)| s.matches(p))
                    && tail.iter().zip(&parts[tail_start..]).all(|(s, p)| s.matches(p))
            }
        }
    }
}

/// Split a Graphite tagged name `name;k1=v1;k2=v2` into its tag map
///
/// The metric name is stored under the `name` key.
pub fn parse_tagged_name(series: &str) -> BTreeMap<String, String> {
    let mut parts = series.split(';');
    let mut tags = BTreeMap::new();
    if let Some(name) = parts.next() {
        tags.insert("name".to_string(), name.to_string());
    }
    for pair in parts {
        if let Some((k, v)) = pair.split_once('=') {
            tags.insert(k.to_string(), v.to_string());
        }
    }
    tags
}

impl TagFilter {
    /// Evaluate against a series' tags
    ///
    /// A missing tag compares as the empty string, so `k=` selects series
    /// without `k` and `k!=v` selects series whose `k` differs or is absent.
    pub fn matches(&self, tags: &BTreeMap<String, String>) -> bool {
        let actual = tags.get(&self.key).map(String::as_str).unwrap_or("");
        match self.op {
            TagOp::Eq => actual == self.value,
            TagOp::NotEq => actual != self.value,
            TagOp::Match => tags.contains_key(&self.key) && regex_prefix_match(&self.value, actual),
            TagOp::NotMatch => !(tags.contains_key(&self.key) && regex_prefix_match(&self.value, actual)),
        }
    }
}

/// Graphite tag regexes are anchored at the start of the value only
fn regex_prefix_match(re: &str, value: &str) -> bool {
    regex::Regex::new(&format!("^(?:{})", re))
        .map(|r| r.is_match(value))
        .unwrap_or(false)
}

impl TagQuery {
    /// Evaluate every filter against a tagged series name
    pub fn matches(&self, series: &str) -> bool {
        let tags = parse_tagged_name(series);
        self.filters().iter().all(|f| f.matches(&tags))
    }
}

impl PatternNode {
    /// Exact match of a path (or tagged series name) against this pattern
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::Glob(g) => g.matches(path),
            Self::Tagged(t) => t.matches(path),
        }
    }
}
