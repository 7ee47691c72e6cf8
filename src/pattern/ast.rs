//! Compiled Pattern Representation
//!
//! A compiled query is either a dotted glob ([`GlobPattern`]) or a conjunctive
//! tag expression ([`TagQuery`]). Both are canonical: alternation options and
//! tag filters are sorted and de-duplicated at compile time, so two inputs that
//! mean the same thing compile to equal nodes and print the same canonical text.
//!
//! # Example Patterns
//!
//! ```text
//! servers.web-{01,02}.cpu.*
//! servers.*.disk.[a-c]?
//! **.requests.count
//! seriesByTag('name=cpu.load', 'dc!=east', 'host=~web.*')
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path separator of metric names
pub const SEPARATOR: char = '.';

/// One element of a segment pattern
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Matcher {
    /// Literal text
    Literal(String),
    /// `?` - exactly one character
    AnyOne,
    /// `*` - any run of characters within the segment
    AnyRun,
    /// `[...]` - one character from (or, when negated, outside) a set of ranges
    AnySet {
        ranges: Vec<(char, char)>,
        negated: bool,
    },
}

impl Matcher {
    /// Check whether a character belongs to an `AnySet`
    pub fn set_contains(ranges: &[(char, char)], negated: bool, c: char) -> bool {
        let hit = ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
        hit != negated
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Literal(s) => write!(f, "{}", s),
            Self::AnyOne => write!(f, "?"),
            Self::AnyRun => write!(f, "*"),
            Self::AnySet { ranges, negated } => {
                write!(f, "[")?;
                if *negated {
                    write!(f, "!")?;
                }
                for (lo, hi) in ranges {
                    if lo == hi {
                        write!(f, "{}", lo)?;
                    } else {
                        write!(f, "{}-{}", lo, hi)?;
                    }
                }
                write!(f, "]")
            }
        }
    }
}

/// Matcher for one path segment
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Concatenation of matchers (a single `Literal` is a plain segment)
    Glob(Vec<Matcher>),
    /// Brace alternation, expanded at compile time into sorted options
    Alternation(Vec<Vec<Matcher>>),
    /// `**` - zero or more whole segments
    Recurse,
}

impl Segment {
    /// Literal text of a plain segment
    pub fn literal(&self) -> Option<&str> {
        match self {
            Self::Glob(matchers) => match matchers.as_slice() {
                [Matcher::Literal(s)] => Some(s),
                _ => None,
            },
            _ => None,
        }
    }

    /// All literal values this segment can take, if it has no wildcards
    pub fn literal_options(&self) -> Option<Vec<&str>> {
        match self {
            Self::Glob(_) => self.literal().map(|s| vec![s]),
            Self::Alternation(options) => options
                .iter()
                .map(|opt| match opt.as_slice() {
                    [Matcher::Literal(s)] => Some(s.as_str()),
                    _ => None,
                })
                .collect(),
            Self::Recurse => None,
        }
    }

    /// Number of concrete options (1 for non-alternations)
    pub fn option_count(&self) -> usize {
        match self {
            Self::Alternation(options) => options.len(),
            _ => 1,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob(matchers) => write_matchers(f, matchers),
            Self::Alternation(options) => {
                write!(f, "{{")?;
                for (i, opt) in options.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write_matchers(f, opt)?;
                }
                write!(f, "}}")
            }
            Self::Recurse => write!(f, "**"),
        }
    }
}

fn write_matchers(f: &mut fmt::Formatter<'_>, matchers: &[Matcher]) -> fmt::Result {
    for m in matchers {
        write!(f, "{}", m)?;
    }
    Ok(())
}

/// A compiled dotted glob
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlobPattern {
    segments: Vec<Segment>,
}

impl GlobPattern {
    /// Wrap already-canonical segments
    pub fn new(segments: Vec<Segment>) -> Self {
        Self { segments }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments, counting `**` as one
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Position of the `**` segment, if any
    pub fn recurse_position(&self) -> Option<usize> {
        self.segments.iter().position(|s| *s == Segment::Recurse)
    }

    /// Minimum number of path segments a match can have
    pub fn min_depth(&self) -> usize {
        self.segments
            .iter()
            .filter(|s| **s != Segment::Recurse)
            .count()
    }

    /// True when every segment is a plain literal
    pub fn is_literal(&self) -> bool {
        self.segments.iter().all(|s| s.literal().is_some())
    }
}

impl fmt::Display for GlobPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", SEPARATOR)?;
            }
            write!(f, "{}", seg)?;
        }
        Ok(())
    }
}

/// Tag comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TagOp {
    /// `=`
    Eq,
    /// `!=`
    NotEq,
    /// `=~`
    Match,
    /// `!=~`
    NotMatch,
}

impl TagOp {
    /// Parse from operator text
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" => Some(Self::Eq),
            "!=" => Some(Self::NotEq),
            "=~" => Some(Self::Match),
            "!=~" => Some(Self::NotMatch),
            _ => None,
        }
    }

    /// Regex operators
    pub fn is_regex(&self) -> bool {
        matches!(self, Self::Match | Self::NotMatch)
    }
}

impl fmt::Display for TagOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::NotEq => write!(f, "!="),
            Self::Match => write!(f, "=~"),
            Self::NotMatch => write!(f, "!=~"),
        }
    }
}

/// A single `key op value` constraint
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TagFilter {
    pub key: String,
    pub op: TagOp,
    pub value: String,
}

impl TagFilter {
    pub fn new(key: impl Into<String>, op: TagOp, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            op,
            value: value.into(),
        }
    }

    /// Whether this filter selects series (as opposed to excluding them).
    ///
    /// `k=` (empty value) means "tag absent" and `k!=` means "tag present".
    pub fn is_positive(&self) -> bool {
        match self.op {
            TagOp::Eq => !self.value.is_empty(),
            TagOp::NotEq => self.value.is_empty(),
            TagOp::Match => true,
            TagOp::NotMatch => false,
        }
    }
}

impl fmt::Display for TagFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.key, self.op, self.value)
    }
}

/// A conjunction of tag filters, sorted by key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TagQuery {
    filters: Vec<TagFilter>,
}

impl TagQuery {
    /// Canonicalize and wrap filters
    pub fn new(mut filters: Vec<TagFilter>) -> Self {
        filters.sort();
        filters.dedup();
        Self { filters }
    }

    pub fn filters(&self) -> &[TagFilter] {
        &self.filters
    }

    /// Filters that select series
    pub fn positive(&self) -> impl Iterator<Item = &TagFilter> {
        self.filters.iter().filter(|f| f.is_positive())
    }

    /// Filters that exclude series
    pub fn negative(&self) -> impl Iterator<Item = &TagFilter> {
        self.filters.iter().filter(|f| !f.is_positive())
    }
}

impl fmt::Display for TagQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "seriesByTag(")?;
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "'{}'", filter)?;
        }
        write!(f, ")")
    }
}

/// A compiled query
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PatternNode {
    Glob(GlobPattern),
    Tagged(TagQuery),
}

impl PatternNode {
    pub fn is_tagged(&self) -> bool {
        matches!(self, Self::Tagged(_))
    }

    /// Canonical text, stable across equivalent inputs
    pub fn canonical(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for PatternNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Glob(g) => write!(f, "{}", g),
            Self::Tagged(t) => write!(f, "{}", t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_display() {
        let seg = Segment::Glob(vec![
            Matcher::Literal("cpu".to_string()),
            Matcher::AnySet {
                ranges: vec![('0', '3'), ('7', '7')],
                negated: false,
            },
            Matcher::AnyRun,
        ]);
        assert_eq!(seg.to_string(), "cpu[0-37]*");

        let alt = Segment::Alternation(vec![
            vec![Matcher::Literal("a".to_string())],
            vec![Matcher::Literal("b".to_string()), Matcher::AnyOne],
        ]);
        assert_eq!(alt.to_string(), "{a,b?}");
    }

    #[test]
    fn test_literal_options() {
        let alt = Segment::Alternation(vec![
            vec![Matcher::Literal("a".to_string())],
            vec![Matcher::Literal("b".to_string())],
        ]);
        assert_eq!(alt.literal_options(), Some(vec!["a", "b"]));

        let mixed = Segment::Alternation(vec![
            vec![Matcher::Literal("a".to_string())],
            vec![Matcher::AnyRun],
        ]);
        assert_eq!(mixed.literal_options(), None);
        assert_eq!(Segment::Recurse.literal_options(), None);
    }

    #[test]
    fn test_tag_filter_polarity() {
        assert!(TagFilter::new("dc", TagOp::Eq, "east").is_positive());
        assert!(!TagFilter::new("dc", TagOp::Eq, "").is_positive());
        assert!(!TagFilter::new("dc", TagOp::NotEq, "east").is_positive());
        assert!(TagFilter::new("dc", TagOp::NotEq, "").is_positive());
        assert!(TagFilter::new("dc", TagOp::Match, "e.*").is_positive());
        assert!(!TagFilter::new("dc", TagOp::NotMatch, "e.*").is_positive());
    }

    #[test]
    fn test_tag_query_canonical_order() {
        let a = TagQuery::new(vec![
            TagFilter::new("name", TagOp::Eq, "cpu"),
            TagFilter::new("dc", TagOp::NotEq, "east"),
        ]);
        let b = TagQuery::new(vec![
            TagFilter::new("dc", TagOp::NotEq, "east"),
            TagFilter::new("name", TagOp::Eq, "cpu"),
            TagFilter::new("name", TagOp::Eq, "cpu"),
        ]);
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "seriesByTag('dc!=east','name=cpu')");
    }

    #[test]
    fn test_min_depth() {
        let g = GlobPattern::new(vec![
            Segment::Glob(vec![Matcher::Literal("a".to_string())]),
            Segment::Recurse,
            Segment::Glob(vec![Matcher::AnyRun]),
        ]);
        assert_eq!(g.min_depth(), 2);
        assert_eq!(g.recurse_position(), Some(1));
        assert!(!g.is_literal());
    }
}
