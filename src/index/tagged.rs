//! Tag filter lowering
//!
//! The tagged table stores one row per `(Tag1, Path)` pair, where `Tag1` is a
//! `key=value` string. A tag expression selects rows for its most selective
//! positive filter, then narrows with `Path IN (..)` for the other positive
//! filters and `Path NOT IN (..)` for the negative ones. Negation is always
//! set exclusion over paths, so a series carrying several tags is excluded
//! exactly once even if only one of its rows matches.

use crate::index::predicate::{date_filter, DateRange, PredicateOptions};
use crate::index::sql::{like_escape, Expr, Projection, Select, Value};
use crate::pattern::{TagFilter, TagOp, TagQuery};

/// Rows carrying `key` with any value
fn has_key(key: &str) -> Expr {
    Expr::like("Tag1", format!("{}=%", like_escape(key)))
}

/// Rows whose `key` value matches a prefix-anchored regex
fn key_matches(key: &str, re: &str) -> Expr {
    let re = re.strip_prefix('^').unwrap_or(re);
    Expr::and(vec![
        has_key(key),
        Expr::regex("Tag1", format!("^{}=(?:{})", regex::escape(key), re)),
    ])
}

/// Row-level condition for a filter's selected set (positive filters) or
/// excluded set (negative filters)
pub fn row_condition(filter: &TagFilter) -> Expr {
    match filter.op {
        TagOp::Match | TagOp::NotMatch => key_matches(&filter.key, &filter.value),
        _ if filter.value.is_empty() => has_key(&filter.key),
        _ => Expr::eq("Tag1", Value::Str(format!("{}={}", filter.key, filter.value))),
    }
}

/// Selectivity rank for choosing the base filter; lower is better
fn rank(filter: &TagFilter) -> u8 {
    match (filter.op, filter.key.as_str()) {
        (TagOp::Eq, "name") => 0,
        (TagOp::Eq, _) => 1,
        (TagOp::Match, _) => 2,
        _ => 3,
    }
}

fn paths_where(table: &str, date: &Expr, condition: Expr) -> Select {
    Select::new(table, vec![Projection::column("Path")])
        .filter(Expr::and(vec![date.clone(), condition]))
}

/// Predicate over the tagged table selecting the paths of a tag expression
pub fn tag_query_expr(query: &TagQuery, range: &DateRange, opts: &PredicateOptions) -> Expr {
    let date = date_filter(range, true);
    if date.is_false() {
        return Expr::False;
    }

    let mut positives: Vec<&TagFilter> = query.positive().collect();
    positives.sort_by_key(|f| rank(f));

    let Some((base, rest)) = positives.split_first() else {
        return Expr::False;
    };

    let mut parts = vec![date.clone(), row_condition(base)];
    for filter in rest {
        parts.push(Expr::in_subquery(
            "Path",
            paths_where(&opts.tagged_table, &date, row_condition(filter)),
            false,
        ));
    }
    for filter in query.negative() {
        parts.push(Expr::in_subquery(
            "Path",
            paths_where(&opts.tagged_table, &date, row_condition(filter)),
            true,
        ));
    }
    Expr::and(parts)
}
