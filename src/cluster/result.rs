//! TabSeparated result sets and shard merging

use crate::cluster::error::{ExecError, ExecResult};

/// How shard responses are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMode {
    /// Set union, de-duplicated on whole rows (index lookups)
    Union,
    /// Plain concatenation (data rows, consolidated later)
    Concat,
}

/// Rows of text cells returned by the store
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    rows: Vec<Vec<String>>,
}

impl ResultSet {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of every row
    pub fn first_column(&self) -> impl Iterator<Item = &str> {
        self.rows
            .iter()
            .filter_map(|r| r.first().map(String::as_str))
    }

    /// Combine shard responses. The result does not depend on arrival order.
    pub fn merge(parts: Vec<ResultSet>, mode: MergeMode) -> ResultSet {
        let mut rows: Vec<Vec<String>> = parts.into_iter().flat_map(|p| p.rows).collect();
        rows.sort();
        if mode == MergeMode::Union {
            rows.dedup();
        }
        ResultSet { rows }
    }
}

/// Parse a TabSeparated body
pub fn parse_tsv(host: &str, body: &str) -> ExecResult<ResultSet> {
    let mut rows = Vec::new();
    for line in body.lines() {
        if line.is_empty() {
            continue;
        }
        let cells = line
            .split('\t')
            .map(|cell| unescape(cell).ok_or_else(|| malformed(host, line)))
            .collect::<ExecResult<Vec<String>>>()?;
        rows.push(cells);
    }
    Ok(ResultSet { rows })
}

fn malformed(host: &str, line: &str) -> ExecError {
    let snippet: String = line.chars().take(80).collect();
    ExecError::Malformed {
        host: host.to_string(),
        reason: format!("bad escape in '{}'", snippet),
    }
}

fn unescape(cell: &str) -> Option<String> {
    if !cell.contains('\\') {
        return Some(cell.to_string());
    }
    let mut out = String::with_capacity(cell.len());
    let mut chars = cell.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            't' => out.push('\t'),
            'n' => out.push('\n'),
            'r' => out.push('\r'),
            '0' => out.push('\0'),
            'b' => out.push('\u{8}'),
            'f' => out.push('\u{c}'),
            other => out.push(other),
        }
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tsv() {
        let rs = parse_tsv("h", "a.b\t1\nc\\td\t2\n\n").unwrap();
        assert_eq!(
            rs.rows(),
            &[
                vec!["a.b".to_string(), "1".to_string()],
                vec!["c\td".to_string(), "2".to_string()],
            ]
        );
    }

    #[test]
    fn test_parse_tsv_bad_escape() {
        let err = parse_tsv("h", "abc\\").unwrap_err();
        assert!(matches!(err, ExecError::Malformed { .. }));
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = ResultSet::new(vec![vec!["x".into()], vec!["y".into()]]);
        let b = ResultSet::new(vec![vec!["y".into()], vec!["z".into()]]);

        let ab = ResultSet::merge(vec![a.clone(), b.clone()], MergeMode::Union);
        let ba = ResultSet::merge(vec![b.clone(), a.clone()], MergeMode::Union);
        assert_eq!(ab, ba);
        assert_eq!(ab.first_column().collect::<Vec<_>>(), vec!["x", "y", "z"]);

        let concat = ResultSet::merge(vec![a, b], MergeMode::Concat);
        assert_eq!(concat.len(), 4);
    }
}
