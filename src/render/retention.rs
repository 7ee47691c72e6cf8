//! Retention choice
//!
//! Every path is served by one data table. Eligibility (path regex and age
//! window) is checked first; among eligible tables the coarsest one whose
//! resolution is still at least as fine as the requested step wins. When no
//! table is fine enough, the finest eligible table is used.

use std::collections::BTreeMap;

use crate::cluster::DataTable;

/// Pick the data table for one path
pub fn choose_table<'a>(
    tables: &'a [DataTable],
    path: &str,
    from: i64,
    now: i64,
    requested_step: i64,
) -> Option<&'a DataTable> {
    let eligible = || tables.iter().filter(|t| t.serves(path, from, now));

    eligible()
        .filter(|t| t.resolution <= requested_step)
        .max_by_key(|t| t.resolution)
        .or_else(|| eligible().min_by_key(|t| t.resolution))
}

/// Group paths by the table that serves them. Paths no table serves are
/// returned separately.
pub fn plan<'a>(
    tables: &'a [DataTable],
    paths: &[String],
    from: i64,
    now: i64,
    requested_step: i64,
) -> (Vec<(&'a DataTable, Vec<String>)>, Vec<String>) {
    let mut groups: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut unserved = Vec::new();

    for path in paths {
        match choose_table(tables, path, from, now, requested_step) {
            Some(table) => {
                let idx = tables
                    .iter()
                    .position(|t| std::ptr::eq(t, table))
                    .unwrap_or_default();
                groups.entry(idx).or_default().push(path.clone());
            }
            None => unserved.push(path.clone()),
        }
    }

    let planned = groups
        .into_iter()
        .map(|(idx, paths)| (&tables[idx], paths))
        .collect();
    (planned, unserved)
}

/// Output step for a table: the requested step rounded up to a multiple of
/// the table resolution, never finer than the resolution. Saturates at the
/// largest multiple of the resolution.
pub fn effective_step(resolution: i64, requested_step: i64) -> i64 {
    let resolution = resolution.max(1);
    if requested_step <= resolution {
        return resolution;
    }
    let multiples = (requested_step - 1) / resolution + 1;
    multiples
        .checked_mul(resolution)
        .unwrap_or(i64::MAX / resolution * resolution)
}

#[cfg(test)]
mod tests {
    use super::*;
    use regex::Regex;

    fn tables() -> Vec<DataTable> {
        let mut hourly = DataTable::new("graphite_1h", 3600);
        hourly.max_age = None;
        let mut raw = DataTable::new("graphite_10s", 10);
        raw.max_age = Some(86_400);
        let mut minutely = DataTable::new("graphite_1m", 60);
        minutely.max_age = Some(30 * 86_400);
        let mut servers = DataTable::new("graphite_servers", 1);
        servers.path_regex = Some(Regex::new(r"^servers\.").unwrap());
        servers.max_age = Some(3600);
        vec![hourly, raw, minutely, servers]
    }

    #[test]
    fn test_coarsest_table_satisfying_step() {
        let tables = tables();
        let now = 1_000_000;
        let recent = now - 600;
        assert_eq!(choose_table(&tables, "a.b", recent, now, 60).unwrap().table, "graphite_1m");
        assert_eq!(choose_table(&tables, "a.b", recent, now, 30).unwrap().table, "graphite_10s");
        assert_eq!(choose_table(&tables, "a.b", recent, now, 7200).unwrap().table, "graphite_1h");
    }

    #[test]
    fn test_finest_when_none_is_fine_enough() {
        let tables = tables();
        let now = 1_000_000;
        assert_eq!(choose_table(&tables, "a.b", now - 600, now, 5).unwrap().table, "graphite_10s");
        // old ranges fall out of the raw table's age window
        assert_eq!(
            choose_table(&tables, "a.b", now - 2 * 86_400, now, 5).unwrap().table,
            "graphite_1m"
        );
    }

    #[test]
    fn test_path_scoped_table() {
        let tables = tables();
        let now = 1_000_000;
        assert_eq!(
            choose_table(&tables, "servers.web1.cpu", now - 600, now, 1).unwrap().table,
            "graphite_servers"
        );
        assert_ne!(
            choose_table(&tables, "apps.web1.cpu", now - 600, now, 1).unwrap().table,
            "graphite_servers"
        );
    }

    #[test]
    fn test_plan_groups_and_unserved() {
        let mut only_servers = DataTable::new("graphite_servers", 10);
        only_servers.path_regex = Some(Regex::new(r"^servers\.").unwrap());
        let tables = vec![only_servers];

        let paths = vec!["servers.a".to_string(), "apps.b".to_string(), "servers.c".to_string()];
        let (planned, unserved) = plan(&tables, &paths, 0, 100, 60);
        assert_eq!(planned.len(), 1);
        assert_eq!(planned[0].1, vec!["servers.a".to_string(), "servers.c".to_string()]);
        assert_eq!(unserved, vec!["apps.b".to_string()]);
    }

    #[test]
    fn test_effective_step() {
        assert_eq!(effective_step(60, 0), 60);
        assert_eq!(effective_step(60, 30), 60);
        assert_eq!(effective_step(60, 60), 60);
        assert_eq!(effective_step(60, 90), 120);
        assert_eq!(effective_step(10, 300), 300);
        assert_eq!(effective_step(60, i64::MAX - 10), i64::MAX / 60 * 60);
        assert_eq!(effective_step(1, i64::MAX), i64::MAX);
    }
}
