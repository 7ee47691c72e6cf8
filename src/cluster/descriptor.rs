//! Static cluster description, built once from configuration

use regex::Regex;
use std::time::Duration;

use crate::config::{ClusterConfig, ConfigError, FailoverPolicy};
use crate::render::Aggregation;

/// A data table and the retention it serves
#[derive(Debug, Clone)]
pub struct DataTable {
    pub table: String,
    pub resolution: i64,
    pub max_age: Option<i64>,
    pub path_regex: Option<Regex>,
    pub aggregation: Option<Aggregation>,
}

impl DataTable {
    pub fn new(table: impl Into<String>, resolution: i64) -> Self {
        Self {
            table: table.into(),
            resolution: resolution.max(1),
            max_age: None,
            path_regex: None,
            aggregation: None,
        }
    }

    /// Whether this table can serve `path` for a range starting at `from`
    pub fn serves(&self, path: &str, from: i64, now: i64) -> bool {
        if let Some(max_age) = self.max_age {
            if now - from > max_age {
                return false;
            }
        }
        match &self.path_regex {
            Some(re) => re.is_match(path),
            None => true,
        }
    }
}

/// Hosts, tables and limits of one store cluster. Never mutated at runtime.
#[derive(Debug, Clone)]
pub struct ClusterDescriptor {
    pub name: String,
    pub shards: Vec<Vec<String>>,
    pub index_table: String,
    pub index_daily: bool,
    pub tagged_table: String,
    pub data_tables: Vec<DataTable>,
    pub host_timeout: Duration,
    pub max_parallel: usize,
    pub max_connections_per_host: usize,
    pub failover: FailoverPolicy,
    pub max_in_list: usize,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl ClusterDescriptor {
    pub fn from_config(config: &ClusterConfig) -> Result<Self, ConfigError> {
        let mut data_tables = Vec::with_capacity(config.data_tables.len());
        for t in &config.data_tables {
            let path_regex = t
                .path_regex
                .as_deref()
                .map(Regex::new)
                .transpose()
                .map_err(|e| {
                    ConfigError::Invalid(format!("data table '{}' path_regex: {}", t.table, e))
                })?;
            data_tables.push(DataTable {
                table: t.table.clone(),
                resolution: i64::from(t.resolution_secs.max(1)),
                max_age: t.max_age_secs.map(|s| s as i64),
                path_regex,
                aggregation: t.aggregation,
            });
        }

        Ok(Self {
            name: config.name.clone(),
            shards: config.shards.clone(),
            index_table: config.index_table.clone(),
            index_daily: config.index_daily,
            tagged_table: config.tagged_table.clone(),
            data_tables,
            host_timeout: Duration::from_millis(config.host_timeout_ms),
            max_parallel: config.max_parallel.max(1),
            max_connections_per_host: config.max_connections_per_host.max(1),
            failover: config.failover,
            max_in_list: config.max_in_list,
            user: config.user.clone(),
            password: config.password.clone(),
        })
    }

    /// Cluster with the default tables, one shard per replica list
    pub fn with_shards(shards: Vec<Vec<String>>) -> Self {
        let defaults = ClusterConfig::default();
        Self {
            name: defaults.name,
            shards,
            index_table: defaults.index_table,
            index_daily: defaults.index_daily,
            tagged_table: defaults.tagged_table,
            data_tables: vec![DataTable::new("graphite", 60)],
            host_timeout: Duration::from_millis(defaults.host_timeout_ms),
            max_parallel: defaults.max_parallel,
            max_connections_per_host: defaults.max_connections_per_host,
            failover: defaults.failover,
            max_in_list: defaults.max_in_list,
            user: None,
            password: None,
        }
    }

    /// Identity used in cache fingerprints
    pub fn identity(&self) -> String {
        let shards: Vec<String> = self.shards.iter().map(|s| s.join("|")).collect();
        format!("{}[{}]", self.name, shards.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataTableConfig;

    #[test]
    fn test_from_config() {
        let config = ClusterConfig {
            shards: vec![vec!["a1".into(), "a2".into()], vec!["b1".into()]],
            data_tables: vec![DataTableConfig {
                table: "graphite_servers".into(),
                resolution_secs: 10,
                max_age_secs: Some(86_400),
                path_regex: Some("^servers\\.".into()),
                aggregation: Some(Aggregation::Max),
            }],
            ..Default::default()
        };
        let desc = ClusterDescriptor::from_config(&config).unwrap();
        assert_eq!(desc.identity(), "default[a1|a2,b1]");

        let t = &desc.data_tables[0];
        assert!(t.serves("servers.web1.cpu", 1_000, 2_000));
        assert!(!t.serves("apps.x", 1_000, 2_000));
        assert!(!t.serves("servers.web1.cpu", 0, 100_000));
    }

    #[test]
    fn test_bad_regex() {
        let config = ClusterConfig {
            data_tables: vec![DataTableConfig {
                table: "t".into(),
                resolution_secs: 60,
                max_age_secs: None,
                path_regex: Some("(".into()),
                aggregation: None,
            }],
            ..Default::default()
        };
        assert!(ClusterDescriptor::from_config(&config).is_err());
    }
}
