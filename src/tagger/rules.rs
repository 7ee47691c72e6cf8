//! Tagging rules for plain (untagged) metric paths

use regex::Regex;
use std::collections::BTreeMap;

use crate::config::TagRuleConfig;
use crate::tagger::error::{BuildError, BuildResult};

/// A rule adds its tags to every path satisfying all of its conditions
#[derive(Debug, Clone)]
pub struct TagRule {
    equal: Option<String>,
    has_prefix: Option<String>,
    has_suffix: Option<String>,
    contains: Option<String>,
    regex: Option<Regex>,
    tags: Vec<(String, String)>,
}

impl TagRule {
    pub fn from_config(config: &TagRuleConfig) -> BuildResult<Self> {
        let regex = config
            .regex
            .as_deref()
            .map(Regex::new)
            .transpose()
            .map_err(|e| BuildError::InvalidRule(e.to_string()))?;

        let mut tags = Vec::with_capacity(config.tags.len());
        for tag in &config.tags {
            match tag.split_once('=') {
                Some((k, v)) if !k.is_empty() && !k.contains(';') && !v.contains(';') => {
                    tags.push((k.to_string(), v.to_string()))
                }
                _ => {
                    return Err(BuildError::InvalidRule(format!(
                        "tag '{}' is not of the form key=value",
                        tag
                    )))
                }
            }
        }

        let rule = Self {
            equal: config.equal.clone(),
            has_prefix: config.has_prefix.clone(),
            has_suffix: config.has_suffix.clone(),
            contains: config.contains.clone(),
            regex,
            tags,
        };
        if rule.is_unconditional() {
            return Err(BuildError::InvalidRule(
                "rule has no match condition".to_string(),
            ));
        }
        Ok(rule)
    }

    fn is_unconditional(&self) -> bool {
        self.equal.is_none()
            && self.has_prefix.is_none()
            && self.has_suffix.is_none()
            && self.contains.is_none()
            && self.regex.is_none()
    }

    pub fn matches(&self, path: &str) -> bool {
        self.equal.as_deref().map_or(true, |e| path == e)
            && self.has_prefix.as_deref().map_or(true, |p| path.starts_with(p))
            && self.has_suffix.as_deref().map_or(true, |s| path.ends_with(s))
            && self.contains.as_deref().map_or(true, |c| path.contains(c))
            && self.regex.as_ref().map_or(true, |r| r.is_match(path))
    }

    /// Add this rule's tags (and named regex captures) when it matches
    fn apply(&self, path: &str, tags: &mut BTreeMap<String, String>) {
        if !self.matches(path) {
            return;
        }
        for (k, v) in &self.tags {
            tags.insert(k.clone(), v.clone());
        }
        let Some(re) = &self.regex else { return };
        let Some(caps) = re.captures(path) else { return };
        for name in re.capture_names().flatten() {
            if let Some(m) = caps.name(name) {
                tags.insert(name.to_string(), m.as_str().to_string());
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<TagRule>,
}

impl RuleSet {
    pub fn from_config(rules: &[TagRuleConfig]) -> BuildResult<Self> {
        Ok(Self {
            rules: rules.iter().map(TagRule::from_config).collect::<BuildResult<_>>()?,
        })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Tags of a leaf path. Tagged names (`name;k=v`) carry their own tags;
    /// plain paths get `name=<path>` plus every matching rule's tags, later
    /// rules overriding earlier ones. `name` itself is never overridden.
    pub fn tags_for(&self, path: &str) -> BTreeMap<String, String> {
        if path.contains(';') {
            return crate::pattern::parse_tagged_name(path);
        }
        let mut tags = BTreeMap::new();
        for rule in &self.rules {
            rule.apply(path, &mut tags);
        }
        tags.insert("name".to_string(), path.to_string());
        tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(f: impl FnOnce(&mut TagRuleConfig)) -> TagRuleConfig {
        let mut config = TagRuleConfig::default();
        f(&mut config);
        config
    }

    fn pairs(tags: &BTreeMap<String, String>) -> Vec<String> {
        tags.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    #[test]
    fn test_conditions_are_conjunctive() {
        let rules = RuleSet::from_config(&[rule(|r| {
            r.has_prefix = Some("servers.".into());
            r.has_suffix = Some(".cpu".into());
            r.tags = vec!["kind=cpu".into()];
        })])
        .unwrap();

        assert_eq!(
            pairs(&rules.tags_for("servers.web1.cpu")),
            vec!["kind=cpu", "name=servers.web1.cpu"]
        );
        assert_eq!(pairs(&rules.tags_for("servers.web1.mem")), vec!["name=servers.web1.mem"]);
        assert_eq!(pairs(&rules.tags_for("apps.web1.cpu")), vec!["name=apps.web1.cpu"]);
    }

    #[test]
    fn test_named_captures_become_tags() {
        let rules = RuleSet::from_config(&[rule(|r| {
            r.regex = Some(r"^servers\.(?P<host>[^.]+)\.(?P<metric>[^.]+)$".into());
            r.tags = vec!["source=servers".into()];
        })])
        .unwrap();

        assert_eq!(
            pairs(&rules.tags_for("servers.web1.cpu")),
            vec!["host=web1", "metric=cpu", "name=servers.web1.cpu", "source=servers"]
        );
    }

    #[test]
    fn test_tagged_names_ignore_rules() {
        let rules = RuleSet::from_config(&[rule(|r| {
            r.contains = Some("cpu".into());
            r.tags = vec!["kind=cpu".into()];
        })])
        .unwrap();
        assert_eq!(pairs(&rules.tags_for("cpu;dc=east")), vec!["dc=east", "name=cpu"]);
    }

    #[test]
    fn test_invalid_rules() {
        let bad_tag = rule(|r| {
            r.equal = Some("a".into());
            r.tags = vec!["nokey".into()];
        });
        assert!(matches!(
            RuleSet::from_config(&[bad_tag]),
            Err(BuildError::InvalidRule(_))
        ));

        let bad_regex = rule(|r| r.regex = Some("(".into()));
        assert!(RuleSet::from_config(&[bad_regex]).is_err());

        let no_condition = rule(|r| r.tags = vec!["a=b".into()]);
        assert!(RuleSet::from_config(&[no_condition]).is_err());
    }
}
