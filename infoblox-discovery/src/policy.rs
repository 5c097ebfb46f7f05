//! Inclusion and exclusion of discovered objects.
//!
//! Rules are lists of extensible attribute names per category. An attribute
//! matches only when its value is exactly `"True"`.
//!
//! Every source starts from the built-in exclusion attributes of
//! [`default_exclusions`]; configured exclusions are added to them.

use std::collections::{HashMap, HashSet};

use infoblox_discovery_common::{Category, DhcpRange};

use crate::config::SourceConfig;
use crate::error::{DiscoveryError, Result};

/// The literal attribute value that sets a rule.
pub const RULE_SET_VALUE: &str = "True";

/// Per-source keep/drop policy.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryPolicy {
    inclusions: HashMap<Category, Vec<String>>,
    exclusions: HashMap<Category, Vec<String>>,
    excluded_prefixes: HashSet<u8>,
}

impl DiscoveryPolicy {
    /// Build the policy of a source, rejecting rules for unknown categories.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let mut exclusions = default_exclusions(&config.exclusion_label);
        for (category, keys) in parse_rules(&config.name, "exclusion", &config.exclusions)? {
            let merged = exclusions.entry(category).or_default();
            for key in keys {
                if !merged.contains(&key) {
                    merged.push(key);
                }
            }
        }

        Ok(Self {
            inclusions: parse_rules(&config.name, "inclusion", &config.inclusions)?,
            exclusions,
            excluded_prefixes: config.exclude_ranges.clone(),
        })
    }

    /// Set the inclusion rules of a category.
    pub fn with_inclusions<I, S>(mut self, category: Category, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inclusions
            .insert(category, keys.into_iter().map(Into::into).collect());
        self
    }

    /// Set the exclusion rules of a category.
    pub fn with_exclusions<I, S>(mut self, category: Category, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exclusions
            .insert(category, keys.into_iter().map(Into::into).collect());
        self
    }

    /// Set the DHCP prefix lengths that are never published.
    pub fn with_excluded_prefixes(mut self, prefixes: impl IntoIterator<Item = u8>) -> Self {
        self.excluded_prefixes = prefixes.into_iter().collect();
        self
    }

    /// Decide whether an object with the given attributes is dropped.
    ///
    /// The first requested category with inclusion rules decides alone:
    /// kept if any of its attributes is set, dropped otherwise. Without
    /// inclusion rules, the first category with exclusion rules decides:
    /// dropped if any of its attributes is set, kept otherwise. Without
    /// any rules the object is kept.
    pub fn should_exclude(
        &self,
        attributes: &HashMap<String, String>,
        categories: &[Category],
    ) -> bool {
        for category in categories {
            if let Some(keys) = self.inclusions.get(category) {
                return !any_set(attributes, keys);
            }
        }

        for category in categories {
            if let Some(keys) = self.exclusions.get(category) {
                return any_set(attributes, keys);
            }
        }

        false
    }

    /// Whether a DHCP range is dropped for its prefix length.
    pub fn excludes_range(&self, range: &DhcpRange) -> bool {
        range
            .prefix_len()
            .is_some_and(|len| self.excluded_prefixes.contains(&len))
    }
}

/// The exclusion attributes every source applies, per category.
///
/// `<label>-exclusion` and `<label>-common-exclusion` exclude objects of any
/// category. Members, with their HA nodes and DNS server entries, are also
/// excluded by `<label>-member-exclusion`, zones by `<label>-zone-exclusion`
/// and DHCP ranges by `<label>-range-exclusion`. Without a label the
/// attributes are used unprefixed. Web endpoints have no built-in rules.
pub fn default_exclusions(label: &str) -> HashMap<Category, Vec<String>> {
    let prefix = if label.is_empty() {
        String::new()
    } else {
        format!("{}-", label)
    };
    let keys = |specific: &str| {
        vec![
            format!("{}exclusion", prefix),
            format!("{}common-exclusion", prefix),
            format!("{}{}", prefix, specific),
        ]
    };

    HashMap::from([
        (Category::Members, keys("member-exclusion")),
        (Category::Nodes, keys("member-exclusion")),
        (Category::DnsServers, keys("member-exclusion")),
        (Category::Zones, keys("zone-exclusion")),
        (Category::DhcpRanges, keys("range-exclusion")),
    ])
}

fn any_set(attributes: &HashMap<String, String>, keys: &[String]) -> bool {
    keys.iter()
        .any(|key| attributes.get(key).is_some_and(|v| v == RULE_SET_VALUE))
}

fn parse_rules(
    source_name: &str,
    rule: &'static str,
    rules: &HashMap<String, Vec<String>>,
) -> Result<HashMap<Category, Vec<String>>> {
    rules
        .iter()
        .map(|(name, keys)| {
            let category =
                name.parse::<Category>()
                    .map_err(|_| DiscoveryError::PolicyConfig {
                        source_name: source_name.to_string(),
                        rule,
                        category: name.clone(),
                    })?;
            Ok((category, keys.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_no_rules_keeps() {
        let policy = DiscoveryPolicy::default();
        assert!(!policy.should_exclude(&attrs(&[("anything", "True")]), &[Category::Members]));
    }

    #[test]
    fn test_inclusion_match_wins_over_exclusion() {
        let policy = DiscoveryPolicy::default()
            .with_inclusions(Category::Zones, ["monitor"])
            .with_exclusions(Category::Zones, ["zone-exclusion"]);

        let a = attrs(&[("monitor", "True"), ("zone-exclusion", "True")]);
        assert!(!policy.should_exclude(&a, &[Category::Zones]));
    }

    #[test]
    fn test_unmatched_inclusion_excludes() {
        let policy = DiscoveryPolicy::default()
            .with_inclusions(Category::Zones, ["monitor"])
            .with_exclusions(Category::Zones, ["zone-exclusion"]);

        assert!(policy.should_exclude(&attrs(&[]), &[Category::Zones]));
        assert!(policy.should_exclude(&attrs(&[("monitor", "False")]), &[Category::Zones]));
    }

    #[test]
    fn test_exclusion_match() {
        let policy = DiscoveryPolicy::default()
            .with_exclusions(Category::Members, ["common-exclusion", "member-exclusion"]);

        let flagged = attrs(&[("member-exclusion", "True")]);
        assert!(policy.should_exclude(&flagged, &[Category::Members]));
        assert!(!policy.should_exclude(&attrs(&[]), &[Category::Members]));
    }

    #[test]
    fn test_unmatched_exclusion_is_explicit_allow() {
        // The first category with exclusion rules decides; later ones are
        // not consulted.
        let policy = DiscoveryPolicy::default()
            .with_exclusions(Category::Members, ["member-exclusion"])
            .with_exclusions(Category::Nodes, ["node-exclusion"]);

        let a = attrs(&[("node-exclusion", "True")]);
        assert!(!policy.should_exclude(&a, &[Category::Members, Category::Nodes]));
        assert!(policy.should_exclude(&a, &[Category::Nodes, Category::Members]));
    }

    #[test]
    fn test_inclusion_on_any_requested_category_skips_exclusions() {
        let policy = DiscoveryPolicy::default()
            .with_exclusions(Category::Members, ["member-exclusion"])
            .with_inclusions(Category::Nodes, ["monitor-node"]);

        let a = attrs(&[("member-exclusion", "True"), ("monitor-node", "True")]);
        assert!(!policy.should_exclude(&a, &[Category::Members, Category::Nodes]));
    }

    #[test]
    fn test_only_literal_true_matches() {
        let policy =
            DiscoveryPolicy::default().with_exclusions(Category::Members, ["member-exclusion"]);

        for value in ["true", "TRUE", "1", "yes", "True "] {
            let a = attrs(&[("member-exclusion", value)]);
            assert!(
                !policy.should_exclude(&a, &[Category::Members]),
                "value {:?} must not match",
                value
            );
        }
    }

    #[test]
    fn test_rules_for_other_category_ignored() {
        let policy =
            DiscoveryPolicy::default().with_inclusions(Category::Zones, ["monitor"]);

        assert!(!policy.should_exclude(&attrs(&[]), &[Category::Members]));
    }

    #[test]
    fn test_from_config_rejects_unknown_category() {
        let mut config = SourceConfig::new("ib1");
        config
            .exclusions
            .insert("printers".to_string(), vec!["x".to_string()]);

        let err = DiscoveryPolicy::from_config(&config).unwrap_err();
        assert!(matches!(err, DiscoveryError::PolicyConfig { .. }));
        assert!(err.to_string().contains("printers"));
    }

    #[test]
    fn test_from_config() {
        let mut config = SourceConfig::new("ib1");
        config
            .inclusions
            .insert("zones".to_string(), vec!["monitor".to_string()]);
        config.exclude_ranges.insert(30);

        let policy = DiscoveryPolicy::from_config(&config).unwrap();
        assert!(policy.should_exclude(&attrs(&[]), &[Category::Zones]));

        let range = DhcpRange {
            network: "10.0.0.0/30".to_string(),
            source: "ib1".to_string(),
        };
        assert!(policy.excludes_range(&range));
    }

    #[test]
    fn test_built_in_exclusions() {
        let policy = DiscoveryPolicy::from_config(&SourceConfig::new("ib1")).unwrap();
        let members = [Category::Members];

        assert!(!policy.should_exclude(&attrs(&[]), &members));
        assert!(policy.should_exclude(&attrs(&[("common-exclusion", "True")]), &members));
        assert!(policy.should_exclude(&attrs(&[("exclusion", "True")]), &members));
        assert!(policy.should_exclude(&attrs(&[("member-exclusion", "True")]), &members));
        assert!(!policy.should_exclude(&attrs(&[("zone-exclusion", "True")]), &members));

        let zone_flag = attrs(&[("zone-exclusion", "True")]);
        assert!(policy.should_exclude(&zone_flag, &[Category::Zones]));
        let range_flag = attrs(&[("range-exclusion", "True")]);
        assert!(policy.should_exclude(&range_flag, &[Category::DhcpRanges]));
        assert!(!policy.should_exclude(&range_flag, &[Category::Zones]));
        assert!(!policy.should_exclude(&attrs(&[("exclusion", "True")]), &[Category::WebEndpoints]));
    }

    #[test]
    fn test_exclusion_label_prefixes_built_in_rules() {
        let mut config = SourceConfig::new("ib1");
        config.exclusion_label = "acme".to_string();
        let policy = DiscoveryPolicy::from_config(&config).unwrap();
        let members = [Category::Members];

        assert!(policy.should_exclude(&attrs(&[("acme-exclusion", "True")]), &members));
        assert!(policy.should_exclude(&attrs(&[("acme-member-exclusion", "True")]), &members));
        assert!(!policy.should_exclude(&attrs(&[("exclusion", "True")]), &members));
        assert!(!policy.should_exclude(&attrs(&[("member-exclusion", "True")]), &members));
    }

    #[test]
    fn test_configured_exclusions_add_to_built_in_rules() {
        let mut config = SourceConfig::new("ib1");
        config
            .exclusions
            .insert("members".to_string(), vec!["decommissioned".to_string()]);
        let policy = DiscoveryPolicy::from_config(&config).unwrap();
        let members = [Category::Members];

        assert!(policy.should_exclude(&attrs(&[("decommissioned", "True")]), &members));
        assert!(policy.should_exclude(&attrs(&[("member-exclusion", "True")]), &members));
    }

    #[test]
    fn test_inclusion_wins_over_built_in_exclusion() {
        let mut config = SourceConfig::new("ib1");
        config
            .inclusions
            .insert("members".to_string(), vec!["monitor".to_string()]);
        let policy = DiscoveryPolicy::from_config(&config).unwrap();

        let a = attrs(&[("monitor", "True"), ("exclusion", "True")]);
        assert!(!policy.should_exclude(&a, &[Category::Members]));
    }

    #[test]
    fn test_excludes_range() {
        let policy = DiscoveryPolicy::default().with_excluded_prefixes([30, 31]);
        let range = |network: &str| DhcpRange {
            network: network.to_string(),
            source: "ib1".to_string(),
        };

        assert!(policy.excludes_range(&range("10.0.0.0/30")));
        assert!(policy.excludes_range(&range("10.0.0.4/31")));
        assert!(!policy.excludes_range(&range("10.0.0.0/24")));
        assert!(!policy.excludes_range(&range("10.0.0.0")));
    }
}
