use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Discovery object type.
///
/// Each category is a namespace in the cache; the cache key is
/// `(source, category)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Members,
    Nodes,
    Zones,
    DnsServers,
    DhcpRanges,
    WebEndpoints,
}

impl Category {
    /// All categories, in exposition order.
    pub const ALL: [Category; 6] = [
        Category::Members,
        Category::Nodes,
        Category::Zones,
        Category::DnsServers,
        Category::DhcpRanges,
        Category::WebEndpoints,
    ];

    /// Get the string representation used in URLs, file names and metric names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Members => "members",
            Category::Nodes => "nodes",
            Category::Zones => "zones",
            Category::DnsServers => "dns_servers",
            Category::DhcpRanges => "dhcp_ranges",
            Category::WebEndpoints => "web_endpoints",
        }
    }

    /// Human readable name used in metric help texts.
    pub fn description(&self) -> &'static str {
        match self {
            Category::Members => "members",
            Category::Nodes => "nodes",
            Category::Zones => "zones",
            Category::DnsServers => "dns servers",
            Category::DhcpRanges => "dhcp ranges",
            Category::WebEndpoints => "web endpoints",
        }
    }

    /// The string names of every category.
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Category::as_str).collect()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Category {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::UnknownCategory(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_all_categories() {
        for category in Category::ALL {
            assert_eq!(category.as_str().parse::<Category>().unwrap(), category);
        }
    }

    #[test]
    fn test_parse_unknown_category() {
        let err = "servers".parse::<Category>().unwrap_err();
        assert!(err.to_string().contains("servers"));
    }

    #[test]
    fn test_parse_is_case_sensitive() {
        assert!("Members".parse::<Category>().is_err());
    }

    #[test]
    fn test_serde_names_match_as_str() {
        let json = serde_json::to_string(&Category::DhcpRanges).unwrap();
        assert_eq!(json, "\"dhcp_ranges\"");

        let parsed: Category = serde_json::from_str("\"web_endpoints\"").unwrap();
        assert_eq!(parsed, Category::WebEndpoints);
    }

    #[test]
    fn test_names() {
        assert_eq!(
            Category::names(),
            vec![
                "members",
                "nodes",
                "zones",
                "dns_servers",
                "dhcp_ranges",
                "web_endpoints"
            ]
        );
    }
}
