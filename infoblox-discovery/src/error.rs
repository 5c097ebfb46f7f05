//! Error types for discovery collection.

use infoblox_discovery_common::Category;
use thiserror::Error;

/// Result type alias using [`DiscoveryError`].
pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Errors raised while setting up or collecting a source.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The upstream is unreachable or rejected the credentials.
    ///
    /// Aborts the rest of the source's collection cycle.
    #[error("Connection to {source_name} failed: {message}")]
    Connection {
        source_name: String,
        message: String,
    },

    /// Fetching one category failed. Zero results is not an error.
    #[error("Failed to fetch {category} from {source_name}: {message}")]
    Fetch {
        source_name: String,
        category: Category,
        message: String,
    },

    /// An inclusion or exclusion rule names an unknown category.
    #[error("Invalid {rule} rule for source {source_name}: unknown category '{category}'")]
    PolicyConfig {
        source_name: String,
        rule: &'static str,
        category: String,
    },
}

impl DiscoveryError {
    /// Create a connection error.
    pub fn connection(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a fetch error for one category.
    pub fn fetch(
        source_name: impl Into<String>,
        category: Category,
        message: impl Into<String>,
    ) -> Self {
        Self::Fetch {
            source_name: source_name.into(),
            category,
            message: message.into(),
        }
    }

    /// Whether the error aborts the whole source cycle.
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = DiscoveryError::connection("ib1", "401 Unauthorized");
        assert_eq!(
            err.to_string(),
            "Connection to ib1 failed: 401 Unauthorized"
        );
        assert!(err.is_connection());

        let err = DiscoveryError::fetch("ib1", Category::Zones, "timeout");
        assert_eq!(err.to_string(), "Failed to fetch zones from ib1: timeout");
        assert!(!err.is_connection());
    }
}
