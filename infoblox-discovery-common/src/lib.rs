//! Infoblox Discovery Common Library
//!
//! Shared types and utilities for Infoblox service discovery:
//!
//! - [`category`] - The six discovery categories
//! - [`entity`] - Discovered entities and their service discovery projection
//! - [`config`] - Logging configuration
//! - [`error`] - Error types

pub mod category;
pub mod config;
pub mod entity;
pub mod error;

// Re-export commonly used types at the crate root
pub use category::Category;
pub use config::{LogFormat, LoggingConfig};
pub use entity::{
    DhcpRange, DnsServer, Entity, Member, Node, SdTarget, WebEndpoint, Zone,
    extensible_attributes, meta_label_name,
};
pub use error::{Error, Result};

/// Initialize tracing with the given configuration.
///
/// Supports two output formats:
/// - `LogFormat::Text` (default): Human-readable text format
/// - `LogFormat::Json`: Structured JSON format for log aggregation systems
///
/// `RUST_LOG` takes precedence over the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    match config.format {
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .try_init()
                .map_err(|e| Error::Config(format!("Failed to initialize tracing: {}", e)))?;
        }
    }

    Ok(())
}
