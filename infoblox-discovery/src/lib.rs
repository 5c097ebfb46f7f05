//! Prometheus service discovery for Infoblox inventory.
//!
//! Grid masters are polled for members, HA nodes, DNS zones, DNS servers,
//! DHCP ranges and web endpoints. Results are cached and republished as
//! Prometheus file based service discovery, HTTP service discovery, and
//! cache metrics.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌─────────────────┐
//! │   Infoblox      │────>│    Collector    │────>│ DiscoveryCache  │
//! │   WAPI          │     │ (policy filter) │     │  (global TTL)   │
//! └─────────────────┘     └─────────────────┘     └────────┬────────┘
//!                                                          │
//!                                   ┌──────────────────────┼────────────┐
//!                                   v                      v            v
//!                           ┌──────────────┐   ┌────────────────┐  ┌──────────┐
//!                           │  SD files    │   │ /prometheus-sd │  │ /metrics │
//!                           └──────────────┘   └────────────────┘  └──────────┘
//! ```
//!
//! # Usage
//!
//! ```bash
//! infoblox-discovery --config config.json5 --server
//! ```
//!
//! # Configuration
//!
//! See [`config::DiscoveryConfig`] for configuration options.

pub mod cache;
pub mod collector;
pub mod config;
pub mod error;
pub mod exposition;
pub mod http;
pub mod metrics;
pub mod policy;
pub mod request_metrics;
pub mod sd_file;
pub mod wapi;

pub use cache::{DiscoveryCache, SharedCache};
pub use collector::{CollectReport, DiscoveryCollector, InventoryClient, SourceCollector};
pub use config::DiscoveryConfig;
pub use error::DiscoveryError;
pub use http::{Credentials, HttpServer};
pub use policy::DiscoveryPolicy;
pub use sd_file::SdFileWriter;
pub use wapi::WapiClient;
