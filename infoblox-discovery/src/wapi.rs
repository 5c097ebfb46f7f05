//! Infoblox WAPI client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

use infoblox_discovery_common::Category;

use crate::collector::InventoryClient;
use crate::config::SourceConfig;
use crate::error::{DiscoveryError, Result};

/// Page size for paged requests.
const MAX_RESULTS: &str = "1000";

const MEMBER_FIELDS: &str = "host_name,enable_ha,node_info,service_status,extattrs";
const ZONE_FIELDS: &str = "fqdn,disable,extattrs";
const RANGE_FIELDS: &str = "network,extattrs";
const ADDRESS_FIELDS: &str = "ip_address,names,extattrs";

/// REST client for one grid master.
pub struct WapiClient {
    client: Client,
    base_url: String,
    source: String,
    username: String,
    password: String,
}

impl WapiClient {
    /// Create a client for `https://<name>/wapi/v<version>/`.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let base_url = format!("https://{}/wapi/v{}/", config.name, config.wapi_version);
        Self::with_base_url(config, base_url)
    }

    /// Create a client against an explicit base URL.
    pub fn with_base_url(config: &SourceConfig, base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| {
                DiscoveryError::connection(&config.name, format!("Failed to create HTTP client: {}", e))
            })?;

        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }

        Ok(Self {
            client,
            base_url,
            source: config.name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Base URL of all object requests.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn get(
        &self,
        category: Category,
        object: &str,
        query: &[(&str, &str)],
    ) -> Result<Value> {
        let url = format!("{}{}", self.base_url, object);
        trace!(source = %self.source, %url, ?query, "WAPI request");

        let response = self
            .client
            .get(&url)
            .basic_auth(&self.username, Some(&self.password))
            .query(query)
            .send()
            .await
            .map_err(|e| self.request_error(category, e))?;

        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(DiscoveryError::connection(
                &self.source,
                format!("credentials rejected ({})", status),
            ));
        }
        if !status.is_success() {
            return Err(DiscoveryError::fetch(
                &self.source,
                category,
                format!("{} returned {}", object, status),
            ));
        }

        response.json().await.map_err(|e| {
            DiscoveryError::fetch(&self.source, category, format!("Invalid response: {}", e))
        })
    }

    /// Fetch a plain object list.
    async fn get_objects(
        &self,
        category: Category,
        object: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let body = self.get(category, object, query).await?;
        into_objects(body).map_err(|message| DiscoveryError::fetch(&self.source, category, message))
    }

    /// Fetch every page of an object list.
    async fn get_paged(
        &self,
        category: Category,
        object: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<Value>> {
        let mut first_query = query.to_vec();
        first_query.extend([
            ("_paging", "1"),
            ("_max_results", MAX_RESULTS),
            ("_return_as_object", "1"),
        ]);

        let mut objects = Vec::new();
        let mut body = self.get(category, object, &first_query).await?;
        loop {
            let page = Page::parse(body)
                .map_err(|message| DiscoveryError::fetch(&self.source, category, message))?;
            objects.extend(page.result);

            let Some(page_id) = page.next_page_id else {
                break;
            };
            debug!(source = %self.source, %category, fetched = objects.len(), "Fetching next page");
            body = self
                .get(category, object, &[("_page_id", page_id.as_str())])
                .await?;
        }

        Ok(objects)
    }

    fn request_error(&self, category: Category, e: reqwest::Error) -> DiscoveryError {
        if e.is_connect() {
            DiscoveryError::connection(&self.source, e.to_string())
        } else {
            DiscoveryError::fetch(&self.source, category, e.to_string())
        }
    }
}

#[async_trait]
impl InventoryClient for WapiClient {
    async fn members(&self) -> Result<Vec<Value>> {
        self.get_objects(
            Category::Members,
            "member",
            &[("_return_fields", MEMBER_FIELDS)],
        )
        .await
    }

    async fn zones(&self) -> Result<Vec<Value>> {
        self.get_objects(
            Category::Zones,
            "zone_auth",
            &[("view", "External"), ("_return_fields", ZONE_FIELDS)],
        )
        .await
    }

    async fn dhcp_ranges(&self) -> Result<Vec<Value>> {
        self.get_paged(
            Category::DhcpRanges,
            "range",
            &[("network_view", "default"), ("_return_fields", RANGE_FIELDS)],
        )
        .await
    }

    async fn web_endpoints(&self, network: &str) -> Result<Vec<Value>> {
        self.get_paged(
            Category::WebEndpoints,
            "ipv4address",
            &[
                ("network", network),
                ("status", "USED"),
                ("_return_fields", ADDRESS_FIELDS),
            ],
        )
        .await
    }
}

/// One page of a paged response.
#[derive(Debug, PartialEq)]
struct Page {
    result: Vec<Value>,
    next_page_id: Option<String>,
}

impl Page {
    fn parse(body: Value) -> std::result::Result<Self, String> {
        let Value::Object(mut map) = body else {
            return Err("paged response is not an object".to_string());
        };

        let result = match map.remove("result") {
            Some(Value::Array(items)) => items,
            _ => return Err("paged response has no result list".to_string()),
        };
        let next_page_id = map
            .get("next_page_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        Ok(Self {
            result,
            next_page_id,
        })
    }
}

fn into_objects(body: Value) -> std::result::Result<Vec<Value>, String> {
    match body {
        Value::Array(items) => Ok(items),
        other => Err(format!("expected a list, got {}", type_name(&other))),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
