//! Collection of inventory from the configured sources into the cache.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tracing::{debug, error, info, warn};

use infoblox_discovery_common::{
    Category, DhcpRange, Entity, Member, WebEndpoint, Zone, extensible_attributes,
};

use crate::cache::{DiscoveryCache, SharedCache};
use crate::config::{ConfigError, DiscoveryConfig, SourceConfig};
use crate::error::Result;
use crate::policy::DiscoveryPolicy;

/// Raw object access to one upstream source.
///
/// Implementations return `Connection` errors when the source is
/// unreachable or rejects the credentials, and `Fetch` errors when a single
/// request fails. An empty list is a successful fetch.
#[async_trait]
pub trait InventoryClient: Send + Sync {
    /// Grid members, including `node_info`, `service_status` and `extattrs`.
    async fn members(&self) -> Result<Vec<Value>>;

    /// Authoritative zones.
    async fn zones(&self) -> Result<Vec<Value>>;

    /// DHCP ranges of the default network view.
    async fn dhcp_ranges(&self) -> Result<Vec<Value>>;

    /// Used addresses of a network.
    async fn web_endpoints(&self, network: &str) -> Result<Vec<Value>>;
}

/// Builds the upstream client of a source.
pub type ClientFactory =
    Arc<dyn Fn(&SourceConfig) -> Result<Arc<dyn InventoryClient>> + Send + Sync>;

/// Outcome of one source's collection cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectReport {
    pub source: String,
    /// Categories written to the cache.
    pub collected: Vec<Category>,
    /// Categories whose fetch failed and kept their previous snapshot.
    pub failed: Vec<Category>,
    /// Set when the source could not be reached at all.
    pub connection_error: Option<String>,
}

impl CollectReport {
    /// Whether the cycle counts as failed.
    pub fn is_failed(&self) -> bool {
        self.connection_error.is_some() || !self.failed.is_empty()
    }
}

/// Collects the configured categories of one source.
pub struct SourceCollector {
    config: SourceConfig,
    policy: DiscoveryPolicy,
    client: Arc<dyn InventoryClient>,
}

impl SourceCollector {
    /// Set up a source, rejecting invalid inclusion or exclusion rules.
    pub fn new(config: SourceConfig, client: Arc<dyn InventoryClient>) -> Result<Self> {
        let policy = DiscoveryPolicy::from_config(&config)?;
        if config.discovers(Category::WebEndpoints) && !has_networks(&config) {
            warn!(source = %config.name, "web_endpoints discovery has no networks configured, skipping it");
        }
        Ok(Self {
            config,
            policy,
            client,
        })
    }

    /// Name of the source.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Fetch and filter the entities of one category.
    pub async fn collect_category(&self, category: Category) -> Result<Vec<Entity>> {
        self.entities(category, &mut None).await
    }

    /// Run one collection cycle and store the results.
    ///
    /// A connection error leaves the cache untouched. A failed category keeps
    /// its previous snapshot while the other categories are still refreshed.
    pub async fn collect(&self, cache: &DiscoveryCache) -> CollectReport {
        let source = self.name();
        let start = Instant::now();
        let mut report = CollectReport {
            source: source.to_string(),
            collected: Vec::new(),
            failed: Vec::new(),
            connection_error: None,
        };

        let mut members = None;
        let mut staged = Vec::new();
        for category in self.categories() {
            match self.entities(category, &mut members).await {
                Ok(entities) => staged.push((category, entities)),
                Err(e) if e.is_connection() => {
                    error!(source, %category, error = %e, "Source unreachable, keeping cached data");
                    report.connection_error = Some(e.to_string());
                    staged.clear();
                    break;
                }
                Err(e) => {
                    warn!(source, %category, error = %e, "Fetch failed, keeping cached data");
                    report.failed.push(category);
                }
            }
        }

        for (category, entities) in staged {
            cache.put(source, category, entities);
            report.collected.push(category);
        }

        let elapsed = start.elapsed();
        cache.inc_collect_count(source);
        cache.set_collect_time(source, elapsed.as_secs());
        if report.is_failed() {
            cache.inc_collect_failed_count(source);
        }

        info!(
            source,
            collected = report.collected.len(),
            failed = report.failed.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "Collection finished"
        );

        report
    }

    /// Configured categories without duplicates, in configuration order.
    ///
    /// Web endpoints are left out when no networks are configured, so their
    /// previous snapshot is kept.
    fn categories(&self) -> Vec<Category> {
        let mut seen = HashSet::new();
        self.config
            .discovery
            .iter()
            .copied()
            .filter(|c| *c != Category::WebEndpoints || has_networks(&self.config))
            .filter(|c| seen.insert(*c))
            .collect()
    }

    async fn entities(
        &self,
        category: Category,
        members: &mut Option<Vec<Value>>,
    ) -> Result<Vec<Entity>> {
        let entities = match category {
            Category::Members | Category::Nodes | Category::DnsServers => {
                if members.is_none() {
                    *members = Some(self.client.members().await?);
                }
                let payloads = members.as_deref().unwrap_or_default();
                self.member_entities(payloads, category)
            }
            Category::Zones => {
                let payloads = self.client.zones().await?;
                self.zone_entities(&payloads)
            }
            Category::DhcpRanges => {
                let payloads = self.client.dhcp_ranges().await?;
                self.dhcp_range_entities(&payloads)
            }
            Category::WebEndpoints => self.web_endpoint_entities().await?,
        };

        debug!(source = self.name(), %category, count = entities.len(), "Category collected");
        Ok(dedup_by_id(entities))
    }

    /// Members, HA nodes and DNS servers all derive from member objects.
    ///
    /// A member dropped by the member rules takes its nodes and DNS server
    /// entry with it.
    fn member_entities(&self, payloads: &[Value], category: Category) -> Vec<Entity> {
        let source = self.name();
        let mut entities = Vec::new();

        for payload in payloads {
            let attributes = extensible_attributes(payload);
            if self.policy.should_exclude(&attributes, &[Category::Members]) {
                debug!(source, host = ?payload.get("host_name"), "Member excluded");
                continue;
            }

            let member = match Member::from_payload(payload, source) {
                Ok(member) => member,
                Err(e) => {
                    warn!(source, error = %e, "Skipping malformed member");
                    continue;
                }
            };

            match category {
                Category::Members => entities.push(member.into()),
                Category::Nodes => {
                    if self.policy.should_exclude(&attributes, &[Category::Nodes]) {
                        continue;
                    }
                    match member.nodes(payload) {
                        Ok(nodes) => entities.extend(nodes.into_iter().map(Entity::from)),
                        Err(e) => {
                            warn!(source, member = %member.host_name, error = %e, "Skipping malformed HA nodes")
                        }
                    }
                }
                Category::DnsServers => {
                    if self.policy.should_exclude(&attributes, &[Category::DnsServers]) {
                        continue;
                    }
                    if let Some(server) = member.dns_server(payload) {
                        entities.push(server.into());
                    }
                }
                _ => {}
            }
        }

        entities
    }

    fn zone_entities(&self, payloads: &[Value]) -> Vec<Entity> {
        let source = self.name();

        payloads
            .iter()
            .filter(|payload| {
                if Zone::is_disabled(payload) {
                    debug!(source, fqdn = ?payload.get("fqdn"), "Zone disabled");
                    return false;
                }
                !self
                    .policy
                    .should_exclude(&extensible_attributes(payload), &[Category::Zones])
            })
            .filter_map(|payload| match Zone::from_payload(payload, source) {
                Ok(zone) => Some(zone.into()),
                Err(e) => {
                    warn!(source, error = %e, "Skipping malformed zone");
                    None
                }
            })
            .collect()
    }

    fn dhcp_range_entities(&self, payloads: &[Value]) -> Vec<Entity> {
        let source = self.name();

        payloads
            .iter()
            .filter(|payload| {
                !self
                    .policy
                    .should_exclude(&extensible_attributes(payload), &[Category::DhcpRanges])
            })
            .filter_map(|payload| match DhcpRange::from_payload(payload, source) {
                Ok(range) => Some(range),
                Err(e) => {
                    warn!(source, error = %e, "Skipping malformed DHCP range");
                    None
                }
            })
            .filter(|range| {
                let excluded = self.policy.excludes_range(range);
                if excluded {
                    debug!(source, network = %range.network, "DHCP range excluded by prefix");
                }
                !excluded
            })
            .map(Entity::from)
            .collect()
    }

    async fn web_endpoint_entities(&self) -> Result<Vec<Entity>> {
        let source = self.name();
        let Some(web) = &self.config.web_endpoints else {
            return Ok(Vec::new());
        };

        let mut entities = Vec::new();
        for network in &web.networks {
            let payloads = self.client.web_endpoints(network).await?;
            for payload in &payloads {
                let attributes = extensible_attributes(payload);
                if self
                    .policy
                    .should_exclude(&attributes, &[Category::WebEndpoints])
                {
                    continue;
                }

                match WebEndpoint::from_payload(payload, network, source) {
                    Ok(endpoints) => entities.extend(endpoints.into_iter().map(Entity::from)),
                    Err(e) => warn!(source, %network, error = %e, "Skipping malformed address"),
                }
            }
        }

        Ok(entities)
    }
}

fn has_networks(config: &SourceConfig) -> bool {
    config
        .web_endpoints
        .as_ref()
        .is_some_and(|web| !web.networks.is_empty())
}

/// Keep the first entity of every identifier.
fn dedup_by_id(entities: Vec<Entity>) -> Vec<Entity> {
    let mut seen = HashSet::new();
    entities
        .into_iter()
        .filter(|e| seen.insert(e.id().to_string()))
        .collect()
}

/// Periodic collection over every configured source.
///
/// This is the only writer of the cache.
pub struct DiscoveryCollector {
    sources: Vec<SourceCollector>,
    cache: SharedCache,
    interval: Duration,
    reload: Option<ConfigReload>,
}

/// Configuration file whose sources are re-read before every cycle.
#[derive(Clone)]
struct ConfigReload {
    path: PathBuf,
    factory: ClientFactory,
}

impl DiscoveryCollector {
    pub fn new(cache: SharedCache, interval: Duration) -> Self {
        Self {
            sources: Vec::new(),
            cache,
            interval,
            reload: None,
        }
    }

    /// Re-read the sources from `path` at the start of every cycle of
    /// [`run`](Self::run).
    pub fn with_config_reload(mut self, path: impl Into<PathBuf>, factory: ClientFactory) -> Self {
        self.reload = Some(ConfigReload {
            path: path.into(),
            factory,
        });
        self
    }

    /// Replace all sources. Sources whose client or rules cannot be set up
    /// are logged and skipped.
    ///
    /// Returns the number of sources in use.
    pub fn load_sources(&mut self, configs: &[SourceConfig], factory: &ClientFactory) -> usize {
        let mut sources = Vec::with_capacity(configs.len());
        for config in configs {
            let source = factory(config)
                .and_then(|client| SourceCollector::new(config.clone(), client));
            match source {
                Ok(source) => sources.push(source),
                Err(e) => error!(source = %config.name, error = %e, "Skipping source"),
            }
        }

        self.sources = sources;
        self.sources.len()
    }

    /// Replace the sources with those of a configuration file.
    ///
    /// Only the `sources` section is applied. A file that cannot be read or
    /// holds an invalid source list leaves the current sources in place.
    pub fn reload_sources(
        &mut self,
        path: &Path,
        factory: &ClientFactory,
    ) -> std::result::Result<usize, ConfigError> {
        let config = DiscoveryConfig::read_file(path)?;
        config.validate_sources()?;
        let count = self.load_sources(&config.sources, factory);
        debug!(path = %path.display(), sources = count, "Sources reloaded");
        Ok(count)
    }

    /// Add a source. Fails with `PolicyConfig` if its rules are invalid.
    pub fn add_source(
        &mut self,
        config: SourceConfig,
        client: Arc<dyn InventoryClient>,
    ) -> Result<()> {
        let source = SourceCollector::new(config, client)?;
        info!(source = source.name(), "Source configured");
        self.sources.push(source);
        Ok(())
    }

    /// Number of configured sources.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The shared cache written by this collector.
    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Collect every source once, sequentially.
    ///
    /// A failing source never prevents the following ones from being polled.
    pub async fn run_cycle(&self) -> Vec<CollectReport> {
        let mut reports = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            reports.push(source.collect(&self.cache).await);
        }
        reports
    }

    /// Run cycles at the configured interval until shutdown is signalled.
    ///
    /// The first cycle starts immediately. `after_cycle` is called with the
    /// cache after every cycle.
    pub async fn run<F>(&mut self, mut shutdown: watch::Receiver<bool>, mut after_cycle: F)
    where
        F: FnMut(&DiscoveryCache),
    {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sources = self.sources.len(),
            interval_secs = self.interval.as_secs(),
            cache_ttl_secs = self.cache.ttl().as_secs(),
            reload = self.reload.is_some(),
            "Starting collection loop"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Some(reload) = self.reload.clone() {
                        if let Err(e) = self.reload_sources(&reload.path, &reload.factory) {
                            warn!(
                                path = %reload.path.display(),
                                error = %e,
                                "Config reload failed, keeping current sources"
                            );
                        }
                    }
                    let reports = self.run_cycle().await;
                    let failed = reports.iter().filter(|r| r.is_failed()).count();
                    if failed > 0 {
                        warn!(failed, total = reports.len(), "Collection cycle had failures");
                    }
                    after_cycle(self.cache.as_ref());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Collection loop shutting down");
                        break;
                    }
                }
            }
        }
    }
}
