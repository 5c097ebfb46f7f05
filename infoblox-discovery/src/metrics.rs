//! Metric families derived from the discovery cache.

use std::collections::{BTreeMap, BTreeSet};

use infoblox_discovery_common::Category;

use crate::cache::DiscoveryCache;
use crate::exposition::{MetricFamily, MetricType};

/// Prefix of every exported metric name.
pub const METRIC_PREFIX: &str = "infoblox_";

const HELP_PREFIX: &str = "Infoblox ";
const SOURCE_LABEL: &str = "source";

/// A producer of metric families.
///
/// `parse` accumulates state; build a fresh transform for every render.
pub trait Transform {
    /// Gather the data the families are built from.
    fn parse(&mut self);

    /// Build the metric families, one per metric name.
    fn metrics(&self) -> Vec<MetricFamily>;
}

#[derive(Debug, Clone, Default, PartialEq)]
struct SourceRecord {
    source: String,
    collect: f64,
    collect_failed: f64,
    collect_time: f64,
    counts: BTreeMap<Category, f64>,
}

/// Collection bookkeeping and per-category entity counts per source.
pub struct CacheMetrics<'a> {
    cache: &'a DiscoveryCache,
    records: Vec<SourceRecord>,
}

impl<'a> CacheMetrics<'a> {
    pub fn new(cache: &'a DiscoveryCache) -> Self {
        Self {
            cache,
            records: Vec::new(),
        }
    }
}

impl Transform for CacheMetrics<'_> {
    fn parse(&mut self) {
        let stats = self.cache.collect_stats();
        let entries = self.cache.get_all();

        let sources: BTreeSet<&String> = stats.keys().chain(entries.keys()).collect();
        for source in sources {
            let mut record = SourceRecord {
                source: source.clone(),
                ..Default::default()
            };

            if let Some(stats) = stats.get(source) {
                record.collect = stats.collect_count as f64;
                record.collect_failed = stats.collect_failed_count as f64;
                record.collect_time = stats.collect_time_secs as f64;
            }

            let lists = entries.get(source);
            for category in Category::ALL {
                let count = lists
                    .and_then(|lists| lists.get(&category))
                    .map_or(0, |list| list.len());
                record.counts.insert(category, count as f64);
            }

            self.records.push(record);
        }
    }

    fn metrics(&self) -> Vec<MetricFamily> {
        let mut collect = family("cache_collect", "total collect count", MetricType::Counter);
        let mut failed = family(
            "cache_collect_failed",
            "total failed collect count",
            MetricType::Counter,
        );
        let mut time = family("cache_collect_time", "time to collect", MetricType::Gauge);
        let mut counts: Vec<(Category, MetricFamily)> = Category::ALL
            .into_iter()
            .map(|category| {
                let name = format!("cache_{}", category.as_str());
                let help = format!("number of {}", category.description());
                (category, family(&name, &help, MetricType::Gauge))
            })
            .collect();

        for record in &self.records {
            let labels = BTreeMap::from([(SOURCE_LABEL.to_string(), record.source.clone())]);

            collect.add_sample(labels.clone(), record.collect);
            failed.add_sample(labels.clone(), record.collect_failed);
            time.add_sample(labels.clone(), record.collect_time);
            for (category, family) in &mut counts {
                let value = record.counts.get(category).copied().unwrap_or(0.0);
                family.add_sample(labels.clone(), value);
            }
        }

        let mut families = vec![collect, failed, time];
        families.extend(counts.into_iter().map(|(_, family)| family));
        families
    }
}

fn family(name: &str, help: &str, metric_type: MetricType) -> MetricFamily {
    MetricFamily::new(
        format!("{}{}", METRIC_PREFIX, name),
        format!("{}{}", HELP_PREFIX, help),
        metric_type,
    )
}

/// Run a transform and keep only the families that carry samples.
pub fn collect_families(transform: &mut dyn Transform) -> Vec<MetricFamily> {
    transform.parse();
    transform
        .metrics()
        .into_iter()
        .filter(|family| !family.is_empty())
        .collect()
}
