//! Request instrumentation of the HTTP server itself.
//!
//! Every request is counted per route template, method and status class,
//! and its latency goes into a small histogram. The families are served on
//! `/exporter-metrics`, separate from the discovery metrics.

use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use parking_lot::Mutex;

use crate::exposition::{MetricFamily, MetricType, format_value};

/// Upper bounds of the latency histogram, in seconds.
pub const DURATION_BUCKETS: [f64; 3] = [0.1, 0.5, 1.0];

/// Handler label for requests that matched no route.
pub const UNTEMPLATED_HANDLER: &str = "none";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RequestKey {
    handler: String,
    method: String,
    status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RouteKey {
    handler: String,
    method: String,
}

#[derive(Debug)]
struct RequestCount {
    count: u64,
    created: f64,
}

#[derive(Debug)]
struct Latency {
    /// Cumulative counts, one per entry of [`DURATION_BUCKETS`].
    buckets: [u64; DURATION_BUCKETS.len()],
    count: u64,
    sum: f64,
    created: f64,
}

#[derive(Debug, Default)]
struct Inner {
    requests: BTreeMap<RequestKey, RequestCount>,
    latency: BTreeMap<RouteKey, Latency>,
}

/// Request counters and latency histograms of the HTTP server.
#[derive(Debug, Default)]
pub struct RequestMetrics {
    inner: Mutex<Inner>,
}

impl RequestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one finished request.
    pub fn record(&self, handler: &str, method: &str, status: StatusCode, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        let now = unix_now();
        let mut inner = self.inner.lock();

        let key = RequestKey {
            handler: handler.to_string(),
            method: method.to_string(),
            status: status_class(status),
        };
        inner
            .requests
            .entry(key)
            .or_insert(RequestCount {
                count: 0,
                created: now,
            })
            .count += 1;

        let route = RouteKey {
            handler: handler.to_string(),
            method: method.to_string(),
        };
        let latency = inner.latency.entry(route).or_insert(Latency {
            buckets: [0; DURATION_BUCKETS.len()],
            count: 0,
            sum: 0.0,
            created: now,
        });
        for (bucket, bound) in latency.buckets.iter_mut().zip(DURATION_BUCKETS) {
            if seconds <= bound {
                *bucket += 1;
            }
        }
        latency.count += 1;
        latency.sum += seconds;
    }

    /// Metric families for the exposition encoder.
    pub fn families(&self) -> Vec<MetricFamily> {
        let inner = self.inner.lock();

        let mut requests = MetricFamily::new(
            "http_requests",
            "Total number of requests by method, status and handler.",
            MetricType::Counter,
        );
        for (key, entry) in &inner.requests {
            let labels = BTreeMap::from([
                ("handler".to_string(), key.handler.clone()),
                ("method".to_string(), key.method.clone()),
                ("status".to_string(), key.status.clone()),
            ]);
            requests.add_sample(labels.clone(), entry.count as f64);
            requests.add_named_sample("http_requests_created", labels, entry.created, None);
        }

        let name = "http_request_duration_seconds";
        let mut duration = MetricFamily::new(
            name,
            "Latency with only few buckets by handler.",
            MetricType::Histogram,
        );
        for (route, entry) in &inner.latency {
            let labels = BTreeMap::from([
                ("handler".to_string(), route.handler.clone()),
                ("method".to_string(), route.method.clone()),
            ]);

            let bounds = DURATION_BUCKETS
                .iter()
                .zip(entry.buckets)
                .chain(std::iter::once((&f64::INFINITY, entry.count)));
            for (bound, count) in bounds {
                let mut bucket_labels = labels.clone();
                bucket_labels.insert("le".to_string(), format_value(*bound));
                duration.add_named_sample(
                    format!("{}_bucket", name),
                    bucket_labels,
                    count as f64,
                    None,
                );
            }
            duration.add_named_sample(
                format!("{}_count", name),
                labels.clone(),
                entry.count as f64,
                None,
            );
            duration.add_named_sample(format!("{}_sum", name), labels.clone(), entry.sum, None);
            duration.add_named_sample(format!("{}_created", name), labels, entry.created, None);
        }

        vec![requests, duration]
    }
}

/// Status class label, e.g. `2xx`.
fn status_class(status: StatusCode) -> String {
    format!("{}xx", status.as_u16() / 100)
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposition::render;

    fn rendered(metrics: &RequestMetrics) -> String {
        String::from_utf8(render(&metrics.families()).unwrap()).unwrap()
    }

    #[test]
    fn test_empty_families() {
        let metrics = RequestMetrics::new();
        let families = metrics.families();

        assert_eq!(families.len(), 2);
        assert!(families.iter().all(|family| family.is_empty()));

        let text = rendered(&metrics);
        assert!(text.contains("# TYPE http_requests counter\n"));
        assert!(text.contains("# TYPE http_request_duration_seconds histogram\n"));
    }

    #[test]
    fn test_requests_counted_by_status_class() {
        let metrics = RequestMetrics::new();
        metrics.record("/alive", "GET", StatusCode::OK, Duration::from_millis(5));
        metrics.record("/alive", "GET", StatusCode::NO_CONTENT, Duration::from_millis(5));
        metrics.record("/metrics", "GET", StatusCode::UNAUTHORIZED, Duration::from_millis(1));

        let text = rendered(&metrics);
        assert!(text.contains("http_requests_total{handler=\"/alive\",method=\"GET\",status=\"2xx\"} 2.0\n"));
        assert!(text.contains("http_requests_total{handler=\"/metrics\",method=\"GET\",status=\"4xx\"} 1.0\n"));
        assert!(text.contains("# TYPE http_requests_created gauge\n"));
        assert!(text.contains("http_requests_created{handler=\"/alive\",method=\"GET\",status=\"2xx\"} "));
    }

    #[test]
    fn test_latency_histogram() {
        let metrics = RequestMetrics::new();
        for seconds in [0.0625, 0.25, 2.0] {
            metrics.record(
                "/metrics",
                "GET",
                StatusCode::OK,
                Duration::from_secs_f64(seconds),
            );
        }

        let text = rendered(&metrics);
        let series = "handler=\"/metrics\",method=\"GET\"";
        assert!(text.contains(
            "http_request_duration_seconds_bucket{handler=\"/metrics\",le=\"0.1\",method=\"GET\"} 1.0\n"
        ));
        assert!(text.contains(
            "http_request_duration_seconds_bucket{handler=\"/metrics\",le=\"0.5\",method=\"GET\"} 2.0\n"
        ));
        assert!(text.contains(
            "http_request_duration_seconds_bucket{handler=\"/metrics\",le=\"1.0\",method=\"GET\"} 2.0\n"
        ));
        assert!(text.contains(
            "http_request_duration_seconds_bucket{handler=\"/metrics\",le=\"+Inf\",method=\"GET\"} 3.0\n"
        ));
        assert!(text.contains(&format!("http_request_duration_seconds_count{{{}}} 3.0\n", series)));
        assert!(text.contains(&format!("http_request_duration_seconds_sum{{{}}} 2.3125\n", series)));
        assert!(text.contains("# TYPE http_request_duration_seconds_created gauge\n"));
    }

    #[test]
    fn test_status_class() {
        assert_eq!(status_class(StatusCode::OK), "2xx");
        assert_eq!(status_class(StatusCode::NOT_FOUND), "4xx");
        assert_eq!(status_class(StatusCode::INTERNAL_SERVER_ERROR), "5xx");
    }
}
