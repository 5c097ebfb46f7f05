//! Prometheus text exposition format.
//!
//! Families are rendered with the OpenMetrics to Prometheus munging rules and
//! sample values are formatted the way Go formats floats, so the output is
//! byte compatible with existing scrapers and recorded fixtures.

use std::collections::BTreeMap;
use std::fmt::Write;

use thiserror::Error;

/// Content type of the rendered exposition.
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Sample suffixes that only exist in OpenMetrics and are re-emitted as gauges.
const DEFERRED_SUFFIXES: [&str; 3] = ["_created", "_gsum", "_gcount"];

/// Errors raised for malformed metric families.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("Invalid metric name '{0}'")]
    InvalidMetricName(String),

    #[error("Invalid label name '{label}' in metric '{family}'")]
    InvalidLabelName { family: String, label: String },
}

/// OpenMetrics metric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    GaugeHistogram,
    Summary,
    Info,
    StateSet,
    Unknown,
}

impl MetricType {
    /// The type announced on the `# TYPE` line.
    pub fn exposition_type(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge | MetricType::Info | MetricType::StateSet => "gauge",
            MetricType::Histogram | MetricType::GaugeHistogram => "histogram",
            MetricType::Summary => "summary",
            MetricType::Unknown => "untyped",
        }
    }

    fn sample_suffix(&self) -> &'static str {
        match self {
            MetricType::Counter => "_total",
            MetricType::Info => "_info",
            _ => "",
        }
    }
}

/// A single sample of a metric family.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<f64>,
}

/// A named group of samples sharing help text and type.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub documentation: String,
    pub metric_type: MetricType,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(
        name: impl Into<String>,
        documentation: impl Into<String>,
        metric_type: MetricType,
    ) -> Self {
        Self {
            name: name.into(),
            documentation: documentation.into(),
            metric_type,
            samples: Vec::new(),
        }
    }

    /// Add a sample carrying the family's own name.
    pub fn add_sample(&mut self, labels: BTreeMap<String, String>, value: f64) {
        let name = self.name.clone();
        self.add_named_sample(name, labels, value, None);
    }

    /// Add a sample with an explicit name, e.g. `<family>_created`.
    pub fn add_named_sample(
        &mut self,
        name: impl Into<String>,
        labels: BTreeMap<String, String>,
        value: f64,
        timestamp: Option<f64>,
    ) {
        self.samples.push(Sample {
            name: name.into(),
            labels,
            value,
            timestamp,
        });
    }

    /// Whether the family carries no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Render families in the Prometheus text exposition format.
pub fn render(families: &[MetricFamily]) -> Result<Vec<u8>, EncodingError> {
    let mut output = String::with_capacity(families.len() * 256);

    for family in families {
        render_family(&mut output, family)?;
    }

    Ok(output.into_bytes())
}

fn render_family(output: &mut String, family: &MetricFamily) -> Result<(), EncodingError> {
    if !is_valid_metric_name(&family.name) {
        return Err(EncodingError::InvalidMetricName(family.name.clone()));
    }

    let help = escape_help(&family.documentation);
    writeln!(output, "# HELP {} {}", family.name, help).ok();
    writeln!(
        output,
        "# TYPE {} {}",
        family.name,
        family.metric_type.exposition_type()
    )
    .ok();

    let mut deferred: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for sample in &family.samples {
        let line = sample_line(family, sample)?;
        let suffix = DEFERRED_SUFFIXES.iter().find(|suffix| {
            sample
                .name
                .strip_prefix(family.name.as_str())
                .is_some_and(|rest| rest == **suffix)
        });

        match suffix {
            Some(suffix) => deferred.entry(*suffix).or_default().push(line),
            None => output.push_str(&line),
        }
    }

    for (suffix, lines) in deferred {
        writeln!(output, "# HELP {}{} {}", family.name, suffix, help).ok();
        writeln!(output, "# TYPE {}{} gauge", family.name, suffix).ok();
        for line in lines {
            output.push_str(&line);
        }
    }

    Ok(())
}

fn sample_line(family: &MetricFamily, sample: &Sample) -> Result<String, EncodingError> {
    let name = if sample.name == family.name {
        format!("{}{}", sample.name, family.metric_type.sample_suffix())
    } else {
        sample.name.clone()
    };
    if !is_valid_metric_name(&name) {
        return Err(EncodingError::InvalidMetricName(name));
    }

    let mut line = name;
    if !sample.labels.is_empty() {
        let mut parts = Vec::with_capacity(sample.labels.len());
        for (key, value) in &sample.labels {
            if !is_valid_label_name(key) {
                return Err(EncodingError::InvalidLabelName {
                    family: family.name.clone(),
                    label: key.clone(),
                });
            }
            parts.push(format!("{}=\"{}\"", key, escape_label_value(value)));
        }
        write!(line, "{{{}}}", parts.join(",")).ok();
    }

    write!(line, " {}", format_value(sample.value)).ok();
    if let Some(timestamp) = sample.timestamp {
        write!(line, " {}", (timestamp * 1000.0) as i64).ok();
    }
    line.push('\n');

    Ok(line)
}

/// Metric names must match `[a-zA-Z_:][a-zA-Z0-9_:]*`.
fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// Label names must match `[a-zA-Z_][a-zA-Z0-9_]*`.
fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn escape_help(doc: &str) -> String {
    doc.replace('\\', "\\\\").replace('\n', "\\n")
}

/// Escape special characters in label values.
fn escape_label_value(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => result.push_str("\\\\"),
            '"' => result.push_str("\\\""),
            '\n' => result.push_str("\\n"),
            _ => result.push(c),
        }
    }
    result
}

/// Format a sample value the way Go prints floats.
///
/// The base form is the shortest round-trip decimal with a mandatory
/// fractional part (`1.0`) and exponents past 16 digits (`1e+16`).
/// Positive values whose decimal point sits after the sixth character switch
/// to `d.ddde+0N`.
pub fn format_value(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value.is_sign_positive() {
            "+Inf".to_string()
        } else {
            "-Inf".to_string()
        };
    }

    let s = shortest_repr(value);
    match s.find('.') {
        Some(dot) if value > 0.0 && dot > 6 => {
            let mantissa = format!("{}.{}{}", &s[..1], &s[1..dot], &s[dot + 1..]);
            let mantissa = mantissa.trim_end_matches(['0', '.']);
            format!("{}e+0{}", mantissa, dot - 1)
        }
        _ => s,
    }
}

/// Shortest round-trip representation with fixed notation for decimal
/// exponents in `-4..16` and scientific notation elsewhere.
fn shortest_repr(value: f64) -> String {
    let sign = if value.is_sign_negative() { "-" } else { "" };
    if value == 0.0 {
        return format!("{}0.0", sign);
    }

    // `{:e}` yields the shortest round-trip digits, e.g. "1.234e-7".
    let sci = format!("{:e}", value.abs());
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return format!("{}", value);
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return format!("{}", value);
    };
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let decimal_point = exp + 1;

    if !(-3..=16).contains(&decimal_point) {
        let (first, rest) = digits.split_at(1);
        let fraction = if rest.is_empty() {
            String::new()
        } else {
            format!(".{}", rest)
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}{}e{}{:02}", sign, first, fraction, exp_sign, exp.abs());
    }

    let len = digits.len() as i32;
    if decimal_point <= 0 {
        let zeros = "0".repeat((-decimal_point) as usize);
        format!("{}0.{}{}", sign, zeros, digits)
    } else if decimal_point >= len {
        let zeros = "0".repeat((decimal_point - len) as usize);
        format!("{}{}{}.0", sign, digits, zeros)
    } else {
        let (int, frac) = digits.split_at(decimal_point as usize);
        format!("{}{}.{}", sign, int, frac)
    }
}
