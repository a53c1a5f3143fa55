//! The Prometheus text exposition format, as described here:
//! <https://prometheus.io/docs/instrumenting/exposition_formats/>
//!
//! Text is decoded lazily into [`MetricFamily`] records by the [`Decoder`], and written back
//! by the [`Encoder`] (or through the `Display` implementations).
use crate::escape::{
    escape_help,
    escape_label_value,
};
use derive_more::Constructor;
pub use parser::{
    decode,
    parse_scrape,
    DecodeError,
    Decoder,
    MetricError,
    ScrapeParseError,
};
use std::{
    fmt::Display,
    io,
};
use tracing::trace;

mod parser;

/// The possible types of Prometheus metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
#[strum(serialize_all = "snake_case")]
pub enum Type {
    Counter,
    Gauge,
    #[default]
    Untyped,
    Summary,
    Histogram,
}

/// A single label pair of a metric.
///
/// Example:
/// ```text
/// code="200"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Label {
    /// Label name
    pub key: String,
    /// Label value, unescaped
    pub value: String,
}

/// The ordered label pairs identifying a metric.
///
/// Example:
/// ```text
/// {code="200",app="app",region="cn"}
/// ```
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Default,
    derive_more::Deref,
    derive_more::DerefMut,
    derive_more::From,
)]
#[repr(transparent)]
pub struct Labels(Vec<Label>);

impl Display for Labels {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str("{")?;
        for (idx, label) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}=\"{}\"", label.key, escape_label_value(&label.value))?;
        }
        f.write_str("}")
    }
}

/// The possible types of a `Value`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Sample,
    // The following two are only relevant for Summary, Histogram
    Sum,
    Count,
}

/// Float is a float as represented by Go's ParseFloat() function.
/// In addition to standard numerical values, NaN, +Inf, and -Inf are valid values representing
/// not a number, positive infinity, and negative infinity, respectively.
///
/// The text is kept as written and only validated on parsing, so that encoding reproduces the
/// input exactly. PromQL number literals use the same representation.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    derive_more::Deref,
    derive_more::From,
    derive_more::FromStr,
    derive_more::Display,
)]
#[repr(transparent)]
pub struct Float(String);

impl Float {
    /// The value as an `f64`. Unparseable text (never produced by the parsers) reads as NaN.
    pub fn as_f64(&self) -> f64 {
        self.0.parse().unwrap_or(f64::NAN)
    }

    /// The textual negation of the value: `1` becomes `-1`, `-Inf` becomes `Inf`.
    pub fn negated(&self) -> Self {
        let negated = match self.0.strip_prefix('-') {
            Some(rest) => rest.to_owned(),
            None => format!("-{}", self.0.strip_prefix('+').unwrap_or(&self.0)),
        };
        Self(negated)
    }
}

impl From<&str> for Float {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// A sample value of a metric.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Value {
    /// Whether this is a regular sample value, or a Sum or a Count value.
    pub value_type: ValueType,
    /// The sample value, still a string, but validated to be a float.
    pub value: Float,
    /// The timestamp is an int64 (milliseconds since epoch, i.e. 1970-01-01 00:00:00 UTC,
    /// excluding leap seconds), represented as required by Go's ParseInt() function.
    pub timestamp: Option<i64>,
}

impl Display for Value {
    /// Print the the value, followed by an optional timestamp
    /// Example:
    /// ```text
    /// 3 1395066363000
    /// ```
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.value)?;
        if let Some(ts) = self.timestamp {
            write!(f, " {ts}")?;
        }
        Ok(())
    }
}

/// One time series of a family: its labels and its current value.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct Metric {
    pub labels: Labels,
    pub value: Value,
}

/// A named group of metrics sharing help text and type.
///
/// An example:
/// ```text
/// # HELP promhttp_metric_handler_requests_total Total number of scrapes by HTTP status code.
/// # TYPE promhttp_metric_handler_requests_total counter
/// promhttp_metric_handler_requests_total{code="200"} 0
/// promhttp_metric_handler_requests_total{code="500"} 0
/// promhttp_metric_handler_requests_total{code="503"} 0
/// ```
/// Histograms and summaries keep their base name; the `_bucket`, `_sum` and `_count`
/// suffixes are recorded through `ValueType` and restored on output.
#[derive(Debug, Clone, PartialEq, Eq, Constructor)]
pub struct MetricFamily {
    /// The name of the family, excluding suffixes and labels.
    pub name: String,
    /// The text of the HELP line, unescaped
    pub help: Option<String>,
    pub kind: Type,
    pub metrics: Vec<Metric>,
}

impl MetricFamily {
    /// Append the given labels, in order, to every metric of the family.
    ///
    /// Existing labels are left alone, even when they share a name with an appended one.
    pub fn add_labels(&mut self, labels: &[Label]) {
        for metric in &mut self.metrics {
            metric.labels.extend(labels.iter().cloned());
        }
        trace!(
            family = %self.name,
            metrics = self.metrics.len(),
            appended = labels.len(),
            "Appended labels"
        );
    }
}

impl Display for MetricFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(help) = self.help.as_deref() {
            writeln!(f, "# HELP {} {}", self.name, escape_help(help))?;
        }
        if self.kind != Type::Untyped {
            writeln!(f, "# TYPE {} {}", self.name, self.kind)?;
        }
        for metric in self.metrics.iter() {
            let suffix = match (self.kind, metric.value.value_type) {
                (Type::Histogram, ValueType::Sample) => "_bucket",
                (Type::Histogram | Type::Summary, ValueType::Sum) => "_sum",
                (Type::Histogram | Type::Summary, ValueType::Count) => "_count",
                _ => "",
            };
            writeln!(f, "{}{suffix}{} {}", self.name, metric.labels, metric.value)?;
        }
        Ok(())
    }
}

/// Append the given labels to every metric of every family.
pub fn add_labels(families: &mut [MetricFamily], labels: &[Label]) {
    for family in families {
        family.add_labels(labels);
    }
}

/// Writes metric families to a writer in the text exposition format.
#[derive(Debug)]
pub struct Encoder<W> {
    writer: W,
}

impl<W: io::Write> Encoder<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Append the text representation of a single family.
    pub fn encode(&mut self, family: &MetricFamily) -> io::Result<()> {
        write!(self.writer, "{family}")
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

/// A single scrape.
/// Parses a textual scrape into a vector of metric families.
/// Implements `Display` to print the families in the Prometheus exposition text format.
///
/// NOTES:
/// The parsing is not lossless. Comments (excluding TYPE, HELP comments) and empty lines
/// are discarded.
#[derive(Debug, Clone, Default)]
pub struct Scrape {
    /// The metric families given in the scrape.
    pub families: Vec<MetricFamily>,
}

impl Display for Scrape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for family in self.families.iter() {
            write!(f, "{family}")?;
        }
        Ok(())
    }
}

impl Scrape {
    pub fn parse(data: &str) -> Result<Self, ScrapeParseError> {
        let (families, maybe_error) = parse_scrape(data);
        match maybe_error {
            Some(error) => Err(error),
            None => Ok(Self { families }),
        }
    }

    /// Add a label to all the metrics in the scrape
    pub fn add_label(&mut self, key: &str, value: &str) {
        self.add_labels(&[Label::new(key.into(), value.into())]);
    }

    /// Add labels, in order, to all the metrics in the scrape
    pub fn add_labels(&mut self, labels: &[Label]) {
        add_labels(&mut self.families, labels);
    }
}
