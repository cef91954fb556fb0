//! Line parser for Prometheus text dumps
//!
//! Each line of an exposition is turned into at most one [`Entry`]. Grouping
//! entries into families happens one level up.
//! <https://github.com/prometheus/docs/blob/main/content/docs/instrumenting/exposition_formats.md>
//!
//! Sample values are kept as their source text. Interpreting them as numbers
//! is left to the reducer, which knows which values it actually needs.

use rustc_hash::FxHashMap;
use std::str::FromStr;

/// Type alias for label pairs, in exposition order
pub type LabelPairs = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The declared type of a family
pub enum MetricType {
    /// A value that may go up and down
    Gauge,
    /// A monotonically increasing total
    Counter,
    /// Bucketed observations with a sum and count
    Histogram,
    /// Quantiled observations with a sum and count
    Summary,
    /// No TYPE line was given
    Untyped,
}

impl MetricType {
    /// The upper-case name used when reporting family types.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MetricType::Gauge => "GAUGE",
            MetricType::Counter => "COUNTER",
            MetricType::Histogram => "HISTOGRAM",
            MetricType::Summary => "SUMMARY",
            MetricType::Untyped => "UNTYPED",
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
/// Errors produced for a malformed exposition line
pub enum ParseError {
    /// A TYPE line names a type we do not know
    #[error("unknown metric type: {0}")]
    UnknownMetricType(String),
    /// The line is not shaped like HELP, TYPE or a sample
    #[error("invalid format: {0}")]
    InvalidFormat(String),
    /// A sample line has no value
    #[error("missing value")]
    MissingValue,
    /// A sample line has no name
    #[error("missing metric name")]
    MissingName,
    /// Invalid label format
    #[error("invalid label: {0}")]
    InvalidLabel(String),
}

impl FromStr for MetricType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "counter" => Ok(Self::Counter),
            "gauge" => Ok(Self::Gauge),
            "histogram" => Ok(Self::Histogram),
            "summary" => Ok(Self::Summary),
            "untyped" => Ok(Self::Untyped),
            _ => Err(ParseError::UnknownMetricType(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A parsed sample line
pub struct Sample {
    /// The sample name as written, suffix included (`foo_bucket`, `foo_sum`)
    pub name: String,
    /// The family this sample belongs to and its declared type, if a TYPE
    /// line announced it
    pub family: Option<(String, MetricType)>,
    /// The sample value, as written
    pub value: String,
    /// The sample labels as key-value pairs
    pub labels: LabelPairs,
    /// The sample timestamp in milliseconds, if written
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// A single meaningful line of the exposition
pub enum Entry {
    /// `# HELP <name> <text>`
    Help {
        /// The family name
        name: String,
        /// The unescaped docstring
        text: String,
    },
    /// `# TYPE <name> <type>`
    Type {
        /// The family name
        name: String,
        /// The declared type
        metric_type: MetricType,
    },
    /// A sample line
    Sample(Sample),
}

#[derive(Debug, Default)]
/// Stateful line parser. TYPE lines seen so far decide which family later
/// samples belong to.
pub struct PrometheusParser {
    /// Sample name to (family name, type). Histogram and summary families
    /// register their suffixed sample names here as well.
    typemap: FxHashMap<String, (String, MetricType)>,
}

impl PrometheusParser {
    /// Create a parser that has seen no TYPE lines
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse every line of `text`
    pub fn parse_text(&mut self, text: &str) -> Vec<Result<Entry, ParseError>> {
        text.lines().filter_map(|line| self.parse_line(line)).collect()
    }

    /// Parse a single line of Prometheus text format. Blank lines and
    /// free-form comments produce nothing.
    pub fn parse_line(&mut self, line: &str) -> Option<Result<Entry, ParseError>> {
        let line = line.trim();

        if line.is_empty() {
            return None;
        }

        if let Some(rest) = line.strip_prefix("# HELP") {
            return Some(Self::parse_help_line(rest));
        }

        if let Some(rest) = line.strip_prefix("# TYPE") {
            return Some(self.parse_type_line(rest));
        }

        if line.starts_with('#') {
            return None;
        }

        Some(self.parse_metric_line(line).map(Entry::Sample))
    }

    fn parse_help_line(rest: &str) -> Result<Entry, ParseError> {
        let rest = rest.trim_start();
        let (name, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
        if name.is_empty() {
            return Err(ParseError::InvalidFormat(
                "Missing metric name in HELP line".to_string(),
            ));
        }

        let mut unescaped = String::with_capacity(text.len());
        let mut chars = text.trim().chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                match chars.next() {
                    Some('n') => unescaped.push('\n'),
                    Some(c) => unescaped.push(c),
                    None => unescaped.push('\\'),
                }
            } else {
                unescaped.push(ch);
            }
        }

        Ok(Entry::Help {
            name: name.to_string(),
            text: unescaped,
        })
    }

    fn parse_type_line(&mut self, rest: &str) -> Result<Entry, ParseError> {
        let mut parts = rest.split_ascii_whitespace();

        let name = parts.next().ok_or_else(|| {
            ParseError::InvalidFormat("Missing metric name in TYPE line".to_string())
        })?;

        let metric_type_str = parts.next().ok_or_else(|| {
            ParseError::InvalidFormat("Missing metric type in TYPE line".to_string())
        })?;

        let metric_type: MetricType = metric_type_str.parse()?;

        // Sub-series of histograms and summaries belong to the base family
        if matches!(metric_type, MetricType::Histogram | MetricType::Summary) {
            for suffix in ["_sum", "_count", "_bucket"] {
                self.typemap
                    .insert(format!("{name}{suffix}"), (name.to_owned(), metric_type));
            }
        }

        self.typemap
            .insert(name.to_owned(), (name.to_owned(), metric_type));
        Ok(Entry::Type {
            name: name.to_owned(),
            metric_type,
        })
    }

    fn parse_metric_line(&self, line: &str) -> Result<Sample, ParseError> {
        let (name, labels, value_part) = Self::split_metric_line(line)?;
        let (value, timestamp) = Self::parse_value_and_timestamp(value_part)?;

        let family = self.typemap.get(name).cloned();

        Ok(Sample {
            name: name.to_string(),
            family,
            value,
            labels,
            timestamp,
        })
    }

    /// Split a sample line into its name, labels and the remainder holding
    /// the value and optional timestamp.
    fn split_metric_line(line: &str) -> Result<(&str, LabelPairs, &str), ParseError> {
        let name_end = line
            .find(|c: char| c == '{' || c.is_whitespace())
            .ok_or(ParseError::MissingValue)?;
        let name = &line[..name_end];
        if name.is_empty() {
            return Err(ParseError::MissingName);
        }

        let rest = &line[name_end..];
        let (labels, rest) = if let Some(inner) = rest.strip_prefix('{') {
            Self::parse_labels(inner)?
        } else {
            (Vec::new(), rest)
        };

        let rest = rest.trim();
        if rest.is_empty() {
            return Err(ParseError::MissingValue);
        }
        Ok((name, labels, rest))
    }

    /// Parse label pairs up to and including the closing brace. Returns the
    /// pairs and the text after the brace.
    fn parse_labels(input: &str) -> Result<(LabelPairs, &str), ParseError> {
        let mut labels = Vec::new();
        let mut rest = input;

        loop {
            rest = rest.trim_start();
            if let Some(after) = rest.strip_prefix('}') {
                return Ok((labels, after));
            }

            let (label_name, after_name) = rest
                .split_once('=')
                .ok_or_else(|| ParseError::InvalidLabel(format!("Label missing '=': {rest}")))?;
            let label_name = label_name.trim();
            if label_name.is_empty() {
                return Err(ParseError::InvalidLabel("Empty label key".to_string()));
            }
            if label_name.contains([',', '}', '"']) {
                return Err(ParseError::InvalidLabel(format!(
                    "Malformed label key: {label_name}"
                )));
            }

            let (label_value, after_value) = Self::parse_label_value(after_name)?;
            labels.push((label_name.to_string(), label_value));

            rest = after_value.trim_start();
            if let Some(after) = rest.strip_prefix(',') {
                rest = after;
            } else if !rest.starts_with('}') {
                return Err(ParseError::InvalidFormat(
                    "Unclosed labels bracket".to_string(),
                ));
            }
        }
    }

    /// Parse one quoted label value with proper escape handling. Returns the
    /// unescaped value and the text after the closing quote.
    fn parse_label_value(input: &str) -> Result<(String, &str), ParseError> {
        let input = input.trim_start();

        let Some(inner) = input.strip_prefix('"') else {
            return Err(ParseError::InvalidLabel(
                "Label value must be quoted".to_string(),
            ));
        };

        let mut result = String::with_capacity(inner.len());
        let mut chars = inner.char_indices();

        while let Some((idx, ch)) = chars.next() {
            match ch {
                '\\' => match chars.next() {
                    Some((_, '\\')) => result.push('\\'),
                    Some((_, '"')) => result.push('"'),
                    Some((_, 'n')) => result.push('\n'),
                    Some((_, c)) => {
                        return Err(ParseError::InvalidLabel(format!(
                            "Invalid escape sequence: \\{c}"
                        )));
                    }
                    None => {
                        return Err(ParseError::InvalidLabel(
                            "Backslash at end of label value".to_string(),
                        ));
                    }
                },
                '"' => return Ok((result, &inner[idx + 1..])),
                c => result.push(c),
            }
        }

        Err(ParseError::InvalidLabel(
            "Label value quotes not properly paired".to_string(),
        ))
    }

    fn parse_value_and_timestamp(value_str: &str) -> Result<(String, Option<i64>), ParseError> {
        let mut parts = value_str.split_whitespace();

        let value_part = parts.next().ok_or(ParseError::MissingValue)?;

        if value_part.contains('#') {
            return Err(ParseError::InvalidFormat(
                "Value contains comment marker".to_string(),
            ));
        }

        let timestamp =
            if let Some(ts_str) = parts.next() {
                Some(ts_str.parse::<i64>().map_err(|_| {
                    ParseError::InvalidFormat(format!("Invalid timestamp: {ts_str}"))
                })?)
            } else {
                None
            };

        if let Some(extra) = parts.next() {
            return Err(ParseError::InvalidFormat(format!(
                "Unexpected trailing data: {extra}"
            )));
        }

        Ok((value_part.to_string(), timestamp))
    }
}
