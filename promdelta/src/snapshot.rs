//! Reduced snapshots of a metrics dump
//!
//! A [`SnapshotMap`] holds one reduced value per series of a single dump.
//! Iteration is always in [`SeriesKey`] order -- metric name, then canonical
//! label string -- and every renderer and the comparator rely on it.

use std::{collections::BTreeMap, fmt};

use tracing::debug;

use crate::{
    ingest::{Family, MetricType},
    labels::{self, LabelSet},
    reduce,
};

/// The identity of one reduced series.
///
/// Ordering is by metric name, then by canonical label string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SeriesKey {
    metric: String,
    labels: String,
}

impl SeriesKey {
    /// Create a key from a display metric name and a label set
    #[must_use]
    pub fn new(metric: impl Into<String>, labels: &LabelSet) -> Self {
        Self {
            metric: metric.into(),
            labels: labels::canonicalize(labels),
        }
    }

    /// The metric name, prefix trimmed
    #[must_use]
    pub fn metric(&self) -> &str {
        &self.metric
    }

    /// The canonical label string
    #[must_use]
    pub fn labels(&self) -> &str {
        &self.labels
    }
}

impl fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.metric, self.labels)
    }
}

/// The reduced value of one series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    /// A counter or gauge value
    Scalar(f64),
    /// A histogram reduced to its mean
    Averaged {
        /// `sum / count`
        value: f64,
        /// The histogram sum
        sum: f64,
        /// The histogram observation count
        count: f64,
    },
}

/// One reduced series along with where it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedMetric {
    /// The untrimmed name of the family this series belongs to
    pub family: String,
    /// The declared type of that family
    pub metric_type: MetricType,
    /// The series labels
    pub labels: LabelSet,
    /// The reduced value
    pub value: Value,
}

impl ReducedMetric {
    /// The canonical numeric value of this series
    #[must_use]
    pub fn value(&self) -> f64 {
        match self.value {
            Value::Scalar(value) | Value::Averaged { value, .. } => value,
        }
    }

    /// The histogram sum, zero for scalars
    #[must_use]
    pub fn sum(&self) -> f64 {
        match self.value {
            Value::Scalar(_) => 0.0,
            Value::Averaged { sum, .. } => sum,
        }
    }

    /// The histogram count, zero for scalars
    #[must_use]
    pub fn count(&self) -> f64 {
        match self.value {
            Value::Scalar(_) => 0.0,
            Value::Averaged { count, .. } => count,
        }
    }
}

impl fmt::Display for ReducedMetric {
    #[allow(clippy::cast_possible_truncation)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Value::Scalar(value) => write!(f, "{value:.2}"),
            Value::Averaged { value, sum, count } => {
                write!(f, "({sum:.2}/{}) {value:.2}", count as i64)
            }
        }
    }
}

/// Every reduced series of one dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotMap {
    inner: BTreeMap<SeriesKey, ReducedMetric>,
}

impl SnapshotMap {
    /// Reduce every family and fold the results into one map. A series seen
    /// twice keeps its last value.
    ///
    /// # Errors
    ///
    /// Returns the first reduction error; see [`reduce::Error`].
    pub fn from_families(
        families: &[Family],
        config: &reduce::Config,
    ) -> Result<Self, reduce::Error> {
        let mut map = Self::default();
        for family in families {
            for (key, metric) in reduce::reduce_family(family, config)? {
                map.insert(key, metric);
            }
        }
        Ok(map)
    }

    fn insert(&mut self, key: SeriesKey, metric: ReducedMetric) {
        if let Some(previous) = self.inner.insert(key, metric) {
            debug!(
                "series from family {} overwritten by a later duplicate",
                previous.family
            );
        }
    }

    /// Every key in metric name, then label order
    #[must_use]
    pub fn sorted_keys(&self) -> Vec<&SeriesKey> {
        self.inner.keys().collect()
    }

    /// Every entry in key order
    pub fn iter(&self) -> impl Iterator<Item = (&SeriesKey, &ReducedMetric)> {
        self.inner.iter()
    }

    /// Look up one series
    #[must_use]
    pub fn get(&self, key: &SeriesKey) -> Option<&ReducedMetric> {
        self.inner.get(key)
    }

    /// Whether `key` is present
    #[must_use]
    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.inner.contains_key(key)
    }

    /// The number of series
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether there are no series
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl FromIterator<(SeriesKey, ReducedMetric)> for SnapshotMap {
    fn from_iter<T: IntoIterator<Item = (SeriesKey, ReducedMetric)>>(iter: T) -> Self {
        let mut map = Self::default();
        for (key, metric) in iter {
            map.insert(key, metric);
        }
        map
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub(crate) fn labels(pairs: &[(&str, &str)]) -> LabelSet {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    pub(crate) fn scalar(
        metric: &str,
        pairs: &[(&str, &str)],
        value: f64,
    ) -> (SeriesKey, ReducedMetric) {
        let labels = labels(pairs);
        (
            SeriesKey::new(metric, &labels),
            ReducedMetric {
                family: metric.to_string(),
                metric_type: MetricType::Gauge,
                labels,
                value: Value::Scalar(value),
            },
        )
    }

    pub(crate) fn averaged(
        metric: &str,
        pairs: &[(&str, &str)],
        sum: f64,
        count: f64,
    ) -> (SeriesKey, ReducedMetric) {
        let labels = labels(pairs);
        (
            SeriesKey::new(metric, &labels),
            ReducedMetric {
                family: metric.to_string(),
                metric_type: MetricType::Histogram,
                labels,
                value: Value::Averaged {
                    value: sum / count,
                    sum,
                    count,
                },
            },
        )
    }
}
