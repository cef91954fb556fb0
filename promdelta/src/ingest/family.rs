//! Metric families
//!
//! A family is every sample sharing one name and declared type. The collector
//! here folds parser entries into families, gathering the `_sum` and `_count`
//! sub-series of histograms and summaries into a single observation per label
//! set.

use std::collections::BTreeSet;

use rustc_hash::FxHashMap;
use tracing::debug;

use crate::labels::{self, LabelSet};

use super::parser::{Entry, MetricType, Sample};

/// One counter, gauge or untyped observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    /// The observation labels
    pub labels: LabelSet,
    /// The value as written in the exposition
    pub value: String,
}

/// One histogram or summary observation. A missing `_sum` or `_count`
/// sub-series reads as `0`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aggregate {
    /// The observation labels, without `le` or `quantile`
    pub labels: LabelSet,
    /// The `_sum` value as written
    pub sum: String,
    /// The `_count` value as written
    pub count: String,
}

/// The observations of a family, by declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Metrics {
    /// Counter observations
    Counter(Vec<Scalar>),
    /// Gauge observations
    Gauge(Vec<Scalar>),
    /// Histogram observations
    Histogram(Vec<Aggregate>),
    /// Summary observations
    Summary(Vec<Aggregate>),
    /// Observations with no declared type
    Untyped(Vec<Scalar>),
}

impl Aggregate {
    fn empty(labels: LabelSet) -> Self {
        Self {
            labels,
            sum: "0".to_string(),
            count: "0".to_string(),
        }
    }
}

impl Metrics {
    fn empty(metric_type: MetricType) -> Self {
        match metric_type {
            MetricType::Counter => Metrics::Counter(Vec::new()),
            MetricType::Gauge => Metrics::Gauge(Vec::new()),
            MetricType::Histogram => Metrics::Histogram(Vec::new()),
            MetricType::Summary => Metrics::Summary(Vec::new()),
            MetricType::Untyped => Metrics::Untyped(Vec::new()),
        }
    }

    /// The number of observations
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Metrics::Counter(v) | Metrics::Gauge(v) | Metrics::Untyped(v) => v.len(),
            Metrics::Histogram(v) | Metrics::Summary(v) => v.len(),
        }
    }

    /// Whether there are no observations
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A named group of observations sharing a declared type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Family {
    /// The family name, untrimmed
    pub name: String,
    /// The HELP docstring, empty if none was given
    pub help: String,
    /// The observations
    pub metrics: Metrics,
}

impl Family {
    /// Create an empty family of the given type
    #[must_use]
    pub fn new(name: impl Into<String>, metric_type: MetricType) -> Self {
        Self {
            name: name.into(),
            help: String::new(),
            metrics: Metrics::empty(metric_type),
        }
    }

    /// The declared type of this family
    #[must_use]
    pub fn metric_type(&self) -> MetricType {
        match self.metrics {
            Metrics::Counter(_) => MetricType::Counter,
            Metrics::Gauge(_) => MetricType::Gauge,
            Metrics::Histogram(_) => MetricType::Histogram,
            Metrics::Summary(_) => MetricType::Summary,
            Metrics::Untyped(_) => MetricType::Untyped,
        }
    }

    /// Every label name used by any observation of this family, ascending.
    #[must_use]
    pub fn label_names(&self) -> BTreeSet<&str> {
        let mut names = BTreeSet::new();
        match &self.metrics {
            Metrics::Counter(v) | Metrics::Gauge(v) | Metrics::Untyped(v) => {
                for m in v {
                    names.extend(m.labels.keys().map(String::as_str));
                }
            }
            Metrics::Histogram(v) | Metrics::Summary(v) => {
                for m in v {
                    names.extend(m.labels.keys().map(String::as_str));
                }
            }
        }
        names
    }
}

/// Folds parser entries into families, preserving first-seen order.
#[derive(Debug, Default)]
pub(crate) struct Collector {
    families: Vec<Family>,
    by_name: FxHashMap<String, usize>,
    /// (family index, canonical labels) to aggregate index
    aggregates: FxHashMap<(usize, String), usize>,
}

impl Collector {
    pub(crate) fn push(&mut self, entry: Entry) {
        match entry {
            Entry::Help { name, text } => {
                let idx = self.family(&name, MetricType::Untyped);
                self.families[idx].help = text;
            }
            Entry::Type { name, metric_type } => {
                let idx = self.family(&name, metric_type);
                let family = &mut self.families[idx];
                if family.metric_type() != metric_type {
                    if family.metrics.is_empty() {
                        family.metrics = Metrics::empty(metric_type);
                    } else {
                        debug!(
                            "ignoring TYPE {} for {name}, samples already seen",
                            metric_type.as_str()
                        );
                    }
                }
            }
            Entry::Sample(sample) => self.push_sample(sample),
        }
    }

    fn push_sample(&mut self, sample: Sample) {
        let Sample {
            name,
            family,
            value,
            labels,
            ..
        } = sample;
        let (family_name, metric_type) =
            family.unwrap_or_else(|| (name.clone(), MetricType::Untyped));
        let idx = self.family(&family_name, metric_type);
        let mut labels: LabelSet = labels.into_iter().collect();

        if let Metrics::Counter(v) | Metrics::Gauge(v) | Metrics::Untyped(v) =
            &mut self.families[idx].metrics
        {
            v.push(Scalar { labels, value });
            return;
        }

        let suffix = name.strip_prefix(family_name.as_str()).unwrap_or_default();
        labels.remove("le");
        labels.remove("quantile");
        let Some(aggregate) = self.aggregate(idx, labels) else {
            return;
        };
        match suffix {
            "_sum" => aggregate.sum = value,
            "_count" => aggregate.count = value,
            _ => {}
        }
    }

    fn family(&mut self, name: &str, metric_type: MetricType) -> usize {
        if let Some(idx) = self.by_name.get(name) {
            return *idx;
        }
        let idx = self.families.len();
        self.families.push(Family::new(name, metric_type));
        self.by_name.insert(name.to_string(), idx);
        idx
    }

    fn aggregate(&mut self, family_idx: usize, labels: LabelSet) -> Option<&mut Aggregate> {
        let key = (family_idx, labels::canonicalize(&labels));
        let aggregates = match &mut self.families[family_idx].metrics {
            Metrics::Histogram(v) | Metrics::Summary(v) => v,
            _ => return None,
        };
        let slot = *self.aggregates.entry(key).or_insert_with(|| {
            aggregates.push(Aggregate::empty(labels));
            aggregates.len() - 1
        });
        aggregates.get_mut(slot)
    }

    pub(crate) fn finish(self) -> Vec<Family> {
        self.families
    }
}
