//! Reduce a family to one value per series
//!
//! Counters and gauges keep their value. Histograms are reduced to their mean,
//! `sum / count`, and histograms with too few observations are dropped so that
//! noisy low-sample series do not show up at all. Summaries are skipped and
//! untyped families are reported and skipped.

use rustc_hash::FxHashSet;
use tracing::{info, trace};

use crate::{
    ingest::{Aggregate, Family, Metrics, Scalar},
    snapshot::{ReducedMetric, SeriesKey, Value},
};

/// The metric name prefix trimmed by default.
pub const DEFAULT_TRIM_PREFIX: &str = "rox_central_";
/// The histogram count below which observations are dropped by default.
pub const DEFAULT_MIN_HISTOGRAM_COUNT: u64 = 5;

/// Errors produced by [`reduce_family`]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A value needed for reduction is not a number
    #[error("Family {family}: {field} {value:?} is not a number")]
    NotNumeric {
        /// The family name
        family: String,
        /// Which value was malformed: `value`, `sum` or `count`
        field: &'static str,
        /// The text found instead of a number
        value: String,
    },
}

/// Configuration for [`reduce_family`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Family names to keep. Empty keeps every family.
    pub include: FxHashSet<String>,
    /// Prefix stripped once from family names to form metric names
    pub trim_prefix: String,
    /// Histogram observations with fewer counts than this are dropped
    pub min_histogram_count: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            include: FxHashSet::default(),
            trim_prefix: DEFAULT_TRIM_PREFIX.to_string(),
            min_histogram_count: DEFAULT_MIN_HISTOGRAM_COUNT,
        }
    }
}

impl Config {
    /// Whether `family` passes the include list
    #[must_use]
    pub fn includes(&self, family: &str) -> bool {
        self.include.is_empty() || self.include.contains(family)
    }
}

/// Reduce one family to its `(key, metric)` entries.
///
/// # Errors
///
/// Returns [`Error::NotNumeric`] if any value, sum or count cannot be read as
/// a number. Such a dump is not partially trusted.
pub fn reduce_family(
    family: &Family,
    config: &Config,
) -> Result<Vec<(SeriesKey, ReducedMetric)>, Error> {
    if !config.includes(&family.name) {
        trace!("skipping family {} not in include list", family.name);
        return Ok(Vec::new());
    }

    let metric_name = family
        .name
        .strip_prefix(config.trim_prefix.as_str())
        .unwrap_or(&family.name);

    match &family.metrics {
        Metrics::Counter(scalars) | Metrics::Gauge(scalars) => scalars
            .iter()
            .map(|scalar| reduce_scalar(family, metric_name, scalar))
            .collect(),
        Metrics::Histogram(aggregates) => {
            let mut entries = Vec::with_capacity(aggregates.len());
            for aggregate in aggregates {
                if let Some(entry) = reduce_histogram(family, metric_name, aggregate, config)? {
                    entries.push(entry);
                }
            }
            Ok(entries)
        }
        Metrics::Summary(_) => Ok(Vec::new()),
        Metrics::Untyped(_) => {
            info!(
                "Unknown family: {} of type {}",
                family.name,
                family.metric_type().as_str()
            );
            Ok(Vec::new())
        }
    }
}

fn reduce_scalar(
    family: &Family,
    metric_name: &str,
    scalar: &Scalar,
) -> Result<(SeriesKey, ReducedMetric), Error> {
    let value = parse_number(family, "value", &scalar.value)?;
    Ok((
        SeriesKey::new(metric_name, &scalar.labels),
        ReducedMetric {
            family: family.name.clone(),
            metric_type: family.metric_type(),
            labels: scalar.labels.clone(),
            value: Value::Scalar(value),
        },
    ))
}

fn reduce_histogram(
    family: &Family,
    metric_name: &str,
    aggregate: &Aggregate,
    config: &Config,
) -> Result<Option<(SeriesKey, ReducedMetric)>, Error> {
    let count = parse_number(family, "count", &aggregate.count)?;
    let sum = parse_number(family, "sum", &aggregate.sum)?;

    if count < config.min_histogram_count as f64 {
        trace!(
            "dropping {metric_name} with {count} observations, fewer than {}",
            config.min_histogram_count
        );
        return Ok(None);
    }

    Ok(Some((
        SeriesKey::new(metric_name, &aggregate.labels),
        ReducedMetric {
            family: family.name.clone(),
            metric_type: family.metric_type(),
            labels: aggregate.labels.clone(),
            value: Value::Averaged {
                value: sum / count,
                sum,
                count,
            },
        },
    )))
}

fn parse_number(family: &Family, field: &'static str, text: &str) -> Result<f64, Error> {
    text.trim().parse::<f64>().map_err(|_| Error::NotNumeric {
        family: family.name.clone(),
        field,
        value: text.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{
        ingest::{self, MetricType},
        labels::LabelSet,
        snapshot::{SnapshotMap, test_support::labels},
    };

    fn histogram(name: &str, sum: &str, count: &str) -> Family {
        Family {
            name: name.to_string(),
            help: String::new(),
            metrics: Metrics::Histogram(vec![Aggregate {
                labels: labels(&[("Action", "CREATE")]),
                sum: sum.to_string(),
                count: count.to_string(),
            }]),
        }
    }

    fn counter(name: &str, pairs: &[(&str, &str)], value: &str) -> Family {
        Family {
            name: name.to_string(),
            help: String::new(),
            metrics: Metrics::Counter(vec![Scalar {
                labels: labels(pairs),
                value: value.to_string(),
            }]),
        }
    }

    #[test]
    fn counter_prefix_trimmed() {
        let family = counter("rox_central_foo", &[("a", "1")], "10");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");

        assert_eq!(entries.len(), 1);
        let (key, metric) = &entries[0];
        assert_eq!(key.metric(), "foo");
        assert_eq!(key.labels(), "a=1");
        assert_eq!(metric.value, Value::Scalar(10.0));
        assert_eq!(metric.family, "rox_central_foo");
        assert_eq!(metric.metric_type, MetricType::Counter);
    }

    #[test]
    fn prefix_trimmed_only_once() {
        let family = counter("rox_central_rox_central_foo", &[], "1");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");
        assert_eq!(entries[0].0.metric(), "rox_central_foo");
    }

    #[test]
    fn histogram_averaged() {
        let family = histogram("rox_central_lat", "24", "8");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");

        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0].1.value,
            Value::Averaged {
                value: 3.0,
                sum: 24.0,
                count: 8.0,
            }
        );
    }

    #[test]
    fn histogram_below_minimum_dropped() {
        let family = histogram("rox_central_lat", "9", "3");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");
        assert!(entries.is_empty());
    }

    #[test]
    fn histogram_at_minimum_kept() {
        let family = histogram("rox_central_lat", "10", "5");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn zero_count_with_zero_minimum_is_nan() {
        let family = histogram("lat", "0", "0");
        let config = Config {
            min_histogram_count: 0,
            ..Config::default()
        };
        let entries = reduce_family(&family, &config).expect("reducible");
        assert!(entries[0].1.value().is_nan());
    }

    #[test]
    fn non_numeric_values_rejected() {
        let res = reduce_family(&counter("foo", &[], "abc"), &Config::default());
        assert_eq!(
            res,
            Err(Error::NotNumeric {
                family: "foo".to_string(),
                field: "value",
                value: "abc".to_string(),
            })
        );

        let res = reduce_family(&histogram("lat", "x", "10"), &Config::default());
        assert!(matches!(res, Err(Error::NotNumeric { field: "sum", .. })));
    }

    #[test]
    fn special_floats_accepted() {
        let family = counter("foo", &[], "+Inf");
        let entries = reduce_family(&family, &Config::default()).expect("reducible");
        assert_eq!(entries[0].1.value(), f64::INFINITY);
    }

    #[test]
    fn include_list_filters_on_untrimmed_name() {
        let family = counter("rox_central_foo", &[], "1");
        let mut config = Config::default();
        config.include.insert("foo".to_string());
        assert!(reduce_family(&family, &config).expect("ok").is_empty());

        config.include.insert("rox_central_foo".to_string());
        assert_eq!(reduce_family(&family, &config).expect("ok").len(), 1);
    }

    #[test]
    fn summary_and_untyped_skipped() {
        let summary = Family {
            name: "s".to_string(),
            help: String::new(),
            metrics: Metrics::Summary(vec![Aggregate {
                labels: LabelSet::new(),
                sum: "garbage".to_string(),
                count: "10".to_string(),
            }]),
        };
        assert_eq!(reduce_family(&summary, &Config::default()), Ok(Vec::new()));

        let untyped = Family {
            name: "u".to_string(),
            help: String::new(),
            metrics: Metrics::Untyped(vec![Scalar {
                labels: LabelSet::new(),
                value: "1".to_string(),
            }]),
        };
        assert_eq!(reduce_family(&untyped, &Config::default()), Ok(Vec::new()));
    }

    #[test]
    fn end_to_end_counter_from_text() {
        let families = ingest::parse(
            r#"
# TYPE rox_central_foo counter
rox_central_foo{a="1"} 10
"#,
        )
        .expect("valid dump");
        let map = SnapshotMap::from_families(&families, &Config::default()).expect("reducible");

        let key = SeriesKey::new("foo", &labels(&[("a", "1")]));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&key).map(ReducedMetric::value), Some(10.0));
    }

    #[test]
    fn end_to_end_low_count_histogram_from_text() {
        let families = ingest::parse(
            r#"
# TYPE rox_central_lat histogram
rox_central_lat_bucket{le="+Inf"} 3
rox_central_lat_sum 9
rox_central_lat_count 3
"#,
        )
        .expect("valid dump");
        let map = SnapshotMap::from_families(&families, &Config::default()).expect("reducible");
        assert!(map.is_empty());
    }

    #[test]
    fn bucket_only_histogram_dropped_from_text() {
        let families = ingest::parse(
            r#"
# TYPE rox_central_lat histogram
rox_central_lat_bucket{le="+Inf"} 2
# TYPE rox_central_foo counter
rox_central_foo 1
"#,
        )
        .expect("valid dump");
        let map = SnapshotMap::from_families(&families, &Config::default()).expect("reducible");

        assert_eq!(map.len(), 1);
        let key = SeriesKey::new("foo", &LabelSet::new());
        assert_eq!(map.get(&key).map(ReducedMetric::value), Some(1.0));
    }

    proptest! {
        #[test]
        fn low_count_histograms_never_reduced(
            count in 1_u64..1_000,
            min in 0_u64..1_000,
            sum in 0.0_f64..1e9,
        ) {
            let family = histogram("lat", &sum.to_string(), &count.to_string());
            let config = Config { min_histogram_count: min, ..Config::default() };

            let first = reduce_family(&family, &config).expect("reducible");
            let second = reduce_family(&family, &config).expect("reducible");
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.is_empty(), count < min);
        }
    }
}
