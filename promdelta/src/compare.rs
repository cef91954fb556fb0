//! Compare two snapshots
//!
//! Series present in both snapshots get a percent change and are classified
//! against the configured thresholds. Series present in only one snapshot are
//! listed as removed or added and take no part in the percent calculation.
//!
//! Two alerting modes exist: a symmetric warn/error pair, checked against the
//! magnitude of the change, and a one-sided maximum increase. They may be
//! configured together; each flag is evaluated on its own.

use crate::snapshot::{ReducedMetric, SeriesKey, SnapshotMap};

/// Alerting thresholds, in percent. Unset thresholds never fire.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Thresholds {
    /// Warn when `|change| > warn_at`
    pub warn_at: Option<f64>,
    /// Error when `|change| > error_at`
    pub error_at: Option<f64>,
    /// Error when `change > max_increase`
    pub max_increase: Option<f64>,
}

/// The threshold flags raised by one percent change.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Classification {
    /// The warn threshold was exceeded
    pub is_warn: bool,
    /// The error threshold was exceeded
    pub is_error: bool,
    /// The maximum increase was exceeded
    pub over_max: bool,
}

impl Classification {
    /// Whether this classification should fail the run
    #[must_use]
    pub fn is_breach(self) -> bool {
        self.is_error || self.over_max
    }
}

impl Thresholds {
    /// Classify a percent change. An undefined change is never flagged.
    #[must_use]
    pub fn classify(&self, percent_change: Option<f64>) -> Classification {
        let Some(change) = percent_change else {
            return Classification::default();
        };
        Classification {
            is_warn: self.warn_at.is_some_and(|warn| change.abs() > warn),
            is_error: self.error_at.is_some_and(|error| change.abs() > error),
            over_max: self.max_increase.is_some_and(|max| change > max),
        }
    }
}

/// Percent change from `old` to `new`, undefined when `old` is zero.
#[must_use]
pub fn percent_change(old: f64, new: f64) -> Option<f64> {
    if old == 0.0 {
        None
    } else {
        Some((new - old) / old * 100.0)
    }
}

/// One series present in both snapshots.
#[derive(Debug, Clone, Copy)]
pub struct Delta<'a> {
    /// The series
    pub key: &'a SeriesKey,
    /// Its value in the old snapshot
    pub old: &'a ReducedMetric,
    /// Its value in the new snapshot
    pub new: &'a ReducedMetric,
    /// The percent change, `None` when the old value is zero
    pub percent_change: Option<f64>,
    /// The threshold flags raised
    pub classification: Classification,
}

/// The result of comparing two snapshots. Every list is in series order.
#[derive(Debug, Clone, Default)]
pub struct Comparison<'a> {
    /// Series present in both snapshots
    pub deltas: Vec<Delta<'a>>,
    /// Series present only in the old snapshot
    pub removed: Vec<&'a SeriesKey>,
    /// Series present only in the new snapshot
    pub added: Vec<&'a SeriesKey>,
}

impl Comparison<'_> {
    /// The number of series that should fail the run
    #[must_use]
    pub fn breaches(&self) -> usize {
        self.deltas
            .iter()
            .filter(|delta| delta.classification.is_breach())
            .count()
    }

    /// Whether any series should fail the run
    #[must_use]
    pub fn breached(&self) -> bool {
        self.breaches() > 0
    }
}

/// Compare `old` against `new`.
#[must_use]
pub fn compare<'a>(
    old: &'a SnapshotMap,
    new: &'a SnapshotMap,
    thresholds: &Thresholds,
) -> Comparison<'a> {
    let mut comparison = Comparison::default();

    for (key, old_metric) in old.iter() {
        let Some(new_metric) = new.get(key) else {
            comparison.removed.push(key);
            continue;
        };

        let percent_change = percent_change(old_metric.value(), new_metric.value());
        comparison.deltas.push(Delta {
            key,
            old: old_metric,
            new: new_metric,
            percent_change,
            classification: thresholds.classify(percent_change),
        });
    }

    comparison.added = new
        .iter()
        .map(|(key, _)| key)
        .filter(|key| !old.contains(key))
        .collect();

    comparison
}
