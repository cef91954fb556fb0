//! Plain text format
//!
//! A single snapshot renders as a fixed-width table. A comparison renders one
//! line per shared series, colored by threshold classification, followed by
//! the series that appeared or disappeared.

use std::io::Write;

use crate::{
    compare::{Comparison, Delta},
    snapshot::{SnapshotMap, Value},
};

const KEY_WIDTH: usize = 80;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";

/// Plain text writer
#[derive(Debug)]
pub struct Format<W: Write> {
    writer: W,
}

impl<W: Write> Format<W> {
    /// Create a new instance of `Format`
    #[must_use]
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Write every series of `snapshot` as `key value`, never colored.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails
    #[allow(clippy::cast_possible_truncation)]
    pub fn write_snapshot(&mut self, snapshot: &SnapshotMap) -> Result<(), std::io::Error> {
        for (key, metric) in snapshot.iter() {
            let key = key.to_string();
            match metric.value {
                Value::Scalar(value) => writeln!(self.writer, "{key:<KEY_WIDTH$} {value:.0}")?,
                Value::Averaged { value, sum, count } => writeln!(
                    self.writer,
                    "{key:<KEY_WIDTH$} ({sum:.0}/{}) {value:.3}",
                    count as i64
                )?,
            }
        }
        self.writer.flush()
    }

    /// Write one line per delta, then the removed and added series.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails
    pub fn write_comparison(&mut self, comparison: &Comparison<'_>) -> Result<(), std::io::Error> {
        for delta in &comparison.deltas {
            let line = delta_line(delta);
            let classification = delta.classification;
            if classification.is_breach() {
                writeln!(self.writer, "{RED}{line}{RESET}")?;
            } else if classification.is_warn {
                writeln!(self.writer, "{YELLOW}{line}{RESET}")?;
            } else {
                writeln!(self.writer, "{line}")?;
            }
        }

        writeln!(self.writer)?;
        for key in &comparison.removed {
            writeln!(self.writer, "Removed {key}")?;
        }
        for key in &comparison.added {
            writeln!(self.writer, "Added {key}")?;
        }
        self.writer.flush()
    }
}

fn delta_line(delta: &Delta<'_>) -> String {
    let change = match delta.percent_change {
        Some(change) => format!("{change:.4}%"),
        None => "N/A".to_string(),
    };
    format!(
        "{} (old: {}, new {}): change: {change}",
        delta.key, delta.old, delta.new
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compare::{Thresholds, compare},
        snapshot::test_support::{averaged, scalar},
    };

    fn render_comparison(old: &SnapshotMap, new: &SnapshotMap, thresholds: &Thresholds) -> String {
        let diff = compare(old, new, thresholds);
        let mut out = Vec::new();
        Format::new(&mut out)
            .write_comparison(&diff)
            .expect("write to vec");
        String::from_utf8(out).expect("utf8")
    }

    #[test]
    fn snapshot_table_is_padded() {
        let snap: SnapshotMap = [
            scalar("foo", &[("a", "1")], 10.0),
            averaged("lat", &[], 24.0, 8.0),
        ]
        .into_iter()
        .collect();

        let mut out = Vec::new();
        Format::new(&mut out).write_snapshot(&snap).expect("write to vec");
        let text = String::from_utf8(out).expect("utf8");
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("{:<80} 10", "foo a=1"));
        assert_eq!(lines[1], format!("{:<80} (24/8) 3.000", "lat "));
        assert!(!text.contains('\x1b'));
    }

    #[test]
    fn long_keys_are_not_truncated() {
        let long = "m".repeat(100);
        let snap: SnapshotMap = [scalar(&long, &[], 1.0)].into_iter().collect();

        let mut out = Vec::new();
        Format::new(&mut out).write_snapshot(&snap).expect("write to vec");
        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            format!("{long}  1\n")
        );
    }

    #[test]
    fn unflagged_comparison_is_uncolored() {
        let old: SnapshotMap = [scalar("m", &[("l", "1")], 100.0)].into_iter().collect();
        let new: SnapshotMap = [scalar("m", &[("l", "1")], 150.0)].into_iter().collect();

        let text = render_comparison(&old, &new, &Thresholds::default());
        assert_eq!(
            text,
            "m l=1 (old: 100.00, new 150.00): change: 50.0000%\n\n"
        );
    }

    #[test]
    fn warn_is_yellow_and_error_is_red() {
        let old: SnapshotMap = [scalar("a", &[], 100.0), scalar("b", &[], 100.0)]
            .into_iter()
            .collect();
        let new: SnapshotMap = [scalar("a", &[], 150.0), scalar("b", &[], 300.0)]
            .into_iter()
            .collect();
        let thresholds = Thresholds {
            warn_at: Some(40.0),
            error_at: Some(100.0),
            max_increase: None,
        };

        let text = render_comparison(&old, &new, &thresholds);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines[0],
            "\x1b[33ma  (old: 100.00, new 150.00): change: 50.0000%\x1b[0m"
        );
        assert_eq!(
            lines[1],
            "\x1b[31mb  (old: 100.00, new 300.00): change: 200.0000%\x1b[0m"
        );
    }

    #[test]
    fn zero_old_value_and_membership_changes() {
        let old: SnapshotMap = [scalar("gone", &[("x", "1")], 1.0), scalar("z", &[], 0.0)]
            .into_iter()
            .collect();
        let new: SnapshotMap = [scalar("fresh", &[], 1.0), scalar("z", &[], 5.0)]
            .into_iter()
            .collect();

        let text = render_comparison(&old, &new, &Thresholds::default());
        assert_eq!(
            text,
            "z  (old: 0.00, new 5.00): change: N/A\n\nRemoved gone x=1\nAdded fresh \n"
        );
    }

    #[test]
    fn averaged_values_show_sum_and_count() {
        let old: SnapshotMap = [averaged("lat", &[], 30.0, 10.0)].into_iter().collect();
        let new: SnapshotMap = [averaged("lat", &[], 60.0, 10.0)].into_iter().collect();

        let text = render_comparison(&old, &new, &Thresholds::default());
        assert!(text.starts_with(
            "lat  (old: (30.00/10) 3.00, new (60.00/10) 6.00): change: 100.0000%\n"
        ));
    }
}
