//! InfluxDB line protocol
//!
//! `<metric>,<k>=<v>,... value=<value> <timestamp>`, one line per series. The
//! series labels come first and the extra labels after, each in name order.

use std::io::Write;

use crate::{labels::LabelSet, snapshot::SnapshotMap};

/// Line protocol writer
#[derive(Debug)]
pub struct Format<'a, W: Write> {
    writer: W,
    extra: &'a LabelSet,
    timestamp: i64,
}

impl<'a, W: Write> Format<'a, W> {
    /// Create a new instance of `Format`. `timestamp` is in seconds.
    #[must_use]
    pub fn new(writer: W, extra: &'a LabelSet, timestamp: i64) -> Self {
        Self {
            writer,
            extra,
            timestamp,
        }
    }

    /// Write one line per series of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing fails
    pub fn write_snapshot(&mut self, snapshot: &SnapshotMap) -> Result<(), std::io::Error> {
        for (key, metric) in snapshot.iter() {
            let mut line = key.metric().to_string();
            push_tags(&mut line, &metric.labels);
            push_tags(&mut line, self.extra);
            writeln!(
                self.writer,
                "{line} value={} {}",
                metric.value(),
                self.timestamp
            )?;
        }
        self.writer.flush()
    }
}

fn push_tags(line: &mut String, tags: &LabelSet) {
    for (name, value) in tags {
        line.push(',');
        line.push_str(name);
        line.push('=');
        line.push_str(&value.replace(' ', "\\ "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::test_support::{averaged, labels, scalar};

    #[test]
    fn series_labels_then_extra_labels() {
        let snap: SnapshotMap = [
            scalar("foo", &[("b", "2"), ("a", "1")], 10.0),
            averaged("lat", &[], 3.0, 6.0),
        ]
        .into_iter()
        .collect();
        let extra = labels(&[("Test", "nightly"), ("ClusterFlavor", "gke")]);

        let mut out = Vec::new();
        Format::new(&mut out, &extra, 1_600_000_000)
            .write_snapshot(&snap)
            .expect("write to vec");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "foo,a=1,b=2,ClusterFlavor=gke,Test=nightly value=10 1600000000\n\
             lat,ClusterFlavor=gke,Test=nightly value=0.5 1600000000\n"
        );
    }

    #[test]
    fn spaces_in_values_escaped() {
        let snap: SnapshotMap = [scalar("foo", &[("path", "/a b/c d")], 1.5)]
            .into_iter()
            .collect();

        let mut out = Vec::new();
        Format::new(&mut out, &LabelSet::new(), 7)
            .write_snapshot(&snap)
            .expect("write to vec");

        assert_eq!(
            String::from_utf8(out).expect("utf8"),
            "foo,path=/a\\ b/c\\ d value=1.5 7\n"
        );
    }
}
