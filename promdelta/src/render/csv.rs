//! CSV format
//!
//! One header row, then one row per series. In single mode extra labels
//! become trailing columns, in ascending name order, with the same value on
//! every row. Comparison rows carry no extra columns.

use std::{fmt, io::Write};

use crate::{compare::Comparison, labels::LabelSet, snapshot::SnapshotMap};

/// CSV format errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors during write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV serialization errors
    #[error("CSV serialization error: {0}")]
    Csv(#[from] csv::Error),
}

/// CSV format writer
pub struct Format<'a, W: Write> {
    writer: csv::Writer<W>,
    extra: &'a LabelSet,
}

impl<W: Write> fmt::Debug for Format<'_, W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Format")
            .field("extra", &self.extra)
            .finish_non_exhaustive()
    }
}

impl<'a, W: Write> Format<'a, W> {
    /// Create a new instance of `Format`
    #[must_use]
    pub fn new(writer: W, extra: &'a LabelSet) -> Self {
        Self {
            writer: csv::Writer::from_writer(writer),
            extra,
        }
    }

    fn write_header(&mut self, columns: &[&str]) -> Result<(), Error> {
        let header = columns
            .iter()
            .copied()
            .chain(self.extra.keys().map(String::as_str));
        self.writer.write_record(header)?;
        Ok(())
    }

    fn write_row(&mut self, fields: &[&str]) -> Result<(), Error> {
        let row = fields
            .iter()
            .copied()
            .chain(self.extra.values().map(String::as_str));
        self.writer.write_record(row)?;
        Ok(())
    }

    /// Write `metric,labels,value` rows for every series of `snapshot`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn write_snapshot(&mut self, snapshot: &SnapshotMap) -> Result<(), Error> {
        self.write_header(&["metric", "labels", "value"])?;
        for (key, metric) in snapshot.iter() {
            let value = format!("{:.8}", metric.value());
            self.write_row(&[key.metric(), key.labels(), value.as_str()])?;
        }
        self.writer.flush()?;
        Ok(())
    }

    /// Write `metric,labels,old,new,percentChange` rows for every series
    /// present in both snapshots. Removed and added series are not written,
    /// nor are extra labels.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or writing fails
    pub fn write_comparison(&mut self, comparison: &Comparison<'_>) -> Result<(), Error> {
        self.writer.write_record(["metric", "labels", "old", "new", "percentChange"])?;
        for delta in &comparison.deltas {
            let old = format!("{:.8}", delta.old.value());
            let new = format!("{:.8}", delta.new.value());
            let change = delta
                .percent_change
                .map_or_else(|| "N/A".to_string(), |change| format!("{change:.4}"));
            self.writer.write_record([
                delta.key.metric(),
                delta.key.labels(),
                old.as_str(),
                new.as_str(),
                change.as_str(),
            ])?;
        }
        self.writer.flush()?;
        Ok(())
    }
}
