//! Output formats
//!
//! Every renderer writes to an explicit sink, in [`SnapshotMap`] key order.
//! Not every format can render every mode: a comparison has no line protocol
//! form, and Cloud Monitoring is a push target rather than a writer. Asking
//! for such a pairing is an [`Error::UnsupportedFormat`].

use std::{fmt, io::Write};

use crate::{compare::Comparison, labels::LabelSet, snapshot::SnapshotMap};

pub mod csv;
pub mod influxdb;
pub mod plain;

/// Render errors
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// IO errors during write operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// CSV format errors
    #[error("CSV format error: {0}")]
    Csv(#[from] self::csv::Error),
    /// The format cannot render this mode
    #[error("Format {format} is not supported in {mode} mode")]
    UnsupportedFormat {
        /// The requested format
        format: Format,
        /// The mode it was requested for
        mode: Mode,
    },
    /// Line protocol requires a timestamp and none was given
    #[error("Format {0} requires a non-zero timestamp")]
    MissingTimestamp(Format),
}

/// The output formats selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Format {
    /// Human readable table
    Plain,
    /// Comma separated values with a header row
    Csv,
    /// InfluxDB line protocol
    Influxdb,
    /// Push to Google Cloud Monitoring
    GcpMonitoring,
}

impl Format {
    /// The name of this format as given on the command line
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Format::Plain => "plain",
            Format::Csv => "csv",
            Format::Influxdb => "influxdb",
            Format::GcpMonitoring => "gcp-monitoring",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What is being rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One snapshot
    Single,
    /// A comparison of two snapshots
    Compare,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mode::Single => f.write_str("single"),
            Mode::Compare => f.write_str("compare"),
        }
    }
}

/// Render one snapshot in `format`.
///
/// `extra` labels are attached to every row by the formats that carry
/// labels. `timestamp` is in seconds since the epoch and only used by the
/// line protocol.
///
/// # Errors
///
/// Returns an error if writing fails, if `format` is a push target, or if the
/// line protocol is requested with a zero timestamp.
pub fn snapshot<W: Write>(
    format: Format,
    snapshot: &SnapshotMap,
    extra: &LabelSet,
    timestamp: i64,
    writer: W,
) -> Result<(), Error> {
    match format {
        Format::Plain => plain::Format::new(writer).write_snapshot(snapshot)?,
        Format::Csv => self::csv::Format::new(writer, extra).write_snapshot(snapshot)?,
        Format::Influxdb => {
            if timestamp == 0 {
                return Err(Error::MissingTimestamp(format));
            }
            influxdb::Format::new(writer, extra, timestamp).write_snapshot(snapshot)?;
        }
        Format::GcpMonitoring => {
            return Err(Error::UnsupportedFormat {
                format,
                mode: Mode::Single,
            });
        }
    }
    Ok(())
}

/// Render a comparison in `format`. Only the plain and CSV formats apply.
///
/// # Errors
///
/// Returns an error if writing fails or `format` cannot render a comparison.
pub fn comparison<W: Write>(
    format: Format,
    comparison: &Comparison<'_>,
    extra: &LabelSet,
    writer: W,
) -> Result<(), Error> {
    match format {
        Format::Plain => plain::Format::new(writer).write_comparison(comparison)?,
        Format::Csv => self::csv::Format::new(writer, extra).write_comparison(comparison)?,
        Format::Influxdb | Format::GcpMonitoring => {
            return Err(Error::UnsupportedFormat {
                format,
                mode: Mode::Compare,
            });
        }
    }
    Ok(())
}
