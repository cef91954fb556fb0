//! Ingest Prometheus text dumps
//!
//! This module turns the bytes of a metrics dump into a list of [`Family`]
//! values, in the order their names first appear in the dump.

use std::path::{Path, PathBuf};

use tracing::debug;

pub mod family;
pub mod parser;

pub use family::{Aggregate, Family, Metrics, Scalar};
pub use parser::MetricType;

use self::{family::Collector, parser::PrometheusParser};

/// Errors produced while ingesting a dump
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The dump could not be read
    #[error("Failed to read {path:?}: {source}")]
    Read {
        /// The dump path
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
    /// A line of the dump is malformed
    #[error("Line {line}: {source}")]
    Parse {
        /// 1-based line number
        line: usize,
        /// Underlying parse error
        #[source]
        source: parser::ParseError,
    },
}

/// Parse the text of a dump into families.
///
/// # Errors
///
/// Returns an error naming the first malformed line. A partially readable dump
/// is not trusted.
pub fn parse(text: &str) -> Result<Vec<Family>, Error> {
    let mut parser = PrometheusParser::new();
    let mut collector = Collector::default();

    for (idx, line) in text.lines().enumerate() {
        if let Some(entry) = parser.parse_line(line) {
            let entry = entry.map_err(|source| Error::Parse {
                line: idx + 1,
                source,
            })?;
            collector.push(entry);
        }
    }

    let families = collector.finish();
    debug!("parsed {} families", families.len());
    Ok(families)
}

/// Read the dump at `path` and parse it into families.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is malformed.
pub fn read_file(path: &Path) -> Result<Vec<Family>, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}
