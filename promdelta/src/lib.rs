//! The promdelta metric dump summarizing and comparison tool.
//!
//! This library supports the promdelta binary found elsewhere in this project.
//! A Prometheus text dump is ingested into typed families, each family is
//! reduced to one value per series and the resulting snapshot is either
//! rendered or compared against a second snapshot.

#![deny(clippy::all)]
#![deny(clippy::cargo)]
#![deny(clippy::pedantic)]
#![deny(clippy::print_stdout)]
#![deny(clippy::print_stderr)]
#![deny(clippy::dbg_macro)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]
#![deny(unused_assignments)]
#![deny(unused_comparisons)]
#![deny(unreachable_pub)]
#![deny(missing_docs)]
#![deny(missing_copy_implementations)]
#![deny(missing_debug_implementations)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::multiple_crate_versions)]

pub mod compare;
pub mod gcp_monitoring;
pub mod ingest;
pub mod labels;
pub mod reduce;
pub mod render;
pub mod snapshot;
