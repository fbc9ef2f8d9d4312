//! SPAWNWEAVE CLI support
//!
//! Demo applications and run reports for the `spawnweave` binary.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod apps;
pub mod report;

pub use report::{NodeReport, Report};
