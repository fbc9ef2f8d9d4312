//! SPAWNWEAVE Core Types
//!
//! This crate contains pure types and logic with no I/O.
//! All types are serializable with stable, cross-platform encoding.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod error;
pub mod id;
pub mod outcome;
pub mod stamp;

// Re-exports
pub use encoding::{decode, encode, encoded_len};
pub use error::{CoreError, CoreResult};
pub use id::{ClusterName, NodeId};
pub use outcome::SearchOutcome;
pub use stamp::{Stamp, StampAllocator};
