//! Demo divide-and-conquer applications.
//!
//! Every app is a `JobHandler`. Arguments and results are postcard-encoded
//! application values inside the opaque job bytes.

pub mod fib;
pub mod knapsack;
pub mod queens;

pub use fib::Fib;
pub use knapsack::{Branch, Item, Knapsack};
pub use queens::{Board, Queens};

use serde::Serialize;
use serde::de::DeserializeOwned;
use spawnweave_cluster::JobOutcome;
use spawnweave_core::{CoreError, decode, encode};

/// Errors surfaced by demo apps as failed job outcomes
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AppError {
    /// Job arguments did not decode
    #[error("Bad job arguments: {0}")]
    BadArgs(CoreError),

    /// A child job failed
    #[error("Child job failed: {0}")]
    Child(String),

    /// The job result did not encode
    #[error("Result encoding failed: {0}")]
    Encoding(CoreError),
}

impl From<AppError> for JobOutcome {
    fn from(err: AppError) -> Self {
        JobOutcome::Failed(err.to_string())
    }
}

/// Decode job arguments
pub(crate) fn args<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, AppError> {
    decode(bytes).map_err(AppError::BadArgs)
}

/// Encode a job argument or result
pub(crate) fn bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, AppError> {
    encode(value).map_err(AppError::Encoding)
}

/// Wrap a typed result as a job outcome
pub(crate) fn finish<T: Serialize>(result: Result<T, AppError>) -> JobOutcome {
    match result.and_then(|value| bytes(&value)) {
        Ok(bytes) => JobOutcome::Value(bytes),
        Err(err) => err.into(),
    }
}

/// Read a child outcome as a typed value. Aborted children yield `None`.
pub(crate) fn child<T: DeserializeOwned>(outcome: &JobOutcome) -> Result<Option<T>, AppError> {
    match outcome {
        JobOutcome::Value(bytes) => decode(bytes).map(Some).map_err(AppError::BadArgs),
        JobOutcome::Failed(message) => Err(AppError::Child(message.clone())),
        JobOutcome::Aborted => Ok(None),
    }
}
