//! SPAWNWEAVE Simulation
//!
//! In-process clusters for tests and demos. Nodes talk over seeded,
//! per-link ordered channels; crashes are injected on a schedule and
//! reported to the survivors through membership events.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod failure;
pub mod harness;
pub mod network;
pub mod seed;

pub use failure::{CrashInjector, FailureSchedule, ScheduledCrash};
pub use harness::{SimCluster, SimConfig, SimError, SimNodeSpec, SimRun};
pub use network::{NetworkCondition, SimChannel, SimNetwork};
pub use seed::SimSeed;
