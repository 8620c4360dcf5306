//! Signature execution
//!
//! Turns signatures and target URLs into records: requests are built,
//! dispatched, analyzed and their conclusions fed back into the target.
//! Passive rules and checksum filtering hook into analysis.

mod analyzer;
mod detector;
mod dispatcher;
mod engine;
mod filter;
mod middleware;
mod oob;
mod passive;
mod record;
mod runner;

#[cfg(test)]
mod tests;

pub use analyzer::Analyzer;
pub use detector::{Evaluator, Writes};
pub use dispatcher::{Dispatcher, RunContext};
pub use engine::{Job, JobOutcome, ScanEngine, ScanEngineBuilder};
pub use filter::ChecksumFilter;
pub use oob::{Interaction, InteractionStore, InteractionType, NullPoller, OobPoller};
pub use passive::{PassiveHit, PassiveScanner};
pub use record::{Exchange, Origins, Record, RecordLog, RecordState};
pub use runner::{Runner, RunnerOptions};
