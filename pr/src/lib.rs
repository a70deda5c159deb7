//! PlanRun - plan run orchestrator
//!
//! Queues runs of a plan, executes them step by step in the background and
//! records crash-inspectable state for each run: a durable status record, a
//! JSON manifest and a plain-text execution log.
//!
//! # Modules
//!
//! - [`queue`] - in-memory FIFO of runs awaiting a worker
//! - [`step`] - step execution with timeout, retry and backoff
//! - [`cancel`] - cancellation signal observed by workers and step bodies
//! - [`manifest`] - run manifest and execution log files
//! - [`state`] - actor owning the run store, plus startup recovery
//! - [`worker`] - worker pool draining the queue
//! - [`orchestrator`] - facade used by the API and CLI
//! - [`api`] - HTTP endpoints
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod api;
pub mod cancel;
pub mod cli;
pub mod config;
pub mod error;
pub mod layout;
pub mod manifest;
pub mod orchestrator;
pub mod queue;
pub mod state;
pub mod step;
pub mod worker;

pub use cancel::{CancelProbe, CancelSignal};
pub use config::Config;
pub use error::{OrchestratorError, OrchestratorResult, StepError};
pub use layout::RunLayout;
pub use manifest::{LogSink, Manifest, ManifestWriter, RunLog};
pub use orchestrator::Orchestrator;
pub use queue::{QueuedRun, RunQueue};
pub use runstore::{Plan, Run, RunStatus};
pub use state::{StateError, StateManager};
pub use step::{StepBody, StepPolicy, StepResult, StepStatus, run_step};
pub use worker::{PipelineSource, PlannedStep};
