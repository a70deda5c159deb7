//! Step execution with timeout, retry and cooperative cancellation
//!
//! A step is one named unit of work inside a run. [`run_step`] drives a
//! [`StepBody`] through its [`StepPolicy`] and records a [`StepResult`].

mod body;
mod policy;
mod result;
mod runner;

pub use body::{BlockingStep, BusyStep, FnStep, StepBody};
pub use policy::StepPolicy;
pub use result::{StepResult, StepStatus};
pub use runner::run_step;
