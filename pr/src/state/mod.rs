//! State management with actor pattern
//!
//! StateManager owns the run store and processes messages via channels,
//! serializing every read and guarded write in-process.

mod manager;
mod messages;
mod recovery;

pub use manager::StateManager;
pub use messages::{StateCommand, StateError, StateResponse};
pub use recovery::{RecoveryStats, recover};
