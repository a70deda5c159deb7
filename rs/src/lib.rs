//! RunStore - durable records for plans and plan runs
//!
//! A small SQLite-backed store holding two tables:
//!
//! - `plans`: the plans runs are executed for (looked up, rarely written)
//! - `runs`: one row per run with its status and artifact paths
//!
//! All run status writes go through [`Store::transition`], a single guarded
//! compare-and-swap that only applies a move the [`RunStatus`] table allows.
//! Writers racing on the same run (the worker finishing it, a cancel request)
//! therefore never downgrade a terminal state.

mod error;
mod plan;
mod run;
mod store;

pub use error::{StoreError, StoreResult};
pub use plan::Plan;
pub use run::{Run, RunStatus, Transition};
pub use store::Store;

/// Maximum length of a plan or run identifier
pub const MAX_ID_LEN: usize = 64;

/// Check that an identifier is safe to use as a record key and a path component
///
/// Accepts 1..=64 characters from `[A-Za-z0-9_-]`.
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Current time formatted the way the store persists timestamps
pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ids() {
        assert!(is_valid_id("p123"));
        assert!(is_valid_id("0192f3a1-run_x"));
        assert!(is_valid_id(&"a".repeat(MAX_ID_LEN)));
    }

    #[test]
    fn test_invalid_ids() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("../etc"));
        assert!(!is_valid_id("a/b"));
        assert!(!is_valid_id("with space"));
        assert!(!is_valid_id(&"a".repeat(MAX_ID_LEN + 1)));
    }
}
