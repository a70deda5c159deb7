//! Cancellation signal shared by the worker and step bodies
//!
//! A run is cancelled through two channels: the durable run status, and a
//! `cancel.flag` marker file next to the run's manifest. Step bodies cannot
//! see the store, so they observe the marker (and the per-attempt token)
//! through a [`CancelProbe`].

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Cancellation state of one run
#[derive(Debug, Clone)]
pub struct CancelSignal {
    marker: Option<PathBuf>,
    raised: Arc<AtomicBool>,
}

impl CancelSignal {
    /// Signal backed by a marker file
    pub fn with_marker(marker: impl Into<PathBuf>) -> Self {
        Self {
            marker: Some(marker.into()),
            raised: Arc::new(AtomicBool::new(false)),
        }
    }

    /// In-process signal with no marker file
    pub fn detached() -> Self {
        Self {
            marker: None,
            raised: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write a marker file, creating parent directories
    pub fn write_marker(path: &Path) -> io::Result<()> {
        debug!(path = %path.display(), "CancelSignal::write_marker: called");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, b"cancel\n")
    }

    /// Raise the signal in-process and on disk
    pub fn raise(&self) -> io::Result<()> {
        self.raised.store(true, Ordering::SeqCst);
        match &self.marker {
            Some(path) => Self::write_marker(path),
            None => Ok(()),
        }
    }

    /// Raise the signal in-process only
    pub fn raise_local(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested through either channel
    pub fn is_raised(&self) -> bool {
        if self.raised.load(Ordering::SeqCst) {
            return true;
        }
        match &self.marker {
            Some(path) if path.exists() => {
                self.raised.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Probe handed to one step attempt
    pub fn probe(&self, token: CancellationToken) -> CancelProbe {
        CancelProbe {
            signal: self.clone(),
            token,
        }
    }
}

/// What a step body polls to learn it should stop
#[derive(Debug, Clone)]
pub struct CancelProbe {
    signal: CancelSignal,
    token: CancellationToken,
}

impl CancelProbe {
    /// Probe that never fires unless its token is cancelled
    pub fn detached() -> Self {
        Self {
            signal: CancelSignal::detached(),
            token: CancellationToken::new(),
        }
    }

    /// True once the run is cancelled or this attempt was abandoned on timeout
    pub fn should_cancel(&self) -> bool {
        self.token.is_cancelled() || self.signal.is_raised()
    }

    /// True once this attempt was abandoned on timeout
    pub fn attempt_abandoned(&self) -> bool {
        self.token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_detached_signal_raises_in_process() {
        let signal = CancelSignal::detached();
        assert!(!signal.is_raised());
        signal.raise().unwrap();
        assert!(signal.is_raised());
    }

    #[test]
    fn test_marker_written_elsewhere_is_observed() {
        let temp = tempdir().unwrap();
        let marker = temp.path().join("plans/p1/runs/r1/cancel.flag");
        let signal = CancelSignal::with_marker(&marker);
        assert!(!signal.is_raised());

        CancelSignal::write_marker(&marker).unwrap();
        assert!(marker.exists());
        assert!(signal.is_raised());
    }

    #[test]
    fn test_probe_sees_signal_and_token() {
        let signal = CancelSignal::detached();
        let token = CancellationToken::new();
        let probe = signal.probe(token.clone());
        assert!(!probe.should_cancel());

        token.cancel();
        assert!(probe.should_cancel());
        assert!(probe.attempt_abandoned());

        let other = signal.probe(CancellationToken::new());
        assert!(!other.should_cancel());
        signal.raise_local();
        assert!(other.should_cancel());
        assert!(!other.attempt_abandoned());
    }
}
