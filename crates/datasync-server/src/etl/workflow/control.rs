//! Pause/resume/cancel signalling
//!
//! Signals only set state. The running workflow observes that state at its
//! suspension points (before each table, discovery object or check) through
//! [`WorkflowControl::wait_if_paused`].

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::etl::error::{EtlError, EtlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Signal {
    Pause,
    Resume,
    Cancel,
}

impl Signal {
    pub fn as_str(&self) -> &str {
        match self {
            Signal::Pause => "pause",
            Signal::Resume => "resume",
            Signal::Cancel => "cancel",
        }
    }
}

impl std::str::FromStr for Signal {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pause" => Ok(Signal::Pause),
            "resume" => Ok(Signal::Resume),
            "cancel" => Ok(Signal::Cancel),
            other => Err(EtlError::validation(format!("unknown signal: {}", other))),
        }
    }
}

/// Shared control state of one workflow run
#[derive(Clone)]
pub struct WorkflowControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl Default for WorkflowControl {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkflowControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    pub fn signal(&self, signal: Signal) {
        match signal {
            Signal::Pause => {
                self.paused.send_replace(true);
            }
            Signal::Resume => {
                self.paused.send_replace(false);
            }
            Signal::Cancel => self.cancel.cancel(),
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Block while paused; `Err(Cancelled)` once cancelled
    ///
    /// Cancellation wins over pause, so a paused workflow can be cancelled.
    pub async fn wait_if_paused(&self) -> EtlResult<()> {
        if self.is_cancelled() {
            return Err(EtlError::Cancelled);
        }
        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(EtlError::Cancelled),
            resumed = paused.wait_for(|paused| !*paused) => {
                resumed.map_err(|_| EtlError::Internal("pause channel closed".into()))?;
                if self.is_cancelled() {
                    Err(EtlError::Cancelled)
                } else {
                    Ok(())
                }
            }
        }
    }
}
