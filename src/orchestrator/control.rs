//! Run control: cancellation and approval decisions.

use std::sync::PoisonError;
use tokio_util::sync::CancellationToken;

use crate::approval::PendingApproval;
use crate::error::{Error, Result};

use super::Orchestrator;

impl Orchestrator {
    /// Cancel the active extraction run
    ///
    /// The current item is stopped (its engine call receives the cancellation)
    /// and reported as `Cancelled`; later items are never started. Background
    /// scans are not affected. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        let active = self
            .active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        match active.as_ref() {
            Some(token) => {
                token.cancel();
                tracing::info!("extraction run cancellation requested");
                true
            }
            None => false,
        }
    }

    /// Answer the pending approval request
    ///
    /// `true` extracts the package despite the warning, `false` skips it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPendingApproval`] if the sequencer is not waiting.
    pub fn run_approval_decision(&self, force_extract: bool) -> Result<()> {
        self.approvals.resolve(force_extract)
    }

    /// The request the sequencer is currently waiting on, if any
    pub fn pending_approval(&self) -> Option<PendingApproval> {
        self.approvals.pending()
    }

    /// Claim the single run slot, returning the run's cancellation token
    pub(crate) fn begin_run(&self) -> Result<RunSlot> {
        let mut active = self
            .active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if active.is_some() {
            return Err(Error::RunInProgress);
        }
        let token = CancellationToken::new();
        *active = Some(token.clone());
        Ok(RunSlot {
            orchestrator: self.clone(),
            token,
        })
    }
}

/// Held for the duration of a run; releases the run slot on drop
pub(crate) struct RunSlot {
    orchestrator: Orchestrator,
    pub(crate) token: CancellationToken,
}

impl Drop for RunSlot {
    fn drop(&mut self) {
        self.orchestrator
            .active_run
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}
