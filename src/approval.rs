//! Approval gate: single-slot human decision point for risky packages.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::path::NormalizedPath;
use crate::types::ScanResult;

/// Why the sequencer is asking for approval
#[derive(Clone, Debug)]
pub enum ApprovalRequest {
    /// The scan reported malicious content
    Malicious(Arc<ScanResult>),
    /// The scan failed and policy requires a decision
    ScanUnavailable(String),
}

impl ApprovalRequest {
    /// Text shown to the user
    pub fn summary(&self) -> String {
        match self {
            ApprovalRequest::Malicious(result) => result.summary(),
            ApprovalRequest::ScanUnavailable(reason) => {
                format!("Security scan unavailable: {reason}")
            }
        }
    }

    /// Whether this is a malicious-content request
    pub fn is_malicious(&self) -> bool {
        matches!(self, ApprovalRequest::Malicious(_))
    }
}

/// The request currently waiting on a decision
#[derive(Clone, Debug)]
pub struct PendingApproval {
    /// Package under review
    pub path: NormalizedPath,
    /// Why it is under review
    pub request: ApprovalRequest,
}

struct Slot {
    /// Identifies the `wait` call that owns this slot
    ticket: u64,
    pending: PendingApproval,
    responder: oneshot::Sender<bool>,
}

#[derive(Default)]
struct GateState {
    current: Option<Slot>,
    next_ticket: u64,
}

/// Single-slot request/response channel between the sequencer and the user
///
/// The sequencer posts a request with [`wait`](Self::wait) and suspends; the
/// UI resolves it exactly once with [`resolve`](Self::resolve). Only one
/// request may be outstanding: a second concurrent `wait` is a programming
/// error and fails with [`Error::ApprovalGateMisuse`].
#[derive(Clone, Default)]
pub struct ApprovalGate {
    state: Arc<Mutex<GateState>>,
}

/// Clears the slot when its `wait` future goes away unresolved
struct SlotGuard<'a> {
    gate: &'a ApprovalGate,
    ticket: u64,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        if state
            .current
            .as_ref()
            .is_some_and(|slot| slot.ticket == self.ticket)
        {
            state.current = None;
            tracing::debug!("abandoned approval request cleared");
        }
    }
}

impl ApprovalGate {
    /// Create an idle gate
    pub fn new() -> Self {
        Self::default()
    }

    /// Post a request and suspend until it is resolved
    ///
    /// Resolves to `true` to force extraction, `false` to skip. Returns
    /// `Error::Cancelled` if `cancel` fires first. The slot is cleared
    /// whenever the wait ends without a decision, including when the future
    /// is dropped. A resolver that goes away without answering counts as
    /// `false`.
    pub async fn wait(
        &self,
        path: NormalizedPath,
        request: ApprovalRequest,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let (tx, rx) = oneshot::channel();
        let ticket = {
            let mut state = self.lock();
            if let Some(existing) = state.current.as_ref() {
                return Err(Error::ApprovalGateMisuse(format!(
                    "approval for {} requested while {} is still pending",
                    path, existing.pending.path
                )));
            }
            let ticket = state.next_ticket;
            state.next_ticket += 1;
            state.current = Some(Slot {
                ticket,
                pending: PendingApproval { path, request },
                responder: tx,
            });
            ticket
        };
        let _guard = SlotGuard { gate: self, ticket };

        tokio::select! {
            decision = rx => Ok(decision.unwrap_or(false)),
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Resolve the outstanding request
    pub fn resolve(&self, force_extract: bool) -> Result<()> {
        let slot = self
            .lock()
            .current
            .take()
            .ok_or(Error::NoPendingApproval)?;
        tracing::info!(
            path = %slot.pending.path,
            force_extract,
            "approval decision received"
        );
        // The waiter may have been cancelled between take() and send; nothing to do then
        let _ = slot.responder.send(force_extract);
        Ok(())
    }

    /// The request currently waiting, if any
    pub fn pending(&self) -> Option<PendingApproval> {
        self.lock().current.as_ref().map(|s| s.pending.clone())
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pkg(name: &str) -> NormalizedPath {
        NormalizedPath::from_canonical(format!("/packages/{name}"))
    }

    fn malicious() -> ApprovalRequest {
        ApprovalRequest::Malicious(Arc::new(ScanResult {
            is_malicious: true,
            threats: vec![],
        }))
    }

    async fn wait_until_pending(gate: &ApprovalGate) {
        while gate.pending().is_none() {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn resolve_true_forces_extraction() {
        let gate = ApprovalGate::new();
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("a.unitypackage"), malicious(), &cancel).await }
        });

        wait_until_pending(&gate).await;
        assert_eq!(gate.pending().unwrap().path, pkg("a.unitypackage"));
        gate.resolve(true).unwrap();

        assert!(waiter.await.unwrap().unwrap());
        assert!(gate.pending().is_none());
    }

    #[tokio::test]
    async fn resolve_false_skips() {
        let gate = ApprovalGate::new();
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("a.unitypackage"), malicious(), &cancel).await }
        });

        wait_until_pending(&gate).await;
        gate.resolve(false).unwrap();
        assert!(!waiter.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn second_concurrent_wait_fails_fast() {
        let gate = ApprovalGate::new();
        let cancel = CancellationToken::new();

        let first = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("a.unitypackage"), malicious(), &cancel).await }
        });
        wait_until_pending(&gate).await;

        let second = tokio::time::timeout(
            Duration::from_secs(1),
            gate.wait(pkg("b.unitypackage"), malicious(), &cancel),
        )
        .await
        .expect("misuse must fail immediately, not queue");
        assert!(matches!(second, Err(Error::ApprovalGateMisuse(_))));

        // The pending request is untouched
        assert_eq!(gate.pending().unwrap().path, pkg("a.unitypackage"));
        gate.resolve(true).unwrap();
        assert!(first.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn resolve_without_pending_request_errors() {
        let gate = ApprovalGate::new();
        assert!(matches!(gate.resolve(true), Err(Error::NoPendingApproval)));
    }

    #[tokio::test]
    async fn cancellation_clears_the_slot() {
        let gate = ApprovalGate::new();
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("a.unitypackage"), malicious(), &cancel).await }
        });
        wait_until_pending(&gate).await;

        cancel.cancel();
        assert!(matches!(waiter.await.unwrap(), Err(Error::Cancelled)));
        assert!(gate.pending().is_none());
        assert!(matches!(gate.resolve(true), Err(Error::NoPendingApproval)));
    }

    #[tokio::test]
    async fn dropped_waiter_frees_the_slot() {
        let gate = ApprovalGate::new();
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("a.unitypackage"), malicious(), &cancel).await }
        });
        wait_until_pending(&gate).await;

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());
        assert!(gate.pending().is_none());

        // A fresh request is accepted and is not cleared by the old waiter
        let next = tokio::spawn({
            let gate = gate.clone();
            let cancel = cancel.clone();
            async move { gate.wait(pkg("b.unitypackage"), malicious(), &cancel).await }
        });
        wait_until_pending(&gate).await;
        assert_eq!(gate.pending().unwrap().path, pkg("b.unitypackage"));
        gate.resolve(true).unwrap();
        assert!(next.await.unwrap().unwrap());
    }

    #[test]
    fn unavailable_summary_mentions_reason() {
        let req = ApprovalRequest::ScanUnavailable("scanner offline".into());
        assert!(!req.is_malicious());
        assert_eq!(req.summary(), "Security scan unavailable: scanner offline");
    }
}
