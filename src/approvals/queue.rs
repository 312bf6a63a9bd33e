//! Ordered set of pending approvals with one-shot reply continuations.

use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::{oneshot, watch};

use super::{ApprovalId, ApprovalKind, ApprovalOutcome, PendingApproval};
use crate::observability::BrokerMetrics;
use crate::permissions::{Permission, wrap_permission};
use crate::ports::PortId;
use crate::rpc::RpcError;

struct Entry {
    approval: PendingApproval,
    reply: oneshot::Sender<ApprovalOutcome>,
}

struct QueueInner {
    entries: Mutex<Vec<Entry>>,
    snapshot: watch::Sender<Vec<PendingApproval>>,
    metrics: Arc<BrokerMetrics>,
}

/// Receiving side of an enqueued approval.
#[derive(Debug)]
pub struct Ticket {
    id: ApprovalId,
    rx: oneshot::Receiver<ApprovalOutcome>,
}

impl Ticket {
    pub fn id(&self) -> &ApprovalId {
        &self.id
    }

    /// Waits for the approval to be settled. If the queue itself goes away
    /// first the page gets an internal error.
    pub async fn wait(self) -> ApprovalOutcome {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(approval_id = %self.id, "Approval dropped without a decision");
                ApprovalOutcome::Failed(RpcError::internal())
            }
        }
    }
}

/// The process-wide pending-approval set.
///
/// Entries stay in insertion order. Every entry is removed and its reply
/// continuation fired exactly once, by whichever settle call reaches it
/// first; later calls with the same id are logged no-ops.
#[derive(Clone)]
pub struct ApprovalQueue {
    inner: Arc<QueueInner>,
}

impl ApprovalQueue {
    pub fn new(metrics: Arc<BrokerMetrics>) -> Self {
        let (snapshot, _) = watch::channel(Vec::new());
        Self {
            inner: Arc::new(QueueInner {
                entries: Mutex::new(Vec::new()),
                snapshot,
                metrics,
            }),
        }
    }

    pub fn enqueue(&self, approval: PendingApproval) -> Ticket {
        let (reply, rx) = oneshot::channel();
        let id = approval.id.clone();

        tracing::info!(
            approval_id = %id,
            kind = %approval.kind,
            origin = %approval.origin,
            "Approval enqueued"
        );

        let mut entries = self.lock();
        entries.push(Entry { approval, reply });
        self.publish(&entries);
        drop(entries);

        self.inner.metrics.approvals_enqueued.inc();
        self.inner.metrics.pending_approvals.inc();
        Ticket { id, rx }
    }

    /// Settles one approval. Returns `false` if `id` is not pending.
    pub fn resolve(&self, id: &ApprovalId, outcome: ApprovalOutcome) -> bool {
        let entry = {
            let mut entries = self.lock();
            let Some(pos) = entries.iter().position(|e| &e.approval.id == id) else {
                drop(entries);
                tracing::warn!(approval_id = %id, "Resolve for approval that is not pending");
                self.inner.metrics.approvals_stale.inc();
                return false;
            };
            let entry = entries.remove(pos);
            self.publish(&entries);
            entry
        };

        self.inner.metrics.approvals_resolved.inc();
        self.inner.metrics.pending_approvals.dec();
        deliver(entry, outcome);
        true
    }

    pub fn approve(&self, id: &ApprovalId, result: Value) -> bool {
        self.resolve(id, ApprovalOutcome::Approved(result))
    }

    pub fn decline(&self, id: &ApprovalId) -> bool {
        self.resolve(id, ApprovalOutcome::Declined)
    }

    pub fn reject(&self, id: &ApprovalId, error: RpcError) -> bool {
        self.resolve(id, ApprovalOutcome::Failed(error))
    }

    /// Rejects every approval from `origin`. Returns how many were rejected.
    pub fn cancel_all_for_origin(&self, origin: &str, error: RpcError) -> usize {
        self.cancel_where(|a| a.origin == origin, error)
    }

    /// Rejects the approvals from `origin` that relied on an existing
    /// permission, leaving connection requests pending.
    pub fn cancel_authorized_for_origin(&self, origin: &str, error: RpcError) -> usize {
        self.cancel_where(
            |a| a.origin == origin && a.kind != ApprovalKind::Connection,
            error,
        )
    }

    pub fn cancel_for_port(&self, port_id: PortId, error: RpcError) -> usize {
        self.cancel_where(|a| a.source.port_id == Some(port_id), error)
    }

    /// Resolves pending connection approvals for the permission's origin
    /// using that permission. Safe to call repeatedly: once resolved,
    /// entries are gone and later calls find nothing.
    ///
    /// `exposed` is the account list the origin may see, effective account
    /// first. Approvals that want an account list stay pending while it is
    /// empty.
    pub fn resolve_connections(&self, permission: &Permission, exposed: &[String]) -> usize {
        let settled = self.drain_where(|a| {
            a.kind == ApprovalKind::Connection
                && a.origin == permission.origin
                && (!a.return_selected_account || !exposed.is_empty())
        });
        if settled.is_empty() {
            return 0;
        }

        let count = settled.len();
        tracing::info!(
            origin = %permission.origin,
            count,
            "Pending connections resolved from permission"
        );
        self.inner.metrics.approvals_auto_resolved.add(count as u64);

        for entry in settled {
            let result = if entry.approval.return_selected_account {
                Value::from(exposed.to_vec())
            } else {
                Value::Array(vec![wrap_permission(permission)])
            };
            deliver(entry, ApprovalOutcome::Approved(result));
        }
        count
    }

    /// Current pending set in insertion order.
    pub fn pending(&self) -> Vec<PendingApproval> {
        self.lock().iter().map(|e| e.approval.clone()).collect()
    }

    pub fn pending_for_origin(&self, origin: &str) -> Vec<PendingApproval> {
        self.lock()
            .iter()
            .filter(|e| e.approval.origin == origin)
            .map(|e| e.approval.clone())
            .collect()
    }

    /// Distinct origins with a pending connection approval.
    pub fn connection_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = Vec::new();
        for entry in self.lock().iter() {
            if entry.approval.kind == ApprovalKind::Connection
                && !origins.contains(&entry.approval.origin)
            {
                origins.push(entry.approval.origin.clone());
            }
        }
        origins
    }

    pub fn get(&self, id: &ApprovalId) -> Option<PendingApproval> {
        self.lock()
            .iter()
            .find(|e| &e.approval.id == id)
            .map(|e| e.approval.clone())
    }

    pub fn contains(&self, id: &ApprovalId) -> bool {
        self.lock().iter().any(|e| &e.approval.id == id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Full pending set, re-published on every change.
    pub fn subscribe(&self) -> watch::Receiver<Vec<PendingApproval>> {
        self.inner.snapshot.subscribe()
    }

    fn cancel_where(&self, pred: impl Fn(&PendingApproval) -> bool, error: RpcError) -> usize {
        let cancelled = self.drain_where(pred);
        let count = cancelled.len();
        if count > 0 {
            tracing::info!(count, code = error.code, "Pending approvals cancelled");
            self.inner.metrics.approvals_cancelled.add(count as u64);
        }
        for entry in cancelled {
            deliver(entry, ApprovalOutcome::Failed(error.clone()));
        }
        count
    }

    fn drain_where(&self, pred: impl Fn(&PendingApproval) -> bool) -> Vec<Entry> {
        let mut entries = self.lock();
        let mut drained = Vec::new();
        let mut kept = Vec::with_capacity(entries.len());
        for entry in entries.drain(..) {
            if pred(&entry.approval) {
                drained.push(entry);
            } else {
                kept.push(entry);
            }
        }
        *entries = kept;
        if !drained.is_empty() {
            self.publish(&entries);
            self.inner.metrics.pending_approvals.set(entries.len() as i64);
        }
        drained
    }

    fn publish(&self, entries: &[Entry]) {
        let snapshot = entries.iter().map(|e| e.approval.clone()).collect();
        self.inner.snapshot.send_replace(snapshot);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Entry>> {
        self.inner.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ApprovalQueue {
    fn default() -> Self {
        Self::new(Arc::new(BrokerMetrics::new()))
    }
}

impl std::fmt::Debug for ApprovalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalQueue")
            .field("pending", &self.len())
            .finish()
    }
}

// Runs outside the queue lock. A closed receiver means the requesting task is
// gone, which is not the queue's concern.
fn deliver(entry: Entry, outcome: ApprovalOutcome) {
    let id = entry.approval.id;
    if entry.reply.send(outcome).is_err() {
        tracing::debug!(approval_id = %id, "Approval settled after requester went away");
    }
}
