// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The kernel queue: an append-only run queue with promise
//! redirection — a `send` whose target is an unresolved promise is queued
//! on the promise itself, not on the run queue.

use ocap_kernel_core::{PendingSend, RunQueueItem};
use ocap_kernel_store::CrankTxn;
use ocap_kernel_type::{CapData, Error, KernelPromiseId, Kref, Result};

pub struct KernelQueue;

impl KernelQueue {
    /// Enqueue a `send`. If `target` names an unresolved promise, the
    /// message is appended to that promise's pending queue instead of the
    /// run queue — this is the property the
    /// translator/queue boundary must uphold.
    #[tracing::instrument(name = "kernel_queue::send", level = "trace", skip(txn, args))]
    pub fn send(
        txn: &mut CrankTxn<'_>,
        target: Kref,
        method: String,
        args: CapData<Kref>,
        result: Option<KernelPromiseId>,
    ) -> Result<()> {
        if let Kref::Promise(kp) = target {
            if let Some(promise) = txn.get_promise(kp) {
                if promise.is_unresolved() {
                    txn.promise_mut(kp)
                        .expect("just observed present")
                        .pending
                        .push(PendingSend { method, args, result });
                    return Ok(());
                }
            } else {
                return Err(Error::bad_ref(format!("{kp} does not exist")));
            }
        }
        txn.enqueue(RunQueueItem::Send { target, method, args, result });
        Ok(())
    }

    pub fn pop(txn: &mut CrankTxn<'_>) -> Option<RunQueueItem> {
        txn.pop()
    }

    /// Splice a promise's drained pending sends onto the run queue at the
    /// current head, now addressed at the promise's resolution (an object):
    /// pending messages run before already-queued later work. Callers must
    /// have already handled the case where the resolution names another
    /// promise instead of an object; a `Send` item can never carry a
    /// promise target.
    pub fn splice_resolved_sends(txn: &mut CrankTxn<'_>, new_target: Kref, pending: Vec<PendingSend>) {
        debug_assert!(matches!(new_target, Kref::Object(_)), "splice_resolved_sends must not be called with a promise target");
        let items = pending
            .into_iter()
            .map(|p| RunQueueItem::Send { target: new_target, method: p.method, args: p.args, result: p.result })
            .collect();
        txn.splice_at_head(items);
    }
}
