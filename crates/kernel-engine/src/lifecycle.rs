// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Promise resolution propagation and vat termination:
//! logic shared between `Crank`'s `resolve` syscall handling and the
//! vat-failure/termination path, since both ultimately drain a promise's
//! pending sends and subscriber set the same way.

use ocap_kernel_core::{PendingSend, Resolution, RunQueueItem};
use ocap_kernel_store::CrankTxn;
use ocap_kernel_type::{Error, Kref, KernelPromiseId, Result, VatId};

use crate::queue::KernelQueue;
use crate::vat_manager::VatManager;

/// Resolve a promise and propagate the consequences: subscribers are
/// notified, pending sends are re-targeted at the resolution (if it names a
/// live object), forwarded onto another promise (if it names one), or
/// otherwise funneled to the rejected-handler pipeline by rejecting their
/// own result promise in turn.
pub fn resolve_promise(txn: &mut CrankTxn<'_>, kp: KernelPromiseId, resolution: Resolution) -> Result<()> {
    let Some(promise) = txn.promise_mut(kp) else {
        return Err(Error::bad_ref(format!("{kp} does not exist")));
    };
    let drained = promise.resolve(resolution.clone())?;
    let Some((pending, subscribers)) = drained else {
        return Ok(());
    };

    for vat in subscribers {
        txn.enqueue(RunQueueItem::Notify { vat, promise: kp });
    }

    redirect_pending(txn, &resolution, pending)
}

/// Route a drained promise's pending sends according to its resolution.
/// A fulfillment naming an object splices them onto the run queue; a
/// fulfillment naming another promise forwards them onto that promise
/// instead of emitting a run-queue item with a promise target, which
/// `Crank::deliver_send` rejects as malformed; anything else (a rejection,
/// or a fulfillment with no slot) rejects each pending send's own result
/// promise with the same resolution.
fn redirect_pending(txn: &mut CrankTxn<'_>, resolution: &Resolution, pending: Vec<PendingSend>) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }
    let target = match resolution {
        Resolution::Fulfilled(value) => value.slots.first().copied(),
        Resolution::Rejected(_) => None,
    };
    match target {
        Some(Kref::Promise(kp)) => forward_to_promise(txn, kp, pending),
        Some(object @ Kref::Object(_)) => {
            KernelQueue::splice_resolved_sends(txn, object, pending);
            Ok(())
        }
        None => reject_pending(txn, pending, resolution),
    }
}

/// Forward a drained pending-send batch onto another promise: if it's
/// still unresolved, prepend them to its own pending queue so they run
/// ahead of whatever is already waiting there; if it turns out to already
/// be resolved, follow that resolution in turn instead.
fn forward_to_promise(txn: &mut CrankTxn<'_>, kp: KernelPromiseId, pending: Vec<PendingSend>) -> Result<()> {
    let Some(promise) = txn.get_promise(kp) else {
        return Err(Error::bad_ref(format!("{kp} does not exist")));
    };
    if promise.is_unresolved() {
        let slot = txn.promise_mut(kp).expect("just observed present");
        let existing = std::mem::take(&mut slot.pending);
        let mut combined = pending;
        combined.extend(existing);
        txn.promise_mut(kp).expect("just observed present").pending = combined;
        Ok(())
    } else {
        let next_resolution = promise.resolution().cloned().expect("resolved promise carries a resolution");
        redirect_pending(txn, &next_resolution, pending)
    }
}

fn reject_pending(txn: &mut CrankTxn<'_>, pending: Vec<PendingSend>, resolution: &Resolution) -> Result<()> {
    for send in pending {
        if let Some(result) = send.result {
            // No live object to redirect to: the send itself is moot, but
            // whoever was waiting on its own result promise still needs to
            // observe the rejection.
            resolve_promise(txn, result, resolution.clone())?;
        }
    }
    Ok(())
}

/// Terminate a vat: drop its dispatch handle, reject every
/// promise it was deciding, and retire every object it owned (each
/// retirement fans out a `dispatchRetired` to current importers via
/// `GarbageCollector::retire_owned`, mirrored here directly since the full
/// GC coalescing pass is unnecessary for a one-shot teardown).
pub fn terminate_vat(txn: &mut CrankTxn<'_>, vats: &mut VatManager, vat: VatId, reason: &str) -> Result<()> {
    vats.terminate_vat(vat);

    for kp in txn.promises_decided_by(vat) {
        let rejection = Resolution::Rejected(ocap_kernel_type::CapData::empty());
        resolve_promise(txn, kp, rejection)?;
    }

    for id in txn.objects_owned_by(vat) {
        let importers = txn.importers_of(Kref::Object(id));
        if let Some(obj) = txn.object_mut(id) {
            obj.retire();
        }
        for importer in importers {
            txn.enqueue(RunQueueItem::GcRetire { vat: importer, objects: vec![id] });
        }
    }

    txn.run_queue_mut().retain(|item| item.target_vat() != Some(vat));
    txn.remove_clist(vat);
    txn.remove_vat_config(vat);

    tracing::warn!(%vat, reason, "vat terminated");
    Ok(())
}

#[cfg(test)]
mod tests {
    use ocap_kernel_core::KernelPromise;
    use ocap_kernel_store::KernelStore;
    use ocap_kernel_type::{CapData, VatRef};

    use super::*;
    use crate::translator::ReferenceTranslator;

    #[test]
    fn resolving_to_an_object_redirects_pending_sends() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let decider = VatId(1);
        let owner = VatId(2);

        let kp = txn.allocate_promise_id();
        txn.put_promise(kp, KernelPromise::new(decider));
        KernelQueue::send(&mut txn, Kref::Promise(kp), "foo".into(), CapData::empty(), None).unwrap();

        let obj_kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        resolve_promise(&mut txn, kp, Resolution::Fulfilled(CapData::new(vec![], vec![obj_kref]))).unwrap();

        match txn.pop().unwrap() {
            RunQueueItem::Send { target, method, .. } => {
                assert_eq!(target, obj_kref);
                assert_eq!(method, "foo");
            }
            other => panic!("expected the pending send spliced in, got {other:?}"),
        }
    }

    #[test]
    fn resolving_to_an_unresolved_promise_forwards_pending_sends_to_it() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let decider = VatId(1);

        let kp = txn.allocate_promise_id();
        txn.put_promise(kp, KernelPromise::new(decider));
        KernelQueue::send(&mut txn, Kref::Promise(kp), "foo".into(), CapData::empty(), None).unwrap();

        let kp2 = txn.allocate_promise_id();
        txn.put_promise(kp2, KernelPromise::new(decider));

        resolve_promise(&mut txn, kp, Resolution::Fulfilled(CapData::new(vec![], vec![Kref::Promise(kp2)]))).unwrap();

        // The forwarded send must land on kp2's own pending queue, never on
        // the run queue with a promise target (which `Crank` would reject).
        assert_eq!(txn.run_queue_len(), 0);
        let pending = &txn.get_promise(kp2).unwrap().pending;
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].method, "foo");
    }

    #[test]
    fn resolving_to_an_already_resolved_promise_follows_through_to_its_target() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let decider = VatId(1);
        let owner = VatId(2);

        let kp2 = txn.allocate_promise_id();
        txn.put_promise(kp2, KernelPromise::new(decider));
        let obj_kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        resolve_promise(&mut txn, kp2, Resolution::Fulfilled(CapData::new(vec![], vec![obj_kref]))).unwrap();

        let kp = txn.allocate_promise_id();
        txn.put_promise(kp, KernelPromise::new(decider));
        KernelQueue::send(&mut txn, Kref::Promise(kp), "bar".into(), CapData::empty(), None).unwrap();

        resolve_promise(&mut txn, kp, Resolution::Fulfilled(CapData::new(vec![], vec![Kref::Promise(kp2)]))).unwrap();

        match txn.pop().unwrap() {
            RunQueueItem::Send { target, method, .. } => {
                assert_eq!(target, obj_kref);
                assert_eq!(method, "bar");
            }
            other => panic!("expected the forwarded send spliced in, got {other:?}"),
        }
    }

    #[test]
    fn rejecting_propagates_to_pending_sends_result_promises() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let decider = VatId(1);

        let kp = txn.allocate_promise_id();
        txn.put_promise(kp, KernelPromise::new(decider));
        let result_kp = txn.allocate_promise_id();
        txn.put_promise(result_kp, KernelPromise::new(decider));
        KernelQueue::send(&mut txn, Kref::Promise(kp), "foo".into(), CapData::empty(), Some(result_kp)).unwrap();

        resolve_promise(&mut txn, kp, Resolution::Rejected(CapData::empty())).unwrap();

        assert!(!txn.get_promise(result_kp).unwrap().is_unresolved());
    }

    #[test]
    fn terminating_a_vat_rejects_its_decided_promises_and_retires_its_objects() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let mut vats = VatManager::new(std::time::Duration::from_secs(1));
        let vat = VatId(1);
        let importer = VatId(2);

        let kp = txn.allocate_promise_id();
        txn.put_promise(kp, KernelPromise::new(vat));

        let obj = ReferenceTranslator::import_from_vat(&mut txn, vat, VatRef::ObjectExport(1)).unwrap();
        ReferenceTranslator::export_to_vat(&mut txn, importer, obj).unwrap();

        terminate_vat(&mut txn, &mut vats, vat, "test").unwrap();

        assert!(!txn.get_promise(kp).unwrap().is_unresolved());
        assert!(txn.get_object(obj.as_object().unwrap()).unwrap().is_retired());
        assert!(txn
            .run_queue()
            .iter()
            .any(|i| matches!(i, RunQueueItem::GcRetire { vat, .. } if *vat == importer)));
    }
}
