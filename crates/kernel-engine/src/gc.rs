// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The garbage collector: bridges the reachable/recognizable
//! refcount domains and the vat-visible `bringOutYourDead` protocol.
//! Cross-vat cycles cannot be collected by local refcounts alone;
//! `bringOutYourDead` is the weak-consistency handshake that reconciles
//! them.

use ocap_kernel_core::RunQueueItem;
use ocap_kernel_store::CrankTxn;
use ocap_kernel_type::{KernelObjectId, Kref, Result, VatId};

pub struct GarbageCollector;

impl GarbageCollector {
    /// A vat cleared its reachable claim on `id` (via a `dropImports`
    /// syscall). Recompute the object's total reachable count and, if it
    /// has crossed zero, queue a coalesced `gc-drop` to the owner.
    #[tracing::instrument(name = "gc::drop_import", level = "trace", skip(txn))]
    pub fn drop_import(txn: &mut CrankTxn<'_>, vat: VatId, id: KernelObjectId) -> Result<()> {
        txn.clist_mut(vat).set_reachable(Kref::Object(id), false);
        Self::recompute_counts(txn, id);

        if let Some(obj) = txn.get_object(id) {
            if !obj.is_reachable() {
                if let Some(owner) = obj.owner {
                    Self::queue_coalesced(txn, owner, id, true);
                }
            }
        }
        Ok(())
    }

    /// A vat dropped its last recognition of `id` (via `retireImports`).
    /// Recognition is terminal from that vat's perspective: the c-list
    /// entry is removed outright.
    #[tracing::instrument(name = "gc::retire_import", level = "trace", skip(txn))]
    pub fn retire_import(txn: &mut CrankTxn<'_>, vat: VatId, id: KernelObjectId) -> Result<()> {
        txn.clist_mut(vat).remove(Kref::Object(id));
        Self::recompute_counts(txn, id);

        if let Some(obj) = txn.get_object(id) {
            if !obj.is_recognizable() {
                if let Some(owner) = obj.owner {
                    Self::queue_coalesced(txn, owner, id, false);
                }
            }
        }
        Ok(())
    }

    /// The owner revoked the object, or the owning vat was terminated:
    /// retirement is unconditional and notifies every current importer
    /// with a `dispatchRetired`.
    #[tracing::instrument(name = "gc::retire_owned", level = "debug", skip(txn))]
    pub fn retire_owned(txn: &mut CrankTxn<'_>, id: KernelObjectId) {
        let importers = txn.importers_of(Kref::Object(id));
        if let Some(obj) = txn.object_mut(id) {
            obj.retire();
        }
        for vat in importers {
            txn.enqueue(RunQueueItem::GcRetire { vat, objects: vec![id] });
        }
    }

    /// Schedule a `bringOutYourDead` cycle for one vat. Cadence
    /// is configurable and owned by the caller, e.g. the top-level
    /// `Kernel` loop.
    pub fn schedule_bring_out_your_dead(txn: &mut CrankTxn<'_>, vat: VatId) {
        txn.enqueue(RunQueueItem::BringOutYourDead { vat });
    }

    /// Process the vat's reply to a `bringOutYourDead` delivery: a list of
    /// objects it no longer locally reaches.
    pub fn process_bring_out_your_dead_reply(
        txn: &mut CrankTxn<'_>,
        vat: VatId,
        no_longer_reached: Vec<KernelObjectId>,
    ) -> Result<()> {
        for id in no_longer_reached {
            Self::drop_import(txn, vat, id)?;
        }
        Ok(())
    }

    fn recompute_counts(txn: &mut CrankTxn<'_>, id: KernelObjectId) {
        let importers = txn.importers_of(Kref::Object(id));
        let mut reachable = 0u64;
        let mut recognizable = 0u64;
        for vat in importers {
            if let Some(clist) = txn.clist(vat) {
                if let Some(entry) = clist.entry(Kref::Object(id)) {
                    recognizable += 1;
                    if entry.reachable {
                        reachable += 1;
                    }
                }
            }
        }
        if let Some(obj) = txn.object_mut(id) {
            obj.reachable_count = reachable;
            obj.recognizable_count = recognizable;
        }
    }

    /// Coalesce GC actions for the same vat into at most one pending drop
    /// and one pending retire per crank.
    fn queue_coalesced(txn: &mut CrankTxn<'_>, owner: VatId, id: KernelObjectId, is_drop: bool) {
        let queue = txn.run_queue_mut();
        for item in queue.iter_mut() {
            let matches = match (is_drop, item) {
                (true, RunQueueItem::GcDrop { vat, objects }) if *vat == owner => {
                    if !objects.contains(&id) {
                        objects.push(id);
                    }
                    true
                }
                (false, RunQueueItem::GcRetire { vat, objects }) if *vat == owner => {
                    if !objects.contains(&id) {
                        objects.push(id);
                    }
                    true
                }
                _ => false,
            };
            if matches {
                return;
            }
        }
        let item = if is_drop {
            RunQueueItem::GcDrop { vat: owner, objects: vec![id] }
        } else {
            RunQueueItem::GcRetire { vat: owner, objects: vec![id] }
        };
        txn.enqueue(item);
    }
}

#[cfg(test)]
mod tests {
    use ocap_kernel_store::KernelStore;
    use ocap_kernel_type::VatRef;

    use super::*;
    use crate::translator::ReferenceTranslator;

    fn setup_imported_object() -> (KernelStore, VatId, VatId, KernelObjectId) {
        let store = KernelStore::new();
        let owner = VatId(1);
        let importer = VatId(2);
        let mut txn = store.begin();
        let kref = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        ReferenceTranslator::export_to_vat(&mut txn, importer, kref).unwrap();
        let id = kref.as_object().unwrap();
        txn.commit().unwrap();
        (store, owner, importer, id)
    }

    #[test]
    fn dropping_last_reachable_ref_queues_gc_drop_to_owner() {
        let (store, owner, importer, id) = setup_imported_object();
        let mut txn = store.begin();
        GarbageCollector::drop_import(&mut txn, importer, id).unwrap();

        assert!(!txn.get_object(id).unwrap().is_reachable());
        let queued = txn.run_queue().iter().any(|item| matches!(item, RunQueueItem::GcDrop { vat, objects } if *vat == owner && objects.contains(&id)));
        assert!(queued);
    }

    #[test]
    fn drops_for_the_same_vat_coalesce_into_one_action() {
        let store = KernelStore::new();
        let owner = VatId(1);
        let importer = VatId(2);
        let mut txn = store.begin();

        let k1 = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(1)).unwrap();
        let k2 = ReferenceTranslator::import_from_vat(&mut txn, owner, VatRef::ObjectExport(2)).unwrap();
        ReferenceTranslator::export_to_vat(&mut txn, importer, k1).unwrap();
        ReferenceTranslator::export_to_vat(&mut txn, importer, k2).unwrap();

        GarbageCollector::drop_import(&mut txn, importer, k1.as_object().unwrap()).unwrap();
        GarbageCollector::drop_import(&mut txn, importer, k2.as_object().unwrap()).unwrap();

        let drops: Vec<_> = txn.run_queue().iter().filter(|i| matches!(i, RunQueueItem::GcDrop { .. })).collect();
        assert_eq!(drops.len(), 1);
    }

    #[test]
    fn retire_owned_notifies_every_importer() {
        let (store, _owner, importer, id) = setup_imported_object();
        let mut txn = store.begin();
        GarbageCollector::retire_owned(&mut txn, id);
        assert!(txn.get_object(id).unwrap().is_retired());
        let notified = txn
            .run_queue()
            .iter()
            .any(|item| matches!(item, RunQueueItem::GcRetire { vat, objects } if *vat == importer && objects.contains(&id)));
        assert!(notified);
    }

    #[test]
    fn bring_out_your_dead_reply_drops_reported_objects() {
        let (store, owner, importer, id) = setup_imported_object();
        let mut txn = store.begin();
        GarbageCollector::process_bring_out_your_dead_reply(&mut txn, importer, vec![id]).unwrap();
        assert!(!txn.get_object(id).unwrap().is_reachable());
        let queued = txn.run_queue().iter().any(|item| matches!(item, RunQueueItem::GcDrop { vat, .. } if *vat == owner));
        assert!(queued);
    }
}
