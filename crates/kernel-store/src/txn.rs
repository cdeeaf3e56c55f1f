// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! `CrankTxn`: the guarded scope around one crank's worth of store
//! mutations. A transaction stages a
//! private copy of the committed tables; `commit()` validates and swaps it
//! in atomically, anything else (an explicit `rollback()`, an early
//! `return`, a panic) drops the stage and leaves the committed tables
//! untouched.

use std::collections::{BTreeSet, VecDeque};

use ocap_kernel_core::{
    CList, KernelObject, KernelPromise, RunQueueItem, ServiceEntry, Subcluster, VatConfig,
};
use ocap_kernel_type::{KernelObjectId, KernelPromiseId, Result, SubclusterId, VatId};

use crate::tables::{CounterKey, Tables};
use crate::KernelStore;

pub struct CrankTxn<'a> {
    pub(crate) store: &'a KernelStore,
    pub(crate) staged: Tables,
}

impl<'a> CrankTxn<'a> {
    /// Atomic all-or-nothing persistence. Consumes the
    /// transaction; after this the mutations are visible to every later
    /// `begin()`.
    #[tracing::instrument(name = "kernel_store::commit", level = "debug", skip(self))]
    pub fn commit(self) -> Result<()> {
        self.staged.validate()?;
        *self.store.committed.write() = self.staged;
        Ok(())
    }

    /// Explicit rollback; equivalent to dropping the transaction without
    /// calling `commit`.
    pub fn rollback(self) {}

    /// Snapshot the full staged state, so a multi-step mutation (e.g.
    /// applying a syscall batch) can be undone in one shot if a later step
    /// turns out to be invalid, without rolling back the whole transaction.
    pub fn snapshot(&self) -> Tables {
        self.staged.clone()
    }

    pub fn restore(&mut self, snapshot: Tables) {
        self.staged = snapshot;
    }

    // --- objects -----------------------------------------------------

    pub fn get_object(&self, id: KernelObjectId) -> Option<&KernelObject> {
        self.staged.objects.get(&id)
    }

    pub fn put_object(&mut self, id: KernelObjectId, object: KernelObject) {
        self.staged.objects.insert(id, object);
    }

    pub fn object_mut(&mut self, id: KernelObjectId) -> Option<&mut KernelObject> {
        self.staged.objects.get_mut(&id)
    }

    pub fn allocate_object_id(&mut self) -> KernelObjectId {
        KernelObjectId(self.store.reserve(CounterKey::Object))
    }

    pub fn objects_owned_by(&self, vat: VatId) -> Vec<KernelObjectId> {
        self.staged
            .objects
            .iter()
            .filter(|(_, o)| o.owner == Some(vat))
            .map(|(id, _)| *id)
            .collect()
    }

    // --- promises ------------------------------------------------------

    pub fn get_promise(&self, id: KernelPromiseId) -> Option<&KernelPromise> {
        self.staged.promises.get(&id)
    }

    pub fn put_promise(&mut self, id: KernelPromiseId, promise: KernelPromise) {
        self.staged.promises.insert(id, promise);
    }

    pub fn promise_mut(&mut self, id: KernelPromiseId) -> Option<&mut KernelPromise> {
        self.staged.promises.get_mut(&id)
    }

    pub fn allocate_promise_id(&mut self) -> KernelPromiseId {
        KernelPromiseId(self.store.reserve(CounterKey::Promise))
    }

    pub fn promises_decided_by(&self, vat: VatId) -> Vec<KernelPromiseId> {
        self.staged
            .promises
            .iter()
            .filter(|(_, p)| p.decider == Some(vat))
            .map(|(id, _)| *id)
            .collect()
    }

    // --- c-lists ---------------------------------------------------------

    pub fn clist(&self, vat: VatId) -> Option<&CList> {
        self.staged.clists.get(vat)
    }

    pub fn clist_mut(&mut self, vat: VatId) -> &mut CList {
        self.staged.clists.get_mut(vat)
    }

    pub fn remove_clist(&mut self, vat: VatId) -> Option<CList> {
        self.staged.clists.remove_vat(vat)
    }

    pub fn importers_of(&self, kref: ocap_kernel_type::Kref) -> Vec<VatId> {
        self.staged.clists.importers_of(kref)
    }

    pub fn allocate_vat_local_import(&mut self, vat: VatId) -> u64 {
        self.store.reserve(CounterKey::VatLocalImport(vat))
    }

    // --- run queue ---------------------------------------------------

    pub fn enqueue(&mut self, item: RunQueueItem) {
        self.staged.run_queue.push_back(item);
    }

    pub fn pop(&mut self) -> Option<RunQueueItem> {
        self.staged.run_queue.pop_front()
    }

    pub fn push_front(&mut self, item: RunQueueItem) {
        self.staged.run_queue.push_front(item);
    }

    /// Splice items at the head of the run queue, preserving their
    /// relative order: the first item of `items` becomes the
    /// new head.
    pub fn splice_at_head(&mut self, items: Vec<RunQueueItem>) {
        for item in items.into_iter().rev() {
            self.staged.run_queue.push_front(item);
        }
    }

    pub fn run_queue_len(&self) -> usize {
        self.staged.run_queue.len()
    }

    pub fn run_queue(&self) -> &VecDeque<RunQueueItem> {
        &self.staged.run_queue
    }

    pub fn run_queue_mut(&mut self) -> &mut VecDeque<RunQueueItem> {
        &mut self.staged.run_queue
    }

    // --- vat configs / subclusters -------------------------------------

    pub fn allocate_vat_id(&mut self) -> VatId {
        VatId(self.store.reserve(CounterKey::Vat))
    }

    pub fn allocate_subcluster_id(&mut self) -> SubclusterId {
        SubclusterId(self.store.reserve(CounterKey::Subcluster))
    }

    pub fn put_vat_config(&mut self, vat: VatId, config: VatConfig) {
        self.staged.vat_configs.insert(vat, config);
    }

    pub fn get_vat_config(&self, vat: VatId) -> Option<&VatConfig> {
        self.staged.vat_configs.get(&vat)
    }

    pub fn remove_vat_config(&mut self, vat: VatId) -> Option<VatConfig> {
        self.staged.vat_configs.remove(&vat)
    }

    pub fn put_subcluster(&mut self, id: SubclusterId, subcluster: Subcluster) {
        if let Some(name) = subcluster.system_name.clone() {
            self.staged.system_subclusters.insert(name, id);
        }
        self.staged.subclusters.insert(id, subcluster);
    }

    pub fn get_subcluster(&self, id: SubclusterId) -> Option<&Subcluster> {
        self.staged.subclusters.get(&id)
    }

    pub fn remove_subcluster(&mut self, id: SubclusterId) -> Option<Subcluster> {
        let removed = self.staged.subclusters.remove(&id);
        if let Some(sc) = &removed {
            if let Some(name) = &sc.system_name {
                self.staged.system_subclusters.remove(name);
            }
        }
        removed
    }

    pub fn system_subcluster_named(&self, name: &str) -> Option<SubclusterId> {
        self.staged.system_subclusters.get(name).copied()
    }

    pub fn all_vats(&self) -> BTreeSet<VatId> {
        self.staged.vat_configs.keys().copied().collect()
    }

    // --- durable refs -----------------------------------------------

    pub fn register_durable_ref(&mut self, token: String, kref: ocap_kernel_type::Kref) {
        self.staged.durable_refs.insert(token, kref);
    }

    pub fn resolve_durable_ref(&self, token: &str) -> Option<ocap_kernel_type::Kref> {
        self.staged.durable_refs.get(token).copied()
    }

    pub fn revoke_durable_ref(&mut self, token: &str) -> Option<ocap_kernel_type::Kref> {
        self.staged.durable_refs.remove(token)
    }

    pub fn list_durable_refs(&self) -> Vec<(String, ocap_kernel_type::Kref)> {
        self.staged.durable_refs.iter().map(|(t, k)| (t.clone(), *k)).collect()
    }
}

/// Services are process-scoped, not part of the crank-transactional
/// tables: they are populated once at kernel start and never mutated by a
/// crank.
#[derive(Clone, Debug, Default)]
pub struct ServicesRegistry {
    entries: std::collections::HashMap<String, ServiceEntry>,
}

impl ServicesRegistry {
    pub fn register(&mut self, entry: ServiceEntry) {
        self.entries.insert(entry.name.clone(), entry);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceEntry> {
        self.entries.get(name)
    }
}
