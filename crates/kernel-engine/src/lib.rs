// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The kernel engine: the scheduler, translator, garbage collector and
//! lifecycle managers wired into one `Kernel` facade. This is
//! the crate `bin/daemon` drives; `bin/cli` only speaks the RPC wire
//! format against it.

pub mod comms;
pub mod crank;
pub mod gc;
pub mod lifecycle;
pub mod queue;
pub mod subcluster_manager;
pub mod translator;
pub mod vat_manager;

pub use comms::{CommsTransport, CommsVat};
pub use crank::{Crank, CrankOutcome};
pub use gc::GarbageCollector;
pub use queue::KernelQueue;
pub use subcluster_manager::{LaunchResult, SubclusterManager, VatLauncher};
pub use translator::ReferenceTranslator;
pub use vat_manager::{DeliverOutcome, VatDispatch, VatManager};

use std::time::Duration;

use ocap_kernel_core::ClusterConfig;
use ocap_kernel_store::{KernelStore, ServicesRegistry};
use ocap_kernel_type::{CapData, Error, Kref, Result, SubclusterId, VatId};
use parking_lot::Mutex;

/// Snapshot returned by `getStatus`.
#[derive(Debug, Clone)]
pub struct KernelStatus {
    pub vats: Vec<VatId>,
    pub subclusters: Vec<SubclusterId>,
    pub queue_depth: usize,
}

/// Global mutable state is limited to the store, the services registry and
/// the vat manager; all three are constructed once
/// and threaded through every call, never reached via a global.
pub struct Kernel {
    store: KernelStore,
    vats: Mutex<VatManager>,
    services: ServicesRegistry,
    healthy: std::sync::atomic::AtomicBool,
}

impl Kernel {
    pub fn new(dispatch_timeout: Duration, services: ServicesRegistry) -> Self {
        Self {
            store: KernelStore::new(),
            vats: Mutex::new(VatManager::new(dispatch_timeout)),
            services,
            healthy: std::sync::atomic::AtomicBool::new(true),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn mark_unhealthy(&self, err: &Error) {
        tracing::error!(error = %err, "kernel store commit failed, marking unhealthy");
        self.healthy.store(false, std::sync::atomic::Ordering::SeqCst);
    }

    /// `getStatus`: a read-only snapshot, taken without
    /// entering `waitForCrank()` since it touches no mutable state.
    pub fn status(&self) -> KernelStatus {
        let tables = self.store.snapshot();
        KernelStatus {
            vats: tables.vat_configs.keys().copied().collect(),
            subclusters: tables.subclusters.keys().copied().collect(),
            queue_depth: tables.run_queue.len(),
        }
    }

    /// `launchSubcluster`. Every external API enters
    /// through `waitForCrank()`, modeled here as holding the `vats` lock
    /// for the whole call, since a concurrent crank step also needs it.
    pub fn launch_subcluster(
        &self,
        config: ClusterConfig,
        launcher: &mut dyn VatLauncher,
        is_system: bool,
        system_name: Option<String>,
    ) -> Result<LaunchResult> {
        let mut vats = self.vats.lock();
        let mut txn = self.store.begin();
        let result = SubclusterManager::launch(&mut txn, &mut vats, &self.services, launcher, config, is_system, system_name)?;
        if let Err(e) = txn.commit() {
            self.mark_unhealthy(&e);
            return Err(e);
        }
        drop(vats);
        self.drain()?;
        Ok(result)
    }

    /// `terminateSubcluster`.
    pub fn terminate_subcluster(&self, id: SubclusterId) -> Result<()> {
        let mut vats = self.vats.lock();
        let mut txn = self.store.begin();
        SubclusterManager::terminate(&mut txn, &mut vats, id)?;
        match txn.commit() {
            Ok(()) => Ok(()),
            Err(e) => {
                self.mark_unhealthy(&e);
                Err(e)
            }
        }
    }

    /// `queueMessage`: `target` is either a durable capability
    /// token (`d-<token>`) registered via a prior `listRefs`, or
    /// a raw kref string for callers that already hold one (e.g. the CLI
    /// composing calls from `getStatus`/`listRefs` output directly).
    /// Blocks until the result promise settles, then returns its value,
    /// minting fresh durable tokens for any object/promise slots so the
    /// external caller never sees a bare kref.
    pub fn queue_message(&self, target: &str, method: String, args: CapData<Kref>) -> Result<CapData<String>> {
        let mut vats = self.vats.lock();
        let target_kref = self.resolve_external_ref(target)?;
        let mut txn = self.store.begin();

        let owner = match target_kref {
            Kref::Object(id) => txn.get_object(id).and_then(|o| o.owner),
            Kref::Promise(id) => txn.get_promise(id).and_then(|p| p.decider),
        }
        .ok_or_else(|| Error::bad_ref(format!("{target_kref} has no owner/decider to assign as result decider")))?;

        let result_kp = txn.allocate_promise_id();
        txn.put_promise(result_kp, ocap_kernel_core::KernelPromise::new(owner));
        KernelQueue::send(&mut txn, target_kref, method, args, Some(result_kp))?;
        if let Err(e) = txn.commit() {
            self.mark_unhealthy(&e);
            return Err(e);
        }
        drop(vats);

        self.drain()?;

        let tables = self.store.snapshot();
        let promise = tables
            .promises
            .get(&result_kp)
            .ok_or_else(|| Error::not_found(format!("{result_kp} vanished before resolving")))?;
        match promise.resolution() {
            None => Err(Error::timeout(format!("{result_kp} did not resolve by quiescence"))),
            Some(ocap_kernel_core::Resolution::Rejected(value)) => {
                Err(Error::promise_rejected(format!("rejected with {} slots", value.slots.len())))
            }
            Some(ocap_kernel_core::Resolution::Fulfilled(value)) => {
                let mut txn = self.store.begin();
                let external = value.clone().map_slots(|kref| Ok(self.mint_external_ref(&mut txn, kref)))?;
                txn.commit().map_err(|e| {
                    self.mark_unhealthy(&e);
                    e
                })?;
                Ok(external)
            }
        }
    }

    /// `revoke`.
    pub fn revoke(&self, token: &str) -> Result<()> {
        let mut txn = self.store.begin();
        if txn.revoke_durable_ref(token).is_none() {
            return Err(Error::not_found(format!("no durable ref {token:?}")));
        }
        txn.commit().map_err(|e| {
            self.mark_unhealthy(&e);
            e
        })
    }

    /// `listRefs`.
    pub fn list_refs(&self) -> Vec<(String, Kref)> {
        self.store.begin().list_durable_refs()
    }

    /// Parses an external ref string the same way `queueMessage`'s `target`
    /// is parsed, for callers (the RPC layer) that need to turn
    /// argument slots into `Kref`s before calling `queue_message`.
    pub fn resolve_ref(&self, s: &str) -> Result<Kref> {
        self.resolve_external_ref(s)
    }

    fn resolve_external_ref(&self, s: &str) -> Result<Kref> {
        if s.starts_with("d-") {
            self.store.begin().resolve_durable_ref(s).ok_or_else(|| Error::bad_ref(format!("no durable ref {s:?}")))
        } else {
            s.parse()
        }
    }

    fn mint_external_ref(&self, txn: &mut ocap_kernel_store::CrankTxn<'_>, kref: Kref) -> String {
        let token = format!("d-{}", uuid::Uuid::new_v4());
        txn.register_durable_ref(token.clone(), kref);
        token
    }

    /// Run cranks until the queue is empty or a fatal store error occurs.
    /// Retries on a `Yielded` outcome are bounded so a perpetually-busy vat
    /// cannot spin the caller forever; the bound is generous but finite.
    fn drain(&self) -> Result<()> {
        const MAX_BUSY_RETRIES: usize = 1000;
        let mut busy_retries = 0;
        loop {
            let mut vats = self.vats.lock();
            let mut crank = Crank::new(&self.store, &mut vats);
            match crank.step() {
                CrankOutcome::Quiescent => return Ok(()),
                CrankOutcome::Delivered => {
                    busy_retries = 0;
                    continue;
                }
                CrankOutcome::Yielded => {
                    busy_retries += 1;
                    if busy_retries >= MAX_BUSY_RETRIES {
                        return Err(Error::timeout("crank loop stalled on a perpetually busy vat"));
                    }
                    continue;
                }
                CrankOutcome::Fatal(e) => {
                    self.mark_unhealthy(&e);
                    return Err(e);
                }
            }
        }
    }
}
