// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The subcluster lifecycle manager: atomic creation and
//! destruction of a group of vats sharing a bootstrap handshake.

use std::collections::BTreeMap;

use ocap_kernel_core::{ClusterConfig, KernelObject, RestartPolicy, Subcluster};
use ocap_kernel_store::{CrankTxn, ServicesRegistry};
use ocap_kernel_type::{CapData, Error, ErrorKind, Kref, KernelPromiseId, Result, SubclusterId, VatId, VatRef};
use serde::{Deserialize, Serialize};

use crate::lifecycle;
use crate::queue::KernelQueue;
use crate::translator::ReferenceTranslator;
use crate::vat_manager::{VatDispatch, VatManager};

/// Loading and running vat code is out of this core's scope; a
/// `VatLauncher` is the caller's bridge from a `VatConfig` to a running
/// `VatDispatch`, exactly as `VatDispatch` itself is the bridge from the
/// kernel to a vat's wire contract.
pub trait VatLauncher {
    fn launch(&mut self, vat: VatId, config: &ocap_kernel_core::VatConfig) -> Result<Box<dyn VatDispatch>>;
}

/// Body shape of the `bootstrap` message's `CapData`: names map to indices
/// into the message's slot list, which carries the corresponding krefs in
/// the same order.
#[derive(Serialize, Deserialize)]
struct BootstrapBody {
    vats: BTreeMap<String, u32>,
    services: BTreeMap<String, u32>,
}

pub struct LaunchResult {
    pub subcluster_id: SubclusterId,
    pub root_kref: Kref,
    pub bootstrap_result: KernelPromiseId,
}

pub struct SubclusterManager;

impl SubclusterManager {
    /// Launch algorithm. `is_system` marks launches originating
    /// from the kernel's own startup config rather than an external RPC
    /// caller; only these may request `systemOnly` services.
    #[tracing::instrument(name = "subcluster_manager::launch", level = "debug", skip(txn, vats, services, launcher, config))]
    pub fn launch(
        txn: &mut CrankTxn<'_>,
        vats: &mut VatManager,
        services: &ServicesRegistry,
        launcher: &mut dyn VatLauncher,
        mut config: ClusterConfig,
        is_system: bool,
        system_name: Option<String>,
    ) -> Result<LaunchResult> {
        config.validate()?;
        for name in &config.services {
            let entry = services
                .get(name)
                .ok_or_else(|| Error::invalid_config(format!("unknown service {name:?}")))?;
            if entry.system_only && !is_system {
                return Err(Error::new(ErrorKind::ServiceForbidden, format!("service {name:?} is system-only")));
            }
        }

        let subcluster_id = txn.allocate_subcluster_id();

        let mut launched: Vec<VatId> = Vec::new();
        let mut roots: BTreeMap<String, (VatId, Kref)> = BTreeMap::new();
        for (name, vat_config) in &config.vats {
            match Self::launch_one(txn, vats, launcher, vat_config) {
                Ok((vat_id, root)) => {
                    launched.push(vat_id);
                    roots.insert(name.clone(), (vat_id, root));
                }
                Err(e) => {
                    Self::rollback(txn, vats, &launched);
                    return Err(e);
                }
            }
        }

        let (bootstrap_vat, bootstrap_root) = match roots.get(&config.bootstrap) {
            Some((vat, root)) => (*vat, *root),
            None => {
                Self::rollback(txn, vats, &launched);
                return Err(Error::invalid_config(format!("bootstrap vat {:?} was not launched", config.bootstrap)));
            }
        };

        let mut slots = Vec::new();
        let mut vat_indices = BTreeMap::new();
        for (name, (_, root)) in &roots {
            vat_indices.insert(name.clone(), slots.len() as u32);
            slots.push(*root);
        }
        let mut service_indices = BTreeMap::new();
        for name in &config.services {
            let entry = services.get(name).expect("checked above");
            service_indices.insert(name.clone(), slots.len() as u32);
            slots.push(Kref::Object(entry.kref));
        }

        let body = serde_json::to_vec(&BootstrapBody { vats: vat_indices, services: service_indices })
            .map_err(|e| Error::invalid_config(format!("failed to encode bootstrap payload: {e}")))?;
        let payload = CapData::new(body, slots);

        let result_kp = txn.allocate_promise_id();
        txn.put_promise(result_kp, ocap_kernel_core::KernelPromise::new(bootstrap_vat));

        if let Err(e) = KernelQueue::send(txn, bootstrap_root, "bootstrap".into(), payload, Some(result_kp)) {
            Self::rollback(txn, vats, &launched);
            return Err(e);
        }

        let vat_set = launched.iter().copied().collect();
        txn.put_subcluster(subcluster_id, Subcluster::new(config, vat_set, system_name));

        Ok(LaunchResult { subcluster_id, root_kref: bootstrap_root, bootstrap_result: result_kp })
    }

    /// Termination: tear down member vats in reverse creation
    /// order, then delete the subcluster record (and its system-name
    /// mapping, if any).
    #[tracing::instrument(name = "subcluster_manager::terminate", level = "debug", skip(txn, vats))]
    pub fn terminate(txn: &mut CrankTxn<'_>, vats: &mut VatManager, id: SubclusterId) -> Result<()> {
        let Some(subcluster) = txn.get_subcluster(id) else {
            return Err(Error::not_found(format!("{id} does not exist")));
        };
        for vat in subcluster.teardown_order() {
            lifecycle::terminate_vat(txn, vats, vat, "subcluster terminated")?;
        }
        txn.remove_subcluster(id);
        Ok(())
    }

    fn launch_one(
        txn: &mut CrankTxn<'_>,
        vats: &mut VatManager,
        launcher: &mut dyn VatLauncher,
        vat_config: &ocap_kernel_core::VatConfig,
    ) -> Result<(VatId, Kref)> {
        let vat_id = txn.allocate_vat_id();
        let dispatch = launcher.launch(vat_id, vat_config)?;
        vats.launch_vat(vat_id, dispatch, vat_config.restart_policy);
        txn.put_vat_config(vat_id, vat_config.clone());

        let root_id = txn.allocate_object_id();
        txn.put_object(root_id, KernelObject::new(vat_id, Some("root".into())));
        let root_kref = Kref::Object(root_id);
        // Registers the vat's own c-list entry for its root up front so a
        // later `export_to_vat(vat_id, root_kref)` returns the stable
        // `o+`-form the vat should recognize as "myself" rather than
        // allocating a fresh one lazily.
        let root_vat_ref = ReferenceTranslator::export_to_vat(txn, vat_id, root_kref)?;
        debug_assert!(matches!(root_vat_ref, VatRef::ObjectExport(_)));

        Ok((vat_id, root_kref))
    }

    fn rollback(txn: &mut CrankTxn<'_>, vats: &mut VatManager, launched: &[VatId]) {
        for vat in launched.iter().rev() {
            let _ = lifecycle::terminate_vat(txn, vats, *vat, "subcluster launch rolled back");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ocap_kernel_core::{Delivery, RestartPolicy, RunQueueItem, Syscall, VatConfig};
    use ocap_kernel_store::KernelStore;
    use ocap_kernel_type::{KernelObjectId, Result as OcapResult};

    use super::*;

    struct NoopVat;
    impl VatDispatch for NoopVat {
        fn deliver(&mut self, _delivery: Delivery, _timeout: Duration) -> OcapResult<Vec<Syscall>> {
            Ok(vec![])
        }
    }

    struct NoopLauncher;
    impl VatLauncher for NoopLauncher {
        fn launch(&mut self, _vat: VatId, _config: &VatConfig) -> Result<Box<dyn VatDispatch>> {
            Ok(Box::new(NoopVat))
        }
    }

    fn two_vat_config() -> ClusterConfig {
        let mut cfg = ClusterConfig { bootstrap: "a".into(), ..Default::default() };
        cfg.vats.insert("a".into(), VatConfig { bundle_spec: "a.bundle".into(), restart_policy: RestartPolicy::Never, ..Default::default() });
        cfg.vats.insert("b".into(), VatConfig { bundle_spec: "b.bundle".into(), restart_policy: RestartPolicy::Never, ..Default::default() });
        cfg
    }

    #[test]
    fn launching_two_vats_enqueues_bootstrap_with_both_roots() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let mut vats = VatManager::new(Duration::from_secs(1));
        let services = ServicesRegistry::default();
        let mut launcher = NoopLauncher;

        let result = SubclusterManager::launch(&mut txn, &mut vats, &services, &mut launcher, two_vat_config(), false, None).unwrap();

        assert_eq!(txn.run_queue_len(), 1);
        match txn.pop().unwrap() {
            RunQueueItem::Send { method, args, .. } => {
                assert_eq!(method, "bootstrap");
                assert_eq!(args.slots.len(), 2);
            }
            other => panic!("expected bootstrap send, got {other:?}"),
        }
        assert!(txn.get_subcluster(result.subcluster_id).is_some());
    }

    #[test]
    fn system_only_service_is_forbidden_for_non_system_launch() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let mut vats = VatManager::new(Duration::from_secs(1));
        let mut services = ServicesRegistry::default();
        services.register(ocap_kernel_core::ServiceEntry { name: "admin".into(), kref: KernelObjectId(1), system_only: true });
        let mut launcher = NoopLauncher;

        let mut config = two_vat_config();
        config.services.push("admin".into());

        let err = SubclusterManager::launch(&mut txn, &mut vats, &services, &mut launcher, config, false, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceForbidden);
        assert_eq!(txn.run_queue_len(), 0);
        assert!(txn.all_vats().is_empty());
    }

    #[test]
    fn vats_launch_in_config_order_not_alphabetical_order() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let mut vats = VatManager::new(Duration::from_secs(1));
        let services = ServicesRegistry::default();
        let mut launcher = NoopLauncher;

        // "z" is declared first, "a" second: alphabetical order would launch
        // "a" first, but config order must launch "z" first.
        let mut cfg = ClusterConfig { bootstrap: "z".into(), ..Default::default() };
        cfg.vats.insert("z".into(), VatConfig { bundle_spec: "z.bundle".into(), restart_policy: RestartPolicy::Never, ..Default::default() });
        cfg.vats.insert("a".into(), VatConfig { bundle_spec: "a.bundle".into(), restart_policy: RestartPolicy::Never, ..Default::default() });

        let result = SubclusterManager::launch(&mut txn, &mut vats, &services, &mut launcher, cfg, false, None).unwrap();

        let subcluster = txn.get_subcluster(result.subcluster_id).unwrap();
        let bootstrap_vat = txn.get_object(result.root_kref.as_object().unwrap()).unwrap().owner.unwrap();
        let lowest_vat_id = *subcluster.vats.iter().next().unwrap();
        // Vat ids are allocated in launch order, so "z" (the bootstrap vat,
        // declared first) must hold the lowest id here.
        assert_eq!(bootstrap_vat, lowest_vat_id);
    }

    #[test]
    fn terminate_tears_down_members_and_removes_the_record() {
        let store = KernelStore::new();
        let mut txn = store.begin();
        let mut vats = VatManager::new(Duration::from_secs(1));
        let services = ServicesRegistry::default();
        let mut launcher = NoopLauncher;

        let result = SubclusterManager::launch(&mut txn, &mut vats, &services, &mut launcher, two_vat_config(), false, None).unwrap();
        SubclusterManager::terminate(&mut txn, &mut vats, result.subcluster_id).unwrap();

        assert!(txn.get_subcluster(result.subcluster_id).is_none());
        assert!(txn.all_vats().is_empty());
    }
}
