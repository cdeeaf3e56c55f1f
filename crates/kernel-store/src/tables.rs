// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The committed table set. `KernelStore` never exposes this directly;
//! every read and write happens through a `CrankTxn` (see `txn.rs`).

use std::collections::{BTreeMap, HashMap, VecDeque};

use ocap_kernel_core::{KernelObject, KernelPromise, Subcluster, VatConfig};
use ocap_kernel_type::{KernelObjectId, KernelPromiseId, SubclusterId, VatId};
use serde::{Deserialize, Serialize};

use crate::clist_table::ClistTable;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CounterKey {
    Vat,
    Subcluster,
    Object,
    Promise,
    /// Fresh vat-local import indices (`o-N` / `p-N`), allocated per vat by
    /// the `ReferenceTranslator` on first import.
    VatLocalImport(VatId),
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Tables {
    pub objects: HashMap<KernelObjectId, KernelObject>,
    pub promises: HashMap<KernelPromiseId, KernelPromise>,
    pub clists: ClistTable,
    pub run_queue: VecDeque<ocap_kernel_core::RunQueueItem>,
    pub subclusters: HashMap<SubclusterId, Subcluster>,
    pub system_subclusters: BTreeMap<String, SubclusterId>,
    pub vat_configs: HashMap<VatId, VatConfig>,
    /// Externally-presented capability tokens: the
    /// `listRefs`/`revoke` surface over an otherwise kernel-internal kref.
    pub durable_refs: BTreeMap<String, ocap_kernel_type::Kref>,
}

impl Tables {
    /// Refuse to continue if invariants were violated. Checked
    /// at every commit boundary in lieu of a real on-disk reload, since the
    /// durable backend itself is out of this core's scope.
    pub fn validate(&self) -> ocap_kernel_type::Result<()> {
        for (ko, obj) in &self.objects {
            if !obj.check_invariant() {
                return Err(ocap_kernel_type::Error::store_corrupt(format!(
                    "object {ko} has recognizable {} < reachable {}",
                    obj.recognizable_count, obj.reachable_count
                )));
            }
        }
        for (vat, clist) in self.clists.iter() {
            if !clist.is_symmetric() {
                return Err(ocap_kernel_type::Error::store_corrupt(format!(
                    "c-list for vat {vat} is not symmetric"
                )));
            }
        }
        Ok(())
    }
}
