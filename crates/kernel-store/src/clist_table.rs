// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Per-vat c-list storage, plus the "prefix scan" traversal the
//! `KernelStore` contract promises for refcount reconciliation.

use std::collections::HashMap;

use ocap_kernel_core::CList;
use ocap_kernel_type::{Kref, VatId};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClistTable {
    by_vat: HashMap<VatId, CList>,
}

impl ClistTable {
    pub fn get(&self, vat: VatId) -> Option<&CList> {
        self.by_vat.get(&vat)
    }

    pub fn get_mut(&mut self, vat: VatId) -> &mut CList {
        self.by_vat.entry(vat).or_default()
    }

    pub fn remove_vat(&mut self, vat: VatId) -> Option<CList> {
        self.by_vat.remove(&vat)
    }

    pub fn iter(&self) -> impl Iterator<Item = (VatId, &CList)> {
        self.by_vat.iter().map(|(v, c)| (*v, c))
    }

    /// All vats that currently hold a c-list entry for `kref`, used by the
    /// garbage collector to recompute reachable/recognizable counts and
    /// fan out drop/retire notifications.
    pub fn importers_of(&self, kref: Kref) -> Vec<VatId> {
        self.by_vat
            .iter()
            .filter(|(_, clist)| clist.entry(kref).is_some())
            .map(|(vat, _)| *vat)
            .collect()
    }
}
