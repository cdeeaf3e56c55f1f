// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Per-vat c-list: the bidirectional translation table between vat-refs and
//! krefs.

use std::collections::HashMap;

use ocap_kernel_type::{Kref, VatRef};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CListEntry {
    pub kref: Kref,
    pub vat_ref: VatRef,
    /// Cleared by GC when the vat drops its last reachable claim; the entry
    /// itself survives for recognition until retirement.
    pub reachable: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CList {
    by_kref: HashMap<Kref, CListEntry>,
    by_vat_ref: HashMap<VatRef, Kref>,
}

impl CList {
    pub fn insert(&mut self, kref: Kref, vat_ref: VatRef, reachable: bool) {
        self.by_kref.insert(kref, CListEntry { kref, vat_ref, reachable });
        self.by_vat_ref.insert(vat_ref, kref);
    }

    pub fn kref_for(&self, vat_ref: VatRef) -> Option<Kref> {
        self.by_vat_ref.get(&vat_ref).copied()
    }

    pub fn vat_ref_for(&self, kref: Kref) -> Option<VatRef> {
        self.by_kref.get(&kref).map(|e| e.vat_ref)
    }

    pub fn entry(&self, kref: Kref) -> Option<&CListEntry> {
        self.by_kref.get(&kref)
    }

    pub fn set_reachable(&mut self, kref: Kref, reachable: bool) {
        if let Some(e) = self.by_kref.get_mut(&kref) {
            e.reachable = reachable;
        }
    }

    pub fn remove(&mut self, kref: Kref) -> Option<CListEntry> {
        if let Some(entry) = self.by_kref.remove(&kref) {
            self.by_vat_ref.remove(&entry.vat_ref);
            Some(entry)
        } else {
            None
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &CListEntry> {
        self.by_kref.values()
    }

    /// Spec §8 property 2 (c-list symmetry): for every `(vatRef, kref)`
    /// pair, the reverse map returns the same pair.
    pub fn is_symmetric(&self) -> bool {
        self.by_kref.values().all(|e| self.by_vat_ref.get(&e.vat_ref) == Some(&e.kref))
            && self.by_vat_ref.iter().all(|(vr, kref)| self.by_kref.get(kref).map(|e| e.vat_ref) == Some(*vr))
    }
}
