// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Kernel object records.

use ocap_kernel_type::VatId;
use serde::{Deserialize, Serialize};

/// A kernel object's persistent record. `owner` is `None` once the object
/// has been retired; a retired object's kref is never reused for a new
/// export even if the owning vat later re-exports the same vat-local id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelObject {
    pub owner: Option<VatId>,
    pub reachable_count: u64,
    pub recognizable_count: u64,
    pub label: Option<String>,
}

impl KernelObject {
    pub fn new(owner: VatId, label: Option<String>) -> Self {
        Self { owner: Some(owner), reachable_count: 0, recognizable_count: 0, label }
    }

    pub fn is_retired(&self) -> bool {
        self.owner.is_none()
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable_count > 0
    }

    pub fn is_recognizable(&self) -> bool {
        self.recognizable_count > 0
    }

    /// Spec §3.2 invariant: `recognizable >= reachable >= 0`. Counts are
    /// `u64` so non-negativity is structural; this only checks ordering.
    pub fn check_invariant(&self) -> bool {
        self.recognizable_count >= self.reachable_count
    }

    pub fn retire(&mut self) {
        self.owner = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_object_is_not_retired() {
        let o = KernelObject::new(VatId(1), None);
        assert!(!o.is_retired());
        assert!(o.check_invariant());
    }

    #[test]
    fn retiring_clears_owner() {
        let mut o = KernelObject::new(VatId(1), Some("root".into()));
        o.retire();
        assert!(o.is_retired());
    }
}
