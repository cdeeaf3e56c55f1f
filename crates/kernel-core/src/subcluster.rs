// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Subcluster records.

use std::collections::BTreeSet;

use ocap_kernel_type::VatId;
use serde::{Deserialize, Serialize};

use crate::config::ClusterConfig;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subcluster {
    pub config: ClusterConfig,
    pub vats: BTreeSet<VatId>,
    /// System subclusters carry an additional name, restored at kernel
    /// start via the system-subcluster name->id map.
    pub system_name: Option<String>,
}

impl Subcluster {
    pub fn new(config: ClusterConfig, vats: BTreeSet<VatId>, system_name: Option<String>) -> Self {
        Self { config, vats, system_name }
    }

    pub fn is_system(&self) -> bool {
        self.system_name.is_some()
    }

    /// Member vats in reverse creation order, used for teardown (spec
    /// §4.7). Creation order is the iteration order of the `BTreeSet` at
    /// insertion time, which mirrors the `VatId` allocation order since ids
    /// are monotonically increasing.
    pub fn teardown_order(&self) -> Vec<VatId> {
        self.vats.iter().rev().copied().collect()
    }
}
