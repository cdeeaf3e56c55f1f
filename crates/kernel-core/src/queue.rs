// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Run queue entry shapes.

use ocap_kernel_type::{CapData, KernelObjectId, KernelPromiseId, Kref, VatId};
use serde::{Deserialize, Serialize};

/// A message send, either already targeted at a kref or still pending on an
/// unresolved promise (in which case it lives in `KernelPromise::pending`,
/// not on the run queue).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSend {
    pub method: String,
    pub args: CapData<Kref>,
    pub result: Option<KernelPromiseId>,
}

/// Ordered run queue entries.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunQueueItem {
    Send { target: Kref, method: String, args: CapData<Kref>, result: Option<KernelPromiseId> },
    Notify { vat: VatId, promise: KernelPromiseId },
    GcDrop { vat: VatId, objects: Vec<KernelObjectId> },
    GcRetire { vat: VatId, objects: Vec<KernelObjectId> },
    BringOutYourDead { vat: VatId },
}

impl RunQueueItem {
    /// The vat this item must be delivered to, if any (kernel-internal
    /// actions that target a specific vat rather than a kref).
    pub fn target_vat(&self) -> Option<VatId> {
        match self {
            RunQueueItem::Notify { vat, .. }
            | RunQueueItem::GcDrop { vat, .. }
            | RunQueueItem::GcRetire { vat, .. }
            | RunQueueItem::BringOutYourDead { vat } => Some(*vat),
            RunQueueItem::Send { .. } => None,
        }
    }
}
