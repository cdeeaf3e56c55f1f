// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Kernel promise records and the resolution state machine.

use std::collections::BTreeSet;

use ocap_kernel_type::{CapData, Kref, VatId};
use serde::{Deserialize, Serialize};

use crate::queue::PendingSend;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Fulfilled(CapData<Kref>),
    Rejected(CapData<Kref>),
}

impl Resolution {
    pub fn value(&self) -> &CapData<Kref> {
        match self {
            Resolution::Fulfilled(v) | Resolution::Rejected(v) => v,
        }
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Resolution::Fulfilled(_))
    }
}

/// A promise's persistent state. Exactly one transition is
/// legal: `Unresolved -> Fulfilled` or `Unresolved -> Rejected`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromiseState {
    Unresolved,
    Resolved(Resolution),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelPromise {
    pub state: PromiseState,
    /// The vat currently holding the resolution right. `None` once
    /// resolved; at most one vat may hold it at a time (decider
    /// uniqueness).
    pub decider: Option<VatId>,
    pub subscribers: BTreeSet<VatId>,
    /// Messages sent to this promise while it is unresolved; spliced onto
    /// the run queue, targeted at the resolution, when it resolves.
    pub pending: Vec<PendingSend>,
}

impl KernelPromise {
    pub fn new(decider: VatId) -> Self {
        Self {
            state: PromiseState::Unresolved,
            decider: Some(decider),
            subscribers: BTreeSet::new(),
            pending: Vec::new(),
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self.state, PromiseState::Unresolved)
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        match &self.state {
            PromiseState::Unresolved => None,
            PromiseState::Resolved(r) => Some(r),
        }
    }

    /// Resolve the promise. Spec §8 property 5: re-resolving with a
    /// byte-equal resolution is a no-op; re-resolving with a different one
    /// is a `BadSyscall`. Returns the drained pending-send queue and
    /// subscriber set on first resolution, or `None` thereafter.
    pub fn resolve(&mut self, resolution: Resolution) -> ocap_kernel_type::Result<Option<(Vec<PendingSend>, BTreeSet<VatId>)>> {
        match &self.state {
            PromiseState::Unresolved => {
                self.decider = None;
                let pending = std::mem::take(&mut self.pending);
                let subscribers = std::mem::take(&mut self.subscribers);
                self.state = PromiseState::Resolved(resolution);
                Ok(Some((pending, subscribers)))
            }
            PromiseState::Resolved(existing) => {
                if *existing == resolution {
                    Ok(None)
                } else {
                    Err(ocap_kernel_type::Error::bad_syscall(
                        "re-resolution of an already-resolved promise with a different value",
                    ))
                }
            }
        }
    }

    pub fn subscribe(&mut self, vat: VatId) {
        self.subscribers.insert(vat);
    }
}
