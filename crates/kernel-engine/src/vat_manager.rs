// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Per-vat lifecycle and dispatch serialization. `VatDispatch`
//! is the external collaborator's contract — any process that
//! implements it is a vat as far as this kernel core is concerned; worker
//! execution itself is out of scope.

use std::collections::HashMap;
use std::time::Duration;

use ocap_kernel_core::{Delivery, RestartPolicy, Syscall};
use ocap_kernel_type::VatId;

/// The vat worker contract. A real vat is a separate process
/// reached over an ordered channel pair; `deliver` models one
/// request/response round trip and must return within `timeout` or the
/// caller treats it as a `Timeout` failure.
pub trait VatDispatch: Send {
    fn deliver(&mut self, delivery: Delivery, timeout: Duration) -> ocap_kernel_type::Result<Vec<Syscall>>;
}

/// Outcome of one `VatManager::deliver` call.
pub enum DeliverOutcome {
    Delivered(Vec<Syscall>),
    /// The vat was already mid-delivery; busy vats get their item
    /// re-queued at the head so the caller can try another vat or wait.
    Busy,
    /// The vat raised while handling the delivery: panic, unhandled
    /// exception, or dispatch timeout.
    VatError(ocap_kernel_type::Error),
}

struct VatHandle {
    dispatch: Box<dyn VatDispatch>,
    restart_policy: RestartPolicy,
    busy: bool,
}

#[derive(Default)]
pub struct VatManager {
    vats: HashMap<VatId, VatHandle>,
    dispatch_timeout: Duration,
}

impl VatManager {
    pub fn new(dispatch_timeout: Duration) -> Self {
        Self { vats: HashMap::new(), dispatch_timeout }
    }

    pub fn launch_vat(&mut self, vat: VatId, dispatch: Box<dyn VatDispatch>, restart_policy: RestartPolicy) {
        self.vats.insert(vat, VatHandle { dispatch, restart_policy, busy: false });
    }

    pub fn is_registered(&self, vat: VatId) -> bool {
        self.vats.contains_key(&vat)
    }

    pub fn restart_policy(&self, vat: VatId) -> Option<RestartPolicy> {
        self.vats.get(&vat).map(|h| h.restart_policy)
    }

    /// Deliver one item, enforcing "at most one delivery in flight per
    /// vat".
    #[tracing::instrument(name = "vat_manager::deliver", level = "debug", skip(self, delivery))]
    pub fn deliver(&mut self, vat: VatId, delivery: Delivery) -> DeliverOutcome {
        let timeout = self.dispatch_timeout;
        let Some(handle) = self.vats.get_mut(&vat) else {
            return DeliverOutcome::VatError(ocap_kernel_type::Error::vat_terminated(format!("{vat} is not registered")));
        };
        if handle.busy {
            return DeliverOutcome::Busy;
        }
        handle.busy = true;
        let result = handle.dispatch.deliver(delivery, timeout);
        if let Some(handle) = self.vats.get_mut(&vat) {
            handle.busy = false;
        }
        match result {
            Ok(syscalls) => DeliverOutcome::Delivered(syscalls),
            Err(err) => DeliverOutcome::VatError(err),
        }
    }

    /// Remove the vat's dispatch handle. The store-level bookkeeping
    /// (rejecting its outstanding promises, cancelling queued sends) is
    /// done by the caller (`Crank`/`SubclusterManager`) against the
    /// transaction, since `VatManager` itself never touches the store.
    pub fn terminate_vat(&mut self, vat: VatId) {
        self.vats.remove(&vat);
    }
}
