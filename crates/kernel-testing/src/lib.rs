// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! In-memory fixtures for exercising a `Kernel` end to end without a real
//! vat worker process: a thin wrapper plus a handful of scriptable doubles.

use std::collections::VecDeque;
use std::time::Duration;

use ocap_kernel_core::{ClusterConfig, Delivery, RestartPolicy, Syscall, VatConfig};
use ocap_kernel_engine::{Kernel, VatDispatch, VatLauncher};
use ocap_kernel_store::ServicesRegistry;
use ocap_kernel_type::{Result, VatId};

/// A `VatDispatch` driven entirely by a closure; lets a test script exactly
/// what a vat replies with for each delivery it sees.
pub struct ScriptedVat<F> {
    handler: F,
}

impl<F> ScriptedVat<F>
where
    F: FnMut(Delivery) -> Result<Vec<Syscall>> + Send,
{
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> VatDispatch for ScriptedVat<F>
where
    F: FnMut(Delivery) -> Result<Vec<Syscall>> + Send,
{
    fn deliver(&mut self, delivery: Delivery, _timeout: Duration) -> Result<Vec<Syscall>> {
        (self.handler)(delivery)
    }
}

/// A vat that replies to the first delivery addressed to it with an empty
/// syscall batch and nothing thereafter; good enough for a bootstrap target
/// that doesn't need to do anything observable.
pub fn silent_vat() -> ScriptedVat<impl FnMut(Delivery) -> Result<Vec<Syscall>>> {
    ScriptedVat::new(|_| Ok(vec![]))
}

/// `SubclusterManager` launches vats in `ClusterConfig.vats`'s declaration
/// order; this launcher hands out pre-built
/// dispatch boxes in that same order, one per vat name in the config, so a
/// test can script each named vat's behavior up front.
pub struct SequentialLauncher {
    factories: VecDeque<Box<dyn FnMut(VatId) -> Result<Box<dyn VatDispatch>> + Send>>,
}

impl SequentialLauncher {
    pub fn new() -> Self {
        Self { factories: VecDeque::new() }
    }

    pub fn push(&mut self, dispatch: Box<dyn VatDispatch>) {
        let mut dispatch = Some(dispatch);
        self.factories.push_back(Box::new(move |_vat| {
            dispatch.take().ok_or_else(|| ocap_kernel_type::Error::invalid_config("launcher factory invoked twice"))
        }));
    }
}

impl Default for SequentialLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl VatLauncher for SequentialLauncher {
    fn launch(&mut self, vat: VatId, _config: &VatConfig) -> Result<Box<dyn VatDispatch>> {
        let mut factory = self
            .factories
            .pop_front()
            .ok_or_else(|| ocap_kernel_type::Error::invalid_config("no more scripted vats to launch"))?;
        factory(vat)
    }
}

/// A one-vat-per-name `ClusterConfig` builder, since every scenario test
/// needs one.
pub fn cluster_config(bootstrap: &str, vat_names: &[&str]) -> ClusterConfig {
    let mut config = ClusterConfig { bootstrap: bootstrap.to_string(), ..Default::default() };
    for name in vat_names {
        config.vats.insert(
            (*name).to_string(),
            VatConfig { bundle_spec: format!("{name}.bundle"), restart_policy: RestartPolicy::Never, ..Default::default() },
        );
    }
    config
}

/// A `Kernel` built with a one-second dispatch timeout and an empty
/// services registry, the default every scenario test starts from unless
/// it needs a specific service wired up.
pub fn test_kernel() -> Kernel {
    Kernel::new(Duration::from_secs(1), ServicesRegistry::default())
}

pub fn test_kernel_with_services(services: ServicesRegistry) -> Kernel {
    Kernel::new(Duration::from_secs(1), services)
}
