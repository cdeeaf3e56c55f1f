// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The remote transport shim: a "comms vat" makes
//! inter-kernel traffic look like any other `VatDispatch` to the core.
//! The actual wire transport (what carries bytes to the remote kernel) is
//! out of scope; this module only fixes the adapter shape.

use std::time::Duration;

use ocap_kernel_core::{Delivery, Syscall};
use ocap_kernel_type::Result;

use crate::vat_manager::VatDispatch;

/// The transport a `CommsVat` drives: sends one frame, receives the next.
/// A real implementation carries these over a socket to a peer kernel; the
/// wire codec itself is out of this core's scope.
pub trait CommsTransport: Send {
    fn send_delivery(&mut self, delivery: &Delivery) -> Result<()>;
    fn recv_syscalls(&mut self, timeout: Duration) -> Result<Vec<Syscall>>;
}

/// Adapts a `CommsTransport` to the ordinary `VatDispatch` contract, so the
/// `VatManager` and `Crank` never need to know a given vat is actually a
/// bridge to another kernel instance.
pub struct CommsVat<T: CommsTransport> {
    transport: T,
}

impl<T: CommsTransport> CommsVat<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }
}

impl<T: CommsTransport> VatDispatch for CommsVat<T> {
    fn deliver(&mut self, delivery: Delivery, timeout: Duration) -> Result<Vec<Syscall>> {
        self.transport.send_delivery(&delivery)?;
        self.transport.recv_syscalls(timeout)
    }
}
