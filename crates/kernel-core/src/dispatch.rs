// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The vat dispatch contract: the tagged frames a vat worker
//! receives as deliveries and replies with as syscalls. Anything that
//! implements `VatDispatch` (crate `ocap-kernel-engine`) can serve as a
//! vat; this module only fixes the wire shape both sides agree on.

use ocap_kernel_type::{CapData, VatRef};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionKind {
    Fulfill,
    Reject,
}

/// Kernel -> vat.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Delivery {
    Message { target: VatRef, method: String, args: CapData<VatRef>, result: Option<VatRef> },
    Notify { promise: VatRef, resolution: ResolutionKind, value: CapData<VatRef> },
    DropImports { refs: Vec<VatRef> },
    RetireImports { refs: Vec<VatRef> },
    RetireExports { refs: Vec<VatRef> },
    BringOutYourDead,
    StartVat { params: CapData<VatRef> },
}

/// A single resolved-promise entry inside a `resolve` syscall batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyscallResolution {
    pub promise: VatRef,
    pub resolution: ResolutionKind,
    pub value: CapData<VatRef>,
}

/// Vat -> kernel, in reply to a single delivery. A delivery
/// produces exactly one batch of these (possibly empty).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Syscall {
    Send { target: VatRef, method: String, args: CapData<VatRef>, result: Option<VatRef> },
    Subscribe { promise: VatRef },
    Resolve { resolutions: Vec<SyscallResolution> },
    Exit { reason: CapData<VatRef> },
    DropImports { refs: Vec<VatRef> },
    RetireImports { refs: Vec<VatRef> },
    RetireExports { refs: Vec<VatRef> },
    VatstoreGet { key: String },
    VatstoreSet { key: String, value: Vec<u8> },
    VatstoreDelete { key: String },
}
