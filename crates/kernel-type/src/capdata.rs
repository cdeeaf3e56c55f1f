// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! `CapData`: an opaque body blob plus an ordered list of ref slots. The
//! kernel never interprets the body;
//! only the slot list is rewritten as a payload crosses the translation
//! boundary between kernel refs and vat refs.

use serde::{Deserialize, Serialize};

/// Generic over the slot representation so the same shape serves both
/// kernel-side data (`CapData<Kref>`, e.g. a promise's resolution value)
/// and vat-side data (`CapData<VatRef>`, e.g. a syscall's argument list).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapData<R> {
    pub body: Vec<u8>,
    pub slots: Vec<R>,
}

impl<R> CapData<R> {
    pub fn new(body: Vec<u8>, slots: Vec<R>) -> Self {
        Self { body, slots }
    }

    pub fn empty() -> Self {
        Self { body: Vec::new(), slots: Vec::new() }
    }

    /// Rewrite every slot in place, preserving slot order and duplicate
    /// slots: a slot referring to the same kref twice produces
    /// the same vatRef both times.
    pub fn map_slots<S>(self, mut f: impl FnMut(R) -> crate::error::Result<S>) -> crate::error::Result<CapData<S>> {
        let slots = self.slots.into_iter().map(&mut f).collect::<crate::error::Result<Vec<S>>>()?;
        Ok(CapData { body: self.body, slots })
    }
}
