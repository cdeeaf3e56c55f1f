// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The kernel's transactional store: c-list tables, kernel
//! object/promise tables, run queue and counters, all mutated exclusively
//! through a `CrankTxn` that is staged in full and committed atomically.

pub mod clist_table;
pub mod tables;
pub mod txn;

pub use tables::{CounterKey, Tables};
pub use txn::{CrankTxn, ServicesRegistry};

use std::collections::HashMap;

use ocap_kernel_core::Counter;
use parking_lot::RwLock;

/// Owns every persistent table. Readers within a crank observe a
/// consistent snapshot (the staged copy taken at `begin()`); no
/// intermediate state is ever durable.
///
/// Id counters live outside `Tables` on purpose: they are bumped the
/// instant a `CrankTxn` allocates an id, independent of whether that
/// transaction ever commits, so a crash or an explicit `rollback()` after
/// allocating can never hand the same id out twice.
#[derive(Default)]
pub struct KernelStore {
    committed: RwLock<Tables>,
    counters: RwLock<HashMap<CounterKey, Counter>>,
}

impl KernelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a transaction bound to the current crank.
    pub fn begin(&self) -> CrankTxn<'_> {
        let staged = self.committed.read().clone();
        CrankTxn { store: self, staged }
    }

    /// Read-only snapshot of the committed tables, used by `getStatus` and
    /// by tests that need to inspect state between cranks without holding
    /// a transaction open.
    pub fn snapshot(&self) -> Tables {
        self.committed.read().clone()
    }

    /// Re-validate the committed tables against the invariants checked at
    /// every commit: fails with `StoreCorrupt` if invariants are violated.
    pub fn validate(&self) -> ocap_kernel_type::Result<()> {
        self.committed.read().validate()?;
        for counter in self.counters.read().values() {
            if !counter.is_monotonic() {
                return Err(ocap_kernel_type::Error::store_corrupt("counter monotonicity violated"));
            }
        }
        Ok(())
    }

    /// Burn and return the next id for `key`. Committed immediately against
    /// the store itself rather than staged in a `CrankTxn`, so it survives
    /// that transaction's rollback.
    pub(crate) fn reserve(&self, key: CounterKey) -> u64 {
        self.counters.write().entry(key).or_default().allocate()
    }
}
