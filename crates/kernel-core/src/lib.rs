// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Persistent data model and the vat dispatch contract.
//! `ocap-kernel-store` owns the tables built from these types;
//! `ocap-kernel-engine` drives the dispatch contract against them.

pub mod clist;
pub mod config;
pub mod counter;
pub mod dispatch;
pub mod object;
pub mod promise;
pub mod queue;
pub mod service;
pub mod subcluster;

pub use clist::{CList, CListEntry};
pub use config::{ClusterConfig, IoChannelDescriptor, RestartPolicy, VatConfig};
pub use counter::Counter;
pub use dispatch::{Delivery, ResolutionKind, Syscall, SyscallResolution};
pub use object::KernelObject;
pub use promise::{KernelPromise, PromiseState, Resolution};
pub use queue::{PendingSend, RunQueueItem};
pub use service::ServiceEntry;
pub use subcluster::Subcluster;
