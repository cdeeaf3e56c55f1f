// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Shared identifiers, capability-data payloads and the kernel's error type.
//! Re-used by every other crate in the workspace as the one dependency-free
//! foundation the rest of the graph builds on.

pub mod capdata;
pub mod error;
pub mod ids;

pub use capdata::CapData;
pub use error::{Error, ErrorKind, Result};
pub use ids::{KernelObjectId, KernelPromiseId, Kref, SubclusterId, VatId, VatRef};
