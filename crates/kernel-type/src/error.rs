// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Stable kind code surfaced in RPC error objects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    InvalidConfig,
    BadRef,
    VatTerminated,
    PromiseRejected,
    ServiceForbidden,
    NotFound,
    StoreCorrupt,
    VatDispatchFailed,
    Timeout,
    BadSyscall,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::InvalidConfig => "InvalidConfig",
            ErrorKind::BadRef => "BadRef",
            ErrorKind::VatTerminated => "VatTerminated",
            ErrorKind::PromiseRejected => "PromiseRejected",
            ErrorKind::ServiceForbidden => "ServiceForbidden",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::StoreCorrupt => "StoreCorrupt",
            ErrorKind::VatDispatchFailed => "VatDispatchFailed",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::BadSyscall => "BadSyscall",
        };
        f.write_str(s)
    }
}

/// The kernel's single error type. Every fallible kernel operation returns
/// `Result<T>` over this; the RPC layer maps `kind()` to the wire error code.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidConfig, message)
    }

    pub fn bad_ref(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRef, message)
    }

    pub fn vat_terminated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VatTerminated, message)
    }

    pub fn promise_rejected(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PromiseRejected, message)
    }

    pub fn service_forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ServiceForbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn store_corrupt(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StoreCorrupt, message)
    }

    pub fn vat_dispatch_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::VatDispatchFailed, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn bad_syscall(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadSyscall, message)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;
