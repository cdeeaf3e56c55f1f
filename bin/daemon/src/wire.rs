// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! JSON-RPC 2.0 wire shapes, one request/response per line.
//! `bin/cli` depends on this crate for these types so the two sides can
//! never drift on the error-code numbering.

use ocap_kernel_type::{CapData, Error, ErrorKind, Kref};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct Request {
    #[serde(default)]
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorObject>,
}

impl Response {
    pub fn success(id: Option<serde_json::Value>, result: serde_json::Value) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: Some(result), error: None }
    }

    pub fn error(id: Option<serde_json::Value>, err: &Error) -> Self {
        Self { jsonrpc: "2.0".to_string(), id, result: None, error: Some(ErrorObject { code: error_code(err.kind()), message: err.message().to_string() }) }
    }
}

/// Stable kind -> numeric code mapping for the RPC wire: each `ErrorKind`
/// gets one fixed ordinal, assigned once and never reassigned once
/// published.
pub fn error_code(kind: ErrorKind) -> i64 {
    match kind {
        ErrorKind::InvalidConfig => 1,
        ErrorKind::BadRef => 2,
        ErrorKind::VatTerminated => 3,
        ErrorKind::PromiseRejected => 4,
        ErrorKind::ServiceForbidden => 5,
        ErrorKind::NotFound => 6,
        ErrorKind::StoreCorrupt => 7,
        ErrorKind::VatDispatchFailed => 8,
        ErrorKind::Timeout => 9,
        ErrorKind::BadSyscall => 10,
    }
}

/// `CapData` as it crosses the RPC wire: `body` is a UTF-8 JSON string and
/// `slots` are ref strings (either a bare kref or a `d-<token>` durable
/// ref); binary vat payloads are out of scope for this console surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WireCapData {
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub slots: Vec<String>,
}

impl WireCapData {
    pub fn into_cap_data(self, mut resolve: impl FnMut(String) -> ocap_kernel_type::Result<Kref>) -> ocap_kernel_type::Result<CapData<Kref>> {
        let slots = self.slots.into_iter().map(&mut resolve).collect::<ocap_kernel_type::Result<Vec<_>>>()?;
        Ok(CapData::new(self.body.into_bytes(), slots))
    }

    pub fn from_cap_data(data: CapData<String>) -> Self {
        Self { body: String::from_utf8_lossy(&data.body).into_owned(), slots: data.slots }
    }
}
