// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! The console daemon: a `Kernel` behind a JSON-RPC 2.0 socket.
//! `main.rs` owns the socket accept loop; this crate holds the
//! parts worth unit-testing and the parts `bin/cli` needs to agree with
//! (the wire shapes and the stable error-code mapping).

pub mod launcher;
pub mod paths;
pub mod wire;

use std::sync::Arc;

use ocap_kernel_core::ClusterConfig;
use ocap_kernel_engine::{Kernel, VatLauncher};
use ocap_kernel_type::{Error, SubclusterId};

use crate::wire::{Request, Response};

/// Dispatches one already-parsed JSON-RPC request against a `Kernel`.
/// Blocking: callers running inside an async task should wrap this in
/// `spawn_blocking`, since every `Kernel` method serializes behind its
/// crank lock (`waitForCrank`).
pub struct Daemon {
    kernel: Arc<Kernel>,
}

impl Daemon {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    pub fn kernel(&self) -> &Arc<Kernel> {
        &self.kernel
    }

    #[tracing::instrument(name = "daemon::handle", level = "debug", skip(self, req, launcher))]
    pub fn handle(&self, req: Request, launcher: &mut dyn VatLauncher) -> Response {
        let id = req.id.clone();
        let result = self.dispatch(&req, launcher);
        match result {
            Ok(value) => Response::success(id, value),
            Err(err) => Response::error(id, &err),
        }
    }

    fn dispatch(&self, req: &Request, launcher: &mut dyn VatLauncher) -> ocap_kernel_type::Result<serde_json::Value> {
        match req.method.as_str() {
            "getStatus" => {
                let status = self.kernel.status();
                Ok(serde_json::json!({
                    "vats": status.vats.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "subclusters": status.subclusters.iter().map(ToString::to_string).collect::<Vec<_>>(),
                    "queueDepth": status.queue_depth,
                }))
            }
            "launchSubcluster" => {
                let config: ClusterConfig = serde_json::from_value(req.params.get("config").cloned().unwrap_or_default())
                    .map_err(|e| Error::invalid_config(format!("malformed config: {e}")))?;
                let result = self.kernel.launch_subcluster(config, launcher, false, None)?;
                Ok(serde_json::json!({
                    "subclusterId": result.subcluster_id.to_string(),
                    "rootKref": result.root_kref.to_string(),
                    "bootstrapResult": result.bootstrap_result.to_string(),
                }))
            }
            "terminateSubcluster" => {
                let id: SubclusterId = req
                    .params
                    .get("subclusterId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::invalid_config("missing subclusterId"))?
                    .parse()?;
                self.kernel.terminate_subcluster(id)?;
                Ok(serde_json::Value::Null)
            }
            "queueMessage" => {
                let target = req.params.get("target").and_then(|v| v.as_str()).ok_or_else(|| Error::bad_ref("missing target"))?;
                let method = req
                    .params
                    .get("method")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| Error::invalid_config("missing method"))?
                    .to_string();
                let args: wire::WireCapData = req
                    .params
                    .get("args")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| Error::invalid_config(format!("malformed args: {e}")))?
                    .unwrap_or_default();
                let args = args.into_cap_data(|s| self.kernel.resolve_ref(&s))?;
                let reply = self.kernel.queue_message(target, method, args)?;
                Ok(serde_json::to_value(wire::WireCapData::from_cap_data(reply)).expect("WireCapData serializes"))
            }
            "revoke" => {
                let token = req.params.get("kref").and_then(|v| v.as_str()).ok_or_else(|| Error::bad_ref("missing kref"))?;
                self.kernel.revoke(token)?;
                Ok(serde_json::json!({"ok": true}))
            }
            "listRefs" => {
                let refs = self
                    .kernel
                    .list_refs()
                    .into_iter()
                    .map(|(token, kref)| serde_json::json!({"ref": token, "kref": kref.to_string()}))
                    .collect::<Vec<_>>();
                Ok(serde_json::json!({"refs": refs}))
            }
            "shutdown" => Ok(serde_json::Value::Null),
            other => Err(Error::invalid_config(format!("unknown method {other:?}"))),
        }
    }
}
