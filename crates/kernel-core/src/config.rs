// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! Cluster and vat configuration.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestartPolicy {
    Never,
    Always,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        RestartPolicy::Never
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum IoChannelDescriptor {
    Socket { path: String },
    Stdio,
}

#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VatConfig {
    pub bundle_spec: String,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub restart_policy: RestartPolicy,
}

/// A `ClusterConfig` as received over `launchSubcluster`. `vats` is an
/// `IndexMap`, not a `BTreeMap`: `SubclusterManager::launch` launches vats in
/// the order they appear here, which is the order they were declared in the
/// incoming config, not alphabetical order by name.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    pub bootstrap: String,
    pub vats: IndexMap<String, VatConfig>,
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default)]
    pub io: BTreeMap<String, IoChannelDescriptor>,
}

impl ClusterConfig {
    /// Static validation: the bootstrap vat must exist
    /// and there must be no duplicate vat names. Serde's `IndexMap` already
    /// rules out literal key duplication, so this only confirms the
    /// bootstrap reference resolves and normalizes relative bundle specs.
    pub fn validate(&mut self) -> ocap_kernel_type::Result<()> {
        if !self.vats.contains_key(&self.bootstrap) {
            return Err(ocap_kernel_type::Error::invalid_config(format!(
                "bootstrap vat {:?} is not present in the vat map",
                self.bootstrap
            )));
        }
        for vat in self.vats.values_mut() {
            vat.bundle_spec = normalize_bundle_spec(&vat.bundle_spec);
        }
        for (name, io) in &self.io {
            if let IoChannelDescriptor::Socket { path } = io {
                if path.is_empty() {
                    return Err(ocap_kernel_type::Error::invalid_config(format!(
                        "io channel {name:?} has an empty socket path"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Relative `bundleSpec` paths are normalized to `file://` URLs before being
/// stored.
pub fn normalize_bundle_spec(spec: &str) -> String {
    if spec.contains("://") {
        spec.to_string()
    } else {
        format!("file://{spec}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_bootstrap_is_invalid() {
        let mut cfg = ClusterConfig { bootstrap: "a".into(), ..Default::default() };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.kind(), ocap_kernel_type::ErrorKind::InvalidConfig);
    }

    #[test]
    fn relative_bundle_spec_is_normalized() {
        let mut cfg = ClusterConfig::default();
        cfg.bootstrap = "a".into();
        cfg.vats.insert("a".into(), VatConfig { bundle_spec: "bundles/a.bundle".into(), ..Default::default() });
        cfg.validate().unwrap();
        assert_eq!(cfg.vats["a"].bundle_spec, "file://bundles/a.bundle");
    }

    #[test]
    fn absolute_url_is_left_alone() {
        assert_eq!(normalize_bundle_spec("https://example.com/a.bundle"), "https://example.com/a.bundle");
    }
}
