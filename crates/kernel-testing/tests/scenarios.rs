// Copyright (c) ocap-kernel.dev 2025
// This file is licensed under the Apache-2.0 license

//! End-to-end scenarios against the public `Kernel` facade.
//!
//! Scenario coverage note: S3 (GC drops an orphaned object once
//! `bringOutYourDead` confirms it) and S5 (an uncommitted crank never
//! becomes visible after a crash) are exercised as lower-level unit tests
//! next to the code they cover (`ocap_kernel_engine::gc`,
//! `ocap_kernel_store`) rather than duplicated here, since both are
//! properties of a single transaction rather than of the full facade.

use std::sync::{Arc, Mutex};

use ocap_kernel_core::{Delivery, ResolutionKind, ServiceEntry, Syscall, SyscallResolution};
use ocap_kernel_store::ServicesRegistry;
use ocap_kernel_testing::{cluster_config, silent_vat, test_kernel, test_kernel_with_services, ScriptedVat, SequentialLauncher};
use ocap_kernel_type::{CapData, ErrorKind, KernelObjectId};

/// S1: a two-vat subcluster launch delivers `bootstrap` to the configured
/// bootstrap vat with both vats' roots in its payload, and the call
/// completes once that vat resolves the result promise.
#[test]
fn two_vat_bootstrap_hands_both_roots_to_the_bootstrap_vat() {
    let kernel = test_kernel();

    let seen_vat_names: Arc<Mutex<Option<Vec<String>>>> = Arc::new(Mutex::new(None));
    let seen_for_handler = seen_vat_names.clone();
    let bootstrap_vat = ScriptedVat::new(move |delivery| match delivery {
        Delivery::Message { method, args, result: Some(result), .. } if method == "bootstrap" => {
            let decoded: serde_json::Value = serde_json::from_slice(&args.body).expect("bootstrap body is JSON");
            let names: Vec<String> = decoded["vats"].as_object().expect("vats map").keys().cloned().collect();
            *seen_for_handler.lock().unwrap() = Some(names);
            assert_eq!(args.slots.len(), 2, "one slot per named vat");
            Ok(vec![Syscall::Resolve {
                resolutions: vec![SyscallResolution { promise: result, resolution: ResolutionKind::Fulfill, value: CapData::empty() }],
            }])
        }
        other => panic!("unexpected delivery to bootstrap vat: {other:?}"),
    });

    let mut launcher = SequentialLauncher::new();
    launcher.push(Box::new(bootstrap_vat));
    launcher.push(Box::new(silent_vat()));

    let result = kernel.launch_subcluster(cluster_config("a", &["a", "b"]), &mut launcher, false, None).unwrap();

    let names = seen_vat_names.lock().unwrap().clone().expect("bootstrap vat was invoked");
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert!(kernel.status().subclusters.contains(&result.subcluster_id));
    assert_eq!(kernel.status().queue_depth, 0, "bootstrap resolved, nothing left queued");
}

/// S6: requesting a `systemOnly` service from an ordinary (non-system)
/// launch is rejected before any vat is started, and nothing from the
/// failed attempt is left behind.
#[test]
fn system_only_service_rejects_an_ordinary_launch() {
    let mut services = ServicesRegistry::default();
    services.register(ServiceEntry { name: "admin-console".into(), kref: KernelObjectId(1), system_only: true });
    let kernel = test_kernel_with_services(services);

    let mut config = cluster_config("a", &["a"]);
    config.services.push("admin-console".into());

    let mut launcher = SequentialLauncher::new();
    launcher.push(Box::new(silent_vat()));

    let err = kernel.launch_subcluster(config, &mut launcher, false, None).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ServiceForbidden);
    assert!(kernel.status().vats.is_empty(), "no vat should have been launched");
    assert!(kernel.status().subclusters.is_empty());
}

/// A system launch may request the same service the previous test
/// rejected; this is the positive half of the same check.
#[test]
fn system_only_service_is_allowed_for_a_system_launch() {
    let mut services = ServicesRegistry::default();
    services.register(ServiceEntry { name: "admin-console".into(), kref: KernelObjectId(1), system_only: true });
    let kernel = test_kernel_with_services(services);

    let mut config = cluster_config("a", &["a"]);
    config.services.push("admin-console".into());

    let bootstrap_vat = ScriptedVat::new(|delivery| match delivery {
        Delivery::Message { result: Some(result), .. } => Ok(vec![Syscall::Resolve {
            resolutions: vec![SyscallResolution { promise: result, resolution: ResolutionKind::Fulfill, value: CapData::empty() }],
        }]),
        _ => Ok(vec![]),
    });
    let mut launcher = SequentialLauncher::new();
    launcher.push(Box::new(bootstrap_vat));

    let result = kernel
        .launch_subcluster(config, &mut launcher, true, Some("system-a".into()))
        .expect("system launch may use a system-only service");
    assert!(kernel.status().subclusters.contains(&result.subcluster_id));
}

/// Terminating a subcluster tears down every member vat; `getStatus`
/// reflects the subcluster and its vats as gone immediately afterwards.
#[test]
fn terminating_a_subcluster_removes_its_vats_and_record() {
    let kernel = test_kernel();
    let mut launcher = SequentialLauncher::new();
    launcher.push(Box::new(silent_vat()));
    launcher.push(Box::new(silent_vat()));

    let result = kernel.launch_subcluster(cluster_config("a", &["a", "b"]), &mut launcher, false, None).unwrap();
    assert_eq!(kernel.status().vats.len(), 2);

    kernel.terminate_subcluster(result.subcluster_id).unwrap();

    assert!(kernel.status().vats.is_empty());
    assert!(!kernel.status().subclusters.contains(&result.subcluster_id));
}

/// `queueMessage` mints a fresh durable token for any capability an
/// external reply carries, so the caller never sees a raw kref, and
/// `revoke` removes that token from `listRefs` afterwards.
#[test]
fn queue_message_mints_a_durable_ref_that_revoke_then_removes() {
    let kernel = test_kernel();
    let bootstrap_vat = ScriptedVat::new(|delivery| match delivery {
        Delivery::Message { method, target, result: Some(result), .. } if method == "ping" => {
            Ok(vec![Syscall::Resolve {
                resolutions: vec![SyscallResolution {
                    promise: result,
                    resolution: ResolutionKind::Fulfill,
                    value: CapData::new(vec![], vec![target]),
                }],
            }])
        }
        Delivery::Message { result: Some(result), .. } => Ok(vec![Syscall::Resolve {
            resolutions: vec![SyscallResolution { promise: result, resolution: ResolutionKind::Fulfill, value: CapData::empty() }],
        }]),
        _ => Ok(vec![]),
    });
    let mut launcher = SequentialLauncher::new();
    launcher.push(Box::new(bootstrap_vat));

    let result = kernel.launch_subcluster(cluster_config("a", &["a"]), &mut launcher, false, None).unwrap();

    let reply = kernel.queue_message(&result.root_kref.to_string(), "ping".into(), CapData::empty()).unwrap();
    assert_eq!(reply.slots.len(), 1, "the reply echoed back one capability");
    let token = &reply.slots[0];

    let refs = kernel.list_refs();
    assert!(refs.iter().any(|(t, _)| t == token), "the minted token is listed");

    kernel.revoke(token).unwrap();
    let refs_after = kernel.list_refs();
    assert!(!refs_after.iter().any(|(t, _)| t == token), "revoke removed the token");
}
