// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
//! Decides whether and how a pod's instrumentation must change. Both control
//! paths (admission and reconcile) go through [`decide`], so they converge on
//! the same result for the same inputs.
use k8s_openapi::api::core::v1::{Container, Pod};
use kube::ResourceExt;
use tracing::{debug, warn};

use crate::constants::SIDECAR_NAME;
use crate::error::Result;
use crate::sidecar::builder::{build_sidecar, SidecarSpec};
use crate::sidecar::ownership::{attach_sidecar, owner_of};
use crate::types::instrumenter::Instrumenter;

/// Outcome of evaluating one Instrumenter against one pod
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Skip(SkipReason),
    Inject(SidecarSpec),
    Update(SidecarSpec),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No value under the selector label; the pod has not opted in
    NotSelected,
    /// Another Instrumenter already owns this pod's sidecar
    ForeignOwner(String),
    /// The sidecar already has the desired shape
    UpToDate,
}

/// Evaluate an Instrumenter against a pod.
///
/// Pure: identical inputs give identical outputs. A build failure (bad port
/// label, bad endpoint) comes back as `Err`; callers log it and leave the pod
/// untouched.
pub fn decide(instrumenter: &Instrumenter, pod: &Pod) -> Result<Decision> {
    let selected = pod
        .labels()
        .get(instrumenter.port_label())
        .is_some_and(|port| !port.is_empty());
    if !selected {
        return Ok(Decision::Skip(SkipReason::NotSelected));
    }
    if let Some(owner) = owner_of(pod) {
        // First owner wins; never override another Instrumenter's claim
        if owner != instrumenter.name_any() {
            return Ok(Decision::Skip(SkipReason::ForeignOwner(owner.to_string())));
        }
    }
    let desired = build_sidecar(instrumenter, pod)?;
    match find_sidecar(pod) {
        None => Ok(Decision::Inject(desired)),
        Some(current) if sidecar_matches(&desired.container, current) => {
            Ok(Decision::Skip(SkipReason::UpToDate))
        }
        Some(_) => Ok(Decision::Update(desired)),
    }
}

/// Apply the first Instrumenter that wants to mutate the pod.
///
/// Instrumenters are evaluated in lexicographic name order so that several
/// configurations matching the same pod resolve deterministically. Returns
/// the name of the Instrumenter that claimed the pod, if any.
pub fn instrument_pod(mut instrumenters: Vec<Instrumenter>, pod: &mut Pod) -> Option<String> {
    instrumenters.sort_by_key(|i| i.name_any());
    for instrumenter in &instrumenters {
        let name = instrumenter.name_any();
        match decide(instrumenter, pod) {
            Ok(Decision::Inject(sidecar)) | Ok(Decision::Update(sidecar)) => {
                attach_sidecar(&name, &sidecar, pod);
                return Some(name);
            }
            Ok(Decision::Skip(reason)) => {
                debug!(
                    "Instrumenter {} leaves pod {} alone: {:?}",
                    name,
                    pod.name_any(),
                    reason
                );
            }
            Err(e) => {
                warn!("Skipping misconfigured Instrumenter {}: {}", name, e);
            }
        }
    }
    None
}

fn find_sidecar(pod: &Pod) -> Option<&Container> {
    pod.spec
        .as_ref()?
        .containers
        .iter()
        .find(|c| c.name == SIDECAR_NAME)
}

/// Deep equality on the fields the builder controls. Fields the API server
/// defaults on live containers don't affect the comparison.
fn sidecar_matches(desired: &Container, actual: &Container) -> bool {
    desired.name == actual.name
        && desired.image == actual.image
        && desired.image_pull_policy == actual.image_pull_policy
        && desired.security_context == actual.security_context
        && desired.env == actual.env
}
