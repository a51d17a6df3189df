// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
//! Label-based bookkeeping of which Instrumenter owns a pod's sidecar.
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::constants::{labels, SIDECAR_NAME};
use crate::sidecar::builder::SidecarSpec;

/// The Instrumenter currently owning this pod's sidecar, if any. An empty
/// label value counts as unowned.
pub fn owner_of(pod: &Pod) -> Option<&str> {
    pod.labels()
        .get(labels::INSTRUMENTED_BY)
        .map(String::as_str)
        .filter(|owner| !owner.is_empty())
}

/// Attach a sidecar to the pod and claim ownership for `owner`.
///
/// Replaces an existing same-named sidecar or appends a new one, merges the
/// spec's annotations, and forces `shareProcessNamespace` on so the sidecar
/// can observe the target process. The previous value of
/// `shareProcessNamespace` is not recorded and will not be restored on strip.
pub fn attach_sidecar(owner: &str, sidecar: &SidecarSpec, pod: &mut Pod) {
    let spec = pod.spec.get_or_insert_with(Default::default);
    match spec.containers.iter_mut().find(|c| c.name == SIDECAR_NAME) {
        Some(existing) => *existing = sidecar.container.clone(),
        None => spec.containers.push(sidecar.container.clone()),
    }
    spec.share_process_namespace = Some(true);
    pod.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(labels::INSTRUMENTED_BY.to_string(), owner.to_string());
    if !sidecar.annotations.is_empty() {
        pod.metadata
            .annotations
            .get_or_insert_with(Default::default)
            .extend(sidecar.annotations.clone());
    }
}

/// Release a pod: drop the ownership marker and remove the sidecar container.
/// `shareProcessNamespace` and the scrape annotations are left as they are;
/// the owning Instrumenter may already be gone, so neither the prior flag
/// value nor the configured annotation keys are recoverable here.
pub fn strip_sidecar(pod: &mut Pod) {
    if let Some(pod_labels) = pod.metadata.labels.as_mut() {
        pod_labels.remove(labels::INSTRUMENTED_BY);
    }
    if let Some(spec) = pod.spec.as_mut() {
        spec.containers.retain(|c| c.name != SIDECAR_NAME);
    }
}
