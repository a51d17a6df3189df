// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod mutation handler.
//!
//! Pods created through a workload controller never reach the reconciler in
//! their final shape, so the webhook instruments them on the way in. The
//! decision logic is shared with the reconciler; both paths produce the same
//! sidecar for the same inputs.

use axum::{extract::State, Json};
use json_patch::diff;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::ByteString;
use kube::{
    api::{Api, DynamicObject, ListParams},
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview},
    Client, ResourceExt,
};
use tracing::{debug, error, info, warn};

use crate::sidecar::instrument_pod;
use crate::types::instrumenter::Instrumenter;

/// Handle a mutating admission review for pods.
pub async fn mutate_handler(
    State(client): State<Client>,
    Json(review): Json<AdmissionReview<Pod>>,
) -> Json<serde_json::Value> {
    let request: AdmissionRequest<Pod> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!("Malformed admission review: {}", e);
            return Json(encode_review(
                AdmissionResponse::invalid(e.to_string()).into_review(),
            ));
        }
    };
    let response = mutate(&client, &request).await;
    Json(encode_review(response.into_review()))
}

/// Serialize the outgoing review with `response.patch` re-encoded as a
/// base64 string. kube writes the raw patch bytes as a JSON integer array,
/// but the admission API only accepts base64 for the patch field.
fn encode_review(review: AdmissionReview<DynamicObject>) -> serde_json::Value {
    let mut value = match serde_json::to_value(&review) {
        Ok(value) => value,
        Err(e) => {
            error!("Could not serialize admission review: {}", e);
            return serde_json::json!({
                "apiVersion": "admission.k8s.io/v1",
                "kind": "AdmissionReview"
            });
        }
    };
    if let Some(slot) = value.pointer_mut("/response/patch") {
        if let Ok(bytes) = serde_json::from_value::<Vec<u8>>(slot.clone()) {
            if let Ok(encoded) = serde_json::to_value(ByteString(bytes)) {
                *slot = encoded;
            }
        }
    }
    value
}

/// Evaluate the Instrumenters in the pod's namespace and patch the pod with
/// the winning sidecar. Always allows: a pod we cannot instrument right now
/// is created unchanged and converged by the reconciler later.
async fn mutate(client: &Client, request: &AdmissionRequest<Pod>) -> AdmissionResponse {
    let response = AdmissionResponse::from(request);
    let Some(pod) = &request.object else {
        debug!("Admission request {} carries no pod, allowing", request.uid);
        return response;
    };
    let Some(namespace) = request.namespace.clone().or_else(|| pod.namespace()) else {
        debug!("Pod {} has no namespace, allowing unchanged", pod.name_any());
        return response;
    };

    let instrumenters: Api<Instrumenter> = Api::namespaced(client.clone(), &namespace);
    let all = match instrumenters.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!("Could not list Instrumenters in {}: {}", namespace, e);
            return response;
        }
    };
    if all.is_empty() {
        return response;
    }

    let mut mutated = pod.clone();
    // The admission object may come in without a namespace of its own; pin it
    // before taking the snapshot so the patch never touches
    // /metadata/namespace
    mutated
        .metadata
        .namespace
        .get_or_insert_with(|| namespace.clone());
    let original = match serde_json::to_value(&mutated) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Could not serialize pod {}/{}: {}",
                namespace,
                mutated.name_any(),
                e
            );
            return response;
        }
    };

    let Some(owner) = instrument_pod(all, &mut mutated) else {
        debug!(
            "No Instrumenter claims pod {}/{}",
            namespace,
            mutated.name_any()
        );
        return response;
    };
    info!(
        "Instrumenter {} claims pod {}/{} at admission",
        owner,
        namespace,
        mutated.name_any()
    );

    let desired = match serde_json::to_value(&mutated) {
        Ok(value) => value,
        Err(e) => {
            warn!(
                "Could not serialize instrumented pod {}/{}: {}",
                namespace,
                mutated.name_any(),
                e
            );
            return response;
        }
    };
    match response.with_patch(diff(&original, &desired)) {
        Ok(patched) => patched,
        Err(e) => {
            warn!(
                "Could not serialize patch for pod {}/{}: {}",
                namespace,
                mutated.name_any(),
                e
            );
            AdmissionResponse::from(request)
        }
    }
}
