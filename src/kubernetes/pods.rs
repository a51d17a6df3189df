// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pod store operations used by the reconciler

use crate::constants::labels;
use crate::error::Result;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams, PostParams},
    Api, Client, ResourceExt,
};
use tracing::{debug, instrument};

/// List pods in a namespace that carry the given label key, whatever its value
pub async fn list_pods_with_label(
    client: &Client,
    namespace: &str,
    label: &str,
) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let list = pods.list(&ListParams::default().labels(label)).await?;
    Ok(list.items)
}

/// List pods in a namespace whose sidecar is owned by the named Instrumenter
pub async fn list_pods_owned_by(
    client: &Client,
    namespace: &str,
    owner: &str,
) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    let selector = format!("{}={}", labels::INSTRUMENTED_BY, owner);
    let list = pods.list(&ListParams::default().labels(&selector)).await?;
    Ok(list.items)
}

/// Delete a pod; a pod that is already gone counts as success
#[instrument(skip(client))]
pub async fn delete_pod(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    match pods.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(err)) if err.code == 404 => {
            debug!("Pod {}/{} was already deleted", namespace, name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Create a pod again under its existing name. Server-owned identity fields
/// are cleared first so the API server accepts the object as new.
#[instrument(skip(client, pod), fields(name = %pod.name_any()))]
pub async fn recreate_pod(client: &Client, namespace: &str, mut pod: Pod) -> Result<()> {
    pod.metadata.resource_version = None;
    pod.metadata.uid = None;
    pod.metadata.creation_timestamp = None;
    pod.metadata.managed_fields = None;
    pod.status = None;

    let pods: Api<Pod> = Api::namespaced(client.clone(), namespace);
    pods.create(&PostParams::default(), &pod).await?;
    Ok(())
}
