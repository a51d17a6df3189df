// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Instrumenter reconciler - converges existing pods whenever an
//! Instrumenter changes, and releases them when it is deleted.
//!
//! Sidecars cannot be added to a live pod, so a positive decision always
//! means deleting the pod: ownerless pods are recreated here with the
//! sidecar already attached, pods managed by a controller come back through
//! their owner and are converged by the admission webhook instead.

use crate::constants::reconcile::{ERROR_INTERVAL_SECS, RESYNC_INTERVAL_SECS};
use crate::constants::{labels, FINALIZER, OPERATOR_NAME};
use crate::error::{PillionError, Result};
use crate::kubernetes::{delete_pod, list_pods_owned_by, list_pods_with_label, recreate_pod};
use crate::sidecar::{attach_sidecar, decide, strip_sidecar, Decision};
use crate::types::instrumenter::Instrumenter;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{Patch, PatchParams},
    runtime::{
        controller::Action,
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        Controller,
    },
    Api, Client, ResourceExt,
};
use kube_runtime::watcher::Config as WatcherConfig;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};

pub struct InstrumenterReconciler {
    client: Client,
    namespace: Option<String>,
}

impl InstrumenterReconciler {
    pub fn new(client: Client, namespace: Option<String>) -> Self {
        Self { client, namespace }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let instrumenters: Api<Instrumenter> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let pods: Api<Pod> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        let context = Arc::new(self);

        Controller::new(instrumenters, WatcherConfig::default())
            .watches(
                pods,
                WatcherConfig::default().labels(labels::INSTRUMENTED_BY),
                |pod: Pod| {
                    // Pod events re-trigger the Instrumenter that owns the pod
                    let namespace = pod.namespace()?;
                    let owner = pod.labels().get(labels::INSTRUMENTED_BY)?.clone();
                    Some(ObjectRef::<Instrumenter>::new(&owner).within(&namespace))
                },
            )
            .run(reconcile, error_policy, context)
            .for_each(|res| async move {
                match res {
                    Ok(o) => debug!("Reconciled instrumenter: {:?}", o),
                    Err(e) => warn!("Reconciliation error: {:?}", e),
                }
            })
            .await;

        Ok(())
    }
}

async fn reconcile(
    instrumenter: Arc<Instrumenter>,
    ctx: Arc<InstrumenterReconciler>,
) -> Result<Action> {
    let namespace = instrumenter
        .namespace()
        .ok_or_else(|| PillionError::MissingNamespace(instrumenter.name_any()))?;
    let instrumenters: Api<Instrumenter> = Api::namespaced(ctx.client.clone(), &namespace);

    finalizer(&instrumenters, FINALIZER, instrumenter, |event| async {
        match event {
            Finalizer::Apply(instrumenter) => apply_instrumenter(&ctx.client, &instrumenter).await,
            Finalizer::Cleanup(instrumenter) => {
                cleanup_instrumenter(&ctx.client, &instrumenter).await
            }
        }
    })
    .await
    .map_err(|e| PillionError::FinalizerError(Box::new(e)))
}

/// Converge all pods the Instrumenter selects, and strip pods it still owns
/// but no longer selects. Any store failure aborts the pass; the next pass
/// recomputes everything from current cluster state.
#[instrument(skip(client, instrumenter), fields(instrumenter = %instrumenter.name_any()))]
pub(crate) async fn apply_instrumenter(
    client: &Client,
    instrumenter: &Instrumenter,
) -> Result<Action> {
    let name = instrumenter.name_any();
    let namespace = instrumenter
        .namespace()
        .ok_or_else(|| PillionError::MissingNamespace(name.clone()))?;
    let port_label = instrumenter.port_label();
    if port_label.is_empty() {
        warn!(
            "Instrumenter {}/{} has an empty selector label, skipping",
            namespace, name
        );
        return Ok(Action::requeue(Duration::from_secs(RESYNC_INTERVAL_SECS)));
    }

    let matching = list_pods_with_label(client, &namespace, port_label).await?;
    debug!(
        "Instrumenter {}/{} selects {} pods",
        namespace,
        name,
        matching.len()
    );
    for pod in &matching {
        converge_pod(client, &namespace, instrumenter, pod).await?;
    }

    // Pods still marked as ours but no longer selected lose their sidecar
    let owned = list_pods_owned_by(client, &namespace, &name).await?;
    for pod in owned {
        let selected = pod
            .labels()
            .get(port_label)
            .is_some_and(|port| !port.is_empty());
        if selected || pod.metadata.deletion_timestamp.is_some() {
            continue;
        }
        release_pod(client, &namespace, pod).await?;
    }

    update_status(client, &namespace, &name).await;

    Ok(Action::requeue(Duration::from_secs(RESYNC_INTERVAL_SECS)))
}

/// Release every pod the deleted Instrumenter still owns.
#[instrument(skip(client, instrumenter), fields(instrumenter = %instrumenter.name_any()))]
pub(crate) async fn cleanup_instrumenter(
    client: &Client,
    instrumenter: &Instrumenter,
) -> Result<Action> {
    let name = instrumenter.name_any();
    let namespace = instrumenter
        .namespace()
        .ok_or_else(|| PillionError::MissingNamespace(name.clone()))?;

    let owned = list_pods_owned_by(client, &namespace, &name).await?;
    info!(
        "Instrumenter {}/{} deleted, releasing {} pods",
        namespace,
        name,
        owned.len()
    );
    for pod in owned {
        release_pod(client, &namespace, pod).await?;
    }

    Ok(Action::await_change())
}

async fn converge_pod(
    client: &Client,
    namespace: &str,
    instrumenter: &Instrumenter,
    pod: &Pod,
) -> Result<()> {
    let pod_name = pod.name_any();
    if pod.metadata.deletion_timestamp.is_some() {
        debug!("Pod {}/{} is already terminating, skipping", namespace, pod_name);
        return Ok(());
    }
    match decide(instrumenter, pod) {
        Ok(Decision::Skip(reason)) => {
            debug!("Pod {}/{} needs no change: {:?}", namespace, pod_name, reason);
            Ok(())
        }
        Ok(Decision::Inject(sidecar)) | Ok(Decision::Update(sidecar)) => {
            info!(
                "Recreating pod {}/{} with an instrumentation sidecar",
                namespace, pod_name
            );
            delete_pod(client, namespace, &pod_name).await?;
            if pod.owner_references().is_empty() {
                let mut fresh = pod.clone();
                attach_sidecar(&instrumenter.name_any(), &sidecar, &mut fresh);
                recreate_pod(client, namespace, fresh).await?;
            }
            // A managed pod comes back through its controller and gets its
            // sidecar from the admission webhook
            Ok(())
        }
        Err(e) => {
            warn!("Not instrumenting pod {}/{}: {}", namespace, pod_name, e);
            Ok(())
        }
    }
}

async fn release_pod(client: &Client, namespace: &str, pod: Pod) -> Result<()> {
    let pod_name = pod.name_any();
    info!(
        "Removing instrumentation sidecar from pod {}/{}",
        namespace, pod_name
    );
    delete_pod(client, namespace, &pod_name).await?;
    if pod.owner_references().is_empty() {
        let mut fresh = pod.clone();
        strip_sidecar(&mut fresh);
        recreate_pod(client, namespace, fresh).await?;
    }
    Ok(())
}

/// Record how many pods currently carry this Instrumenter's sidecar.
/// Best-effort: a failed status write never fails the pass.
async fn update_status(client: &Client, namespace: &str, name: &str) {
    let count = match list_pods_owned_by(client, namespace, name).await {
        Ok(pods) => pods.len() as i32,
        Err(e) => {
            warn!(
                "Could not count pods owned by Instrumenter {}/{}: {}",
                namespace, name, e
            );
            return;
        }
    };
    let instrumenters: Api<Instrumenter> = Api::namespaced(client.clone(), namespace);
    let status = json!({
        "apiVersion": "pillion.geeko.me/v1alpha1",
        "kind": "Instrumenter",
        "status": { "instrumentedPods": count }
    });
    let pp = PatchParams::apply(OPERATOR_NAME).force();
    if let Err(e) = instrumenters
        .patch_status(name, &pp, &Patch::Apply(&status))
        .await
    {
        warn!(
            "Could not update status of Instrumenter {}/{}: {}",
            namespace, name, e
        );
    }
}

fn error_policy(
    _instrumenter: Arc<Instrumenter>,
    error: &PillionError,
    _ctx: Arc<InstrumenterReconciler>,
) -> Action {
    error!("Reconciliation error: {}", error);
    Action::requeue(Duration::from_secs(ERROR_INTERVAL_SECS))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sidecar::build_sidecar;
    use crate::test_utils::{list_json, status_success_json, MockService};
    use crate::types::instrumenter::{Exporter, InstrumenterSpec};
    use k8s_openapi::api::core::v1::{Container, PodSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::api::ObjectMeta;

    const PODS_PATH: &str = "/api/v1/namespaces/default/pods";
    const STATUS_PATH: &str =
        "/apis/pillion.geeko.me/v1alpha1/namespaces/default/instrumenters/my-instrumenter/status";

    fn make_instrumenter() -> Instrumenter {
        Instrumenter {
            metadata: ObjectMeta {
                name: Some("my-instrumenter".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            spec: InstrumenterSpec {
                export: vec![Exporter::Prometheus],
                ..Default::default()
            },
            status: None,
        }
    }

    fn make_pod(labels: &[(&str, &str)], owned: bool) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some("my-pod".to_string()),
                namespace: Some("default".to_string()),
                resource_version: Some("42".to_string()),
                uid: Some("pod-uid-1".to_string()),
                labels: if labels.is_empty() {
                    None
                } else {
                    Some(
                        labels
                            .iter()
                            .map(|(k, v)| (k.to_string(), v.to_string()))
                            .collect(),
                    )
                },
                owner_references: if owned {
                    Some(vec![OwnerReference {
                        api_version: "apps/v1".to_string(),
                        kind: "ReplicaSet".to_string(),
                        name: "my-app-5d4f7c".to_string(),
                        uid: "rs-uid-1".to_string(),
                        ..Default::default()
                    }])
                } else {
                    None
                },
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "app".to_string(),
                    ..Default::default()
                }],
                ..Default::default()
            }),
            status: None,
        }
    }

    fn make_converged_pod(instrumenter: &Instrumenter) -> Pod {
        let mut pod = make_pod(&[("pillion.geeko.me/open-port", "8080")], false);
        let sidecar = build_sidecar(instrumenter, &pod).unwrap();
        attach_sidecar("my-instrumenter", &sidecar, &mut pod);
        pod
    }

    fn pod_list_body(pods: &[&Pod]) -> String {
        let items: Vec<serde_json::Value> = pods
            .iter()
            .map(|pod| serde_json::to_value(pod).unwrap())
            .collect();
        list_json("v1", "PodList", &items)
    }

    #[tokio::test]
    async fn test_apply_leaves_converged_pod_alone() {
        let instrumenter = make_instrumenter();
        let pod = make_converged_pod(&instrumenter);
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_patch(
                STATUS_PATH,
                200,
                &serde_json::to_string(&instrumenter).unwrap(),
            );
        let client = mock.clone().into_client();

        apply_instrumenter(&client, &instrumenter).await.unwrap();

        assert!(mock.calls_with_method("DELETE").is_empty());
        assert!(mock.calls_with_method("POST").is_empty());
        let patches = mock.calls_with_method("PATCH");
        assert_eq!(patches.len(), 1);
        assert!(patches[0].body.contains("\"instrumentedPods\":1"));
    }

    #[tokio::test]
    async fn test_apply_recreates_ownerless_pod_with_sidecar() {
        let instrumenter = make_instrumenter();
        let pod = make_pod(&[("pillion.geeko.me/open-port", "8080")], false);
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_delete(
                &format!("{}/my-pod", PODS_PATH),
                200,
                &status_success_json(),
            )
            .on_post(PODS_PATH, 201, &serde_json::to_string(&pod).unwrap());
        let client = mock.clone().into_client();

        apply_instrumenter(&client, &instrumenter).await.unwrap();

        assert_eq!(mock.calls_with_method("DELETE").len(), 1);
        let posts = mock.calls_with_method("POST");
        assert_eq!(posts.len(), 1);

        let recreated: Pod = serde_json::from_str(&posts[0].body).unwrap();
        let spec = recreated.spec.as_ref().unwrap();
        assert_eq!(spec.containers.len(), 2);
        assert_eq!(spec.containers[1].name, "pillion-autoinstrumenter");
        assert_eq!(spec.share_process_namespace, Some(true));
        assert_eq!(
            recreated
                .labels()
                .get("pillion.geeko.me/instrumented-by")
                .unwrap(),
            "my-instrumenter"
        );
        assert!(recreated.metadata.resource_version.is_none());
        assert!(recreated.metadata.uid.is_none());
    }

    #[tokio::test]
    async fn test_apply_deletes_managed_pod_without_recreating() {
        let instrumenter = make_instrumenter();
        let pod = make_pod(&[("pillion.geeko.me/open-port", "8080")], true);
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_delete(
                &format!("{}/my-pod", PODS_PATH),
                200,
                &status_success_json(),
            );
        let client = mock.clone().into_client();

        apply_instrumenter(&client, &instrumenter).await.unwrap();

        assert_eq!(mock.calls_with_method("DELETE").len(), 1);
        assert!(mock.calls_with_method("POST").is_empty());
    }

    #[tokio::test]
    async fn test_apply_without_matching_pods_touches_nothing() {
        let instrumenter = make_instrumenter();
        let mock = MockService::new().on_get(PODS_PATH, 200, &pod_list_body(&[]));
        let client = mock.clone().into_client();

        apply_instrumenter(&client, &instrumenter).await.unwrap();

        assert!(mock.calls_with_method("DELETE").is_empty());
        assert!(mock.calls_with_method("POST").is_empty());
    }

    #[tokio::test]
    async fn test_apply_strips_owned_pod_that_no_longer_matches() {
        let instrumenter = make_instrumenter();
        // Owned and carrying a sidecar, but the selector label is gone
        let mut pod = make_pod(&[("pillion.geeko.me/instrumented-by", "my-instrumenter")], false);
        pod.spec.as_mut().unwrap().containers.push(Container {
            name: "pillion-autoinstrumenter".to_string(),
            ..Default::default()
        });
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_delete(
                &format!("{}/my-pod", PODS_PATH),
                200,
                &status_success_json(),
            )
            .on_post(PODS_PATH, 201, &serde_json::to_string(&pod).unwrap());
        let client = mock.clone().into_client();

        apply_instrumenter(&client, &instrumenter).await.unwrap();

        assert_eq!(mock.calls_with_method("DELETE").len(), 1);
        let posts = mock.calls_with_method("POST");
        assert_eq!(posts.len(), 1);

        let stripped: Pod = serde_json::from_str(&posts[0].body).unwrap();
        let spec = stripped.spec.as_ref().unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].name, "app");
        assert!(stripped
            .labels()
            .get("pillion.geeko.me/instrumented-by")
            .is_none());
    }

    #[tokio::test]
    async fn test_apply_aborts_on_store_error() {
        let instrumenter = make_instrumenter();
        let error_body = r#"{"kind":"Status","apiVersion":"v1","status":"Failure","message":"internal error","reason":"InternalError","code":500}"#;
        let mock = MockService::new().on_get(PODS_PATH, 500, error_body);
        let client = mock.into_client();

        let result = apply_instrumenter(&client, &instrumenter).await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_releases_ownerless_pod() {
        let instrumenter = make_instrumenter();
        let pod = make_converged_pod(&instrumenter);
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_delete(
                &format!("{}/my-pod", PODS_PATH),
                200,
                &status_success_json(),
            )
            .on_post(PODS_PATH, 201, &serde_json::to_string(&pod).unwrap());
        let client = mock.clone().into_client();

        cleanup_instrumenter(&client, &instrumenter).await.unwrap();

        assert_eq!(mock.calls_with_method("DELETE").len(), 1);
        let posts = mock.calls_with_method("POST");
        assert_eq!(posts.len(), 1);

        let released: Pod = serde_json::from_str(&posts[0].body).unwrap();
        let spec = released.spec.as_ref().unwrap();
        assert_eq!(spec.containers.len(), 1);
        assert_eq!(spec.containers[0].name, "app");
        assert!(released
            .labels()
            .get("pillion.geeko.me/instrumented-by")
            .is_none());
    }

    #[tokio::test]
    async fn test_cleanup_deletes_managed_pod_without_recreating() {
        let instrumenter = make_instrumenter();
        let mut pod = make_pod(
            &[
                ("pillion.geeko.me/open-port", "8080"),
                ("pillion.geeko.me/instrumented-by", "my-instrumenter"),
            ],
            true,
        );
        pod.spec.as_mut().unwrap().containers.push(Container {
            name: "pillion-autoinstrumenter".to_string(),
            ..Default::default()
        });
        let mock = MockService::new()
            .on_get(PODS_PATH, 200, &pod_list_body(&[&pod]))
            .on_delete(
                &format!("{}/my-pod", PODS_PATH),
                200,
                &status_success_json(),
            );
        let client = mock.clone().into_client();

        cleanup_instrumenter(&client, &instrumenter).await.unwrap();

        assert_eq!(mock.calls_with_method("DELETE").len(), 1);
        assert!(mock.calls_with_method("POST").is_empty());
    }
}
