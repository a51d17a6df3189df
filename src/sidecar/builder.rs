// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
//! Builds the desired sidecar container (and its accompanying pod
//! annotations) for a pod from an Instrumenter's configuration.
use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, SecurityContext};
use kube::ResourceExt;
use url::Url;

use crate::constants::SIDECAR_NAME;
use crate::error::{PillionError, Result};
use crate::types::instrumenter::{Exporter, Instrumenter};

const METRICS_PATH: &str = "/v1/metrics";
const TRACES_PATH: &str = "/v1/traces";

/// Desired instrumentation state for one pod: the sidecar container plus the
/// pod-level annotations that must always be applied together with it
#[derive(Debug, Clone, PartialEq)]
pub struct SidecarSpec {
    pub container: Container,
    pub annotations: BTreeMap<String, String>,
}

/// Compute the sidecar container and scrape annotations for a pod.
///
/// Environment entries are appended in a fixed order: service identity first,
/// then the pull exporter, then the push exporters, then `overrideEnv`. The
/// sidecar runtime resolves duplicate keys last-one-wins, so this order is a
/// contract, not an accident.
pub fn build_sidecar(instrumenter: &Instrumenter, pod: &Pod) -> Result<SidecarSpec> {
    let port_label = instrumenter.port_label();
    let port = pod.labels().get(port_label).cloned().unwrap_or_default();
    validate_port(port_label, &port)?;

    let (service_name, service_namespace) = service_identity(pod);
    let mut env = vec![
        env_var("SERVICE_NAME", service_name.clone()),
        env_var("SERVICE_NAMESPACE", service_namespace),
        env_var("OPEN_PORT", port),
    ];
    let mut annotations = BTreeMap::new();

    if instrumenter.exports(Exporter::Prometheus) {
        configure_prometheus(instrumenter, &service_name, &mut env, &mut annotations);
    }
    let metrics = instrumenter.exports(Exporter::OtelMetrics);
    let traces = instrumenter.exports(Exporter::OtelTraces);
    if metrics || traces {
        configure_open_telemetry(instrumenter, metrics, traces, &mut env)?;
    }
    env.extend(instrumenter.spec.override_env.iter().cloned());

    Ok(SidecarSpec {
        container: Container {
            name: SIDECAR_NAME.to_string(),
            image: Some(instrumenter.spec.image.clone()),
            image_pull_policy: Some(instrumenter.spec.image_pull_policy.clone()),
            // The instrumenter attaches to the target process, which needs
            // root and privileged mode
            security_context: Some(SecurityContext {
                privileged: Some(true),
                run_as_user: Some(0),
                ..Default::default()
            }),
            env: Some(env),
            ..Default::default()
        },
        annotations,
    })
}

/// Service identity reported by the sidecar. Pods created by a workload
/// controller report the workload's name rather than the generated pod name.
fn service_identity(pod: &Pod) -> (String, String) {
    let name = pod
        .owner_references()
        .first()
        .map(|owner| owner.name.clone())
        .unwrap_or_else(|| pod.name_any());
    (name, pod.namespace().unwrap_or_default())
}

fn configure_prometheus(
    instrumenter: &Instrumenter,
    service_name: &str,
    env: &mut Vec<EnvVar>,
    annotations: &mut BTreeMap<String, String>,
) {
    let prometheus = &instrumenter.spec.prometheus;
    let port = prometheus.port.to_string();
    annotations.insert(prometheus.annotations.scrape.clone(), "true".to_string());
    annotations.insert(prometheus.annotations.port.clone(), port.clone());
    annotations.insert(prometheus.annotations.scheme.clone(), "http".to_string());
    annotations.insert(prometheus.annotations.path.clone(), prometheus.path.clone());
    env.push(env_var("PROMETHEUS_SERVICE_NAME", service_name));
    env.push(env_var("PROMETHEUS_PORT", port));
    env.push(env_var("PROMETHEUS_PATH", prometheus.path.clone()));
}

fn configure_open_telemetry(
    instrumenter: &Instrumenter,
    metrics: bool,
    traces: bool,
    env: &mut Vec<EnvVar>,
) -> Result<()> {
    let otel = &instrumenter.spec.open_telemetry;
    Url::parse(&otel.endpoint).map_err(|e| {
        PillionError::InvalidEndpoint(format!("{:?}: {}", otel.endpoint, e))
    })?;
    if metrics && traces {
        // Both signals go to the same collector, so configure it once
        env.push(env_var("OTEL_EXPORTER_OTLP_ENDPOINT", otel.endpoint.clone()));
    } else if metrics {
        env.push(env_var(
            "OTEL_EXPORTER_OTLP_METRICS_ENDPOINT",
            format!("{}{}", otel.endpoint, METRICS_PATH),
        ));
    } else {
        env.push(env_var(
            "OTEL_EXPORTER_OTLP_TRACES_ENDPOINT",
            format!("{}{}", otel.endpoint, TRACES_PATH),
        ));
    }
    if otel.insecure_skip_verify {
        env.push(env_var("OTEL_INSECURE_SKIP_VERIFY", "true"));
    }
    if let Some(interval) = &otel.interval {
        env.push(env_var("METRICS_INTERVAL", interval.clone()));
    }
    env.push(env_var("OTEL_EXPORTER_OTLP_PROTOCOL", "http/protobuf"));
    Ok(())
}

fn validate_port(label: &str, value: &str) -> Result<()> {
    match value.parse::<u16>() {
        Ok(port) if port > 0 => Ok(()),
        _ => Err(PillionError::InvalidPortLabel(format!(
            "can't use {} value {:?} as a port number",
            label, value
        ))),
    }
}

fn env_var(name: &str, value: impl Into<String>) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.into()),
        value_from: None,
    }
}
