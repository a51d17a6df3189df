// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use k8s_openapi::api::core::v1::EnvVar;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[kube(group = "pillion.geeko.me", version = "v1alpha1", kind = "Instrumenter")]
#[kube(namespaced)]
#[kube(status = "InstrumenterStatus")]
#[serde(rename_all = "camelCase")]
pub struct InstrumenterSpec {
    #[serde(default)]
    pub selector: Selector,
    /// Telemetry sinks the sidecar should export to
    #[serde(default)]
    pub export: Vec<Exporter>,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default = "default_image_pull_policy")]
    pub image_pull_policy: String,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub open_telemetry: OpenTelemetryConfig,
    /// Extra environment entries appended after all computed ones, so they win
    /// on key collision in the sidecar runtime
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub override_env: Vec<EnvVar>,
}

impl Instrumenter {
    /// Label key that opts a pod into instrumentation; its value is the port
    /// the sidecar attaches to
    pub fn port_label(&self) -> &str {
        &self.spec.selector.port_label
    }

    /// Check whether a telemetry sink is enabled
    pub fn exports(&self, exporter: Exporter) -> bool {
        self.spec.export.contains(&exporter)
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default = "default_port_label")]
    pub port_label: String,
}

impl Default for Selector {
    fn default() -> Self {
        Selector {
            port_label: default_port_label(),
        }
    }
}

/// Telemetry sinks the sidecar can be configured with
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Exporter {
    /// Scrape-based metrics, exposed on the sidecar for Prometheus to pull
    Prometheus,
    /// OTLP metrics pushed to a collector endpoint
    OtelMetrics,
    /// OTLP traces pushed to a collector endpoint
    OtelTraces,
}

#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_port")]
    pub port: u16,
    #[serde(default = "default_prometheus_path")]
    pub path: String,
    #[serde(default)]
    pub annotations: ScrapeAnnotations,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        PrometheusConfig {
            port: default_prometheus_port(),
            path: default_prometheus_path(),
            annotations: ScrapeAnnotations::default(),
        }
    }
}

/// Annotation key names written on instrumented pods for scrape discovery
#[derive(Serialize, Deserialize, Clone, Debug, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeAnnotations {
    #[serde(default = "default_scrape_annotation")]
    pub scrape: String,
    #[serde(default = "default_port_annotation")]
    pub port: String,
    #[serde(default = "default_scheme_annotation")]
    pub scheme: String,
    #[serde(default = "default_path_annotation")]
    pub path: String,
}

impl Default for ScrapeAnnotations {
    fn default() -> Self {
        ScrapeAnnotations {
            scrape: default_scrape_annotation(),
            port: default_port_annotation(),
            scheme: default_scheme_annotation(),
            path: default_path_annotation(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OpenTelemetryConfig {
    /// Base URL of the OTLP collector, e.g. "http://collector:4318"
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// Export interval passed through to the sidecar, e.g. "5s"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstrumenterStatus {
    /// Number of pods currently carrying this Instrumenter's sidecar
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrumented_pods: Option<i32>,
}

fn default_port_label() -> String {
    "pillion.geeko.me/open-port".to_string()
}

fn default_image() -> String {
    "ghcr.io/hierynomus/pillion-autoinstrument:latest".to_string()
}

fn default_image_pull_policy() -> String {
    "Always".to_string()
}

fn default_prometheus_port() -> u16 {
    9102
}

fn default_prometheus_path() -> String {
    "/metrics".to_string()
}

fn default_scrape_annotation() -> String {
    "prometheus.io/scrape".to_string()
}

fn default_port_annotation() -> String {
    "prometheus.io/port".to_string()
}

fn default_scheme_annotation() -> String {
    "prometheus.io/scheme".to_string()
}

fn default_path_annotation() -> String {
    "prometheus.io/path".to_string()
}

impl Default for InstrumenterSpec {
    fn default() -> Self {
        InstrumenterSpec {
            selector: Selector::default(),
            export: Vec::new(),
            image: default_image(),
            image_pull_policy: default_image_pull_policy(),
            prometheus: PrometheusConfig::default(),
            open_telemetry: OpenTelemetryConfig::default(),
            override_env: Vec::new(),
        }
    }
}
