// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes label keys used by Pillion
pub mod labels {
    /// Names the Instrumenter that currently owns a pod's sidecar
    pub const INSTRUMENTED_BY: &str = "pillion.geeko.me/instrumented-by";
}

/// The operator name used for server-side apply
pub const OPERATOR_NAME: &str = "pillion";

/// Name of the injected sidecar container
pub const SIDECAR_NAME: &str = "pillion-autoinstrumenter";

/// Finalizer that keeps an Instrumenter around until its pods are stripped
pub const FINALIZER: &str = "pillion.geeko.me/cleanup";

/// CRD polling configuration
pub mod crd {
    /// Initial polling interval in seconds when waiting for CRD
    pub const POLL_INTERVAL_SECS: u64 = 10;
    /// Maximum polling interval in seconds (exponential backoff cap)
    pub const POLL_MAX_INTERVAL_SECS: u64 = 60;
}

/// Reconcile loop timing
pub mod reconcile {
    /// Resync interval in seconds after a successful pass
    pub const RESYNC_INTERVAL_SECS: u64 = 300;
    /// Requeue interval in seconds after a failed pass
    pub const ERROR_INTERVAL_SECS: u64 = 60;
}
