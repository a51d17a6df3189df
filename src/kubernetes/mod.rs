// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kubernetes utilities for CRD discovery and pod store access.

pub mod crd;
pub mod pods;

pub use crd::wait_for_instrumenter_crd;
pub use pods::{delete_pod, list_pods_owned_by, list_pods_with_label, recreate_pod};
