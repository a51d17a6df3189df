// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Pure sidecar logic: building the desired container, deciding whether a pod
//! must change, and the ownership labeling that keeps Instrumenters from
//! fighting over the same pod.

pub mod builder;
pub mod decision;
pub mod ownership;

pub use builder::{build_sidecar, SidecarSpec};
pub use decision::{decide, instrument_pod, Decision, SkipReason};
pub use ownership::{attach_sidecar, owner_of, strip_sidecar};
