// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Prints the Instrumenter CRD manifest, for `kubectl apply -f -`.

use anyhow::Result;
use kube::CustomResourceExt;

use pillion::types::Instrumenter;

fn main() -> Result<()> {
    let crd = serde_yaml::to_string(&Instrumenter::crd())?;
    print!("{crd}");
    Ok(())
}
