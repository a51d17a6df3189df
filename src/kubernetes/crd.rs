// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! CRD availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use crate::types::Instrumenter;
use kube::{discovery::Discovery, Client, Resource};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Wait for the Instrumenter CRD to be served by the cluster.
pub async fn wait_for_instrumenter_crd(client: &Client) -> Result<()> {
    wait_until_served::<Instrumenter>(client).await
}

/// Poll the discovery API until the cluster serves `K`, with exponential
/// backoff starting at POLL_INTERVAL_SECS seconds. Group, version and kind
/// come from the resource type itself.
async fn wait_until_served<K>(client: &Client) -> Result<()>
where
    K: Resource<DynamicType = ()>,
{
    let group = K::group(&());
    let version = K::version(&());
    let kind = K::kind(&());
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match kind_is_served(client, &group, &version, &kind).await {
            Ok(true) => {
                info!("{} CRD ({}/{}) is available", kind, group, version);
                return Ok(());
            }
            Ok(false) => {
                info!(
                    "{} CRD ({}/{}) not yet available, waiting {} seconds...",
                    kind, group, version, interval
                );
            }
            Err(e) => {
                warn!(
                    "Error checking for {} CRD: {}, retrying in {} seconds...",
                    kind, e, interval
                );
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

async fn kind_is_served(client: &Client, group: &str, version: &str, kind: &str) -> Result<bool> {
    let discovery = Discovery::new(client.clone())
        .filter(&[group])
        .run()
        .await?;

    let served = discovery
        .groups()
        .filter(|g| g.name() == group)
        .flat_map(|g| g.recommended_resources())
        .any(|(ar, _)| ar.kind == kind && ar.version == version);
    Ok(served)
}
