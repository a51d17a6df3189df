// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::{info, warn};

use pillion::config::Config;
use pillion::kubernetes::wait_for_instrumenter_crd;
use pillion::reconcilers::InstrumenterReconciler;
use pillion::webhook::AdmissionServer;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting Pillion operator");

    // Load configuration
    let config = Config::from_env()?;
    match &config.watch_namespace {
        Some(namespace) => info!("Watching namespace {}", namespace),
        None => info!("Watching all namespaces"),
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the Instrumenter CRD before starting the reconciler
    info!("Waiting for Instrumenter CRD to become available...");
    wait_for_instrumenter_crd(&client).await?;

    let webhook = AdmissionServer::new(client.clone(), config.webhook_bind_addr);
    let reconciler = InstrumenterReconciler::new(client, config.watch_namespace);

    info!("Starting webhook and reconciler...");

    // Run the webhook server and the reconciler concurrently
    tokio::try_join!(webhook.run(), reconciler.run())?;

    // This should never be reached as both run forever
    warn!("Webhook and reconciler stopped unexpectedly");
    Ok(())
}
