// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Mutating admission webhook serving pod CREATE and UPDATE reviews.

pub mod pods;

pub use pods::mutate_handler;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use kube::Client;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::info;

/// HTTP server hosting the pod mutation endpoint. TLS is terminated in front
/// of us, so the server itself speaks plain HTTP.
pub struct AdmissionServer {
    client: Client,
    addr: SocketAddr,
}

impl AdmissionServer {
    pub fn new(client: Client, addr: SocketAddr) -> Self {
        Self { client, addr }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("Could not bind webhook listener on {}", self.addr))?;
        info!("Admission webhook listening on {}", self.addr);
        axum::serve(listener, admission_router(self.client))
            .await
            .context("Admission webhook server failed")?;
        Ok(())
    }
}

/// Build the webhook router. The mutation path follows the convention for
/// core-group resources, matching the MutatingWebhookConfiguration manifest.
pub fn admission_router(client: Client) -> Router {
    Router::new()
        .route("/mutate--v1-pod", post(mutate_handler))
        .route("/healthz", get(healthz))
        .with_state(client)
}

async fn healthz() -> &'static str {
    "ok"
}
