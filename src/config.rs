// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;

/// Operator configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the admission webhook listens on (TLS is terminated in front of us)
    pub webhook_bind_addr: SocketAddr,
    /// Restricts the reconciler to a single namespace when set
    pub watch_namespace: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let webhook_bind_addr = env::var("WEBHOOK_BIND_ADDR")
            .unwrap_or("0.0.0.0:9443".to_string())
            .parse()
            .context("WEBHOOK_BIND_ADDR is not a valid socket address")?;
        let watch_namespace = env::var("WATCH_NAMESPACE").ok().filter(|ns| !ns.is_empty());

        Ok(Config {
            webhook_bind_addr,
            watch_namespace,
        })
    }
}
