// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PillionError {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Invalid port label: {0}")]
    InvalidPortLabel(String),

    #[error("Invalid OTLP endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Instrumenter has no namespace: {0}")]
    MissingNamespace(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<PillionError>>),
}

pub type Result<T> = std::result::Result<T, PillionError>;
