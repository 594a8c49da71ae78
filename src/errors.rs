// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Error types for load balancer reconciliation.
//!
//! Remote failures arrive as [`CloudError`], which carries the HTTP status equivalent
//! reported by the cloud facade. The engine surfaces [`LbError`], classifying each failure
//! as retryable (the caller should requeue the pass) or fatal (the Service needs to change).
//!
//! # Reason Mapping
//!
//! | Variant | Reason | Retryable |
//! |---------|--------|-----------|
//! | `NotFound` | `NotFound` | no |
//! | `MultipleResults` | `MultipleResults` | no |
//! | `Conflict` | `Conflict` | no |
//! | `Unsupported` | `Unsupported` | no |
//! | `NotActive` | `LoadBalancerNotActive` | yes |
//! | `ProviderErrorState` | `LoadBalancerErrorState` | yes |
//! | `Ownership` | `OwnershipViolation` | no |
//! | `InvalidConfiguration` | `InvalidConfiguration` | no |
//! | `Cancelled` | `Cancelled` | yes |
//! | `Cloud` | `CloudApiError` | 409, 429, 5xx and transport errors |

use crate::cloud::types::ProvisioningStatus;
use crate::reconcilers::retry::is_retryable_http_status;
use reqwest::StatusCode;
use thiserror::Error;

/// Error reported by the cloud API facade.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CloudError {
    /// HTTP status equivalent; `None` for transport failures
    pub status: Option<StatusCode>,
    pub message: String,
    /// Raw response body, when the facade captured one
    pub body: Option<String>,
}

impl CloudError {
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
            body: None,
        }
    }

    /// Error raised before a response was received.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            body: None,
        }
    }

    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    #[must_use]
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(StatusCode::NOT_FOUND)
    }

    #[must_use]
    pub fn is_conflict(&self) -> bool {
        self.status == Some(StatusCode::CONFLICT)
    }

    /// Whether repeating the request later may succeed.
    ///
    /// A 409 from the load balancer API means the object is locked by a pending
    /// provisioning operation, so it is treated as transient.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.status {
            None => true,
            Some(status) => status == StatusCode::CONFLICT || is_retryable_http_status(status),
        }
    }
}

/// Errors produced by a reconciliation pass.
#[derive(Debug, Error)]
pub enum LbError {
    /// A referenced resource does not exist
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// A name lookup matched more than one resource
    #[error("found multiple {kind} resources named {name}")]
    MultipleResults { kind: &'static str, name: String },

    /// The desired state collides with resources claimed by another Service
    #[error("conflict: {0}")]
    Conflict(String),

    /// The control plane lacks a capability the request depends on
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// The load balancer is in a transitional provisioning status
    #[error("load balancer {lb_id} is {status}, expected ACTIVE")]
    NotActive {
        lb_id: String,
        status: ProvisioningStatus,
    },

    /// A freshly created load balancer went to ERROR and was removed
    #[error("load balancer {lb_id} went to ERROR after creation and was deleted")]
    ProviderErrorState { lb_id: String },

    /// A non-owning Service attempted to manage owner-only resources
    #[error("ownership violation: {0}")]
    Ownership(String),

    /// The Service or provider options cannot be resolved into a configuration
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The pass was cancelled before the next remote call
    #[error("reconciliation cancelled")]
    Cancelled,

    /// An unexpected failure from the cloud API, propagated unchanged
    #[error("{operation} failed: {source}")]
    Cloud {
        operation: &'static str,
        #[source]
        source: CloudError,
    },
}

/// Result alias used by the reconcilers.
pub type Result<T, E = LbError> = std::result::Result<T, E>;

impl LbError {
    #[must_use]
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidConfiguration(message.into())
    }

    /// Whether the caller should requeue the pass.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::NotActive { .. } | Self::ProviderErrorState { .. } | Self::Cancelled => true,
            Self::Cloud { source, .. } => source.is_retryable(),
            Self::NotFound { .. }
            | Self::MultipleResults { .. }
            | Self::Conflict(_)
            | Self::Unsupported(_)
            | Self::Ownership(_)
            | Self::InvalidConfiguration(_) => false,
        }
    }

    /// CamelCase reason used for Kubernetes events and metrics labels.
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::MultipleResults { .. } => "MultipleResults",
            Self::Conflict(_) => "Conflict",
            Self::Unsupported(_) => "Unsupported",
            Self::NotActive { .. } => "LoadBalancerNotActive",
            Self::ProviderErrorState { .. } => "LoadBalancerErrorState",
            Self::Ownership(_) => "OwnershipViolation",
            Self::InvalidConfiguration(_) => "InvalidConfiguration",
            Self::Cancelled => "Cancelled",
            Self::Cloud { .. } => "CloudApiError",
        }
    }

    /// Whether the error wraps a remote 404.
    #[must_use]
    pub fn is_cloud_not_found(&self) -> bool {
        matches!(self, Self::Cloud { source, .. } if source.is_not_found())
    }
}

#[cfg(test)]
#[path = "errors_tests.rs"]
mod errors_tests;
