// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-pass execution context.
//!
//! A [`Pass`] bundles the collaborators of one reconciliation pass and funnels every
//! remote call through [`Pass::call`], which checks for cancellation before the call is
//! issued, records metrics and tags failures with the operation name. Mutations of the
//! listener graph go through [`Pass::mutate`], which re-reads the load balancer and
//! refuses to proceed unless its provisioning status allows it.

use super::pagination::collect_pages;
use crate::cloud::types::{LoadBalancer, Page, PageRequest, ProvisioningStatus};
use crate::cloud::{CloudApi, CloudResult};
use crate::errors::{LbError, Result};
use crate::events::{EventSink, EventTarget, LbEvent};
use crate::metrics::record_cloud_call;
use crate::options::ProviderOptions;
use std::fmt;
use std::future::Future;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Reconciliation verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Ensure,
    Update,
    Delete,
}

impl Verb {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ensure => "ensure",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Collaborators and identity of one reconciliation pass.
pub struct Pass<'a> {
    pub cloud: &'a dyn CloudApi,
    pub options: &'a ProviderOptions,
    pub events: &'a dyn EventSink,
    pub cancel: &'a CancellationToken,
    pub target: EventTarget,
    pub verb: Verb,
}

impl<'a> Pass<'a> {
    /// Fail with `LbError::Cancelled` once the pass has been cancelled.
    ///
    /// # Errors
    ///
    /// Returns `LbError::Cancelled` when the token is cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            debug!(service = %self.target.name, "Reconciliation cancelled");
            return Err(LbError::Cancelled);
        }
        Ok(())
    }

    /// Issue one remote call.
    ///
    /// The future is only polled after the cancellation check, so a cancelled pass
    /// never starts a new call; a call that has started is always awaited to completion.
    ///
    /// # Errors
    ///
    /// Returns `LbError::Cancelled`, or `LbError::Cloud` wrapping the facade error.
    pub async fn call<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = CloudResult<T>>,
    ) -> Result<T> {
        self.check_cancelled()?;
        let start = Instant::now();
        let result = request.await;
        let status = match &result {
            Ok(_) => "success",
            Err(e) if e.is_not_found() => "not_found",
            Err(_) => "error",
        };
        record_cloud_call(operation, status, start.elapsed());
        result.map_err(|source| LbError::Cloud { operation, source })
    }

    /// Like [`Pass::call`], mapping a 404 to `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Returns any error other than a 404.
    pub async fn call_optional<T>(
        &self,
        operation: &'static str,
        request: impl Future<Output = CloudResult<T>>,
    ) -> Result<Option<T>> {
        match self.call(operation, request).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_cloud_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Like [`Pass::call`] for deletes: a 404 means the resource is already gone.
    ///
    /// # Errors
    ///
    /// Returns any error other than a 404.
    pub async fn call_delete(
        &self,
        operation: &'static str,
        request: impl Future<Output = CloudResult<()>>,
    ) -> Result<()> {
        self.call_optional(operation, request).await.map(|_| ())
    }

    /// Collect every page of a list operation.
    ///
    /// # Errors
    ///
    /// Returns the first failed page request.
    pub async fn list_all<T, F, Fut>(&self, operation: &'static str, mut fetch: F) -> Result<Vec<T>>
    where
        F: FnMut(PageRequest) -> Fut,
        Fut: Future<Output = CloudResult<Page<T>>>,
    {
        collect_pages(|page| self.call(operation, fetch(page))).await
    }

    /// Re-read the load balancer and confirm it may be mutated.
    ///
    /// Ensure and update passes require `ACTIVE`; delete passes also accept `ERROR`.
    ///
    /// # Errors
    ///
    /// Returns `LbError::NotActive` for any other provisioning status.
    pub async fn gate(&self, lb_id: &str) -> Result<LoadBalancer> {
        let lb = self
            .call("get_load_balancer", self.cloud.get_load_balancer(lb_id))
            .await?;
        let allowed = match lb.provisioning_status {
            ProvisioningStatus::Active => true,
            ProvisioningStatus::Error => self.verb == Verb::Delete,
            _ => false,
        };
        if !allowed {
            return Err(LbError::NotActive {
                lb_id: lb.id,
                status: lb.provisioning_status,
            });
        }
        Ok(lb)
    }

    /// Gate on the load balancer, then issue a mutating call.
    ///
    /// # Errors
    ///
    /// Returns the gate failure or the call failure.
    pub async fn mutate<T>(
        &self,
        lb_id: &str,
        operation: &'static str,
        request: impl Future<Output = CloudResult<T>>,
    ) -> Result<T> {
        self.gate(lb_id).await?;
        self.call(operation, request).await
    }

    /// Gate on the load balancer, then issue a delete that tolerates 404.
    ///
    /// # Errors
    ///
    /// Returns the gate failure or any call failure other than 404.
    pub async fn mutate_delete(
        &self,
        lb_id: &str,
        operation: &'static str,
        request: impl Future<Output = CloudResult<()>>,
    ) -> Result<()> {
        self.gate(lb_id).await?;
        self.call_delete(operation, request).await
    }

    /// Publish a warning event about the Service.
    pub fn warn_event(&self, reason: &str, message: impl Into<String>) {
        self.events
            .publish(&self.target, LbEvent::warning(reason, message));
    }
}

#[cfg(test)]
#[path = "pass_tests.rs"]
mod pass_tests;
