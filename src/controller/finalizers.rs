// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Finalizer management for namespaced Kubernetes resources.
//!
//! The controller holds the load balancer cleanup finalizer on every Service it manages
//! so the cloud resources are released before the Service disappears.
//!
//! # Example
//!
//! ```rust,ignore
//! use octavia_lb::controller::finalizers::{ensure_finalizer, handle_deletion};
//! use octavia_lb::constants::LOAD_BALANCER_CLEANUP_FINALIZER;
//!
//! if service.metadata.deletion_timestamp.is_some() {
//!     return handle_deletion(&client, &service, LOAD_BALANCER_CLEANUP_FINALIZER, async {
//!         engine.delete_load_balancer(&service, &cancel).await?;
//!         Ok(())
//!     })
//!     .await;
//! }
//! ensure_finalizer(&client, &service, LOAD_BALANCER_CLEANUP_FINALIZER).await?;
//! ```

use anyhow::Result;
use kube::api::{Patch, PatchParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde_json::json;
use std::future::Future;
use tracing::info;

use crate::constants::FIELD_MANAGER;
use crate::reconcilers::retry::retry_api_call;

/// Namespaced objects whose finalizers can be patched.
pub trait Finalizable:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + std::fmt::Debug
    + serde::Serialize
    + DeserializeOwned
{
}

impl<T> Finalizable for T where
    T: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + std::fmt::Debug
        + serde::Serialize
        + DeserializeOwned
{
}

/// Whether `finalizer` is present on the resource.
#[must_use]
pub fn has_finalizer<T: Resource>(resource: &T, finalizer: &str) -> bool {
    resource
        .meta()
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|existing| existing == finalizer))
}

/// Finalizer list with `finalizer` appended, or `None` when it is already present.
#[must_use]
pub fn finalizers_with<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.push(finalizer.to_string());
    Some(finalizers)
}

/// Finalizer list without `finalizer`, or `None` when it is absent.
#[must_use]
pub fn finalizers_without<T: Resource>(resource: &T, finalizer: &str) -> Option<Vec<String>> {
    if !has_finalizer(resource, finalizer) {
        return None;
    }
    let mut finalizers = resource.meta().finalizers.clone().unwrap_or_default();
    finalizers.retain(|f| f != finalizer);
    Some(finalizers)
}

fn object_key<T: Resource>(resource: &T) -> String {
    format!(
        "{}/{}",
        resource.namespace().unwrap_or_default(),
        resource.name_any()
    )
}

async fn patch_finalizers<T: Finalizable>(
    client: &Client,
    resource: &T,
    finalizers: Vec<String>,
) -> Result<()> {
    let api: Api<T> = Api::namespaced(client.clone(), &resource.namespace().unwrap_or_default());
    let name = resource.name_any();
    let params = PatchParams::apply(FIELD_MANAGER);
    let patch = Patch::Merge(json!({ "metadata": { "finalizers": finalizers } }));
    retry_api_call(|| api.patch(&name, &params, &patch), "patch_finalizers").await?;
    Ok(())
}

/// Add a finalizer to a resource if not already present.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn ensure_finalizer<T: Finalizable>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<()> {
    let Some(finalizers) = finalizers_with(resource, finalizer) else {
        return Ok(());
    };
    patch_finalizers(client, resource, finalizers).await?;
    info!(
        kind = %T::kind(&()),
        object = %object_key(resource),
        finalizer,
        "Added finalizer"
    );
    Ok(())
}

/// Remove a finalizer from a resource if present.
///
/// # Errors
///
/// Returns an error if the API patch operation fails.
pub async fn remove_finalizer<T: Finalizable>(
    client: &Client,
    resource: &T,
    finalizer: &str,
) -> Result<()> {
    let Some(finalizers) = finalizers_without(resource, finalizer) else {
        return Ok(());
    };
    patch_finalizers(client, resource, finalizers).await?;
    info!(
        kind = %T::kind(&()),
        object = %object_key(resource),
        finalizer,
        "Removed finalizer"
    );
    Ok(())
}

/// Run `cleanup` and then drop the finalizer.
///
/// Nothing runs when the finalizer is already gone. When `cleanup` fails the finalizer
/// stays and deletion remains blocked until a later pass succeeds.
///
/// # Errors
///
/// Returns the cleanup error or the patch error.
pub async fn handle_deletion<T: Finalizable, F>(
    client: &Client,
    resource: &T,
    finalizer: &str,
    cleanup: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    if !has_finalizer(resource, finalizer) {
        return Ok(());
    }
    info!(
        kind = %T::kind(&()),
        object = %object_key(resource),
        "Running cleanup before removing finalizer"
    );
    cleanup.await?;
    remove_finalizer(client, resource, finalizer).await
}

#[cfg(test)]
#[path = "finalizers_tests.rs"]
mod finalizers_tests;
