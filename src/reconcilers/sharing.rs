// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer ownership and sharing.
//!
//! A Service owns a load balancer when the load balancer carries the Service's generated
//! (or legacy) name, or when the Service created it in the current pass. Other Services
//! may share it by referencing its ID; each sharer marks its presence with a source tag
//! equal to its generated name. Every tag starting with [`SERVICE_NAME_PREFIX`] counts
//! as one Service using the load balancer.

use super::config::{ServiceConfig, ServiceIdentity};
use super::pass::Pass;
use crate::cloud::types::{LoadBalancer, LoadBalancerUpdate};
use crate::constants::SERVICE_NAME_PREFIX;
use crate::errors::{LbError, Result};
use crate::metrics::record_resource_updated;
use tracing::{debug, info};

/// Whether the load balancer carries the Service's generated or legacy name.
#[must_use]
pub fn is_named_for(lb: &LoadBalancer, identity: &ServiceIdentity) -> bool {
    lb.name == identity.lb_name || lb.name == identity.legacy_name
}

/// Whether the load balancer was created by this controller rather than imported.
#[must_use]
pub fn is_created_by_controller(lb: &LoadBalancer, identity: &ServiceIdentity) -> bool {
    lb.name.starts_with(SERVICE_NAME_PREFIX) || lb.name == identity.legacy_name
}

/// Source tags of every Service using the load balancer.
#[must_use]
pub fn source_tags(lb: &LoadBalancer) -> Vec<&str> {
    lb.tags
        .iter()
        .map(String::as_str)
        .filter(|t| t.starts_with(SERVICE_NAME_PREFIX))
        .collect()
}

/// Source tags of Services other than the one tagged `tag`.
#[must_use]
pub fn other_sources<'lb>(lb: &'lb LoadBalancer, tag: &str) -> Vec<&'lb str> {
    source_tags(lb).into_iter().filter(|t| *t != tag).collect()
}

/// Check that the Service may join a load balancer it does not own.
///
/// `has_floating_ip` tells whether the load balancer is reachable externally.
///
/// # Errors
///
/// Returns `LbError::Unsupported` without tag support and `LbError::Conflict` when
/// either side is internal or the sharing cap is reached.
pub fn validate_sharer(
    config: &ServiceConfig,
    lb: &LoadBalancer,
    has_floating_ip: bool,
    max_shared: usize,
) -> Result<()> {
    let service = config.identity.key();
    if !config.capabilities.tags {
        return Err(LbError::Unsupported(format!(
            "load balancer {} cannot be shared by service {service}: provider {} does not support tags",
            lb.id, config.capabilities.provider
        )));
    }
    if config.internal {
        return Err(LbError::Conflict(format!(
            "internal service {service} cannot share load balancer {}",
            lb.id
        )));
    }
    if !has_floating_ip {
        return Err(LbError::Conflict(format!(
            "load balancer {} is internal and cannot be shared by service {service}",
            lb.id
        )));
    }

    let tag = &config.identity.lb_name;
    let sources = source_tags(lb);
    if !sources.contains(&tag.as_str()) && sources.len() + 1 > max_shared {
        return Err(LbError::Conflict(format!(
            "load balancer {} is already shared by {} services, the maximum is {max_shared}",
            lb.id,
            sources.len()
        )));
    }
    Ok(())
}

/// Add the Service's source tag to the load balancer.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn add_source_tag(pass: &Pass<'_>, lb: &LoadBalancer, tag: &str) -> Result<LoadBalancer> {
    if lb.tags.iter().any(|t| t == tag) {
        debug!(lb_id = %lb.id, tag = %tag, "Source tag already present");
        return Ok(lb.clone());
    }
    let mut tags = lb.tags.clone();
    tags.push(tag.to_string());
    let update = LoadBalancerUpdate { tags: Some(tags) };
    let updated = pass
        .mutate(
            &lb.id,
            "update_load_balancer",
            pass.cloud.update_load_balancer(&lb.id, &update),
        )
        .await?;
    record_resource_updated("load_balancer");
    info!(lb_id = %lb.id, tag = %tag, "Added source tag to load balancer");
    Ok(updated)
}

/// Remove the Service's source tag from the load balancer.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn remove_source_tag(pass: &Pass<'_>, lb: &LoadBalancer, tag: &str) -> Result<()> {
    if !lb.tags.iter().any(|t| t == tag) {
        return Ok(());
    }
    let tags = lb.tags.iter().filter(|t| *t != tag).cloned().collect();
    let update = LoadBalancerUpdate { tags: Some(tags) };
    pass.mutate(
        &lb.id,
        "update_load_balancer",
        pass.cloud.update_load_balancer(&lb.id, &update),
    )
    .await?;
    record_resource_updated("load_balancer");
    info!(lb_id = %lb.id, tag = %tag, "Removed source tag from load balancer");
    Ok(())
}

#[cfg(test)]
#[path = "sharing_tests.rs"]
mod sharing_tests;
