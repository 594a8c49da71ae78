// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Floating IP acquisition and release.
//!
//! External Services reach their load balancer through a floating IP bound to the VIP
//! port. Acquisition walks a fixed chain:
//!
//! 1. a floating IP already bound to the VIP port is reused;
//! 2. a requested address (`spec.loadBalancerIP`) that exists unbound is attached;
//! 3. a new floating IP is created on the public network, trying each matching subnet
//!    in turn when a subnet selection is configured;
//! 4. without a public network the load balancer stays internal and a warning event
//!    is published.
//!
//! Only the owner of a load balancer may create, attach, detach or delete its floating
//! IP. Floating IPs created here carry [`FLOATING_IP_DESCRIPTION_MARKER`] in their
//! description; only those are deleted on release.

use super::config::{truncate_name, ServiceConfig};
use super::pass::Pass;
use crate::cloud::types::{FloatingIp, FloatingIpCreate, FloatingIpQuery, LoadBalancer, SubnetQuery};
use crate::constants::{FLOATING_IP_DESCRIPTION_MARKER, MAX_RESOURCE_NAME_LEN};
use crate::errors::{LbError, Result};
use crate::events::REASON_FORCED_INTERNAL;
use crate::metrics::{record_resource_created, record_resource_deleted};
use tracing::{debug, info, warn};

/// Description stored on floating IPs allocated for a Service.
#[must_use]
pub fn floating_ip_description(namespace: &str, name: &str, cluster: &str) -> String {
    truncate_name(
        &format!("{FLOATING_IP_DESCRIPTION_MARKER} {namespace}/{name} from cluster {cluster}"),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Whether the floating IP was allocated by this controller.
#[must_use]
pub fn is_created_by_us(fip: &FloatingIp) -> bool {
    fip.description.contains(FLOATING_IP_DESCRIPTION_MARKER)
}

/// The floating IP bound to `port_id`, if any.
///
/// # Errors
///
/// Propagates listing failures.
pub async fn attached_floating_ip(pass: &Pass<'_>, port_id: &str) -> Result<Option<FloatingIp>> {
    let query = FloatingIpQuery {
        port_id: Some(port_id.to_string()),
        ..FloatingIpQuery::default()
    };
    let fips = pass
        .list_all("list_floating_ips", |page| {
            pass.cloud.list_floating_ips(&query, page)
        })
        .await?;
    Ok(fips.into_iter().next())
}

fn ownership_violation(config: &ServiceConfig, lb: &LoadBalancer, action: &str) -> LbError {
    LbError::Ownership(format!(
        "service {} does not own load balancer {} and cannot {action} its floating IP",
        config.identity.key(),
        lb.id
    ))
}

/// Make sure an external Service has a floating IP on the VIP port.
///
/// Returns the public address, or `None` when the load balancer stays internal.
///
/// # Errors
///
/// Returns `LbError::Ownership` when a non-owner would have to allocate or attach,
/// `LbError::Conflict` when the requested address is bound elsewhere, and propagates
/// cloud failures.
pub async fn ensure_floating_ip(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb: &LoadBalancer,
    is_owner: bool,
) -> Result<Option<String>> {
    if let Some(fip) = attached_floating_ip(pass, &lb.vip_port_id).await? {
        debug!(lb_id = %lb.id, address = %fip.floating_ip_address, "Reusing floating IP");
        return Ok(Some(fip.floating_ip_address));
    }

    if let Some(address) = &config.load_balancer_ip {
        let query = FloatingIpQuery {
            floating_ip_address: Some(address.clone()),
            ..FloatingIpQuery::default()
        };
        let existing = pass
            .list_all("list_floating_ips", |page| {
                pass.cloud.list_floating_ips(&query, page)
            })
            .await?;
        if let Some(fip) = existing.into_iter().next() {
            if let Some(port) = &fip.port_id {
                return Err(LbError::Conflict(format!(
                    "floating IP {address} is already bound to port {port}"
                )));
            }
            if !is_owner {
                return Err(ownership_violation(config, lb, "attach"));
            }
            let attached = pass
                .call(
                    "update_floating_ip",
                    pass.cloud.update_floating_ip(&fip.id, Some(&lb.vip_port_id)),
                )
                .await?;
            info!(
                lb_id = %lb.id,
                address = %attached.floating_ip_address,
                "Attached existing floating IP"
            );
            return Ok(Some(attached.floating_ip_address));
        }
    }

    let Some(network_id) = config.floating.network_id.clone() else {
        warn!(
            service = %config.identity.key(),
            "No public network available, load balancer stays internal"
        );
        pass.warn_event(
            REASON_FORCED_INTERNAL,
            format!(
                "No floating network is configured or discoverable, load balancer {} is internal only",
                lb.id
            ),
        );
        return Ok(None);
    };

    if !is_owner {
        return Err(ownership_violation(config, lb, "create"));
    }

    let request = FloatingIpCreate {
        floating_network_id: network_id,
        subnet_id: config.floating.subnet_id.clone(),
        floating_ip_address: config.load_balancer_ip.clone(),
        port_id: Some(lb.vip_port_id.clone()),
        description: floating_ip_description(
            &config.identity.namespace,
            &config.identity.name,
            &pass.options.cluster_name,
        ),
    };

    let fip = if config.floating.subnet_matcher.is_configured()
        && config.load_balancer_ip.is_none()
    {
        create_on_matching_subnet(pass, config, request).await?
    } else {
        pass.call("create_floating_ip", pass.cloud.create_floating_ip(&request))
            .await?
    };
    record_resource_created("floating_ip");
    info!(
        lb_id = %lb.id,
        address = %fip.floating_ip_address,
        subnet_id = fip.subnet_id.as_deref().unwrap_or_default(),
        "Created floating IP"
    );
    Ok(Some(fip.floating_ip_address))
}

/// Try each subnet of the public network accepted by the matcher until one has room.
async fn create_on_matching_subnet(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    request: FloatingIpCreate,
) -> Result<FloatingIp> {
    let matcher = &config.floating.subnet_matcher;
    let query = SubnetQuery {
        network_id: Some(request.floating_network_id.clone()),
        tags: matcher.tag_filter(),
    };
    let subnets = pass
        .list_all("list_subnets", |page| pass.cloud.list_subnets(&query, page))
        .await?;

    let mut last_error = None;
    for subnet in subnets.iter().filter(|s| matcher.matches_subnet(s)) {
        let attempt = FloatingIpCreate {
            subnet_id: Some(subnet.id.clone()),
            ..request.clone()
        };
        match pass
            .call("create_floating_ip", pass.cloud.create_floating_ip(&attempt))
            .await
        {
            Ok(fip) => return Ok(fip),
            Err(e @ LbError::Cancelled) => return Err(e),
            Err(e) => {
                warn!(subnet = %subnet.name, error = %e, "Cannot allocate floating IP on subnet");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        LbError::not_found(
            "floating subnet",
            format!("matching the selection on network {}", request.floating_network_id),
        )
    }))
}

/// Detach a floating IP, deleting it when this controller allocated it and it is not
/// meant to be kept.
///
/// # Errors
///
/// Propagates cloud failures other than 404.
pub async fn release_floating_ip(pass: &Pass<'_>, fip: &FloatingIp, keep: bool) -> Result<()> {
    if is_created_by_us(fip) && !keep {
        pass.call_delete("delete_floating_ip", pass.cloud.delete_floating_ip(&fip.id))
            .await?;
        record_resource_deleted("floating_ip");
        info!(address = %fip.floating_ip_address, "Deleted floating IP");
        return Ok(());
    }
    pass.call_optional(
        "update_floating_ip",
        pass.cloud.update_floating_ip(&fip.id, None),
    )
    .await?;
    info!(address = %fip.floating_ip_address, "Detached floating IP");
    Ok(())
}

/// Release the floating IP of a load balancer whose Service became internal.
///
/// Only the owner touches the floating IP.
///
/// # Errors
///
/// Propagates cloud failures.
pub async fn release_for_internal(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb: &LoadBalancer,
    is_owner: bool,
) -> Result<()> {
    if !is_owner {
        return Ok(());
    }
    if let Some(fip) = attached_floating_ip(pass, &lb.vip_port_id).await? {
        info!(
            lb_id = %lb.id,
            address = %fip.floating_ip_address,
            "Service is internal, releasing floating IP"
        );
        release_floating_ip(pass, &fip, config.keep_floating_ip).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "floatingip_tests.rs"]
mod floatingip_tests;
