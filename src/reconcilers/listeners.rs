// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Listener convergence.
//!
//! Listeners are keyed by `(protocol, port)` within a load balancer. A listener belongs
//! to a Service when it carries the Service's source tag, or when it carries no tag at
//! all and the Service owns the load balancer. Listeners of other Services sharing the
//! load balancer are never modified or deleted.

use super::config::{truncate_name, ClientIpMode, ServiceConfig, ServicePortSpec};
use super::pass::Pass;
use crate::cloud::types::{Listener, ListenerCreate, ListenerUpdate, Protocol};
use crate::constants::{HEADER_X_FORWARDED_FOR, LISTENER_NAME_PREFIX, MAX_RESOURCE_NAME_LEN};
use crate::errors::{LbError, Result};
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::{debug, info};

/// Logical identity of a listener.
pub type ListenerKey = (Protocol, i32);

/// `listener_<index>_<lbName>`
#[must_use]
pub fn listener_name(index: usize, lb_name: &str) -> String {
    truncate_name(
        &format!("{LISTENER_NAME_PREFIX}_{index}_{lb_name}"),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Whether the listener belongs to the Service tagged `tag`.
#[must_use]
pub fn is_claimed_by(listener: &Listener, tag: &str, is_owner: bool) -> bool {
    if listener.tags.iter().any(|t| t == tag) {
        return true;
    }
    listener.tags.is_empty() && is_owner
}

/// Index listeners by `(protocol, port)`.
#[must_use]
pub fn index_listeners(listeners: &[Listener]) -> HashMap<ListenerKey, Listener> {
    listeners
        .iter()
        .map(|l| ((l.protocol, l.protocol_port), l.clone()))
        .collect()
}

/// Every listener of the load balancer.
///
/// # Errors
///
/// Propagates listing failures.
pub async fn list_listeners(pass: &Pass<'_>, lb_id: &str) -> Result<Vec<Listener>> {
    pass.list_all("list_listeners", |page| pass.cloud.list_listeners(lb_id, page))
        .await
}

/// Fail when a desired port is served by a listener that belongs to another Service.
///
/// # Errors
///
/// Returns `LbError::Conflict` naming the first contested port.
pub fn check_port_conflicts(
    config: &ServiceConfig,
    listeners: &HashMap<ListenerKey, Listener>,
    is_owner: bool,
) -> Result<()> {
    let tag = &config.identity.lb_name;
    for port in &config.ports {
        let key = (config.listener_protocol(port), port.port);
        if let Some(listener) = listeners.get(&key) {
            if !is_claimed_by(listener, tag, is_owner) {
                return Err(LbError::Conflict(format!(
                    "port {}/{} is already used by listener {} of another service",
                    key.0, key.1, listener.id
                )));
            }
        }
    }
    Ok(())
}

fn insert_headers(config: &ServiceConfig) -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    if config.client_ip == ClientIpMode::XForwardedFor {
        headers.insert(HEADER_X_FORWARDED_FOR.to_string(), "true".to_string());
    }
    headers
}

fn supports_timeouts(config: &ServiceConfig, protocol: Protocol) -> bool {
    config.capabilities.timeouts && !matches!(protocol, Protocol::Udp | Protocol::Sctp)
}

/// Create request for the listener serving `port`, honoring capabilities.
#[must_use]
pub fn desired_listener(
    config: &ServiceConfig,
    lb_id: &str,
    index: usize,
    port: &ServicePortSpec,
) -> ListenerCreate {
    let protocol = config.listener_protocol(port);
    let timeouts = supports_timeouts(config, protocol).then_some(config.timeouts);
    ListenerCreate {
        name: listener_name(index, &config.identity.lb_name),
        loadbalancer_id: lb_id.to_string(),
        protocol,
        protocol_port: port.port,
        connection_limit: config.connection_limit,
        insert_headers: insert_headers(config),
        default_tls_container_ref: config.tls_container_ref.clone(),
        timeout_client_data: timeouts.map(|t| t.client_data),
        timeout_member_connect: timeouts.map(|t| t.member_connect),
        timeout_member_data: timeouts.map(|t| t.member_data),
        timeout_tcp_inspect: timeouts.map(|t| t.tcp_inspect),
        allowed_cidrs: config
            .capabilities
            .vip_acl
            .then(|| config.allowed_cidrs.clone()),
        tags: config
            .capabilities
            .tags
            .then(|| vec![config.identity.lb_name.clone()]),
    }
}

/// Attributes of `existing` that differ from the desired state, as one update.
#[must_use]
pub fn listener_update(
    config: &ServiceConfig,
    existing: &Listener,
    desired: &ListenerCreate,
) -> ListenerUpdate {
    let mut update = ListenerUpdate::default();

    if config.capabilities.tags && !existing.tags.contains(&config.identity.lb_name) {
        let mut tags = existing.tags.clone();
        tags.push(config.identity.lb_name.clone());
        update.tags = Some(tags);
    }
    if existing.connection_limit != desired.connection_limit {
        update.connection_limit = Some(desired.connection_limit);
    }
    if existing.insert_headers != desired.insert_headers {
        update.insert_headers = Some(desired.insert_headers.clone());
    }
    if existing.default_tls_container_ref != desired.default_tls_container_ref {
        update.default_tls_container_ref =
            Some(desired.default_tls_container_ref.clone().unwrap_or_default());
    }
    if supports_timeouts(config, desired.protocol) {
        if existing.timeout_client_data != desired.timeout_client_data {
            update.timeout_client_data = desired.timeout_client_data;
        }
        if existing.timeout_member_connect != desired.timeout_member_connect {
            update.timeout_member_connect = desired.timeout_member_connect;
        }
        if existing.timeout_member_data != desired.timeout_member_data {
            update.timeout_member_data = desired.timeout_member_data;
        }
        if existing.timeout_tcp_inspect != desired.timeout_tcp_inspect {
            update.timeout_tcp_inspect = desired.timeout_tcp_inspect;
        }
    }
    if let Some(cidrs) = &desired.allowed_cidrs {
        let current: BTreeSet<&String> = existing.allowed_cidrs.iter().collect();
        let wanted: BTreeSet<&String> = cidrs.iter().collect();
        if current != wanted {
            update.allowed_cidrs = Some(cidrs.clone());
        }
    }

    update
}

/// Create the listener for `port`, or converge the existing one.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn ensure_listener(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb_id: &str,
    existing: Option<&Listener>,
    index: usize,
    port: &ServicePortSpec,
) -> Result<Listener> {
    let desired = desired_listener(config, lb_id, index, port);

    let Some(existing) = existing else {
        let created = pass
            .mutate(lb_id, "create_listener", pass.cloud.create_listener(&desired))
            .await?;
        record_resource_created("listener");
        info!(
            lb_id = %lb_id,
            listener_id = %created.id,
            protocol = %created.protocol,
            port = created.protocol_port,
            "Created listener"
        );
        return Ok(created);
    };

    let update = listener_update(config, existing, &desired);
    if update.is_empty() {
        debug!(listener_id = %existing.id, "Listener up to date");
        return Ok(existing.clone());
    }

    let updated = pass
        .mutate(
            lb_id,
            "update_listener",
            pass.cloud.update_listener(&existing.id, &update),
        )
        .await?;
    record_resource_updated("listener");
    info!(lb_id = %lb_id, listener_id = %updated.id, "Updated listener");
    Ok(updated)
}

/// Delete a listener together with its default pool.
///
/// # Errors
///
/// Propagates gate and cloud failures other than 404.
pub async fn delete_listener(pass: &Pass<'_>, lb_id: &str, listener: &Listener) -> Result<()> {
    if let Some(pool_id) = &listener.default_pool_id {
        pass.mutate_delete(lb_id, "delete_pool", pass.cloud.delete_pool(pool_id))
            .await?;
        record_resource_deleted("pool");
    }
    pass.mutate_delete(
        lb_id,
        "delete_listener",
        pass.cloud.delete_listener(&listener.id),
    )
    .await?;
    record_resource_deleted("listener");
    info!(
        lb_id = %lb_id,
        listener_id = %listener.id,
        port = listener.protocol_port,
        "Deleted listener"
    );
    Ok(())
}

/// Delete the Service's listeners that were not reconciled in this pass.
///
/// Only listeners claimed by the Service are considered.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn delete_unclaimed(
    pass: &Pass<'_>,
    lb_id: &str,
    listeners: &[Listener],
    reconciled: &HashSet<String>,
    tag: &str,
    is_owner: bool,
) -> Result<()> {
    for listener in listeners {
        if reconciled.contains(&listener.id) || !is_claimed_by(listener, tag, is_owner) {
            continue;
        }
        delete_listener(pass, lb_id, listener).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "listeners_tests.rs"]
mod listeners_tests;
