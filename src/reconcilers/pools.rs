// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Pool and member convergence.
//!
//! Every listener has one default pool. The pool protocol cannot change in place:
//! a mismatch deletes the pool with its members and creates a new one. Members are
//! compared as sets of `(name, address, port, monitor port)` keys and replaced in one
//! batch call, or one member at a time when the provider requires serial calls.

use super::config::{truncate_name, ServiceConfig, ServicePortSpec};
use super::nodes::{filter_nodes, node_address};
use super::pass::Pass;
use crate::cloud::types::{Listener, Member, MemberSpec, Pool, PoolCreate, PoolUpdate};
use crate::constants::{MAX_RESOURCE_NAME_LEN, POOL_NAME_PREFIX};
use crate::errors::Result;
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Identity of a member within a pool.
pub type MemberKey = (String, String, i32, i32);

/// `pool_<index>_<lbName>`
#[must_use]
pub fn pool_name(index: usize, lb_name: &str) -> String {
    truncate_name(
        &format!("{POOL_NAME_PREFIX}_{index}_{lb_name}"),
        MAX_RESOURCE_NAME_LEN,
    )
}

#[must_use]
pub fn spec_key(member: &MemberSpec) -> MemberKey {
    (
        member.name.clone(),
        member.address.clone(),
        member.protocol_port,
        member.monitor_port.unwrap_or(0),
    )
}

#[must_use]
pub fn member_key(member: &Member) -> MemberKey {
    (
        member.name.clone(),
        member.address.clone(),
        member.protocol_port,
        member.monitor_port.unwrap_or(0),
    )
}

/// Members for every selected node that has an address in the Service's family.
///
/// Nodes without a qualifying address are skipped.
#[must_use]
pub fn desired_members(
    config: &ServiceConfig,
    nodes: &[Node],
    port: &ServicePortSpec,
    monitor_port: Option<i32>,
) -> Vec<MemberSpec> {
    filter_nodes(nodes, &config.node_selector)
        .into_iter()
        .filter_map(|node| {
            let Some(address) = node_address(node, config.ip_family) else {
                warn!(
                    node = %node.name_any(),
                    "Node has no usable address, skipping it as pool member"
                );
                return None;
            };
            Some(MemberSpec {
                name: node.name_any(),
                address,
                protocol_port: port.node_port,
                monitor_port,
                subnet_id: config.member_subnet_id.clone(),
            })
        })
        .collect()
}

async fn create_pool(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb_id: &str,
    listener: &Listener,
    index: usize,
) -> Result<Pool> {
    let request = PoolCreate {
        name: pool_name(index, &config.identity.lb_name),
        listener_id: listener.id.clone(),
        protocol: config.pool_protocol(listener.protocol),
        lb_algorithm: config.lb_method.clone(),
        session_persistence: config.session_persistence.clone(),
    };
    let pool = pass
        .mutate(lb_id, "create_pool", pass.cloud.create_pool(&request))
        .await?;
    record_resource_created("pool");
    info!(
        listener_id = %listener.id,
        pool_id = %pool.id,
        protocol = %pool.protocol,
        "Created pool"
    );
    Ok(pool)
}

/// Converge the default pool of `listener`.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn ensure_pool(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb_id: &str,
    listener: &Listener,
    index: usize,
) -> Result<Pool> {
    let existing = match &listener.default_pool_id {
        Some(id) => pass.call_optional("get_pool", pass.cloud.get_pool(id)).await?,
        None => None,
    };
    let Some(existing) = existing else {
        return create_pool(pass, config, lb_id, listener, index).await;
    };

    let protocol = config.pool_protocol(listener.protocol);
    if existing.protocol != protocol {
        info!(
            pool_id = %existing.id,
            from = %existing.protocol,
            to = %protocol,
            "Pool protocol changed, recreating pool"
        );
        pass.mutate_delete(lb_id, "delete_pool", pass.cloud.delete_pool(&existing.id))
            .await?;
        record_resource_deleted("pool");
        return create_pool(pass, config, lb_id, listener, index).await;
    }

    let update = PoolUpdate {
        lb_algorithm: (existing.lb_algorithm != config.lb_method)
            .then(|| config.lb_method.clone()),
        session_persistence: (existing.session_persistence != config.session_persistence)
            .then(|| config.session_persistence.clone()),
    };
    if !update.is_empty() {
        let updated = pass
            .mutate(lb_id, "update_pool", pass.cloud.update_pool(&existing.id, &update))
            .await?;
        record_resource_updated("pool");
        info!(
            pool_id = %updated.id,
            lb_method = %updated.lb_algorithm,
            session_persistence = ?updated.session_persistence,
            "Updated pool"
        );
        return Ok(updated);
    }

    Ok(existing)
}

/// Every member of the pool.
///
/// # Errors
///
/// Propagates listing failures.
pub async fn list_members(pass: &Pass<'_>, pool_id: &str) -> Result<Vec<Member>> {
    pass.list_all("list_members", |page| pass.cloud.list_members(pool_id, page))
        .await
}

/// Make the pool's member set equal to `desired`.
///
/// Nothing is written when the key sets already match.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn ensure_members(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb_id: &str,
    pool: &Pool,
    desired: &[MemberSpec],
) -> Result<()> {
    let existing = list_members(pass, &pool.id).await?;
    let current: HashSet<MemberKey> = existing.iter().map(member_key).collect();
    let wanted: HashSet<MemberKey> = desired.iter().map(spec_key).collect();
    if current == wanted {
        debug!(pool_id = %pool.id, members = wanted.len(), "Pool members up to date");
        return Ok(());
    }

    if !config.capabilities.serial_api_calls {
        pass.mutate(
            lb_id,
            "batch_update_members",
            pass.cloud.batch_update_members(&pool.id, desired),
        )
        .await?;
        record_resource_updated("member");
        info!(pool_id = %pool.id, members = desired.len(), "Replaced pool members");
        return Ok(());
    }

    for member in existing.iter().filter(|m| !wanted.contains(&member_key(m))) {
        pass.mutate_delete(
            lb_id,
            "delete_member",
            pass.cloud.delete_member(&pool.id, &member.id),
        )
        .await?;
        record_resource_deleted("member");
        info!(pool_id = %pool.id, member = %member.name, "Deleted pool member");
    }
    for member in desired.iter().filter(|m| !current.contains(&spec_key(m))) {
        pass.mutate(
            lb_id,
            "create_member",
            pass.cloud.create_member(&pool.id, member),
        )
        .await?;
        record_resource_created("member");
        info!(pool_id = %pool.id, member = %member.name, "Created pool member");
    }
    Ok(())
}

#[cfg(test)]
#[path = "pools_tests.rs"]
mod pools_tests;
