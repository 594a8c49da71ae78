// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-Service security groups for backend node ports.
//!
//! When security group management is enabled, each Service gets a group named
//! `lb-sg-<uid>-<namespace>-<name>` admitting traffic to its node ports. Rules are only
//! ever added: a rule that already exists is left alone and nothing is updated in place.
//!
//! The group is added to every port of every selected backend node, and each such port
//! is tagged with the group ID so that the group can later be removed from exactly the
//! ports it was added to. Deletion cascades and treats missing resources as deleted.

use super::config::{truncate_name, ServiceConfig, ServiceIdentity};
use super::nodes::{filter_nodes, instance_id};
use super::pass::Pass;
use crate::cloud::types::{
    Direction, EtherType, IpFamily, LoadBalancer, Port, PortQuery, PortUpdate, Protocol,
    SecurityGroup, SecurityGroupCreate, SecurityGroupQuery, SecurityGroupRuleQuery,
    SecurityGroupRuleSpec,
};
use crate::constants::{MAX_RESOURCE_NAME_LEN, SECURITY_GROUP_NAME_PREFIX};
use crate::errors::{LbError, Result};
use crate::metrics::{record_resource_created, record_resource_deleted};
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::Node;
use std::collections::HashSet;
use tracing::{debug, info};

const SECURITY_GROUP_KIND: &str = "security group";

/// `lb-sg-<uid>-<namespace>-<name>`
#[must_use]
pub fn security_group_name(identity: &ServiceIdentity) -> String {
    truncate_name(
        &format!(
            "{SECURITY_GROUP_NAME_PREFIX}-{}-{}-{}",
            identity.uid, identity.namespace, identity.name
        ),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Ether type of the addresses in `cidr`.
///
/// # Errors
///
/// Returns `LbError::InvalidConfiguration` when `cidr` does not parse.
pub fn ether_type_of(cidr: &str) -> Result<EtherType> {
    let network: IpNetwork = cidr
        .parse()
        .map_err(|e| LbError::invalid(format!("invalid CIDR {cidr}: {e}")))?;
    Ok(IpFamily::of(&network.ip()).ether_type())
}

fn rule_protocol(protocol: Protocol) -> String {
    protocol.as_str().to_lowercase()
}

fn port_rule(group_id: &str, protocol: &str, port: i32) -> SecurityGroupRuleSpec {
    SecurityGroupRuleSpec {
        security_group_id: group_id.to_string(),
        direction: Direction::Ingress,
        protocol: Some(protocol.to_string()),
        port_range_min: Some(port),
        port_range_max: Some(port),
        ..SecurityGroupRuleSpec::default()
    }
}

/// `(protocol, port)` pairs the backends must admit: every node port plus the
/// health check node port.
fn admitted_ports(config: &ServiceConfig) -> Vec<(String, i32)> {
    let mut ports: Vec<(String, i32)> = config
        .ports
        .iter()
        .map(|p| (rule_protocol(p.protocol), p.node_port))
        .collect();
    if let Some(port) = config.health_check_node_port {
        ports.push((rule_protocol(Protocol::Tcp), port));
    }
    ports
}

/// Ingress rules of the Service group, one per admitted port and source CIDR.
///
/// # Errors
///
/// Returns `LbError::InvalidConfiguration` for an unparsable CIDR.
pub fn desired_rules(
    config: &ServiceConfig,
    group_id: &str,
    source_cidrs: &[String],
) -> Result<Vec<SecurityGroupRuleSpec>> {
    let mut rules = Vec::new();
    for (protocol, port) in admitted_ports(config) {
        for cidr in source_cidrs {
            rules.push(SecurityGroupRuleSpec {
                remote_ip_prefix: Some(cidr.clone()),
                ether_type: ether_type_of(cidr)?,
                ..port_rule(group_id, &protocol, port)
            });
        }
    }
    Ok(rules)
}

/// Rules letting members of the Service group reach the node groups.
#[must_use]
pub fn node_group_rules(
    config: &ServiceConfig,
    group_id: &str,
    node_group_ids: &[String],
) -> Vec<SecurityGroupRuleSpec> {
    let ether_type = config.family().ether_type();
    node_group_ids
        .iter()
        .flat_map(|node_group| {
            admitted_ports(config)
                .into_iter()
                .map(move |(protocol, port)| SecurityGroupRuleSpec {
                    remote_group_id: Some(group_id.to_string()),
                    ether_type,
                    ..port_rule(node_group, &protocol, port)
                })
        })
        .collect()
}

async fn find_security_groups(pass: &Pass<'_>, name: &str) -> Result<Vec<SecurityGroup>> {
    let query = SecurityGroupQuery {
        name: Some(name.to_string()),
    };
    pass.list_all("list_security_groups", |page| {
        pass.cloud.list_security_groups(&query, page)
    })
    .await
}

/// Source CIDRs admitted to the node ports.
///
/// The `ovn` provider preserves client addresses, so the allowed CIDRs apply. Other
/// providers reach members from the member subnet.
async fn source_cidrs(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb: &LoadBalancer,
) -> Result<Vec<String>> {
    if config.capabilities.is_ovn() {
        if config.allowed_cidrs.is_empty() {
            return Ok(vec![config.family().allow_all_cidr().to_string()]);
        }
        return Ok(config.allowed_cidrs.clone());
    }
    let subnet_id = config
        .member_subnet_id
        .clone()
        .unwrap_or_else(|| lb.vip_subnet_id.clone());
    let subnet = pass
        .call("get_subnet", pass.cloud.get_subnet(&subnet_id))
        .await?;
    Ok(vec![subnet.cidr])
}

/// Create the rule unless an identical one exists.
async fn ensure_rule(pass: &Pass<'_>, rule: &SecurityGroupRuleSpec) -> Result<()> {
    let query = SecurityGroupRuleQuery {
        spec: Some(rule.clone()),
        ..SecurityGroupRuleQuery::default()
    };
    let existing = pass
        .list_all("list_security_group_rules", |page| {
            pass.cloud.list_security_group_rules(&query, page)
        })
        .await?;
    if !existing.is_empty() {
        return Ok(());
    }
    match pass
        .call(
            "create_security_group_rule",
            pass.cloud.create_security_group_rule(rule),
        )
        .await
    {
        Ok(created) => {
            record_resource_created("security_group_rule");
            debug!(
                security_group_id = %created.security_group_id,
                rule_id = %created.id,
                port = created.port_range_min.unwrap_or_default(),
                "Created security group rule"
            );
            Ok(())
        }
        Err(LbError::Cloud { source, .. }) if source.is_conflict() => Ok(()),
        Err(e) => Err(e),
    }
}

async fn ports_of_instance(pass: &Pass<'_>, instance: &str) -> Result<Vec<Port>> {
    let query = PortQuery {
        device_id: Some(instance.to_string()),
        ..PortQuery::default()
    };
    pass.list_all("list_ports", |page| pass.cloud.list_ports(&query, page))
        .await
}

async fn tagged_ports(pass: &Pass<'_>, group_id: &str) -> Result<Vec<Port>> {
    let query = PortQuery {
        tags: vec![group_id.to_string()],
        ..PortQuery::default()
    };
    pass.list_all("list_ports", |page| pass.cloud.list_ports(&query, page))
        .await
}

async fn associate(pass: &Pass<'_>, port: &Port, group_id: &str) -> Result<()> {
    let has_group = port.security_groups.iter().any(|g| g == group_id);
    let has_tag = port.tags.iter().any(|t| t == group_id);
    if has_group && has_tag {
        return Ok(());
    }
    let mut update = PortUpdate::default();
    if !has_group {
        let mut groups = port.security_groups.clone();
        groups.push(group_id.to_string());
        update.security_groups = Some(groups);
    }
    if !has_tag {
        let mut tags = port.tags.clone();
        tags.push(group_id.to_string());
        update.tags = Some(tags);
    }
    pass.call("update_port", pass.cloud.update_port(&port.id, &update))
        .await?;
    info!(port_id = %port.id, security_group_id = %group_id, "Added security group to port");
    Ok(())
}

async fn disassociate(pass: &Pass<'_>, port: &Port, group_id: &str) -> Result<()> {
    let update = PortUpdate {
        security_groups: Some(
            port.security_groups
                .iter()
                .filter(|g| *g != group_id)
                .cloned()
                .collect(),
        ),
        tags: Some(port.tags.iter().filter(|t| *t != group_id).cloned().collect()),
    };
    pass.call_optional("update_port", pass.cloud.update_port(&port.id, &update))
        .await?;
    info!(port_id = %port.id, security_group_id = %group_id, "Removed security group from port");
    Ok(())
}

/// Converge the Service's security group, its rules and its node port associations.
///
/// Does nothing unless security group management is enabled.
///
/// # Errors
///
/// Returns `LbError::MultipleResults` when the group name is ambiguous and propagates
/// cloud failures.
pub async fn ensure_security_group(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb: &LoadBalancer,
    nodes: &[Node],
) -> Result<()> {
    if !pass.options.manage_security_groups {
        return Ok(());
    }

    let name = security_group_name(&config.identity);
    let mut groups = find_security_groups(pass, &name).await?;
    let group = match groups.len() {
        0 => {
            let request = SecurityGroupCreate {
                name: name.clone(),
                description: format!(
                    "Security group for service {} of cluster {}",
                    config.identity.key(),
                    pass.options.cluster_name
                ),
            };
            let created = pass
                .call(
                    "create_security_group",
                    pass.cloud.create_security_group(&request),
                )
                .await?;
            record_resource_created("security_group");
            info!(security_group_id = %created.id, name = %name, "Created security group");
            created
        }
        1 => groups.remove(0),
        _ => {
            return Err(LbError::MultipleResults {
                kind: SECURITY_GROUP_KIND,
                name,
            })
        }
    };

    let cidrs = source_cidrs(pass, config, lb).await?;
    for rule in desired_rules(config, &group.id, &cidrs)? {
        ensure_rule(pass, &rule).await?;
    }
    for rule in node_group_rules(config, &group.id, &pass.options.node_security_group_ids) {
        ensure_rule(pass, &rule).await?;
    }

    let mut selected = HashSet::new();
    for node in filter_nodes(nodes, &config.node_selector) {
        let Some(instance) = instance_id(node) else {
            continue;
        };
        for port in ports_of_instance(pass, &instance).await? {
            associate(pass, &port, &group.id).await?;
        }
        selected.insert(instance);
    }

    for port in tagged_ports(pass, &group.id).await? {
        if !selected.contains(&port.device_id) {
            disassociate(pass, &port, &group.id).await?;
        }
    }
    Ok(())
}

/// Remove the Service's security group from every port and delete it with its rules.
///
/// # Errors
///
/// Propagates cloud failures other than 404.
pub async fn delete_security_group(pass: &Pass<'_>, identity: &ServiceIdentity) -> Result<()> {
    if !pass.options.manage_security_groups {
        return Ok(());
    }

    let name = security_group_name(identity);
    for group in find_security_groups(pass, &name).await? {
        for port in tagged_ports(pass, &group.id).await? {
            disassociate(pass, &port, &group.id).await?;
        }

        let referencing = SecurityGroupRuleQuery {
            remote_group_id: Some(group.id.clone()),
            ..SecurityGroupRuleQuery::default()
        };
        let owned = SecurityGroupRuleQuery {
            security_group_id: Some(group.id.clone()),
            ..SecurityGroupRuleQuery::default()
        };
        for query in [referencing, owned] {
            let rules = pass
                .list_all("list_security_group_rules", |page| {
                    pass.cloud.list_security_group_rules(&query, page)
                })
                .await?;
            for rule in rules {
                pass.call_delete(
                    "delete_security_group_rule",
                    pass.cloud.delete_security_group_rule(&rule.id),
                )
                .await?;
            }
        }

        pass.call_delete(
            "delete_security_group",
            pass.cloud.delete_security_group(&group.id),
        )
        .await?;
        record_resource_deleted("security_group");
        info!(security_group_id = %group.id, name = %name, "Deleted security group");
    }
    Ok(())
}

#[cfg(test)]
#[path = "security_groups_tests.rs"]
mod security_groups_tests;
