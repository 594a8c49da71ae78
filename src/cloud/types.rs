// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Records and request bodies exchanged with the cloud API facade.
//!
//! These mirror the subset of the Octavia and Neutron resources the reconcilers read
//! and write. Enumerations render with their wire spelling through `Display`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Enumerations
// ============================================================================

/// Listener, pool and Service port protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
    Http,
    Https,
    TerminatedHttps,
    Proxy,
    #[serde(rename = "PROXYV2")]
    ProxyV2,
}

impl Protocol {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
            Self::Sctp => "SCTP",
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::TerminatedHttps => "TERMINATED_HTTPS",
            Self::Proxy => "PROXY",
            Self::ProxyV2 => "PROXYV2",
        }
    }

    /// Parse a Kubernetes Service port protocol; `None` means TCP.
    #[must_use]
    pub fn from_service_port(protocol: Option<&str>) -> Option<Self> {
        match protocol.unwrap_or("TCP") {
            "TCP" => Some(Self::Tcp),
            "UDP" => Some(Self::Udp),
            "SCTP" => Some(Self::Sctp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Load balancer provisioning status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProvisioningStatus {
    #[default]
    Active,
    Error,
    PendingCreate,
    PendingUpdate,
    PendingDelete,
    Deleted,
}

impl ProvisioningStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::PendingCreate => "PENDING_CREATE",
            Self::PendingUpdate => "PENDING_UPDATE",
            Self::PendingDelete => "PENDING_DELETE",
            Self::Deleted => "DELETED",
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health monitor probe type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MonitorKind {
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    #[serde(rename = "UDP-CONNECT")]
    UdpConnect,
    #[serde(rename = "SCTP")]
    Sctp,
    #[serde(rename = "HTTP")]
    Http,
}

impl MonitorKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tcp => "TCP",
            Self::UdpConnect => "UDP-CONNECT",
            Self::Sctp => "SCTP",
            Self::Http => "HTTP",
        }
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IP family of a Service, node address or CIDR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum IpFamily {
    #[default]
    #[serde(rename = "IPv4")]
    V4,
    #[serde(rename = "IPv6")]
    V6,
}

impl IpFamily {
    /// Parse a Kubernetes `spec.ipFamilies` entry.
    #[must_use]
    pub fn from_kube(family: &str) -> Option<Self> {
        match family {
            "IPv4" => Some(Self::V4),
            "IPv6" => Some(Self::V6),
            _ => None,
        }
    }

    #[must_use]
    pub fn of(addr: &std::net::IpAddr) -> Self {
        if addr.is_ipv6() {
            Self::V6
        } else {
            Self::V4
        }
    }

    /// The CIDR that admits every address of this family.
    #[must_use]
    pub fn allow_all_cidr(self) -> &'static str {
        match self {
            Self::V4 => "0.0.0.0/0",
            Self::V6 => "::/0",
        }
    }

    #[must_use]
    pub fn ether_type(self) -> EtherType {
        match self {
            Self::V4 => EtherType::IPv4,
            Self::V6 => EtherType::IPv6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::V4 => "IPv4",
            Self::V6 => "IPv6",
        })
    }
}

/// Security group rule ether type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EtherType {
    #[default]
    IPv4,
    IPv6,
}

/// Security group rule direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Ingress,
    Egress,
}

// ============================================================================
// Load Balancer Resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub id: String,
    pub name: String,
    pub description: String,
    pub provisioning_status: ProvisioningStatus,
    pub vip_address: String,
    pub vip_port_id: String,
    pub vip_subnet_id: String,
    pub vip_network_id: String,
    pub tags: Vec<String>,
    pub provider: String,
    pub flavor_id: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadBalancerCreate {
    pub name: String,
    pub description: String,
    pub vip_network_id: Option<String>,
    pub vip_subnet_id: Option<String>,
    pub vip_port_id: Option<String>,
    pub vip_address: Option<String>,
    pub provider: String,
    pub flavor_id: Option<String>,
    pub availability_zone: Option<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadBalancerUpdate {
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LoadBalancerQuery {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Listener {
    pub id: String,
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: Protocol,
    pub protocol_port: i32,
    pub connection_limit: i32,
    pub insert_headers: BTreeMap<String, String>,
    pub default_tls_container_ref: Option<String>,
    pub timeout_client_data: Option<i32>,
    pub timeout_member_connect: Option<i32>,
    pub timeout_member_data: Option<i32>,
    pub timeout_tcp_inspect: Option<i32>,
    pub allowed_cidrs: Vec<String>,
    pub tags: Vec<String>,
    pub default_pool_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListenerCreate {
    pub name: String,
    pub loadbalancer_id: String,
    pub protocol: Protocol,
    pub protocol_port: i32,
    pub connection_limit: i32,
    pub insert_headers: BTreeMap<String, String>,
    pub default_tls_container_ref: Option<String>,
    pub timeout_client_data: Option<i32>,
    pub timeout_member_connect: Option<i32>,
    pub timeout_member_data: Option<i32>,
    pub timeout_tcp_inspect: Option<i32>,
    pub allowed_cidrs: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

/// Partial listener update; `None` fields are left untouched.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ListenerUpdate {
    pub connection_limit: Option<i32>,
    pub insert_headers: Option<BTreeMap<String, String>>,
    pub default_tls_container_ref: Option<String>,
    pub timeout_client_data: Option<i32>,
    pub timeout_member_connect: Option<i32>,
    pub timeout_member_data: Option<i32>,
    pub timeout_tcp_inspect: Option<i32>,
    pub allowed_cidrs: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

impl ListenerUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Pool {
    pub id: String,
    pub name: String,
    pub loadbalancer_id: String,
    pub listener_id: Option<String>,
    pub protocol: Protocol,
    pub lb_algorithm: String,
    pub session_persistence: Option<String>,
    pub monitor_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolCreate {
    pub name: String,
    pub listener_id: String,
    pub protocol: Protocol,
    pub lb_algorithm: String,
    pub session_persistence: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PoolUpdate {
    pub lb_algorithm: Option<String>,
    /// `Some(None)` removes persistence from the pool
    pub session_persistence: Option<Option<String>>,
}

impl PoolUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Member {
    pub id: String,
    pub name: String,
    pub address: String,
    pub protocol_port: i32,
    pub monitor_port: Option<i32>,
    pub subnet_id: Option<String>,
}

/// Desired pool member, used for single creates and batch replacement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MemberSpec {
    pub name: String,
    pub address: String,
    pub protocol_port: i32,
    pub monitor_port: Option<i32>,
    pub subnet_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthMonitor {
    pub id: String,
    pub name: String,
    pub pool_id: String,
    pub kind: MonitorKind,
    pub delay: i32,
    pub timeout: i32,
    pub max_retries: i32,
    pub max_retries_down: i32,
    pub url_path: Option<String>,
    pub http_method: Option<String>,
    pub expected_codes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthMonitorCreate {
    pub name: String,
    pub pool_id: String,
    pub kind: MonitorKind,
    pub delay: i32,
    pub timeout: i32,
    pub max_retries: i32,
    pub max_retries_down: i32,
    pub url_path: Option<String>,
    pub http_method: Option<String>,
    pub expected_codes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HealthMonitorUpdate {
    pub name: Option<String>,
    pub delay: Option<i32>,
    pub timeout: Option<i32>,
    pub max_retries: Option<i32>,
    pub max_retries_down: Option<i32>,
}

impl HealthMonitorUpdate {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// Network Resources
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    pub name: String,
    pub external: bool,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkQuery {
    pub external: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub cidr: String,
    pub tags: Vec<String>,
}

/// Tag filters understood by list endpoints.
///
/// `tags` requires all, `tags_any` requires one, `not_tags` excludes resources
/// carrying all, `not_tags_any` excludes resources carrying any.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TagFilter {
    pub tags: Vec<String>,
    pub tags_any: Vec<String>,
    pub not_tags: Vec<String>,
    pub not_tags_any: Vec<String>,
}

impl TagFilter {
    /// Evaluate the filter against a resource's tags.
    #[must_use]
    pub fn admits(&self, tags: &[String]) -> bool {
        let has = |t: &String| tags.contains(t);
        (self.tags.is_empty() || self.tags.iter().all(has))
            && (self.tags_any.is_empty() || self.tags_any.iter().any(has))
            && (self.not_tags.is_empty() || !self.not_tags.iter().all(has))
            && (self.not_tags_any.is_empty() || !self.not_tags_any.iter().any(has))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SubnetQuery {
    pub network_id: Option<String>,
    pub tags: TagFilter,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FixedIp {
    pub subnet_id: String,
    pub ip_address: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Port {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub device_id: String,
    pub fixed_ips: Vec<FixedIp>,
    pub security_groups: Vec<String>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortQuery {
    pub device_id: Option<String>,
    pub network_id: Option<String>,
    /// Ports carrying all of these tags
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PortUpdate {
    pub security_groups: Option<Vec<String>>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatingIp {
    pub id: String,
    pub floating_ip_address: String,
    pub floating_network_id: String,
    pub port_id: Option<String>,
    pub subnet_id: Option<String>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatingIpQuery {
    pub port_id: Option<String>,
    pub floating_ip_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FloatingIpCreate {
    pub floating_network_id: String,
    pub subnet_id: Option<String>,
    pub floating_ip_address: Option<String>,
    pub port_id: Option<String>,
    pub description: String,
}

// ============================================================================
// Security Groups
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityGroup {
    pub id: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityGroupQuery {
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityGroupCreate {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SecurityGroupRule {
    pub id: String,
    pub security_group_id: String,
    pub direction: Direction,
    pub protocol: Option<String>,
    pub port_range_min: Option<i32>,
    pub port_range_max: Option<i32>,
    pub remote_ip_prefix: Option<String>,
    pub remote_group_id: Option<String>,
    pub ether_type: EtherType,
}

/// Identity of a security group rule, used both to create rules and to find them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct SecurityGroupRuleSpec {
    pub security_group_id: String,
    pub direction: Direction,
    pub protocol: Option<String>,
    pub port_range_min: Option<i32>,
    pub port_range_max: Option<i32>,
    pub remote_ip_prefix: Option<String>,
    pub remote_group_id: Option<String>,
    pub ether_type: EtherType,
}

impl SecurityGroupRuleSpec {
    #[must_use]
    pub fn matches(&self, rule: &SecurityGroupRule) -> bool {
        self.security_group_id == rule.security_group_id
            && self.direction == rule.direction
            && self.protocol == rule.protocol
            && self.port_range_min == rule.port_range_min
            && self.port_range_max == rule.port_range_max
            && self.remote_ip_prefix == rule.remote_ip_prefix
            && self.remote_group_id == rule.remote_group_id
            && self.ether_type == rule.ether_type
    }
}

/// Rule listing filter; unset fields match anything.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecurityGroupRuleQuery {
    pub security_group_id: Option<String>,
    pub remote_group_id: Option<String>,
    pub spec: Option<SecurityGroupRuleSpec>,
}

// ============================================================================
// Pagination
// ============================================================================

/// One page of a list response; `next` is the opaque cursor of the following page.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageRequest {
    pub marker: Option<String>,
    pub limit: Option<usize>,
}
