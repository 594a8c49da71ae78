// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Per-pass Service configuration.
//!
//! [`ServiceConfig::resolve`] merges the Service's annotations, the selected load balancer
//! class and the provider options into one immutable snapshot. Every overridable setting
//! follows the same precedence: **annotation, then class, then global default**.
//!
//! Settings the control plane cannot honor are degraded here, once, with a warning event:
//! source ranges without VIP ACL support and availability zones without zone support.
//!
//! When no VIP network, subnet or port is configured anywhere, the VIP subnet is
//! discovered from the ports of one backend node: the fixed IP carrying the node's
//! address names the subnet.

use super::nodes::{instance_id, node_address, parse_node_selector};
use super::pass::Pass;
use crate::annotations::{
    AnnotationReader, ANNOTATION_AVAILABILITY_ZONE, ANNOTATION_CLASS,
    ANNOTATION_CONNECTION_LIMIT, ANNOTATION_DEFAULT_TLS_CONTAINER_REF,
    ANNOTATION_ENABLE_HEALTH_MONITOR, ANNOTATION_FLAVOR_ID, ANNOTATION_FLOATING_NETWORK_ID,
    ANNOTATION_FLOATING_SUBNET, ANNOTATION_FLOATING_SUBNET_ID, ANNOTATION_FLOATING_SUBNET_TAGS,
    ANNOTATION_HEALTH_MONITOR_DELAY, ANNOTATION_HEALTH_MONITOR_MAX_RETRIES,
    ANNOTATION_HEALTH_MONITOR_MAX_RETRIES_DOWN, ANNOTATION_HEALTH_MONITOR_TIMEOUT,
    ANNOTATION_HOSTNAME, ANNOTATION_INTERNAL, ANNOTATION_KEEP_FLOATING_IP, ANNOTATION_LB_METHOD,
    ANNOTATION_LOAD_BALANCER_ID, ANNOTATION_MEMBER_SUBNET_ID, ANNOTATION_NETWORK_ID,
    ANNOTATION_NODE_SELECTOR, ANNOTATION_PORT_ID, ANNOTATION_PROXY_PROTOCOL,
    ANNOTATION_SOURCE_RANGES, ANNOTATION_SUBNET_ID, ANNOTATION_TIMEOUT_CLIENT_DATA,
    ANNOTATION_TIMEOUT_MEMBER_CONNECT, ANNOTATION_TIMEOUT_MEMBER_DATA,
    ANNOTATION_TIMEOUT_TCP_INSPECT, ANNOTATION_X_FORWARDED_FOR,
};
use crate::capabilities::CapabilitySet;
use crate::cloud::types::{IpFamily, NetworkQuery, PortQuery, Protocol};
use crate::constants::{
    DEFAULT_CONNECTION_LIMIT, DEFAULT_TIMEOUT_CLIENT_DATA_MS, DEFAULT_TIMEOUT_MEMBER_CONNECT_MS,
    DEFAULT_TIMEOUT_MEMBER_DATA_MS, DEFAULT_TIMEOUT_TCP_INSPECT_MS, LEGACY_NAME_LEN,
    MAX_RESOURCE_NAME_LEN, SERVICE_NAME_PREFIX, SESSION_PERSISTENCE_SOURCE_IP,
};
use crate::errors::{LbError, Result};
use crate::events::{REASON_AVAILABILITY_ZONE_IGNORED, REASON_SOURCE_RANGES_IGNORED};
use crate::matcher::SubnetMatcher;
use crate::options::{LbClass, ProviderOptions};
use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, warn};

const TRAFFIC_POLICY_LOCAL: &str = "Local";
const SESSION_AFFINITY_CLIENT_IP: &str = "ClientIP";

// ============================================================================
// Naming
// ============================================================================

/// Cut `name` to at most `max` bytes on a character boundary.
#[must_use]
pub fn truncate_name(name: &str, max: usize) -> String {
    if name.len() <= max {
        return name.to_string();
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    name[..end].to_string()
}

/// Generated load balancer name: `kube_service_<cluster>_<namespace>_<name>`.
#[must_use]
pub fn load_balancer_name(cluster: &str, namespace: &str, name: &str) -> String {
    truncate_name(
        &format!("{SERVICE_NAME_PREFIX}{cluster}_{namespace}_{name}"),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Name used by older releases: `a` followed by the dashless UID, 32 characters.
#[must_use]
pub fn legacy_load_balancer_name(uid: &str) -> String {
    let compact: String = format!("a{}", uid.replace('-', ""));
    truncate_name(&compact, LEGACY_NAME_LEN)
}

/// Who a pass acts for, resolvable without touching the cloud.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceIdentity {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    /// Generated load balancer name, also the source tag
    pub lb_name: String,
    pub legacy_name: String,
    /// Load balancer referenced through the ID annotation
    pub lb_id: Option<String>,
}

impl ServiceIdentity {
    #[must_use]
    pub fn from_service(service: &Service, options: &ProviderOptions) -> Self {
        let namespace = service.namespace().unwrap_or_default();
        let name = service.name_any();
        let uid = service.uid().unwrap_or_default();
        let reader = AnnotationReader::new(service.metadata.annotations.as_ref());
        Self {
            lb_name: load_balancer_name(&options.cluster_name, &namespace, &name),
            legacy_name: legacy_load_balancer_name(&uid),
            lb_id: reader.get_optional(ANNOTATION_LOAD_BALANCER_ID),
            namespace,
            name,
            uid,
        }
    }

    /// `namespace/name`
    #[must_use]
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// ============================================================================
// Resolved settings
// ============================================================================

/// How the client address reaches the backends. Proxy protocol and `X-Forwarded-For`
/// exclude each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClientIpMode {
    #[default]
    None,
    ProxyV1,
    ProxyV2,
    XForwardedFor,
}

impl ClientIpMode {
    #[must_use]
    pub fn is_proxy(self) -> bool {
        matches!(self, Self::ProxyV1 | Self::ProxyV2)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthMonitorSettings {
    pub enabled: bool,
    pub delay: i32,
    pub timeout: i32,
    pub max_retries: i32,
    pub max_retries_down: i32,
}

/// Listener timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerTimeouts {
    pub client_data: i32,
    pub member_connect: i32,
    pub member_data: i32,
    pub tcp_inspect: i32,
}

impl Default for ListenerTimeouts {
    fn default() -> Self {
        Self {
            client_data: DEFAULT_TIMEOUT_CLIENT_DATA_MS,
            member_connect: DEFAULT_TIMEOUT_MEMBER_CONNECT_MS,
            member_data: DEFAULT_TIMEOUT_MEMBER_DATA_MS,
            tcp_inspect: DEFAULT_TIMEOUT_TCP_INSPECT_MS,
        }
    }
}

/// A Service port exposed through the load balancer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServicePortSpec {
    pub name: Option<String>,
    pub protocol: Protocol,
    pub port: i32,
    pub node_port: i32,
}

/// Where the floating IP may be allocated.
#[derive(Debug, Clone, Default)]
pub struct FloatingSelection {
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub subnet_matcher: SubnetMatcher,
}

/// Immutable configuration of one reconciliation pass.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub identity: ServiceIdentity,
    pub internal: bool,
    /// First entry of `spec.ipFamilies`
    pub ip_family: Option<IpFamily>,
    pub connection_limit: i32,
    pub vip_network_id: Option<String>,
    pub vip_subnet_id: Option<String>,
    pub vip_port_id: Option<String>,
    pub member_subnet_id: Option<String>,
    pub floating: FloatingSelection,
    pub client_ip: ClientIpMode,
    pub tls_container_ref: Option<String>,
    /// Source CIDRs for the listener ACL; empty when VIP ACLs are unsupported
    pub allowed_cidrs: Vec<String>,
    pub flavor_id: Option<String>,
    pub availability_zone: Option<String>,
    pub monitor: HealthMonitorSettings,
    pub health_check_node_port: Option<i32>,
    pub lb_method: String,
    pub session_persistence: Option<String>,
    pub timeouts: ListenerTimeouts,
    pub node_selector: BTreeMap<String, String>,
    /// `spec.loadBalancerIP`
    pub load_balancer_ip: Option<String>,
    pub keep_floating_ip: bool,
    pub hostname: Option<String>,
    pub ports: Vec<ServicePortSpec>,
    pub capabilities: CapabilitySet,
}

impl ServiceConfig {
    /// Resolve the configuration of `service`, discovering the VIP subnet and floating
    /// network when nothing configures them.
    ///
    /// # Errors
    ///
    /// Returns `LbError::InvalidConfiguration` for inconsistent settings, no ports, no
    /// nodes or an undiscoverable VIP subnet, and propagates discovery call failures.
    pub async fn resolve(
        pass: &Pass<'_>,
        service: &Service,
        nodes: &[Node],
        capabilities: CapabilitySet,
    ) -> Result<Self> {
        let mut config = Self::from_service(pass, service, nodes, capabilities)?;

        if config.vip_network_id.is_none()
            && config.vip_subnet_id.is_none()
            && config.vip_port_id.is_none()
        {
            let (network_id, subnet_id) = discover_vip_subnet(pass, &config, nodes).await?;
            debug!(
                service = %config.identity.key(),
                network_id = %network_id,
                subnet_id = %subnet_id,
                "Discovered VIP subnet from node ports"
            );
            config.vip_network_id = Some(network_id);
            config.vip_subnet_id = Some(subnet_id);
        }
        if config.member_subnet_id.is_none() {
            config.member_subnet_id.clone_from(&config.vip_subnet_id);
        }
        if !config.internal && config.floating.network_id.is_none() {
            config.floating.network_id = discover_floating_network(pass).await?;
        }

        Ok(config)
    }

    /// Resolve everything that needs no remote call.
    ///
    /// # Errors
    ///
    /// Returns `LbError::InvalidConfiguration` for inconsistent settings, no ports or
    /// no nodes.
    pub fn from_service(
        pass: &Pass<'_>,
        service: &Service,
        nodes: &[Node],
        capabilities: CapabilitySet,
    ) -> Result<Self> {
        let options = pass.options;
        let identity = ServiceIdentity::from_service(service, options);
        let reader = AnnotationReader::new(service.metadata.annotations.as_ref());
        let spec = service.spec.clone().unwrap_or_default();

        let class = match reader.get_optional(ANNOTATION_CLASS) {
            Some(name) => Some(options.classes.get(&name).ok_or_else(|| {
                LbError::invalid(format!("load balancer class {name} is not configured"))
            })?),
            None => None,
        };

        let ports = service_ports(service)?;
        if nodes.is_empty() {
            return Err(LbError::invalid(format!(
                "no backend nodes available for service {}",
                identity.key()
            )));
        }

        let ip_family = spec
            .ip_families
            .as_ref()
            .and_then(|families| families.first())
            .and_then(|family| IpFamily::from_kube(family));

        let internal = options.internal_lb
            || ip_family == Some(IpFamily::V6)
            || reader.get_bool(ANNOTATION_INTERNAL, false);

        let client_ip = client_ip_mode(&reader)?;

        let vip_network_id = reader
            .get_optional(ANNOTATION_NETWORK_ID)
            .or_else(|| class.and_then(|c| c.network_id.clone()))
            .or_else(|| options.network_id.clone());
        let vip_subnet_id = reader
            .get_optional(ANNOTATION_SUBNET_ID)
            .or_else(|| class.and_then(|c| c.subnet_id.clone()))
            .or_else(|| options.subnet_id.clone());
        let member_subnet_id = reader
            .get_optional(ANNOTATION_MEMBER_SUBNET_ID)
            .or_else(|| class.and_then(|c| c.member_subnet_id.clone()))
            .or_else(|| options.member_subnet_id.clone());

        let floating = floating_selection(&reader, class, options)?;

        let allowed_cidrs = allowed_cidrs(
            pass,
            &reader,
            spec.load_balancer_source_ranges.as_deref(),
            ip_family,
            &capabilities,
        )?;

        let flavor_id = reader
            .get_optional(ANNOTATION_FLAVOR_ID)
            .or_else(|| options.flavor_id.clone())
            .filter(|_| capabilities.flavors);

        let requested_zone = reader
            .get_optional(ANNOTATION_AVAILABILITY_ZONE)
            .or_else(|| options.availability_zone.clone());
        let availability_zone = match requested_zone {
            Some(zone) if !capabilities.availability_zones => {
                pass.warn_event(
                    REASON_AVAILABILITY_ZONE_IGNORED,
                    format!(
                        "Availability zone {zone} is not supported by provider {}, ignoring it",
                        capabilities.provider
                    ),
                );
                None
            }
            other => other,
        };

        let monitor = HealthMonitorSettings {
            enabled: reader.get_bool(ANNOTATION_ENABLE_HEALTH_MONITOR, options.create_monitor),
            delay: reader.get_int(ANNOTATION_HEALTH_MONITOR_DELAY, options.monitor_delay),
            timeout: reader.get_int(ANNOTATION_HEALTH_MONITOR_TIMEOUT, options.monitor_timeout),
            max_retries: reader.get_int(
                ANNOTATION_HEALTH_MONITOR_MAX_RETRIES,
                options.monitor_max_retries,
            ),
            max_retries_down: reader.get_int(
                ANNOTATION_HEALTH_MONITOR_MAX_RETRIES_DOWN,
                options.monitor_max_retries_down,
            ),
        };

        let health_check_node_port = spec
            .health_check_node_port
            .filter(|port| *port > 0)
            .filter(|_| monitor.enabled)
            .filter(|_| spec.external_traffic_policy.as_deref() == Some(TRAFFIC_POLICY_LOCAL));

        let lb_method = reader
            .get_optional(ANNOTATION_LB_METHOD)
            .unwrap_or_else(|| options.effective_lb_method().to_string());

        let session_persistence = (spec.session_affinity.as_deref()
            == Some(SESSION_AFFINITY_CLIENT_IP))
        .then(|| SESSION_PERSISTENCE_SOURCE_IP.to_string());

        let timeouts = ListenerTimeouts {
            client_data: reader
                .get_int(ANNOTATION_TIMEOUT_CLIENT_DATA, DEFAULT_TIMEOUT_CLIENT_DATA_MS),
            member_connect: reader.get_int(
                ANNOTATION_TIMEOUT_MEMBER_CONNECT,
                DEFAULT_TIMEOUT_MEMBER_CONNECT_MS,
            ),
            member_data: reader
                .get_int(ANNOTATION_TIMEOUT_MEMBER_DATA, DEFAULT_TIMEOUT_MEMBER_DATA_MS),
            tcp_inspect: reader
                .get_int(ANNOTATION_TIMEOUT_TCP_INSPECT, DEFAULT_TIMEOUT_TCP_INSPECT_MS),
        };

        let node_selector = reader
            .get_optional(ANNOTATION_NODE_SELECTOR)
            .or_else(|| options.node_selector.clone())
            .map(|raw| parse_node_selector(&raw))
            .unwrap_or_default();

        Ok(Self {
            internal,
            ip_family,
            connection_limit: reader.get_int(ANNOTATION_CONNECTION_LIMIT, DEFAULT_CONNECTION_LIMIT),
            vip_network_id,
            vip_subnet_id,
            vip_port_id: reader.get_optional(ANNOTATION_PORT_ID),
            member_subnet_id,
            floating,
            client_ip,
            tls_container_ref: reader.get_optional(ANNOTATION_DEFAULT_TLS_CONTAINER_REF),
            allowed_cidrs,
            flavor_id,
            availability_zone,
            monitor,
            health_check_node_port,
            lb_method,
            session_persistence,
            timeouts,
            node_selector,
            load_balancer_ip: spec.load_balancer_ip.filter(|ip| !ip.is_empty()),
            keep_floating_ip: reader.get_bool(ANNOTATION_KEEP_FLOATING_IP, false),
            hostname: reader.get_optional(ANNOTATION_HOSTNAME),
            ports,
            capabilities,
            identity,
        })
    }

    /// Listener protocol for a Service port.
    #[must_use]
    pub fn listener_protocol(&self, port: &ServicePortSpec) -> Protocol {
        if self.tls_container_ref.is_some() {
            Protocol::TerminatedHttps
        } else if self.client_ip == ClientIpMode::XForwardedFor {
            Protocol::Http
        } else {
            port.protocol
        }
    }

    /// Pool protocol behind a listener of `listener_protocol`.
    #[must_use]
    pub fn pool_protocol(&self, listener_protocol: Protocol) -> Protocol {
        match self.client_ip {
            ClientIpMode::ProxyV1 => Protocol::Proxy,
            ClientIpMode::ProxyV2 => Protocol::ProxyV2,
            ClientIpMode::XForwardedFor => Protocol::Http,
            ClientIpMode::None if self.tls_container_ref.is_some() => Protocol::Http,
            ClientIpMode::None => listener_protocol,
        }
    }

    /// IP family of the Service, IPv4 when undeclared.
    #[must_use]
    pub fn family(&self) -> IpFamily {
        self.ip_family.unwrap_or_default()
    }
}

fn service_ports(service: &Service) -> Result<Vec<ServicePortSpec>> {
    let ports = service
        .spec
        .as_ref()
        .and_then(|s| s.ports.as_ref())
        .filter(|p| !p.is_empty())
        .ok_or_else(|| LbError::invalid("service has no ports"))?;

    ports
        .iter()
        .map(|port| {
            let protocol = Protocol::from_service_port(port.protocol.as_deref()).ok_or_else(|| {
                LbError::invalid(format!(
                    "unsupported protocol {} on port {}",
                    port.protocol.as_deref().unwrap_or_default(),
                    port.port
                ))
            })?;
            let node_port = port.node_port.filter(|p| *p > 0).ok_or_else(|| {
                LbError::invalid(format!("port {} has no node port allocated", port.port))
            })?;
            Ok(ServicePortSpec {
                name: port.name.clone(),
                protocol,
                port: port.port,
                node_port,
            })
        })
        .collect()
}

fn client_ip_mode(reader: &AnnotationReader<'_>) -> Result<ClientIpMode> {
    let proxy = match reader.get_optional(ANNOTATION_PROXY_PROTOCOL).as_deref() {
        None | Some("false") => ClientIpMode::None,
        Some("true" | "v1") => ClientIpMode::ProxyV1,
        Some("v2") => ClientIpMode::ProxyV2,
        Some(other) => {
            return Err(LbError::invalid(format!(
                "unsupported proxy protocol version {other}"
            )))
        }
    };
    let forwarded_for = reader.get_bool(ANNOTATION_X_FORWARDED_FOR, false);

    match (proxy, forwarded_for) {
        (ClientIpMode::None, true) => Ok(ClientIpMode::XForwardedFor),
        (mode, false) => Ok(mode),
        (_, true) => Err(LbError::invalid(
            "proxy protocol and X-Forwarded-For cannot be enabled together",
        )),
    }
}

/// Floating network and subnet: annotations first, then class, then global options.
///
/// Subnet levels are taken whole: the first level naming a subnet ID or a matcher wins.
fn floating_selection(
    reader: &AnnotationReader<'_>,
    class: Option<&LbClass>,
    options: &ProviderOptions,
) -> Result<FloatingSelection> {
    let network_id = reader
        .get_optional(ANNOTATION_FLOATING_NETWORK_ID)
        .or_else(|| class.and_then(|c| c.floating_network_id.clone()))
        .or_else(|| options.floating_network_id.clone());

    let levels = [
        Some((
            reader.get_optional(ANNOTATION_FLOATING_SUBNET_ID),
            reader.get_optional(ANNOTATION_FLOATING_SUBNET),
            reader.get_optional(ANNOTATION_FLOATING_SUBNET_TAGS),
        )),
        class.map(|c| {
            (
                c.floating_subnet_id.clone(),
                c.floating_subnet.clone(),
                c.floating_subnet_tags.clone(),
            )
        }),
        Some((
            options.floating_subnet_id.clone(),
            options.floating_subnet.clone(),
            options.floating_subnet_tags.clone(),
        )),
    ];

    for (subnet_id, name_spec, tag_spec) in levels.into_iter().flatten() {
        if subnet_id.is_some() {
            return Ok(FloatingSelection {
                network_id,
                subnet_id,
                subnet_matcher: SubnetMatcher::default(),
            });
        }
        let matcher = SubnetMatcher::parse(name_spec.as_deref(), tag_spec.as_deref())?;
        if matcher.is_configured() {
            return Ok(FloatingSelection {
                network_id,
                subnet_id: None,
                subnet_matcher: matcher,
            });
        }
    }

    Ok(FloatingSelection {
        network_id,
        ..FloatingSelection::default()
    })
}

fn allowed_cidrs(
    pass: &Pass<'_>,
    reader: &AnnotationReader<'_>,
    spec_ranges: Option<&[String]>,
    family: Option<IpFamily>,
    capabilities: &CapabilitySet,
) -> Result<Vec<String>> {
    let allow_all = family.unwrap_or_default().allow_all_cidr();
    let mut cidrs: Vec<String> = match reader.raw(ANNOTATION_SOURCE_RANGES) {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect(),
        None => spec_ranges.map(<[String]>::to_vec).unwrap_or_default(),
    };
    if cidrs.is_empty() {
        cidrs.push(allow_all.to_string());
    }

    for cidr in &cidrs {
        cidr.parse::<IpNetwork>()
            .map_err(|e| LbError::invalid(format!("invalid source range {cidr}: {e}")))?;
    }

    if capabilities.vip_acl {
        return Ok(cidrs);
    }
    if cidrs.iter().any(|c| c != allow_all) {
        pass.warn_event(
            REASON_SOURCE_RANGES_IGNORED,
            format!(
                "Source ranges are not supported by provider {}, allowing all traffic",
                capabilities.provider
            ),
        );
    }
    Ok(Vec::new())
}

/// Find the network and subnet holding a backend node's address.
async fn discover_vip_subnet(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    nodes: &[Node],
) -> Result<(String, String)> {
    let undiscoverable = |reason: &str| {
        LbError::invalid(format!(
            "no VIP subnet configured and none could be discovered: {reason}"
        ))
    };

    let node = nodes
        .first()
        .ok_or_else(|| undiscoverable("no backend nodes"))?;
    let instance = instance_id(node).ok_or_else(|| undiscoverable("node has no provider ID"))?;
    let address = node_address(node, config.ip_family)
        .ok_or_else(|| undiscoverable("node has no address in the service IP family"))?;

    let query = PortQuery {
        device_id: Some(instance),
        ..PortQuery::default()
    };
    let ports = pass
        .list_all("list_ports", |page| pass.cloud.list_ports(&query, page))
        .await?;

    ports
        .iter()
        .find_map(|port| {
            port.fixed_ips
                .iter()
                .find(|ip| ip.ip_address == address)
                .map(|ip| (port.network_id.clone(), ip.subnet_id.clone()))
        })
        .ok_or_else(|| undiscoverable("no node port carries the node address"))
}

/// The single external network, when exactly one exists.
///
/// # Errors
///
/// Propagates the listing failure; zero or several external networks is not an error.
async fn discover_floating_network(pass: &Pass<'_>) -> Result<Option<String>> {
    let query = NetworkQuery {
        external: Some(true),
    };
    let mut networks = pass
        .list_all("list_networks", |page| pass.cloud.list_networks(&query, page))
        .await?;
    if networks.len() != 1 {
        warn!(
            count = networks.len(),
            "Cannot pick a floating network: expected exactly one external network"
        );
        return Ok(None);
    }
    Ok(networks.pop().map(|n| n.id))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
