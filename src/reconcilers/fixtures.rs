// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Shared builders for reconciler unit tests.

use super::config::ServiceConfig;
use super::pass::{Pass, Verb};
use crate::capabilities::CapabilitySet;
use crate::cloud::memory::InMemoryCloud;
use crate::cloud::types::{FixedIp, LoadBalancer, Network, Port, ProvisioningStatus, Subnet};
use crate::events::{EventTarget, MemoryEventSink};
use crate::options::ProviderOptions;
use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, Service, ServicePort, ServiceSpec,
};
use kube::api::ObjectMeta;
use tokio_util::sync::CancellationToken;

pub const PRIVATE_NETWORK: &str = "net-private";
pub const PRIVATE_SUBNET: &str = "subnet-private";
pub const PUBLIC_NETWORK: &str = "net-public";
pub const PUBLIC_SUBNET: &str = "subnet-public";

/// A `LoadBalancer` Service in `default` with `(protocol, port, node_port)` ports.
pub fn service(name: &str, ports: &[(&str, i32, i32)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("1234-5678-{name}")),
            ..ObjectMeta::default()
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            ports: Some(
                ports
                    .iter()
                    .map(|(protocol, port, node_port)| ServicePort {
                        protocol: Some((*protocol).to_string()),
                        port: *port,
                        node_port: Some(*node_port),
                        ..ServicePort::default()
                    })
                    .collect(),
            ),
            ..ServiceSpec::default()
        }),
        status: None,
    }
}

pub fn annotate(mut service: Service, key: &str, value: &str) -> Service {
    service
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
    service
}

/// A ready node with one internal address and an OpenStack provider ID.
pub fn node(name: &str, address: &str) -> Node {
    Node {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..ObjectMeta::default()
        },
        spec: Some(NodeSpec {
            provider_id: Some(format!("openstack:///{name}-instance")),
            ..NodeSpec::default()
        }),
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress {
                type_: "InternalIP".to_string(),
                address: address.to_string(),
            }]),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "True".to_string(),
                ..NodeCondition::default()
            }]),
            ..NodeStatus::default()
        }),
    }
}

/// `node-1..=node-count` with addresses `10.0.0.1..`.
pub fn nodes(count: usize) -> Vec<Node> {
    (1..=count)
        .map(|i| node(&format!("node-{i}"), &format!("10.0.0.{i}")))
        .collect()
}

/// In-memory cloud with a private and a public network and one port per node.
pub fn seeded_cloud(nodes: &[Node]) -> InMemoryCloud {
    let cloud = InMemoryCloud::new();
    cloud.add_network(Network {
        id: PRIVATE_NETWORK.to_string(),
        name: "private".to_string(),
        external: false,
    });
    cloud.add_subnet(Subnet {
        id: PRIVATE_SUBNET.to_string(),
        name: "private-subnet".to_string(),
        network_id: PRIVATE_NETWORK.to_string(),
        cidr: "10.0.0.0/24".to_string(),
        tags: Vec::new(),
    });
    cloud.add_network(Network {
        id: PUBLIC_NETWORK.to_string(),
        name: "public".to_string(),
        external: true,
    });
    cloud.add_subnet(Subnet {
        id: PUBLIC_SUBNET.to_string(),
        name: "public-subnet".to_string(),
        network_id: PUBLIC_NETWORK.to_string(),
        cidr: "172.24.4.0/24".to_string(),
        tags: Vec::new(),
    });
    for (i, node) in nodes.iter().enumerate() {
        let instance = super::nodes::instance_id(node).unwrap_or_default();
        let address = super::nodes::node_address(node, None).unwrap_or_default();
        cloud.add_port(Port {
            id: format!("node-port-{}", i + 1),
            name: format!("{instance}-port"),
            network_id: PRIVATE_NETWORK.to_string(),
            device_id: instance,
            fixed_ips: vec![FixedIp {
                subnet_id: PRIVATE_SUBNET.to_string(),
                ip_address: address,
            }],
            security_groups: Vec::new(),
            tags: Vec::new(),
        });
    }
    cloud
}

/// Collaborators of a test pass.
pub struct Harness {
    pub cloud: InMemoryCloud,
    pub options: ProviderOptions,
    pub events: MemoryEventSink,
    pub cancel: CancellationToken,
}

impl Harness {
    pub fn new(cloud: InMemoryCloud) -> Self {
        Self {
            cloud,
            options: ProviderOptions::default(),
            events: MemoryEventSink::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn pass(&self, service: &Service, verb: Verb) -> Pass<'_> {
        Pass {
            cloud: &self.cloud,
            options: &self.options,
            events: &self.events,
            cancel: &self.cancel,
            target: EventTarget::from_service(service),
            verb,
        }
    }
}

pub fn capabilities() -> CapabilitySet {
    CapabilitySet::all("amphora")
}

/// Configuration of `service` resolved without discovery.
pub fn config_for(
    harness: &Harness,
    service: &Service,
    capabilities: CapabilitySet,
) -> ServiceConfig {
    let pass = harness.pass(service, Verb::Ensure);
    let mut config = ServiceConfig::from_service(&pass, service, &nodes(1), capabilities)
        .expect("test service resolves");
    config.member_subnet_id = Some(PRIVATE_SUBNET.to_string());
    config
}

/// An ACTIVE load balancer with a VIP port on the private subnet.
pub fn seed_load_balancer(
    cloud: &InMemoryCloud,
    id: &str,
    name: &str,
    tags: &[&str],
) -> LoadBalancer {
    let vip_port_id = format!("vip-port-{id}");
    cloud.add_port(Port {
        id: vip_port_id.clone(),
        name: format!("octavia-lb-{id}"),
        network_id: PRIVATE_NETWORK.to_string(),
        device_id: format!("octavia-lb-{id}"),
        fixed_ips: vec![FixedIp {
            subnet_id: PRIVATE_SUBNET.to_string(),
            ip_address: "10.0.0.200".to_string(),
        }],
        security_groups: Vec::new(),
        tags: Vec::new(),
    });
    let lb = LoadBalancer {
        id: id.to_string(),
        name: name.to_string(),
        provisioning_status: ProvisioningStatus::Active,
        vip_address: "10.0.0.200".to_string(),
        vip_port_id,
        vip_subnet_id: PRIVATE_SUBNET.to_string(),
        vip_network_id: PRIVATE_NETWORK.to_string(),
        tags: tags.iter().map(|t| (*t).to_string()).collect(),
        provider: "amphora".to_string(),
        ..LoadBalancer::default()
    };
    cloud.add_load_balancer(lb.clone());
    lb
}
