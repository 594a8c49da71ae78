// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Common builders for integration tests.
//!
//! Every test runs the engine against a fresh `InMemoryCloud` seeded with a private
//! tenant network, one external network and one port per node.

#![allow(dead_code)]

use k8s_openapi::api::core::v1::{
    Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus, Service, ServicePort, ServiceSpec,
};
use kube::api::ObjectMeta;
use octavia_lb::capabilities::VersionedCapabilities;
use octavia_lb::cloud::memory::InMemoryCloud;
use octavia_lb::cloud::types::{FixedIp, Network, Port, Subnet};
use octavia_lb::events::MemoryEventSink;
use octavia_lb::options::ProviderOptions;
use octavia_lb::reconcilers::OctaviaLoadBalancer;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const PRIVATE_NETWORK: &str = "net-private";
pub const PRIVATE_SUBNET: &str = "subnet-private";
pub const PUBLIC_NETWORK: &str = "net-public";

/// A `LoadBalancer` Service in `default` with `(protocol, port, node_port)` ports.
pub fn service(name: &str, ports: &[(&str, i32, i32)], annotations: &[(&str, &str)]) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("uid-{name}")),
            annotations: Some(
                annotations
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect::<BTreeMap<_, _>>(),
            ),
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

/// `node-1..=node-count`, ready, with addresses `10.0.0.1..`.
pub fn nodes(count: usize) -> Vec<Node> {
    (1..=count)
        .map(|i| Node {
            metadata: ObjectMeta {
                name: Some(format!("node-{i}")),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(format!("openstack:///instance-{i}")),
                ..NodeSpec::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(vec![NodeAddress {
                    type_: "InternalIP".to_string(),
                    address: format!("10.0.0.{i}"),
                }]),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..NodeCondition::default()
                }]),
                ..NodeStatus::default()
            }),
        })
        .collect()
}

/// Cloud with the tenant network, one external network and `node_count` node ports.
pub fn seeded_cloud(node_count: usize) -> InMemoryCloud {
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
        id: "subnet-public".to_string(),
        name: "public-subnet".to_string(),
        network_id: PUBLIC_NETWORK.to_string(),
        cidr: "172.24.4.0/24".to_string(),
        tags: Vec::new(),
    });
    for i in 1..=node_count {
        cloud.add_port(Port {
            id: format!("node-port-{i}"),
            name: format!("instance-{i}-port"),
            network_id: PRIVATE_NETWORK.to_string(),
            device_id: format!("instance-{i}"),
            fixed_ips: vec![FixedIp {
                subnet_id: PRIVATE_SUBNET.to_string(),
                ip_address: format!("10.0.0.{i}"),
            }],
            security_groups: Vec::new(),
            tags: Vec::new(),
        });
    }
    cloud
}

/// An engine wired to an in-memory cloud and event sink.
pub struct TestEngine {
    pub cloud: Arc<InMemoryCloud>,
    pub events: Arc<MemoryEventSink>,
    pub cancel: CancellationToken,
    pub engine: OctaviaLoadBalancer,
}

impl TestEngine {
    pub fn new(cloud: InMemoryCloud, tweak: impl FnOnce(&mut ProviderOptions)) -> Self {
        Self::with_microversion(cloud, "2.26", tweak)
    }

    pub fn with_microversion(
        cloud: InMemoryCloud,
        microversion: &str,
        tweak: impl FnOnce(&mut ProviderOptions),
    ) -> Self {
        octavia_lb::telemetry::init_tracing();
        let mut options = ProviderOptions::default();
        options.lb_active_wait.initial_delay_ms = 1;
        tweak(&mut options);

        let capabilities = VersionedCapabilities::for_options(microversion, &options)
            .expect("valid microversion");
        let cloud = Arc::new(cloud);
        let events = Arc::new(MemoryEventSink::new());
        let engine = OctaviaLoadBalancer::new(
            cloud.clone(),
            Arc::new(options),
            Arc::new(capabilities),
            events.clone(),
        );
        Self {
            cloud,
            events,
            cancel: CancellationToken::new(),
            engine,
        }
    }
}
