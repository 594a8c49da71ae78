// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `nodes.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cloud::types::IpFamily;
    use k8s_openapi::api::core::v1::{Node, NodeAddress, NodeCondition, NodeSpec, NodeStatus};
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;

    fn node(name: &str, labels: &[(&str, &str)], addresses: &[(&str, &str)]) -> Node {
        Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                        .collect(),
                ),
                ..ObjectMeta::default()
            },
            spec: Some(NodeSpec {
                provider_id: Some(format!("openstack:///{name}-instance")),
                ..NodeSpec::default()
            }),
            status: Some(NodeStatus {
                addresses: Some(
                    addresses
                        .iter()
                        .map(|(kind, addr)| NodeAddress {
                            type_: (*kind).to_string(),
                            address: (*addr).to_string(),
                        })
                        .collect(),
                ),
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: "True".to_string(),
                    ..NodeCondition::default()
                }]),
                ..NodeStatus::default()
            }),
        }
    }

    /// Test that InternalIP wins over ExternalIP
    #[test]
    fn test_internal_address_preferred() {
        let n = node(
            "node-1",
            &[],
            &[("ExternalIP", "203.0.113.5"), ("InternalIP", "10.0.0.1")],
        );
        assert_eq!(node_address(&n, None).as_deref(), Some("10.0.0.1"));
    }

    /// Test ExternalIP fallback without an InternalIP
    #[test]
    fn test_external_address_fallback() {
        let n = node("node-1", &[], &[("ExternalIP", "203.0.113.5")]);
        assert_eq!(node_address(&n, None).as_deref(), Some("203.0.113.5"));
    }

    /// Test address selection per IP family
    #[test]
    fn test_address_filtered_by_family() {
        let n = node(
            "node-1",
            &[],
            &[("InternalIP", "10.0.0.1"), ("InternalIP", "fd00::1")],
        );
        assert_eq!(
            node_address(&n, Some(IpFamily::V6)).as_deref(),
            Some("fd00::1")
        );
        assert_eq!(
            node_address(&n, Some(IpFamily::V4)).as_deref(),
            Some("10.0.0.1")
        );

        let v4_only = node("node-2", &[], &[("InternalIP", "10.0.0.2")]);
        assert_eq!(node_address(&v4_only, Some(IpFamily::V6)), None);
    }

    /// Test a node with no addresses
    #[test]
    fn test_node_without_addresses() {
        let mut n = node("node-1", &[], &[]);
        assert_eq!(node_address(&n, None), None);
        n.status = None;
        assert_eq!(node_address(&n, None), None);
    }

    /// Test instance ID extraction from providerID
    #[test]
    fn test_instance_id_from_provider_id() {
        let n = node("node-1", &[], &[]);
        assert_eq!(instance_id(&n).as_deref(), Some("node-1-instance"));

        let mut bare = n.clone();
        bare.spec = Some(NodeSpec {
            provider_id: Some("openstack:///".to_string()),
            ..NodeSpec::default()
        });
        assert_eq!(instance_id(&bare), None);
    }

    /// Test node selector matching
    #[test]
    fn test_selector_matching() {
        let nodes = vec![
            node("a", &[("role", "lb"), ("zone", "z1")], &[]),
            node("b", &[("role", "worker")], &[]),
            node("c", &[("zone", "z2")], &[]),
        ];

        let selector = parse_node_selector("role=lb");
        let selected: Vec<_> = filter_nodes(&nodes, &selector)
            .iter()
            .map(|n| n.name_any())
            .collect();
        assert_eq!(selected, vec!["a"]);

        let selector = parse_node_selector("zone");
        assert_eq!(filter_nodes(&nodes, &selector).len(), 2);

        assert_eq!(filter_nodes(&nodes, &BTreeMap::new()).len(), 3);
    }

    /// Test that unready and excluded nodes are dropped
    #[test]
    fn test_eligible_nodes_drop_unready_and_excluded() {
        let ready = node("ready", &[], &[]);
        let excluded = node("excluded", &[(LABEL_EXCLUDE_FROM_LB, "")], &[]);
        let mut unready = node("unready", &[], &[]);
        if let Some(status) = unready.status.as_mut() {
            status.conditions = Some(vec![NodeCondition {
                type_: "Ready".to_string(),
                status: "False".to_string(),
                ..NodeCondition::default()
            }]);
        }

        let eligible = eligible_nodes(vec![ready, excluded, unready]);
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].name_any(), "ready");
    }
}
