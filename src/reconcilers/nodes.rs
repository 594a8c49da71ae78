// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Backend node selection and addressing.

use crate::annotations::parse_key_values;
use crate::cloud::types::IpFamily;
use crate::constants::LABEL_EXCLUDE_FROM_LB;
use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use std::collections::BTreeMap;
use std::net::IpAddr;
use tracing::debug;

const ADDRESS_INTERNAL_IP: &str = "InternalIP";
const ADDRESS_EXTERNAL_IP: &str = "ExternalIP";

/// Parse a `key=value,key2` node selector. A bare key only requires the label to exist.
#[must_use]
pub fn parse_node_selector(raw: &str) -> BTreeMap<String, String> {
    parse_key_values(raw)
}

/// Whether the node's labels satisfy the selector.
#[must_use]
pub fn matches_selector(node: &Node, selector: &BTreeMap<String, String>) -> bool {
    let labels = node.labels();
    selector.iter().all(|(key, value)| match labels.get(key) {
        Some(actual) => value.is_empty() || actual == value,
        None => false,
    })
}

/// Nodes matching the selector, in input order.
#[must_use]
pub fn filter_nodes<'n>(nodes: &'n [Node], selector: &BTreeMap<String, String>) -> Vec<&'n Node> {
    nodes
        .iter()
        .filter(|node| {
            let selected = matches_selector(node, selector);
            if !selected {
                debug!(node = %node.name_any(), "Node excluded by node selector");
            }
            selected
        })
        .collect()
}

/// Address of the node used as pool member.
///
/// Internal addresses win over external ones. With a `family`, addresses of the other
/// family are ignored.
#[must_use]
pub fn node_address(node: &Node, family: Option<IpFamily>) -> Option<String> {
    let addresses = node.status.as_ref()?.addresses.as_ref()?;
    [ADDRESS_INTERNAL_IP, ADDRESS_EXTERNAL_IP]
        .iter()
        .find_map(|kind| {
            addresses
                .iter()
                .filter(|a| a.type_ == *kind)
                .find(|a| match (family, a.address.parse::<IpAddr>()) {
                    (None, _) => true,
                    (Some(family), Ok(ip)) => IpFamily::of(&ip) == family,
                    (Some(_), Err(_)) => false,
                })
        })
        .map(|a| a.address.clone())
}

/// Compute instance ID taken from the last segment of `spec.providerID`.
#[must_use]
pub fn instance_id(node: &Node) -> Option<String> {
    let provider_id = node.spec.as_ref()?.provider_id.as_deref()?;
    provider_id
        .rsplit('/')
        .next()
        .filter(|id| !id.is_empty())
        .map(str::to_string)
}

/// Whether the node reports the `Ready` condition as `True`.
#[must_use]
pub fn is_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Whether the node opted out of external load balancers.
#[must_use]
pub fn is_excluded(node: &Node) -> bool {
    node.labels().contains_key(LABEL_EXCLUDE_FROM_LB)
}

/// Ready nodes that did not opt out of load balancing.
#[must_use]
pub fn eligible_nodes(nodes: Vec<Node>) -> Vec<Node> {
    nodes
        .into_iter()
        .filter(|node| is_ready(node) && !is_excluded(node))
        .collect()
}

#[cfg(test)]
#[path = "nodes_tests.rs"]
mod nodes_tests;
