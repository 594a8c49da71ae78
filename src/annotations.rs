// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Service annotation keys and the typed reader used to extract them.
//!
//! Every overridable load balancer setting can be set on the Service with one of the
//! annotations below. Values are read through [`AnnotationReader`], which falls back
//! to the supplied default when the annotation is absent or cannot be parsed.

use std::collections::BTreeMap;
use tracing::warn;

// ============================================================================
// Load Balancer Placement
// ============================================================================

/// Request an internal (VIP only) load balancer
pub const ANNOTATION_INTERNAL: &str = "service.beta.kubernetes.io/openstack-internal-load-balancer";

/// Named load balancer class from the provider options
pub const ANNOTATION_CLASS: &str = "loadbalancer.openstack.org/class";

/// ID of an existing load balancer to use (written back by the controller)
pub const ANNOTATION_LOAD_BALANCER_ID: &str = "loadbalancer.openstack.org/load-balancer-id";

/// Address assigned to the Service (written back by the controller)
pub const ANNOTATION_LOAD_BALANCER_ADDRESS: &str =
    "loadbalancer.openstack.org/load-balancer-address";

/// VIP network
pub const ANNOTATION_NETWORK_ID: &str = "loadbalancer.openstack.org/network-id";

/// VIP subnet
pub const ANNOTATION_SUBNET_ID: &str = "loadbalancer.openstack.org/subnet-id";

/// Subnet of the pool members
pub const ANNOTATION_MEMBER_SUBNET_ID: &str = "loadbalancer.openstack.org/member-subnet-id";

/// Pre-created VIP port
pub const ANNOTATION_PORT_ID: &str = "loadbalancer.openstack.org/port-id";

/// Octavia flavor
pub const ANNOTATION_FLAVOR_ID: &str = "loadbalancer.openstack.org/flavor-id";

/// Octavia availability zone
pub const ANNOTATION_AVAILABILITY_ZONE: &str = "loadbalancer.openstack.org/availability-zone";

// ============================================================================
// Floating IP
// ============================================================================

/// Public network for the floating IP
pub const ANNOTATION_FLOATING_NETWORK_ID: &str = "loadbalancer.openstack.org/floating-network-id";

/// Public subnet for the floating IP
pub const ANNOTATION_FLOATING_SUBNET_ID: &str = "loadbalancer.openstack.org/floating-subnet-id";

/// Public subnet name pattern (`!` negates, `~` selects a regular expression)
pub const ANNOTATION_FLOATING_SUBNET: &str = "loadbalancer.openstack.org/floating-subnet";

/// Public subnet tag list (`!` negates, `&` requires all tags)
pub const ANNOTATION_FLOATING_SUBNET_TAGS: &str = "loadbalancer.openstack.org/floating-subnet-tags";

/// Keep the floating IP when the Service turns internal or is deleted
pub const ANNOTATION_KEEP_FLOATING_IP: &str = "loadbalancer.openstack.org/keep-floatingip";

// ============================================================================
// Listener and Pool Behavior
// ============================================================================

/// Listener connection limit
pub const ANNOTATION_CONNECTION_LIMIT: &str = "loadbalancer.openstack.org/connection-limit";

/// Enable PROXY protocol on the pools (`true`, `v1` or `v2`)
pub const ANNOTATION_PROXY_PROTOCOL: &str = "loadbalancer.openstack.org/proxy-protocol";

/// Preserve the client address with an `X-Forwarded-For` header
pub const ANNOTATION_X_FORWARDED_FOR: &str = "loadbalancer.openstack.org/x-forwarded-for";

/// Barbican container used for TLS termination
pub const ANNOTATION_DEFAULT_TLS_CONTAINER_REF: &str =
    "loadbalancer.openstack.org/default-tls-container-ref";

/// Pool load balancing method
pub const ANNOTATION_LB_METHOD: &str = "loadbalancer.openstack.org/lb-method";

/// Listener client inactivity timeout in milliseconds
pub const ANNOTATION_TIMEOUT_CLIENT_DATA: &str = "loadbalancer.openstack.org/timeout-client-data";

/// Listener backend connection timeout in milliseconds
pub const ANNOTATION_TIMEOUT_MEMBER_CONNECT: &str =
    "loadbalancer.openstack.org/timeout-member-connect";

/// Listener backend inactivity timeout in milliseconds
pub const ANNOTATION_TIMEOUT_MEMBER_DATA: &str = "loadbalancer.openstack.org/timeout-member-data";

/// Listener TCP inspection timeout in milliseconds
pub const ANNOTATION_TIMEOUT_TCP_INSPECT: &str = "loadbalancer.openstack.org/timeout-tcp-inspect";

/// Restrict the backends to nodes matching `key=value,key2` labels
pub const ANNOTATION_NODE_SELECTOR: &str = "loadbalancer.openstack.org/node-selector";

/// Source ranges allowed to reach the load balancer
pub const ANNOTATION_SOURCE_RANGES: &str = "service.beta.kubernetes.io/load-balancer-source-ranges";

// ============================================================================
// Health Monitor
// ============================================================================

/// Create a health monitor for every pool
pub const ANNOTATION_ENABLE_HEALTH_MONITOR: &str =
    "loadbalancer.openstack.org/enable-health-monitor";

/// Monitor delay in seconds
pub const ANNOTATION_HEALTH_MONITOR_DELAY: &str = "loadbalancer.openstack.org/health-monitor-delay";

/// Monitor timeout in seconds
pub const ANNOTATION_HEALTH_MONITOR_TIMEOUT: &str =
    "loadbalancer.openstack.org/health-monitor-timeout";

/// Successful probes before a member is ONLINE
pub const ANNOTATION_HEALTH_MONITOR_MAX_RETRIES: &str =
    "loadbalancer.openstack.org/health-monitor-max-retries";

/// Failed probes before a member is ERROR
pub const ANNOTATION_HEALTH_MONITOR_MAX_RETRIES_DOWN: &str =
    "loadbalancer.openstack.org/health-monitor-max-retries-down";

// ============================================================================
// Status
// ============================================================================

/// Report this hostname in the Service status instead of the address
pub const ANNOTATION_HOSTNAME: &str = "loadbalancer.openstack.org/hostname";

/// Generation of the Service last fully ensured by the controller
pub const ANNOTATION_OBSERVED_GENERATION: &str = "loadbalancer.openstack.org/observed-generation";

/// Typed, defaulting reader over a Service's annotations.
///
/// Unparseable values are logged and replaced by the default, matching how
/// operators expect a typo in an optional tuning knob to behave.
#[derive(Debug, Clone, Copy)]
pub struct AnnotationReader<'a> {
    annotations: Option<&'a BTreeMap<String, String>>,
}

impl<'a> AnnotationReader<'a> {
    #[must_use]
    pub fn new(annotations: Option<&'a BTreeMap<String, String>>) -> Self {
        Self { annotations }
    }

    /// Raw value, `None` when the annotation is absent.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&'a str> {
        self.annotations
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// String value, or `default` when absent.
    #[must_use]
    pub fn get_string(&self, key: &str, default: &str) -> String {
        self.raw(key).unwrap_or(default).to_string()
    }

    /// Non-empty string value, `None` when absent or empty.
    #[must_use]
    pub fn get_optional(&self, key: &str) -> Option<String> {
        self.raw(key)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    /// Integer value, or `default` when absent or malformed.
    #[must_use]
    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        match self.raw(key) {
            None => default,
            Some(value) => value.trim().parse().unwrap_or_else(|_| {
                warn!(
                    annotation = key,
                    value = value,
                    default = default,
                    "Ignoring non-integer annotation value"
                );
                default
            }),
        }
    }

    /// Boolean value, or `default` when absent or malformed.
    #[must_use]
    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.raw(key) {
            None => default,
            Some(value) => match value.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    warn!(
                        annotation = key,
                        value = value,
                        default = default,
                        "Ignoring non-boolean annotation value"
                    );
                    default
                }
            },
        }
    }
}

/// Parse a `key=value,key2` selector into a label map.
///
/// A bare key maps to an empty value, meaning "label present with any value".
#[must_use]
pub fn parse_key_values(raw: &str) -> BTreeMap<String, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.trim().to_string(), value.trim().to_string()),
            None => (entry.to_string(), String::new()),
        })
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

#[cfg(test)]
#[path = "annotations_tests.rs"]
mod annotations_tests;
