// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Global constants for the Octavia load balancer engine.
//!
//! This module contains the naming conventions, defaults and protocol constants
//! used throughout the codebase. Constants are organized by category for easy maintenance.

// ============================================================================
// Naming Conventions
// ============================================================================

/// Prefix of every load balancer name generated by this controller.
///
/// The same string prefixes the per-Service tags placed on shared load balancers,
/// so counting tags with this prefix counts the Services using a load balancer.
/// A load balancer whose name lacks this prefix was created outside the controller
/// and is never deleted by it.
pub const SERVICE_NAME_PREFIX: &str = "kube_service_";

/// Listener name format: `listener_<port index>_<lb name>`
pub const LISTENER_NAME_PREFIX: &str = "listener";

/// Pool name format: `pool_<port index>_<lb name>`
pub const POOL_NAME_PREFIX: &str = "pool";

/// Health monitor name format: `monitor_<port index>_<lb name>`
pub const MONITOR_NAME_PREFIX: &str = "monitor";

/// Prefix of the per-Service security group name
pub const SECURITY_GROUP_NAME_PREFIX: &str = "lb-sg";

/// Phrase identifying floating IPs allocated by this controller.
///
/// Stored in the floating IP description; the release path matches on it to decide
/// whether a floating IP may be deleted or only detached.
pub const FLOATING_IP_DESCRIPTION_MARKER: &str = "Floating IP for Kubernetes external service";

/// Maximum length of names and descriptions accepted by the control plane
pub const MAX_RESOURCE_NAME_LEN: usize = 255;

/// Length of the legacy `a<uid>` load balancer name
pub const LEGACY_NAME_LEN: usize = 32;

// ============================================================================
// Provisioning Constants
// ============================================================================

/// Initial interval when waiting for a new load balancer to become ACTIVE (1 second)
pub const LB_ACTIVE_INITIAL_DELAY_MILLIS: u64 = 1000;

/// Backoff factor applied between ACTIVE polls
pub const LB_ACTIVE_BACKOFF_FACTOR: f64 = 1.2;

/// Number of ACTIVE polls before giving up
pub const LB_ACTIVE_STEPS: u32 = 19;

// ============================================================================
// Listener Defaults
// ============================================================================

/// Default listener connection limit (unlimited)
pub const DEFAULT_CONNECTION_LIMIT: i32 = -1;

/// Default client inactivity timeout (50 seconds)
pub const DEFAULT_TIMEOUT_CLIENT_DATA_MS: i32 = 50_000;

/// Default backend connection timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MEMBER_CONNECT_MS: i32 = 5_000;

/// Default backend inactivity timeout (50 seconds)
pub const DEFAULT_TIMEOUT_MEMBER_DATA_MS: i32 = 50_000;

/// Default TCP inspection timeout (disabled)
pub const DEFAULT_TIMEOUT_TCP_INSPECT_MS: i32 = 0;

/// Header inserted by HTTP listeners that preserve the client address
pub const HEADER_X_FORWARDED_FOR: &str = "X-Forwarded-For";

// ============================================================================
// Health Monitor Defaults
// ============================================================================

/// Default monitor delay in seconds
pub const DEFAULT_MONITOR_DELAY_SECS: i32 = 5;

/// Default monitor timeout in seconds
pub const DEFAULT_MONITOR_TIMEOUT_SECS: i32 = 3;

/// Default number of successful probes before a member is ONLINE
pub const DEFAULT_MONITOR_MAX_RETRIES: i32 = 1;

/// Default number of failed probes before a member is ERROR
pub const DEFAULT_MONITOR_MAX_RETRIES_DOWN: i32 = 3;

/// URL probed by HTTP monitors on the kube-proxy health check node port
pub const HEALTH_CHECK_URL_PATH: &str = "/healthz";

/// HTTP method used by health check node port monitors
pub const HEALTH_CHECK_HTTP_METHOD: &str = "GET";

/// Expected response code of health check node port monitors
pub const HEALTH_CHECK_EXPECTED_CODES: &str = "200";

// ============================================================================
// Provider Defaults
// ============================================================================

/// Default Octavia provider driver
pub const DEFAULT_LB_PROVIDER: &str = "amphora";

/// The OVN provider driver, which needs several behaviors disabled
pub const OVN_PROVIDER: &str = "ovn";

/// Default pool load balancing method
pub const DEFAULT_LB_METHOD: &str = "ROUND_ROBIN";

/// The only load balancing method supported by the OVN provider
pub const OVN_LB_METHOD: &str = "SOURCE_IP_PORT";

/// Session persistence type used for `sessionAffinity: ClientIP`
pub const SESSION_PERSISTENCE_SOURCE_IP: &str = "SOURCE_IP";

/// Default number of Services that may share one load balancer
pub const DEFAULT_MAX_SHARED_LB: usize = 2;

/// Default cluster name used in generated names
pub const DEFAULT_CLUSTER_NAME: &str = "kubernetes";

/// Default suffix of generated ingress hostnames
pub const DEFAULT_INGRESS_HOSTNAME_SUFFIX: &str = "nip.io";

// ============================================================================
// Kubernetes Constants
// ============================================================================

/// Service type handled by this controller
pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// Finalizer protecting the cloud resources of a Service
pub const LOAD_BALANCER_CLEANUP_FINALIZER: &str = "service.kubernetes.io/load-balancer-cleanup";

/// Node label excluding a node from load balancer backends
pub const LABEL_EXCLUDE_FROM_LB: &str = "node.kubernetes.io/exclude-from-external-load-balancers";

/// Page size for Kubernetes list operations
pub const KUBE_LIST_PAGE_SIZE: u32 = 100;

/// Field manager used for status and annotation patches
pub const FIELD_MANAGER: &str = "octavia-lb-controller";

// ============================================================================
// Controller Error Handling Constants
// ============================================================================

/// Requeue duration for retryable controller errors (30 seconds)
pub const ERROR_REQUEUE_DURATION_SECS: u64 = 30;

/// Requeue duration for errors that need operator action (5 minutes)
pub const FATAL_REQUEUE_DURATION_SECS: u64 = 300;

/// Periodic resync of healthy Services (10 minutes)
pub const RESYNC_DURATION_SECS: u64 = 600;
