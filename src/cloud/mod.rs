// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Cloud API facade consumed by the reconcilers.
//!
//! [`CloudApi`] is the seam between the reconciliation engine and the load balancer and
//! networking control planes. Production deployments back it with an HTTP client; tests
//! and local development use [`memory::InMemoryCloud`].
//!
//! Every list operation is paginated with an opaque cursor: callers pass a [`PageRequest`]
//! and follow [`Page::next`] until it is `None`.

pub mod memory;
pub mod types;

use crate::errors::CloudError;
use async_trait::async_trait;

pub use types::*;

/// Result type of facade calls.
pub type CloudResult<T> = std::result::Result<T, CloudError>;

/// Per-resource operations of the load balancer and networking APIs.
///
/// Implementations must report missing resources with a 404 [`CloudError`] so callers
/// can treat them as already deleted.
#[async_trait]
pub trait CloudApi: Send + Sync {
    // ------------------------------------------------------------------------
    // Load balancers
    // ------------------------------------------------------------------------

    async fn list_load_balancers(
        &self,
        query: &LoadBalancerQuery,
        page: PageRequest,
    ) -> CloudResult<Page<LoadBalancer>>;

    async fn get_load_balancer(&self, id: &str) -> CloudResult<LoadBalancer>;

    async fn create_load_balancer(&self, opts: &LoadBalancerCreate) -> CloudResult<LoadBalancer>;

    async fn update_load_balancer(
        &self,
        id: &str,
        opts: &LoadBalancerUpdate,
    ) -> CloudResult<LoadBalancer>;

    /// Delete a load balancer; `cascade` removes its listeners, pools and monitors too.
    async fn delete_load_balancer(&self, id: &str, cascade: bool) -> CloudResult<()>;

    // ------------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------------

    async fn list_listeners(&self, lb_id: &str, page: PageRequest) -> CloudResult<Page<Listener>>;

    async fn create_listener(&self, opts: &ListenerCreate) -> CloudResult<Listener>;

    async fn update_listener(&self, id: &str, opts: &ListenerUpdate) -> CloudResult<Listener>;

    async fn delete_listener(&self, id: &str) -> CloudResult<()>;

    // ------------------------------------------------------------------------
    // Pools and members
    // ------------------------------------------------------------------------

    async fn get_pool(&self, id: &str) -> CloudResult<Pool>;

    /// Create a pool and make it the listener's default pool.
    async fn create_pool(&self, opts: &PoolCreate) -> CloudResult<Pool>;

    async fn update_pool(&self, id: &str, opts: &PoolUpdate) -> CloudResult<Pool>;

    /// Delete a pool with its members and health monitor.
    async fn delete_pool(&self, id: &str) -> CloudResult<()>;

    async fn list_members(&self, pool_id: &str, page: PageRequest) -> CloudResult<Page<Member>>;

    async fn create_member(&self, pool_id: &str, member: &MemberSpec) -> CloudResult<Member>;

    async fn delete_member(&self, pool_id: &str, member_id: &str) -> CloudResult<()>;

    /// Replace the whole member list of a pool in one call.
    async fn batch_update_members(&self, pool_id: &str, members: &[MemberSpec])
        -> CloudResult<()>;

    // ------------------------------------------------------------------------
    // Health monitors
    // ------------------------------------------------------------------------

    async fn get_health_monitor(&self, id: &str) -> CloudResult<HealthMonitor>;

    async fn create_health_monitor(&self, opts: &HealthMonitorCreate)
        -> CloudResult<HealthMonitor>;

    async fn update_health_monitor(
        &self,
        id: &str,
        opts: &HealthMonitorUpdate,
    ) -> CloudResult<HealthMonitor>;

    async fn delete_health_monitor(&self, id: &str) -> CloudResult<()>;

    // ------------------------------------------------------------------------
    // Networks, subnets and ports
    // ------------------------------------------------------------------------

    async fn list_networks(&self, query: &NetworkQuery, page: PageRequest)
        -> CloudResult<Page<Network>>;

    async fn get_subnet(&self, id: &str) -> CloudResult<Subnet>;

    async fn list_subnets(&self, query: &SubnetQuery, page: PageRequest)
        -> CloudResult<Page<Subnet>>;

    async fn get_port(&self, id: &str) -> CloudResult<Port>;

    async fn list_ports(&self, query: &PortQuery, page: PageRequest) -> CloudResult<Page<Port>>;

    async fn update_port(&self, id: &str, opts: &PortUpdate) -> CloudResult<Port>;

    // ------------------------------------------------------------------------
    // Floating IPs
    // ------------------------------------------------------------------------

    async fn list_floating_ips(
        &self,
        query: &FloatingIpQuery,
        page: PageRequest,
    ) -> CloudResult<Page<FloatingIp>>;

    async fn create_floating_ip(&self, opts: &FloatingIpCreate) -> CloudResult<FloatingIp>;

    /// Attach the floating IP to `port_id`, or detach it when `None`.
    async fn update_floating_ip(&self, id: &str, port_id: Option<&str>) -> CloudResult<FloatingIp>;

    async fn delete_floating_ip(&self, id: &str) -> CloudResult<()>;

    // ------------------------------------------------------------------------
    // Security groups
    // ------------------------------------------------------------------------

    async fn list_security_groups(
        &self,
        query: &SecurityGroupQuery,
        page: PageRequest,
    ) -> CloudResult<Page<SecurityGroup>>;

    async fn create_security_group(&self, opts: &SecurityGroupCreate)
        -> CloudResult<SecurityGroup>;

    async fn delete_security_group(&self, id: &str) -> CloudResult<()>;

    async fn list_security_group_rules(
        &self,
        query: &SecurityGroupRuleQuery,
        page: PageRequest,
    ) -> CloudResult<Page<SecurityGroupRule>>;

    async fn create_security_group_rule(
        &self,
        rule: &SecurityGroupRuleSpec,
    ) -> CloudResult<SecurityGroupRule>;

    async fn delete_security_group_rule(&self, id: &str) -> CloudResult<()>;
}
