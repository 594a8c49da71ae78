// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Reconciliation engine for Octavia load balancers.
//!
//! One pass converges the cloud resources of a single Service. The modules split the
//! work by resource:
//!
//! - [`config`] - resolves Service annotations, classes and global options into a
//!   [`config::ServiceConfig`]
//! - [`listeners`] - one listener per Service port, claimed through tags
//! - [`pools`] - the listener's default pool and its node members
//! - [`monitors`] - the pool health monitor
//! - [`floatingip`] - floating IP acquisition and release
//! - [`sharing`] - ownership and source tags of shared load balancers
//! - [`security_groups`] - the per-Service security group and node port associations
//! - [`loadbalancer`] - the ensure, update and delete passes tying the above together
//!
//! Every remote call goes through a [`pass::Pass`], which carries the cancellation token,
//! the event sink and the provisioning-status gate.
//!
//! # Example
//!
//! ```rust,ignore
//! use octavia_lb::reconcilers::loadbalancer::OctaviaLoadBalancer;
//!
//! let engine = OctaviaLoadBalancer::new(cloud, options, capabilities, events);
//! let outcome = engine.ensure_load_balancer(&service, &nodes, &cancel).await?;
//! println!("{} is reachable at {}", outcome.lb_id, outcome.address);
//! ```

pub mod config;
pub mod floatingip;
pub mod listeners;
pub mod loadbalancer;
pub mod monitors;
pub mod nodes;
pub mod pagination;
pub mod pass;
pub mod pools;
pub mod retry;
pub mod security_groups;
pub mod sharing;

#[cfg(test)]
pub(crate) mod fixtures;

pub use loadbalancer::{EnsureOutcome, IngressMode, OctaviaLoadBalancer};

/// Check if a resource's spec has changed by comparing generation with the observed one.
///
/// `metadata.generation` is incremented by Kubernetes only when the spec changes. The
/// controller stores the generation it last ensured, so a mismatch means the load
/// balancer must be ensured again rather than merely updated.
///
/// # Returns
///
/// * `true` - Spec changed, or nothing was observed yet
/// * `false` - Spec unchanged, or no generation tracking available
#[must_use]
pub fn should_reconcile(current_generation: Option<i64>, observed_generation: Option<i64>) -> bool {
    match (current_generation, observed_generation) {
        (Some(current), Some(observed)) => current != observed,
        (Some(_), None) => true, // First reconciliation
        _ => false,              // No generation tracking available
    }
}
