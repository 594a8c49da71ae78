// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

#![allow(unexpected_cfgs)]

//! # octavia-lb - Octavia load balancers for Kubernetes Services
//!
//! This library reconciles Kubernetes `LoadBalancer` Services into OpenStack Octavia
//! load balancers: one listener, pool, member set and optional health monitor per
//! Service port, a floating IP for external Services, and an optional per-Service
//! security group on the node ports.
//!
//! ## Overview
//!
//! - Deterministic resource naming and tag-based ownership, so several Services can
//!   share one load balancer without touching each other's listeners
//! - Provisioning-status gating: nothing is mutated unless the load balancer is `ACTIVE`
//! - Capability discovery keyed by API microversion and provider driver
//! - Idempotent passes: a converged Service issues no mutating call
//!
//! ## Modules
//!
//! - [`reconcilers`] - Ensure, update and delete passes and the per-resource reconcilers
//! - [`cloud`] - The cloud API facade and its in-memory implementation
//! - [`controller`] - Kubernetes controller runtime driving the engine
//! - [`options`] - Provider options and load balancer classes
//! - [`capabilities`] - Feature discovery
//! - [`matcher`] - Floating subnet selection expressions
//! - [`annotations`] - Service annotation keys
//! - [`events`] - Event sinks
//! - [`errors`] - Error types
//!
//! ## Example
//!
//! ```rust,no_run
//! use octavia_lb::capabilities::VersionedCapabilities;
//! use octavia_lb::cloud::memory::InMemoryCloud;
//! use octavia_lb::events::LogEventSink;
//! use octavia_lb::options::ProviderOptions;
//! use octavia_lb::reconcilers::OctaviaLoadBalancer;
//! use std::sync::Arc;
//!
//! let options = ProviderOptions::default();
//! let Some(capabilities) = VersionedCapabilities::for_options("2.26", &options) else {
//!     return;
//! };
//! let engine = OctaviaLoadBalancer::new(
//!     Arc::new(InMemoryCloud::new()),
//!     Arc::new(options),
//!     Arc::new(capabilities),
//!     Arc::new(LogEventSink),
//! );
//! # let _ = engine;
//! ```

pub mod annotations;
pub mod capabilities;
pub mod cloud;
pub mod constants;
pub mod controller;
pub mod errors;
pub mod events;
pub mod matcher;
pub mod metrics;
pub mod options;
pub mod reconcilers;
pub mod telemetry;
