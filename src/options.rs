// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Provider options loaded at startup.
//!
//! [`ProviderOptions`] holds the global defaults every Service falls back to, plus the
//! table of named load balancer classes a Service can select with the
//! `loadbalancer.openstack.org/class` annotation. The value is built once, validated,
//! and shared read-only (`Arc<ProviderOptions>`) by all reconciliation passes.
//!
//! # Example
//!
//! ```yaml
//! cluster-name: prod
//! lb-provider: amphora
//! floating-network-id: 6d0e4a3c-public
//! create-monitor: true
//! manage-security-groups: true
//! classes:
//!   internet:
//!     floating-network-id: 6d0e4a3c-public
//!     floating-subnet: "~public-[0-9]+"
//! ```

use crate::constants::{
    DEFAULT_CLUSTER_NAME, DEFAULT_INGRESS_HOSTNAME_SUFFIX, DEFAULT_LB_METHOD, DEFAULT_LB_PROVIDER,
    DEFAULT_MAX_SHARED_LB, DEFAULT_MONITOR_DELAY_SECS, DEFAULT_MONITOR_MAX_RETRIES,
    DEFAULT_MONITOR_MAX_RETRIES_DOWN, DEFAULT_MONITOR_TIMEOUT_SECS, LB_ACTIVE_BACKOFF_FACTOR,
    LB_ACTIVE_INITIAL_DELAY_MILLIS, LB_ACTIVE_STEPS, OVN_LB_METHOD, OVN_PROVIDER,
};
use crate::matcher::SubnetMatcher;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// A named set of network overrides selectable per Service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct LbClass {
    pub floating_network_id: Option<String>,
    pub floating_subnet_id: Option<String>,
    pub floating_subnet: Option<String>,
    pub floating_subnet_tags: Option<String>,
    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub member_subnet_id: Option<String>,
}

/// Bounded backoff used while a new load balancer provisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ActiveWaitOptions {
    pub initial_delay_ms: u64,
    pub factor: f64,
    pub steps: u32,
}

impl Default for ActiveWaitOptions {
    fn default() -> Self {
        Self {
            initial_delay_ms: LB_ACTIVE_INITIAL_DELAY_MILLIS,
            factor: LB_ACTIVE_BACKOFF_FACTOR,
            steps: LB_ACTIVE_STEPS,
        }
    }
}

impl ActiveWaitOptions {
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Global provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderOptions {
    /// Cluster name embedded in generated resource names
    pub cluster_name: String,
    /// Octavia provider driver (`amphora`, `ovn`, ...)
    pub lb_provider: String,
    /// Pool load balancing method; provider dependent default when unset
    pub lb_method: Option<String>,

    pub network_id: Option<String>,
    pub subnet_id: Option<String>,
    pub member_subnet_id: Option<String>,
    pub floating_network_id: Option<String>,
    pub floating_subnet_id: Option<String>,
    pub floating_subnet: Option<String>,
    pub floating_subnet_tags: Option<String>,

    /// Force every load balancer to be internal
    pub internal_lb: bool,
    pub flavor_id: Option<String>,
    pub availability_zone: Option<String>,

    /// Create health monitors unless a Service opts out
    pub create_monitor: bool,
    pub monitor_delay: i32,
    pub monitor_timeout: i32,
    pub monitor_max_retries: i32,
    pub monitor_max_retries_down: i32,

    /// Manage a per-Service security group on the backend node ports
    pub manage_security_groups: bool,
    /// Node security groups that should admit traffic from the Service group
    pub node_security_group_ids: Vec<String>,

    /// Maximum number of Services sharing one load balancer
    pub max_shared_lb: usize,
    /// Default node selector in `key=value,key2` form
    pub node_selector: Option<String>,

    /// Report `<address>.<suffix>` hostnames for PROXY protocol load balancers
    pub enable_ingress_hostname: bool,
    pub ingress_hostname_suffix: String,

    /// Providers that need member changes issued one call at a time
    pub serial_api_providers: Vec<String>,

    pub lb_active_wait: ActiveWaitOptions,

    pub classes: BTreeMap<String, LbClass>,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            cluster_name: DEFAULT_CLUSTER_NAME.to_string(),
            lb_provider: DEFAULT_LB_PROVIDER.to_string(),
            lb_method: None,
            network_id: None,
            subnet_id: None,
            member_subnet_id: None,
            floating_network_id: None,
            floating_subnet_id: None,
            floating_subnet: None,
            floating_subnet_tags: None,
            internal_lb: false,
            flavor_id: None,
            availability_zone: None,
            create_monitor: false,
            monitor_delay: DEFAULT_MONITOR_DELAY_SECS,
            monitor_timeout: DEFAULT_MONITOR_TIMEOUT_SECS,
            monitor_max_retries: DEFAULT_MONITOR_MAX_RETRIES,
            monitor_max_retries_down: DEFAULT_MONITOR_MAX_RETRIES_DOWN,
            manage_security_groups: false,
            node_security_group_ids: Vec::new(),
            max_shared_lb: DEFAULT_MAX_SHARED_LB,
            node_selector: None,
            enable_ingress_hostname: false,
            ingress_hostname_suffix: DEFAULT_INGRESS_HOSTNAME_SUFFIX.to_string(),
            serial_api_providers: Vec::new(),
            lb_active_wait: ActiveWaitOptions::default(),
            classes: BTreeMap::new(),
        }
    }
}

impl ProviderOptions {
    /// Parse and validate options from YAML.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid YAML for this schema or fails
    /// [`ProviderOptions::validate`].
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let options: Self =
            serde_yaml::from_str(yaml).context("Failed to parse provider options")?;
        options.validate()?;
        Ok(options)
    }

    /// Read, parse and validate options from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or its content is invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read provider options from {}", path.display()))?;
        Self::from_yaml_str(&yaml)
    }

    /// Check the options for values the control plane would reject.
    ///
    /// # Errors
    ///
    /// Returns an error describing the first invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.cluster_name.trim().is_empty() {
            bail!("cluster-name must not be empty");
        }
        if self.max_shared_lb < 1 {
            bail!("max-shared-lb must be at least 1");
        }
        if self.monitor_delay < 1 || self.monitor_timeout < 1 {
            bail!("monitor-delay and monitor-timeout must be positive");
        }
        if self.monitor_timeout > self.monitor_delay {
            bail!(
                "monitor-timeout ({}) must not exceed monitor-delay ({})",
                self.monitor_timeout,
                self.monitor_delay
            );
        }
        if !(1..=10).contains(&self.monitor_max_retries)
            || !(1..=10).contains(&self.monitor_max_retries_down)
        {
            bail!("monitor-max-retries and monitor-max-retries-down must be between 1 and 10");
        }
        if self.lb_active_wait.steps == 0 || self.lb_active_wait.factor < 1.0 {
            bail!("lb-active-wait needs at least one step and a factor of 1.0 or more");
        }
        SubnetMatcher::parse(
            self.floating_subnet.as_deref(),
            self.floating_subnet_tags.as_deref(),
        )
        .context("Invalid global floating subnet selection")?;
        for (name, class) in &self.classes {
            SubnetMatcher::parse(
                class.floating_subnet.as_deref(),
                class.floating_subnet_tags.as_deref(),
            )
            .with_context(|| format!("Invalid floating subnet selection in class {name}"))?;
        }
        Ok(())
    }

    #[must_use]
    pub fn is_ovn(&self) -> bool {
        self.lb_provider == OVN_PROVIDER
    }

    /// Configured pool method, or the provider's default.
    #[must_use]
    pub fn effective_lb_method(&self) -> &str {
        match &self.lb_method {
            Some(method) => method.as_str(),
            None if self.is_ovn() => OVN_LB_METHOD,
            None => DEFAULT_LB_METHOD,
        }
    }
}

#[cfg(test)]
#[path = "options_tests.rs"]
mod options_tests;
