// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Load balancer API capabilities.
//!
//! Several listener and pool attributes only exist on newer Octavia API microversions,
//! and some provider drivers reject features the API itself accepts. Reconcilers never
//! ask the discovery collaborator directly: each pass resolves one [`CapabilitySet`]
//! value up front and consults its flags.

use crate::cloud::types::Protocol;
use crate::constants::OVN_PROVIDER;
use crate::options::ProviderOptions;
use std::fmt;

/// Optional API behaviors the reconcilers depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Resource tags (used for sharing)
    Tags,
    /// Per-phase listener timeouts
    Timeouts,
    /// Listener `allowed_cidrs`
    VipAcl,
    /// Load balancer flavors
    Flavors,
    /// Load balancer availability zones
    AvailabilityZones,
    /// HTTP health monitors on UDP pools
    HttpMonitorsOnUdp,
    /// Member changes must be issued one call at a time
    SerialApiCalls,
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Tags => "tags",
            Self::Timeouts => "timeouts",
            Self::VipAcl => "vip-acl",
            Self::Flavors => "flavors",
            Self::AvailabilityZones => "availability-zones",
            Self::HttpMonitorsOnUdp => "http-monitors-on-udp",
            Self::SerialApiCalls => "serial-api-calls",
        };
        f.write_str(name)
    }
}

/// Capability discovery collaborator.
pub trait CapabilityDiscovery: Send + Sync {
    fn is_feature_supported(&self, feature: Feature, provider: &str) -> bool;
}

/// Capabilities derived from the maximum API microversion the endpoint advertises.
///
/// | Feature | Minimum microversion | `ovn` provider |
/// |---------|----------------------|----------------|
/// | Tags | 2.5 | supported |
/// | Timeouts | 2.1 | unsupported |
/// | VipAcl | 2.12 | supported |
/// | Flavors | 2.6 | unsupported |
/// | AvailabilityZones | 2.14 | unsupported |
/// | HttpMonitorsOnUdp | 2.16 | unsupported |
///
/// `SerialApiCalls` is not versioned: it holds for the providers listed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedCapabilities {
    major: u32,
    minor: u32,
    serial_api_providers: Vec<String>,
}

impl VersionedCapabilities {
    #[must_use]
    pub fn new(major: u32, minor: u32, serial_api_providers: Vec<String>) -> Self {
        Self {
            major,
            minor,
            serial_api_providers,
        }
    }

    /// Parse a `"<major>.<minor>"` microversion string.
    #[must_use]
    pub fn from_microversion(version: &str, serial_api_providers: Vec<String>) -> Option<Self> {
        let (major, minor) = version.trim().split_once('.')?;
        Some(Self::new(
            major.parse().ok()?,
            minor.parse().ok()?,
            serial_api_providers,
        ))
    }

    /// Capabilities for an endpoint advertising `version`, with the serial providers
    /// taken from `options`.
    #[must_use]
    pub fn for_options(version: &str, options: &ProviderOptions) -> Option<Self> {
        Self::from_microversion(version, options.serial_api_providers.clone())
    }

    fn at_least(&self, minor: u32) -> bool {
        self.major > 2 || (self.major == 2 && self.minor >= minor)
    }
}

impl CapabilityDiscovery for VersionedCapabilities {
    fn is_feature_supported(&self, feature: Feature, provider: &str) -> bool {
        let ovn = provider == OVN_PROVIDER;
        match feature {
            Feature::Tags => self.at_least(5),
            Feature::VipAcl => self.at_least(12),
            Feature::Timeouts => !ovn && self.at_least(1),
            Feature::Flavors => !ovn && self.at_least(6),
            Feature::AvailabilityZones => !ovn && self.at_least(14),
            Feature::HttpMonitorsOnUdp => !ovn && self.at_least(16),
            Feature::SerialApiCalls => self.serial_api_providers.iter().any(|p| p == provider),
        }
    }
}

/// Capability flags resolved once per reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CapabilitySet {
    pub provider: String,
    pub tags: bool,
    pub timeouts: bool,
    pub vip_acl: bool,
    pub flavors: bool,
    pub availability_zones: bool,
    pub http_monitors_on_udp: bool,
    pub serial_api_calls: bool,
}

impl CapabilitySet {
    #[must_use]
    pub fn resolve(discovery: &dyn CapabilityDiscovery, provider: &str) -> Self {
        let supported = |feature| discovery.is_feature_supported(feature, provider);
        Self {
            provider: provider.to_string(),
            tags: supported(Feature::Tags),
            timeouts: supported(Feature::Timeouts),
            vip_acl: supported(Feature::VipAcl),
            flavors: supported(Feature::Flavors),
            availability_zones: supported(Feature::AvailabilityZones),
            http_monitors_on_udp: supported(Feature::HttpMonitorsOnUdp),
            serial_api_calls: supported(Feature::SerialApiCalls),
        }
    }

    /// Every feature enabled, for the given provider.
    #[must_use]
    pub fn all(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            tags: true,
            timeouts: true,
            vip_acl: true,
            flavors: true,
            availability_zones: true,
            http_monitors_on_udp: true,
            serial_api_calls: false,
        }
    }

    #[must_use]
    pub fn is_ovn(&self) -> bool {
        self.provider == OVN_PROVIDER
    }

    /// Whether an HTTP probe may monitor a pool serving `protocol`.
    #[must_use]
    pub fn http_monitor_allowed(&self, protocol: Protocol) -> bool {
        if self.is_ovn() {
            return false;
        }
        protocol != Protocol::Udp || self.http_monitors_on_udp
    }
}

#[cfg(test)]
#[path = "capabilities_tests.rs"]
mod capabilities_tests;
