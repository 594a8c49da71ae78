// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `capabilities.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cloud::types::Protocol;

    /// Test feature gates at each minimum microversion
    #[test]
    fn test_microversion_thresholds() {
        let old = VersionedCapabilities::from_microversion("2.4", vec![]).unwrap();
        assert!(!old.is_feature_supported(Feature::Tags, "amphora"));
        assert!(old.is_feature_supported(Feature::Timeouts, "amphora"));

        let mid = VersionedCapabilities::from_microversion("2.12", vec![]).unwrap();
        assert!(mid.is_feature_supported(Feature::Tags, "amphora"));
        assert!(mid.is_feature_supported(Feature::VipAcl, "amphora"));
        assert!(!mid.is_feature_supported(Feature::AvailabilityZones, "amphora"));

        let new = VersionedCapabilities::from_microversion("2.25", vec![]).unwrap();
        assert!(new.is_feature_supported(Feature::HttpMonitorsOnUdp, "amphora"));
    }

    /// Test that the ovn provider only keeps tags and VIP ACLs
    #[test]
    fn test_ovn_special_cases() {
        let caps = VersionedCapabilities::new(2, 25, vec![]);
        let set = CapabilitySet::resolve(&caps, "ovn");

        assert!(set.tags);
        assert!(set.vip_acl);
        assert!(!set.timeouts);
        assert!(!set.flavors);
        assert!(!set.availability_zones);
        assert!(!set.http_monitors_on_udp);
        assert!(!set.http_monitor_allowed(Protocol::Tcp));
    }

    /// Test that serial calls apply only to listed providers
    #[test]
    fn test_serial_api_providers() {
        let caps = VersionedCapabilities::new(2, 25, vec!["vendor".into()]);
        assert!(caps.is_feature_supported(Feature::SerialApiCalls, "vendor"));
        assert!(!caps.is_feature_supported(Feature::SerialApiCalls, "amphora"));
    }

    /// Test that serial providers configured in the options reach the capability set
    #[test]
    fn test_for_options_carries_serial_providers() {
        let options = crate::options::ProviderOptions {
            serial_api_providers: vec!["vendor".to_string()],
            ..Default::default()
        };
        let caps = VersionedCapabilities::for_options("2.26", &options).unwrap();

        assert!(CapabilitySet::resolve(&caps, "vendor").serial_api_calls);
        assert!(!CapabilitySet::resolve(&caps, "amphora").serial_api_calls);
        assert!(VersionedCapabilities::for_options("v2", &options).is_none());
    }

    /// Test that HTTP monitors on UDP pools need their own capability
    #[test]
    fn test_http_monitor_on_udp_needs_capability() {
        let mut set = CapabilitySet::all("amphora");
        assert!(set.http_monitor_allowed(Protocol::Udp));
        assert!(set.http_monitor_allowed(Protocol::Tcp));

        set.http_monitors_on_udp = false;
        assert!(!set.http_monitor_allowed(Protocol::Udp));
        assert!(set.http_monitor_allowed(Protocol::Tcp));
    }

    /// Test that malformed microversions are rejected
    #[test]
    fn test_bad_microversion() {
        assert!(VersionedCapabilities::from_microversion("latest", vec![]).is_none());
        assert!(VersionedCapabilities::from_microversion("2.x", vec![]).is_none());
    }
}
