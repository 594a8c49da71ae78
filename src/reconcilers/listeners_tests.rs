// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `listeners.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::{
        ANNOTATION_CONNECTION_LIMIT, ANNOTATION_SOURCE_RANGES, ANNOTATION_X_FORWARDED_FOR,
    };
    use crate::capabilities::CapabilitySet;
    use crate::cloud::memory::InMemoryCloud;
    use crate::cloud::types::{Listener, ProvisioningStatus};
    use crate::reconcilers::fixtures::{
        annotate, capabilities, config_for, seed_load_balancer, service, Harness,
    };
    use crate::reconcilers::pass::Verb;
    use std::collections::HashSet;

    const OWN_TAG: &str = "kube_service_kubernetes_default_web";
    const OTHER_TAG: &str = "kube_service_kubernetes_default_other";

    fn listener(id: &str, protocol: Protocol, port: i32, tags: &[&str]) -> Listener {
        Listener {
            id: id.to_string(),
            loadbalancer_id: "lb-1".to_string(),
            protocol,
            protocol_port: port,
            tags: tags.iter().map(|t| (*t).to_string()).collect(),
            ..Listener::default()
        }
    }

    /// Test listener naming
    #[test]
    fn test_listener_name() {
        assert_eq!(listener_name(0, OWN_TAG), format!("listener_0_{OWN_TAG}"));
        assert_eq!(listener_name(1, &"x".repeat(300)).len(), 255);
    }

    /// Test listener ownership by tag
    #[test]
    fn test_claim_rules() {
        let own = listener("l1", Protocol::Tcp, 80, &[OWN_TAG]);
        let other = listener("l2", Protocol::Tcp, 81, &[OTHER_TAG]);
        let untagged = listener("l3", Protocol::Tcp, 82, &[]);

        assert!(is_claimed_by(&own, OWN_TAG, false));
        assert!(!is_claimed_by(&other, OWN_TAG, true));
        assert!(is_claimed_by(&untagged, OWN_TAG, true));
        assert!(!is_claimed_by(&untagged, OWN_TAG, false));
    }

    /// Test that a port held by another Service conflicts
    #[test]
    fn test_port_conflict_with_other_service() {
        let harness = Harness::new(InMemoryCloud::new());
        let config = config_for(&harness, &service("web", &[("TCP", 80, 30080)]), capabilities());

        let taken = index_listeners(&[listener("l2", Protocol::Tcp, 80, &[OTHER_TAG])]);
        let err = check_port_conflicts(&config, &taken, true).unwrap_err();
        assert!(matches!(err, LbError::Conflict(_)));

        let untagged = index_listeners(&[listener("l3", Protocol::Tcp, 80, &[])]);
        assert!(check_port_conflicts(&config, &untagged, true).is_ok());
        assert!(check_port_conflicts(&config, &untagged, false).is_err());

        let other_protocol = index_listeners(&[listener("l4", Protocol::Udp, 80, &[OTHER_TAG])]);
        assert!(check_port_conflicts(&config, &other_protocol, false).is_ok());
    }

    /// Test that the desired listener drops unsupported attributes
    #[test]
    fn test_desired_listener_honors_capabilities() {
        let harness = Harness::new(InMemoryCloud::new());
        let svc = service("web", &[("TCP", 80, 30080), ("UDP", 53, 30053)]);

        let config = config_for(&harness, &svc, capabilities());
        let tcp = desired_listener(&config, "lb-1", 0, &config.ports[0]);
        assert_eq!(tcp.name, format!("listener_0_{OWN_TAG}"));
        assert_eq!(tcp.timeout_client_data, Some(50_000));
        assert_eq!(tcp.timeout_tcp_inspect, Some(0));
        assert_eq!(tcp.tags, Some(vec![OWN_TAG.to_string()]));
        assert_eq!(tcp.allowed_cidrs, Some(vec!["0.0.0.0/0".to_string()]));

        let udp = desired_listener(&config, "lb-1", 1, &config.ports[1]);
        assert_eq!(udp.protocol, Protocol::Udp);
        assert_eq!(udp.timeout_client_data, None);
        assert_eq!(udp.timeout_member_connect, None);

        let bare = CapabilitySet {
            tags: false,
            timeouts: false,
            vip_acl: false,
            ..capabilities()
        };
        let config = config_for(&harness, &svc, bare);
        let tcp = desired_listener(&config, "lb-1", 0, &config.ports[0]);
        assert_eq!(tcp.tags, None);
        assert_eq!(tcp.allowed_cidrs, None);
        assert_eq!(tcp.timeout_member_data, None);
    }

    /// Test X-Forwarded-For listener settings
    #[test]
    fn test_forwarded_for_sets_header_and_protocol() {
        let harness = Harness::new(InMemoryCloud::new());
        let svc = annotate(
            service("web", &[("TCP", 80, 30080)]),
            ANNOTATION_X_FORWARDED_FOR,
            "true",
        );
        let config = config_for(&harness, &svc, capabilities());

        let desired = desired_listener(&config, "lb-1", 0, &config.ports[0]);
        assert_eq!(desired.protocol, Protocol::Http);
        assert_eq!(
            desired.insert_headers.get("X-Forwarded-For").map(String::as_str),
            Some("true")
        );
    }

    /// Test that a converged listener yields an empty update
    #[test]
    fn test_listener_update_is_empty_when_converged() {
        let harness = Harness::new(InMemoryCloud::new());
        let config = config_for(&harness, &service("web", &[("TCP", 80, 30080)]), capabilities());
        let desired = desired_listener(&config, "lb-1", 0, &config.ports[0]);

        let existing = Listener {
            id: "l1".to_string(),
            protocol: desired.protocol,
            protocol_port: desired.protocol_port,
            connection_limit: desired.connection_limit,
            timeout_client_data: desired.timeout_client_data,
            timeout_member_connect: desired.timeout_member_connect,
            timeout_member_data: desired.timeout_member_data,
            timeout_tcp_inspect: desired.timeout_tcp_inspect,
            allowed_cidrs: vec!["0.0.0.0/0".to_string()],
            tags: vec![OWN_TAG.to_string()],
            ..Listener::default()
        };

        assert!(listener_update(&config, &existing, &desired).is_empty());
    }

    /// Test that a listener diff collects every changed field
    #[test]
    fn test_listener_update_collects_every_difference() {
        let harness = Harness::new(InMemoryCloud::new());
        let svc = annotate(
            service("web", &[("TCP", 80, 30080)]),
            ANNOTATION_CONNECTION_LIMIT,
            "1000",
        );
        let svc = annotate(svc, ANNOTATION_SOURCE_RANGES, "192.168.0.0/16");
        let config = config_for(&harness, &svc, capabilities());
        let desired = desired_listener(&config, "lb-1", 0, &config.ports[0]);

        let existing = Listener {
            id: "l1".to_string(),
            protocol: Protocol::Tcp,
            protocol_port: 80,
            connection_limit: -1,
            allowed_cidrs: vec!["0.0.0.0/0".to_string()],
            tags: vec![OTHER_TAG.to_string()],
            ..Listener::default()
        };

        let update = listener_update(&config, &existing, &desired);
        assert_eq!(update.connection_limit, Some(1000));
        assert_eq!(
            update.allowed_cidrs,
            Some(vec!["192.168.0.0/16".to_string()])
        );
        assert_eq!(
            update.tags,
            Some(vec![OTHER_TAG.to_string(), OWN_TAG.to_string()])
        );
        assert_eq!(update.timeout_client_data, Some(50_000));
        assert_eq!(update.insert_headers, None);
    }

    /// Test listener creation then an idempotent second pass
    #[tokio::test]
    async fn test_ensure_listener_creates_then_noops() {
        let harness = Harness::new(InMemoryCloud::new());
        seed_load_balancer(&harness.cloud, "lb-1", OWN_TAG, &[OWN_TAG]);
        let svc = service("web", &[("TCP", 80, 30080)]);
        let config = config_for(&harness, &svc, capabilities());
        let pass = harness.pass(&svc, Verb::Ensure);

        let created = ensure_listener(&pass, &config, "lb-1", None, 0, &config.ports[0])
            .await
            .unwrap();
        assert_eq!(harness.cloud.mutations(), vec!["create_listener TCP/80"]);

        harness.cloud.clear_mutations();
        let again = ensure_listener(&pass, &config, "lb-1", Some(&created), 0, &config.ports[0])
            .await
            .unwrap();
        assert_eq!(again.id, created.id);
        assert!(harness.cloud.mutations().is_empty());
    }

    /// Test that a non-ACTIVE load balancer blocks listener writes
    #[tokio::test]
    async fn test_ensure_listener_fails_fast_when_not_active() {
        let harness = Harness::new(InMemoryCloud::new());
        seed_load_balancer(&harness.cloud, "lb-1", OWN_TAG, &[OWN_TAG]);
        harness
            .cloud
            .set_load_balancer_status("lb-1", ProvisioningStatus::PendingUpdate);
        let svc = service("web", &[("TCP", 80, 30080)]);
        let config = config_for(&harness, &svc, capabilities());
        let pass = harness.pass(&svc, Verb::Ensure);

        let err = ensure_listener(&pass, &config, "lb-1", None, 0, &config.ports[0])
            .await
            .unwrap_err();
        assert!(matches!(err, LbError::NotActive { .. }));
        assert!(harness.cloud.listeners_of("lb-1").is_empty());
    }

    /// Test that unclaimed listener cleanup skips other Services
    #[tokio::test]
    async fn test_delete_unclaimed_leaves_other_services_alone() {
        let harness = Harness::new(InMemoryCloud::new());
        seed_load_balancer(&harness.cloud, "lb-1", OWN_TAG, &[OWN_TAG, OTHER_TAG]);
        for l in [
            listener("keep", Protocol::Tcp, 80, &[OWN_TAG]),
            listener("stale", Protocol::Tcp, 81, &[OWN_TAG]),
            listener("foreign", Protocol::Tcp, 82, &[OTHER_TAG]),
            listener("legacy", Protocol::Tcp, 83, &[]),
        ] {
            harness.cloud.add_listener(l);
        }
        let svc = service("web", &[("TCP", 80, 30080)]);
        let pass = harness.pass(&svc, Verb::Ensure);
        let listeners = list_listeners(&pass, "lb-1").await.unwrap();
        let reconciled: HashSet<String> = ["keep".to_string()].into_iter().collect();

        delete_unclaimed(&pass, "lb-1", &listeners, &reconciled, OWN_TAG, false)
            .await
            .unwrap();

        let mut remaining: Vec<String> = harness
            .cloud
            .listeners_of("lb-1")
            .into_iter()
            .map(|l| l.id)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec!["foreign", "keep", "legacy"]);

        delete_unclaimed(&pass, "lb-1", &listeners, &reconciled, OWN_TAG, true)
            .await
            .unwrap();
        let remaining: Vec<String> = harness
            .cloud
            .listeners_of("lb-1")
            .into_iter()
            .map(|l| l.id)
            .collect();
        assert!(!remaining.contains(&"legacy".to_string()));
        assert!(remaining.contains(&"foreign".to_string()));
    }
}
