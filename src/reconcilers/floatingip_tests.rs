// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `floatingip.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cloud::types::Subnet;
    use crate::matcher::SubnetMatcher;
    use crate::reconcilers::fixtures::{
        capabilities, config_for, seed_load_balancer, seeded_cloud, service, Harness,
        PUBLIC_NETWORK,
    };
    use crate::reconcilers::pass::Verb;
    use k8s_openapi::api::core::v1::Service;

    const LB_NAME: &str = "kube_service_kubernetes_default_web";

    fn web() -> Service {
        service("web", &[("TCP", 80, 30080)])
    }

    fn external_config(harness: &Harness, svc: &Service) -> ServiceConfig {
        let mut config = config_for(harness, svc, capabilities());
        config.floating.network_id = Some(PUBLIC_NETWORK.to_string());
        config
    }

    fn fip(id: &str, address: &str, port: Option<&str>, description: &str) -> FloatingIp {
        FloatingIp {
            id: id.to_string(),
            floating_ip_address: address.to_string(),
            floating_network_id: PUBLIC_NETWORK.to_string(),
            port_id: port.map(str::to_string),
            subnet_id: None,
            description: description.to_string(),
        }
    }

    /// Test the created-by-us marker in FIP descriptions
    #[test]
    fn test_description_carries_marker() {
        let description = floating_ip_description("default", "web", "kubernetes");
        assert_eq!(
            description,
            "Floating IP for Kubernetes external service default/web from cluster kubernetes"
        );
        assert!(is_created_by_us(&fip("f", "1.2.3.4", None, &description)));
        assert!(!is_created_by_us(&fip("f", "1.2.3.4", None, "manual")));
    }

    /// Test that an attached floating IP is reused
    #[tokio::test]
    async fn test_reuses_attached_floating_ip() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        harness
            .cloud
            .add_floating_ip(fip("fip-1", "172.24.4.99", Some(&lb.vip_port_id), "manual"));
        let svc = web();
        let config = external_config(&harness, &svc);
        let pass = harness.pass(&svc, Verb::Ensure);

        let address = ensure_floating_ip(&pass, &config, &lb, false).await.unwrap();
        assert_eq!(address.as_deref(), Some("172.24.4.99"));
        assert!(harness.cloud.mutations().is_empty());
    }

    /// Test attaching a requested free address
    #[tokio::test]
    async fn test_attaches_requested_address() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        harness
            .cloud
            .add_floating_ip(fip("fip-1", "172.24.4.50", None, "reserved"));
        let svc = web();
        let mut config = external_config(&harness, &svc);
        config.load_balancer_ip = Some("172.24.4.50".to_string());
        let pass = harness.pass(&svc, Verb::Ensure);

        let address = ensure_floating_ip(&pass, &config, &lb, true).await.unwrap();
        assert_eq!(address.as_deref(), Some("172.24.4.50"));
        assert_eq!(
            harness.cloud.mutations(),
            vec!["attach_floating_ip fip-1 vip-port-lb-1"]
        );
    }

    /// Test that a requested address bound to another port conflicts
    #[tokio::test]
    async fn test_requested_address_bound_elsewhere_conflicts() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        harness
            .cloud
            .add_floating_ip(fip("fip-1", "172.24.4.50", Some("other-port"), "reserved"));
        let svc = web();
        let mut config = external_config(&harness, &svc);
        config.load_balancer_ip = Some("172.24.4.50".to_string());
        let pass = harness.pass(&svc, Verb::Ensure);

        let err = ensure_floating_ip(&pass, &config, &lb, true)
            .await
            .unwrap_err();
        assert!(matches!(err, LbError::Conflict(_)));
    }

    /// Test floating IP creation on the public network
    #[tokio::test]
    async fn test_creates_floating_ip_on_public_network() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        let svc = web();
        let config = external_config(&harness, &svc);
        let pass = harness.pass(&svc, Verb::Ensure);

        let address = ensure_floating_ip(&pass, &config, &lb, true).await.unwrap();
        assert_eq!(address.as_deref(), Some("172.24.4.10"));

        let fips = harness.cloud.floating_ips();
        assert_eq!(fips.len(), 1);
        assert_eq!(fips[0].port_id.as_deref(), Some("vip-port-lb-1"));
        assert!(is_created_by_us(&fips[0]));
    }

    /// Test that a sharer never allocates a floating IP
    #[tokio::test]
    async fn test_non_owner_never_creates() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", "kube_service_kubernetes_default_other", &[]);
        let svc = web();
        let config = external_config(&harness, &svc);
        let pass = harness.pass(&svc, Verb::Ensure);

        let err = ensure_floating_ip(&pass, &config, &lb, false)
            .await
            .unwrap_err();
        assert!(matches!(err, LbError::Ownership(_)));
        assert!(!err.is_retryable());
        assert!(harness.cloud.floating_ips().is_empty());
    }

    /// Test that a full matching subnet is skipped
    #[tokio::test]
    async fn test_matcher_skips_exhausted_subnets() {
        let harness = Harness::new(seeded_cloud(&[]));
        for (id, cidr) in [("pool-a", "172.30.0.0/24"), ("pool-b", "172.31.0.0/24")] {
            harness.cloud.add_subnet(Subnet {
                id: id.to_string(),
                name: id.to_string(),
                network_id: PUBLIC_NETWORK.to_string(),
                cidr: cidr.to_string(),
                tags: Vec::new(),
            });
        }
        harness.cloud.exhaust_subnet("pool-a");
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        let svc = web();
        let mut config = external_config(&harness, &svc);
        config.floating.subnet_matcher = SubnetMatcher::parse(Some("pool-*"), None).unwrap();
        let pass = harness.pass(&svc, Verb::Ensure);

        let address = ensure_floating_ip(&pass, &config, &lb, true).await.unwrap();
        assert_eq!(address.as_deref(), Some("172.31.0.10"));
        assert_eq!(
            harness.cloud.floating_ips()[0].subnet_id.as_deref(),
            Some("pool-b")
        );
    }

    /// Test the error when every matching subnet is full
    #[tokio::test]
    async fn test_matcher_reports_last_error_when_all_full() {
        let harness = Harness::new(seeded_cloud(&[]));
        harness.cloud.exhaust_subnet("subnet-public");
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        let svc = web();
        let mut config = external_config(&harness, &svc);
        config.floating.subnet_matcher = SubnetMatcher::parse(Some("public-*"), None).unwrap();
        let pass = harness.pass(&svc, Verb::Ensure);

        let err = ensure_floating_ip(&pass, &config, &lb, true)
            .await
            .unwrap_err();
        assert!(matches!(err, LbError::Cloud { operation: "create_floating_ip", .. }));

        config.floating.subnet_matcher = SubnetMatcher::parse(Some("nothing-*"), None).unwrap();
        let err = ensure_floating_ip(&pass, &config, &lb, true)
            .await
            .unwrap_err();
        assert!(matches!(err, LbError::NotFound { .. }));
    }

    /// Test that no floating network leaves the load balancer internal
    #[tokio::test]
    async fn test_missing_network_keeps_lb_internal() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        let svc = web();
        let config = config_for(&harness, &svc, capabilities());
        let pass = harness.pass(&svc, Verb::Ensure);

        let address = ensure_floating_ip(&pass, &config, &lb, true).await.unwrap();
        assert_eq!(address, None);
        assert_eq!(harness.events.reasons(), vec!["LoadBalancerForcedInternal"]);
    }

    /// Test that release deletes only floating IPs we created
    #[tokio::test]
    async fn test_release_deletes_only_our_floating_ips() {
        let harness = Harness::new(seeded_cloud(&[]));
        let ours = fip(
            "fip-ours",
            "172.24.4.20",
            Some("vip-port-lb-1"),
            &floating_ip_description("default", "web", "kubernetes"),
        );
        let theirs = fip("fip-theirs", "172.24.4.21", Some("vip-port-lb-2"), "manual");
        harness.cloud.add_floating_ip(ours.clone());
        harness.cloud.add_floating_ip(theirs.clone());
        let svc = web();
        let pass = harness.pass(&svc, Verb::Delete);

        release_floating_ip(&pass, &ours, false).await.unwrap();
        release_floating_ip(&pass, &theirs, false).await.unwrap();
        assert_eq!(
            harness.cloud.mutations(),
            vec!["delete_floating_ip fip-ours", "detach_floating_ip fip-theirs"]
        );
    }

    /// Test keep-floatingip detaching without deleting
    #[tokio::test]
    async fn test_release_keeps_floating_ip_on_request() {
        let harness = Harness::new(seeded_cloud(&[]));
        let lb = seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[]);
        harness.cloud.add_floating_ip(fip(
            "fip-1",
            "172.24.4.20",
            Some(&lb.vip_port_id),
            &floating_ip_description("default", "web", "kubernetes"),
        ));
        let svc = web();
        let mut config = config_for(&harness, &svc, capabilities());
        config.internal = true;
        config.keep_floating_ip = true;
        let pass = harness.pass(&svc, Verb::Ensure);

        release_for_internal(&pass, &config, &lb, false).await.unwrap();
        assert!(harness.cloud.mutations().is_empty());

        release_for_internal(&pass, &config, &lb, true).await.unwrap();
        assert_eq!(harness.cloud.mutations(), vec!["detach_floating_ip fip-1"]);
        assert_eq!(harness.cloud.floating_ips().len(), 1);
    }
}
