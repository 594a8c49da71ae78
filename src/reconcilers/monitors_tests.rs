// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `monitors.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::annotations::{ANNOTATION_ENABLE_HEALTH_MONITOR, ANNOTATION_HEALTH_MONITOR_DELAY};
    use crate::capabilities::CapabilitySet;
    use crate::reconcilers::fixtures::{
        annotate, capabilities, config_for, seed_load_balancer, seeded_cloud, service, Harness,
    };
    use crate::reconcilers::listeners::ensure_listener;
    use crate::reconcilers::pass::Verb;
    use crate::reconcilers::pools::ensure_pool;
    use k8s_openapi::api::core::v1::Service;

    const LB_NAME: &str = "kube_service_kubernetes_default_web";

    fn monitored(ports: &[(&str, i32, i32)]) -> Service {
        annotate(service("web", ports), ANNOTATION_ENABLE_HEALTH_MONITOR, "true")
    }

    fn with_health_check_port(mut svc: Service, port: i32) -> Service {
        if let Some(spec) = svc.spec.as_mut() {
            spec.external_traffic_policy = Some("Local".to_string());
            spec.health_check_node_port = Some(port);
        }
        svc
    }

    async fn pool_for(harness: &Harness, svc: &Service, config: &ServiceConfig) -> Pool {
        let pass = harness.pass(svc, Verb::Ensure);
        let listener = ensure_listener(&pass, config, "lb-1", None, 0, &config.ports[0])
            .await
            .unwrap();
        ensure_pool(&pass, config, "lb-1", &listener, 0).await.unwrap()
    }

    /// Test monitor type per port protocol
    #[test]
    fn test_probe_kind_follows_port_protocol() {
        let harness = Harness::new(seeded_cloud(&[]));
        let svc = monitored(&[("TCP", 80, 30080), ("UDP", 53, 30053), ("SCTP", 90, 30090)]);
        let config = config_for(&harness, &svc, capabilities());
        let pool = Pool {
            id: "pool-1".to_string(),
            protocol: Protocol::Tcp,
            ..Pool::default()
        };

        let kinds: Vec<MonitorKind> = config
            .ports
            .iter()
            .enumerate()
            .map(|(i, port)| desired_monitor(&config, &pool, i, port).kind)
            .collect();
        assert_eq!(
            kinds,
            vec![MonitorKind::Tcp, MonitorKind::UdpConnect, MonitorKind::Sctp]
        );
        let monitor = desired_monitor(&config, &pool, 0, &config.ports[0]);
        assert_eq!(monitor.name, format!("monitor_0_{LB_NAME}"));
        assert_eq!(monitor.url_path, None);
    }

    /// Test that the HTTP override needs provider support
    #[test]
    fn test_http_override_needs_capability() {
        let harness = Harness::new(seeded_cloud(&[]));
        let svc = with_health_check_port(monitored(&[("UDP", 53, 30053)]), 32000);
        let udp_pool = Pool {
            protocol: Protocol::Udp,
            ..Pool::default()
        };

        let config = config_for(&harness, &svc, capabilities());
        assert_eq!(health_check_port(&config, Protocol::Udp), Some(32000));
        let monitor = desired_monitor(&config, &udp_pool, 0, &config.ports[0]);
        assert_eq!(monitor.kind, MonitorKind::Http);
        assert_eq!(monitor.url_path.as_deref(), Some("/healthz"));
        assert_eq!(monitor.http_method.as_deref(), Some("GET"));
        assert_eq!(monitor.expected_codes.as_deref(), Some("200"));

        let no_udp_http = CapabilitySet {
            http_monitors_on_udp: false,
            ..capabilities()
        };
        let config = config_for(&harness, &svc, no_udp_http);
        assert_eq!(health_check_port(&config, Protocol::Udp), None);
        let monitor = desired_monitor(&config, &udp_pool, 0, &config.ports[0]);
        assert_eq!(monitor.kind, MonitorKind::UdpConnect);

        let config = config_for(&harness, &svc, CapabilitySet::all("ovn"));
        assert_eq!(health_check_port(&config, Protocol::Tcp), None);
    }

    /// Test monitor create, update and delete
    #[tokio::test]
    async fn test_monitor_lifecycle() {
        let harness = Harness::new(seeded_cloud(&[]));
        seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[LB_NAME]);
        let svc = monitored(&[("TCP", 80, 30080)]);
        let config = config_for(&harness, &svc, capabilities());
        let pool = pool_for(&harness, &svc, &config).await;
        let pass = harness.pass(&svc, Verb::Ensure);

        let created = ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(created.kind, MonitorKind::Tcp);
        assert_eq!(created.delay, 5);

        let pool = harness.cloud.pool(&pool.id).unwrap();
        harness.cloud.clear_mutations();
        ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap();
        assert!(harness.cloud.mutations().is_empty());

        let slower = annotate(svc.clone(), ANNOTATION_HEALTH_MONITOR_DELAY, "10");
        let config = config_for(&harness, &slower, capabilities());
        let updated = ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.delay, 10);
        assert_eq!(
            harness.cloud.mutations(),
            vec![format!("update_health_monitor {}", created.id)]
        );

        let disabled = annotate(svc, ANNOTATION_ENABLE_HEALTH_MONITOR, "false");
        let config = config_for(&harness, &disabled, capabilities());
        let removed = ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap();
        assert!(removed.is_none());
        assert!(harness.cloud.monitors().is_empty());
    }

    /// Test that a monitor type change recreates the monitor
    #[tokio::test]
    async fn test_type_change_recreates_monitor() {
        let harness = Harness::new(seeded_cloud(&[]));
        seed_load_balancer(&harness.cloud, "lb-1", LB_NAME, &[LB_NAME]);
        let svc = monitored(&[("TCP", 80, 30080)]);
        let config = config_for(&harness, &svc, capabilities());
        let pool = pool_for(&harness, &svc, &config).await;
        let pass = harness.pass(&svc, Verb::Ensure);
        let tcp = ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap()
            .unwrap();

        let svc = with_health_check_port(svc, 32000);
        let config = config_for(&harness, &svc, capabilities());
        let pool = harness.cloud.pool(&pool.id).unwrap();
        harness.cloud.clear_mutations();

        let http = ensure_monitor(&pass, &config, "lb-1", &pool, 0, &config.ports[0])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(http.kind, MonitorKind::Http);
        assert_ne!(http.id, tcp.id);
        assert_eq!(
            harness.cloud.mutations(),
            vec![
                format!("delete_health_monitor {}", tcp.id),
                "create_health_monitor HTTP".to_string()
            ]
        );
    }
}
