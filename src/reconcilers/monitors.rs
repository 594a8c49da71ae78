// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Health monitor convergence.
//!
//! A pool has at most one monitor. The probe type follows the Service port protocol.
//! With a health check node port, monitors switch to an HTTP probe of kube-proxy's
//! `/healthz` endpoint, provided the provider can run HTTP probes for the pool.
//! The probe type cannot change in place, so a type change deletes and recreates
//! the monitor.

use super::config::{truncate_name, ServiceConfig, ServicePortSpec};
use super::pass::Pass;
use crate::cloud::types::{
    HealthMonitor, HealthMonitorCreate, HealthMonitorUpdate, MonitorKind, Pool, Protocol,
};
use crate::constants::{
    HEALTH_CHECK_EXPECTED_CODES, HEALTH_CHECK_HTTP_METHOD, HEALTH_CHECK_URL_PATH,
    MAX_RESOURCE_NAME_LEN, MONITOR_NAME_PREFIX,
};
use crate::errors::Result;
use crate::metrics::{record_resource_created, record_resource_deleted, record_resource_updated};
use tracing::{debug, info};

/// `monitor_<index>_<lbName>`
#[must_use]
pub fn monitor_name(index: usize, lb_name: &str) -> String {
    truncate_name(
        &format!("{MONITOR_NAME_PREFIX}_{index}_{lb_name}"),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Health check node port probed by the pool's monitor, when the HTTP override applies.
#[must_use]
pub fn health_check_port(config: &ServiceConfig, pool_protocol: Protocol) -> Option<i32> {
    config
        .health_check_node_port
        .filter(|_| config.capabilities.http_monitor_allowed(pool_protocol))
}

fn probe_kind(protocol: Protocol) -> MonitorKind {
    match protocol {
        Protocol::Udp => MonitorKind::UdpConnect,
        Protocol::Sctp => MonitorKind::Sctp,
        _ => MonitorKind::Tcp,
    }
}

/// Create request for the monitor of `pool`.
#[must_use]
pub fn desired_monitor(
    config: &ServiceConfig,
    pool: &Pool,
    index: usize,
    port: &ServicePortSpec,
) -> HealthMonitorCreate {
    let settings = &config.monitor;
    let mut monitor = HealthMonitorCreate {
        name: monitor_name(index, &config.identity.lb_name),
        pool_id: pool.id.clone(),
        kind: probe_kind(port.protocol),
        delay: settings.delay,
        timeout: settings.timeout,
        max_retries: settings.max_retries,
        max_retries_down: settings.max_retries_down,
        ..HealthMonitorCreate::default()
    };
    if health_check_port(config, pool.protocol).is_some() {
        monitor.kind = MonitorKind::Http;
        monitor.url_path = Some(HEALTH_CHECK_URL_PATH.to_string());
        monitor.http_method = Some(HEALTH_CHECK_HTTP_METHOD.to_string());
        monitor.expected_codes = Some(HEALTH_CHECK_EXPECTED_CODES.to_string());
    }
    monitor
}

fn monitor_update(existing: &HealthMonitor, desired: &HealthMonitorCreate) -> HealthMonitorUpdate {
    let changed = |current: i32, wanted: i32| (current != wanted).then_some(wanted);
    HealthMonitorUpdate {
        name: (existing.name != desired.name).then(|| desired.name.clone()),
        delay: changed(existing.delay, desired.delay),
        timeout: changed(existing.timeout, desired.timeout),
        max_retries: changed(existing.max_retries, desired.max_retries),
        max_retries_down: changed(existing.max_retries_down, desired.max_retries_down),
    }
}

async fn create_monitor(
    pass: &Pass<'_>,
    lb_id: &str,
    desired: &HealthMonitorCreate,
) -> Result<HealthMonitor> {
    let created = pass
        .mutate(
            lb_id,
            "create_health_monitor",
            pass.cloud.create_health_monitor(desired),
        )
        .await?;
    record_resource_created("health_monitor");
    info!(
        pool_id = %created.pool_id,
        monitor_id = %created.id,
        kind = %created.kind,
        "Created health monitor"
    );
    Ok(created)
}

async fn delete_monitor(pass: &Pass<'_>, lb_id: &str, monitor_id: &str) -> Result<()> {
    pass.mutate_delete(
        lb_id,
        "delete_health_monitor",
        pass.cloud.delete_health_monitor(monitor_id),
    )
    .await?;
    record_resource_deleted("health_monitor");
    info!(monitor_id = %monitor_id, "Deleted health monitor");
    Ok(())
}

/// Converge the monitor of `pool`; returns the monitor left in place, if any.
///
/// # Errors
///
/// Propagates gate and cloud failures.
pub async fn ensure_monitor(
    pass: &Pass<'_>,
    config: &ServiceConfig,
    lb_id: &str,
    pool: &Pool,
    index: usize,
    port: &ServicePortSpec,
) -> Result<Option<HealthMonitor>> {
    let existing = match &pool.monitor_id {
        Some(id) => {
            pass.call_optional("get_health_monitor", pass.cloud.get_health_monitor(id))
                .await?
        }
        None => None,
    };

    if !config.monitor.enabled {
        if let Some(existing) = existing {
            delete_monitor(pass, lb_id, &existing.id).await?;
        }
        return Ok(None);
    }

    let desired = desired_monitor(config, pool, index, port);
    let Some(existing) = existing else {
        return create_monitor(pass, lb_id, &desired).await.map(Some);
    };

    if existing.kind != desired.kind {
        debug!(
            monitor_id = %existing.id,
            from = %existing.kind,
            to = %desired.kind,
            "Monitor type changed, recreating"
        );
        delete_monitor(pass, lb_id, &existing.id).await?;
        return create_monitor(pass, lb_id, &desired).await.map(Some);
    }

    let update = monitor_update(&existing, &desired);
    if update.is_empty() {
        return Ok(Some(existing));
    }
    let updated = pass
        .mutate(
            lb_id,
            "update_health_monitor",
            pass.cloud.update_health_monitor(&existing.id, &update),
        )
        .await?;
    record_resource_updated("health_monitor");
    info!(monitor_id = %updated.id, "Updated health monitor");
    Ok(Some(updated))
}

#[cfg(test)]
#[path = "monitors_tests.rs"]
mod monitors_tests;
