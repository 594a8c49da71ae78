// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Ensure, update and delete orchestration for one Service.
//!
//! [`OctaviaLoadBalancer`] is the entry point of the engine. Each call runs one
//! reconciliation pass:
//!
//! - **ensure** finds or creates the load balancer, converges one listener, pool,
//!   member set and monitor per Service port, removes listeners the Service no longer
//!   needs, then acquires or releases the floating IP and converges security groups;
//! - **update** only converges pools, members, monitors and security groups for the
//!   listeners that already exist, which is what node changes require;
//! - **delete** removes the load balancer when the Service is its last user and it was
//!   created by this controller, and otherwise only removes the Service's listeners and
//!   source tag.
//!
//! A load balancer is created lazily and is the only resource whose provisioning is
//! waited for. When it lands in `ERROR` it is deleted again and the pass fails with a
//! retryable error.

use super::config::{truncate_name, ServiceConfig, ServiceIdentity};
use super::floatingip::{
    attached_floating_ip, ensure_floating_ip, release_floating_ip, release_for_internal,
};
use super::listeners::{
    check_port_conflicts, delete_unclaimed, ensure_listener, index_listeners, list_listeners,
};
use super::monitors::{ensure_monitor, health_check_port};
use super::pass::{Pass, Verb};
use super::pools::{desired_members, ensure_members, ensure_pool};
use super::retry::lb_active_backoff;
use super::security_groups::{delete_security_group, ensure_security_group};
use super::sharing::{
    add_source_tag, is_created_by_controller, is_named_for, other_sources, remove_source_tag,
    validate_sharer,
};
use crate::annotations::{AnnotationReader, ANNOTATION_KEEP_FLOATING_IP};
use crate::capabilities::{CapabilityDiscovery, CapabilitySet};
use crate::cloud::types::{
    LoadBalancer, LoadBalancerCreate, LoadBalancerQuery, ProvisioningStatus,
};
use crate::cloud::CloudApi;
use crate::constants::MAX_RESOURCE_NAME_LEN;
use crate::errors::{LbError, Result};
use crate::events::{EventSink, EventTarget, LbEvent, REASON_ENSURED};
use crate::metrics::{
    record_reconciliation_error, record_reconciliation_success, record_resource_created,
    record_resource_deleted,
};
use crate::options::ProviderOptions;
use k8s_openapi::api::core::v1::{Node, Service};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// How traffic reaches the ingress address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngressMode {
    /// Packets arrive addressed to the load balancer address
    Vip,
    /// The load balancer terminates connections and speaks proxy protocol to backends
    Proxy,
}

impl IngressMode {
    /// Value of `status.loadBalancer.ingress[].ipMode`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vip => "VIP",
            Self::Proxy => "Proxy",
        }
    }
}

impl fmt::Display for IngressMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a successful ensure pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureOutcome {
    pub lb_id: String,
    /// Floating IP for external Services, VIP address otherwise
    pub address: String,
    pub hostname: Option<String>,
    pub ingress_mode: IngressMode,
}

/// Description stored on load balancers created for a Service.
#[must_use]
pub fn load_balancer_description(identity: &ServiceIdentity, cluster: &str) -> String {
    truncate_name(
        &format!(
            "Kubernetes external service {} from cluster {cluster}",
            identity.key()
        ),
        MAX_RESOURCE_NAME_LEN,
    )
}

/// Load balancer referenced by ID, or carrying the generated or legacy name.
///
/// # Errors
///
/// Returns `LbError::MultipleResults` when a name matches several load balancers and
/// propagates cloud failures.
pub async fn find_load_balancer(
    pass: &Pass<'_>,
    identity: &ServiceIdentity,
) -> Result<Option<LoadBalancer>> {
    if let Some(id) = &identity.lb_id {
        return pass
            .call_optional("get_load_balancer", pass.cloud.get_load_balancer(id))
            .await;
    }
    for name in [&identity.lb_name, &identity.legacy_name] {
        if let Some(lb) = find_by_name(pass, name).await? {
            return Ok(Some(lb));
        }
    }
    Ok(None)
}

async fn find_by_name(pass: &Pass<'_>, name: &str) -> Result<Option<LoadBalancer>> {
    let query = LoadBalancerQuery {
        name: Some(name.to_string()),
    };
    let mut found = pass
        .list_all("list_load_balancers", |page| {
            pass.cloud.list_load_balancers(&query, page)
        })
        .await?;
    match found.len() {
        0 => Ok(None),
        1 => Ok(found.pop()),
        _ => Err(LbError::MultipleResults {
            kind: "load balancer",
            name: name.to_string(),
        }),
    }
}

/// Octavia-backed implementation of the Service load balancer operations.
#[derive(Clone)]
pub struct OctaviaLoadBalancer {
    cloud: Arc<dyn CloudApi>,
    options: Arc<ProviderOptions>,
    capabilities: Arc<dyn CapabilityDiscovery>,
    events: Arc<dyn EventSink>,
}

impl OctaviaLoadBalancer {
    #[must_use]
    pub fn new(
        cloud: Arc<dyn CloudApi>,
        options: Arc<ProviderOptions>,
        capabilities: Arc<dyn CapabilityDiscovery>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            cloud,
            options,
            capabilities,
            events,
        }
    }

    #[must_use]
    pub fn options(&self) -> &ProviderOptions {
        &self.options
    }

    fn pass<'a>(
        &'a self,
        service: &Service,
        verb: Verb,
        cancel: &'a CancellationToken,
    ) -> Pass<'a> {
        Pass {
            cloud: self.cloud.as_ref(),
            options: self.options.as_ref(),
            events: self.events.as_ref(),
            cancel,
            target: EventTarget::from_service(service),
            verb,
        }
    }

    fn capability_set(&self) -> CapabilitySet {
        CapabilitySet::resolve(self.capabilities.as_ref(), &self.options.lb_provider)
    }

    /// Create or converge the load balancer of `service`.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the pass; see [`LbError::is_retryable`].
    pub async fn ensure_load_balancer(
        &self,
        service: &Service,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> Result<EnsureOutcome> {
        let pass = self.pass(service, Verb::Ensure, cancel);
        let start = Instant::now();
        let result = self.ensure(&pass, service, nodes).await;
        record_outcome(&pass, &result, start);
        result
    }

    /// Converge pools, members, monitors and security groups of the existing listeners.
    ///
    /// # Errors
    ///
    /// Returns `LbError::NotFound` when the load balancer or one of the listeners does
    /// not exist, and the first failure of the pass otherwise.
    pub async fn update_load_balancer(
        &self,
        service: &Service,
        nodes: &[Node],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let pass = self.pass(service, Verb::Update, cancel);
        let start = Instant::now();
        let result = self.update(&pass, service, nodes).await;
        record_outcome(&pass, &result, start);
        result
    }

    /// Remove the Service from its load balancer, deleting the load balancer when the
    /// Service was its last user.
    ///
    /// # Errors
    ///
    /// Returns the first failure of the pass; missing resources are not failures.
    pub async fn delete_load_balancer(
        &self,
        service: &Service,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let pass = self.pass(service, Verb::Delete, cancel);
        let start = Instant::now();
        let result = self.delete(&pass, service).await;
        record_outcome(&pass, &result, start);
        result
    }

    async fn ensure(
        &self,
        pass: &Pass<'_>,
        service: &Service,
        nodes: &[Node],
    ) -> Result<EnsureOutcome> {
        let config = ServiceConfig::resolve(pass, service, nodes, self.capability_set()).await?;
        let identity = &config.identity;

        let (lb, created) = match find_load_balancer(pass, identity).await? {
            Some(lb) => (lb, false),
            None => {
                if let Some(id) = &identity.lb_id {
                    return Err(LbError::not_found("load balancer", id.clone()));
                }
                self.create_load_balancer(pass, &config).await?
            }
        };
        let is_owner = created || is_named_for(&lb, identity);
        debug!(
            service = %identity.key(),
            lb_id = %lb.id,
            is_owner,
            created,
            "Reconciling load balancer"
        );

        if is_owner && config.internal {
            let others = other_sources(&lb, &identity.lb_name);
            if !others.is_empty() {
                return Err(LbError::Conflict(format!(
                    "service {} cannot turn load balancer {} internal while {} other services share it",
                    identity.key(),
                    lb.id,
                    others.len()
                )));
            }
        }

        let lb = if is_owner {
            lb
        } else {
            let has_floating_ip = attached_floating_ip(pass, &lb.vip_port_id).await?.is_some();
            validate_sharer(&config, &lb, has_floating_ip, self.options.max_shared_lb)?;
            add_source_tag(pass, &lb, &identity.lb_name).await?
        };

        self.ensure_listeners(pass, &config, &lb, nodes, is_owner)
            .await?;

        let address = if config.internal {
            release_for_internal(pass, &config, &lb, is_owner).await?;
            lb.vip_address.clone()
        } else {
            ensure_floating_ip(pass, &config, &lb, is_owner)
                .await?
                .unwrap_or_else(|| lb.vip_address.clone())
        };

        ensure_security_group(pass, &config, &lb, nodes).await?;

        let hostname = config.hostname.clone().or_else(|| {
            (self.options.enable_ingress_hostname && config.client_ip.is_proxy())
                .then(|| format!("{address}.{}", self.options.ingress_hostname_suffix))
        });
        let ingress_mode = if config.client_ip.is_proxy() {
            IngressMode::Proxy
        } else {
            IngressMode::Vip
        };

        pass.events.publish(
            &pass.target,
            LbEvent::normal(
                REASON_ENSURED,
                format!("Ensured load balancer {} at {address}", lb.id),
            ),
        );
        info!(
            service = %identity.key(),
            lb_id = %lb.id,
            address = %address,
            "Load balancer ensured"
        );

        Ok(EnsureOutcome {
            lb_id: lb.id,
            address,
            hostname,
            ingress_mode,
        })
    }

    async fn ensure_listeners(
        &self,
        pass: &Pass<'_>,
        config: &ServiceConfig,
        lb: &LoadBalancer,
        nodes: &[Node],
        is_owner: bool,
    ) -> Result<()> {
        let listeners = list_listeners(pass, &lb.id).await?;
        let by_key = index_listeners(&listeners);
        check_port_conflicts(config, &by_key, is_owner)?;

        let mut reconciled = HashSet::new();
        for (index, port) in config.ports.iter().enumerate() {
            let key = (config.listener_protocol(port), port.port);
            let listener =
                ensure_listener(pass, config, &lb.id, by_key.get(&key), index, port).await?;
            reconciled.insert(listener.id.clone());

            let pool = ensure_pool(pass, config, &lb.id, &listener, index).await?;
            let members = desired_members(
                config,
                nodes,
                port,
                health_check_port(config, pool.protocol),
            );
            ensure_members(pass, config, &lb.id, &pool, &members).await?;
            ensure_monitor(pass, config, &lb.id, &pool, index, port).await?;
        }

        delete_unclaimed(
            pass,
            &lb.id,
            &listeners,
            &reconciled,
            &config.identity.lb_name,
            is_owner,
        )
        .await
    }

    /// Create the load balancer and wait until it is `ACTIVE`.
    ///
    /// A concurrent pass may create the same name first. The 409 is answered by
    /// re-reading by name. The winner carries this Service's generated name, so the
    /// Service owns it like any load balancer found by name; only the `ACTIVE` wait and
    /// the ERROR cleanup are skipped.
    async fn create_load_balancer(
        &self,
        pass: &Pass<'_>,
        config: &ServiceConfig,
    ) -> Result<(LoadBalancer, bool)> {
        let identity = &config.identity;
        let request = LoadBalancerCreate {
            name: identity.lb_name.clone(),
            description: load_balancer_description(identity, &self.options.cluster_name),
            vip_network_id: config.vip_network_id.clone(),
            vip_subnet_id: config.vip_subnet_id.clone(),
            vip_port_id: config.vip_port_id.clone(),
            vip_address: config
                .load_balancer_ip
                .clone()
                .filter(|_| config.internal),
            provider: config.capabilities.provider.clone(),
            flavor_id: config.flavor_id.clone(),
            availability_zone: config.availability_zone.clone(),
            tags: if config.capabilities.tags {
                vec![identity.lb_name.clone()]
            } else {
                Vec::new()
            },
        };

        let lb = match pass
            .call(
                "create_load_balancer",
                pass.cloud.create_load_balancer(&request),
            )
            .await
        {
            Ok(lb) => lb,
            Err(LbError::Cloud { source, .. }) if source.is_conflict() => {
                warn!(
                    name = %identity.lb_name,
                    "Load balancer created concurrently, using the existing one"
                );
                let lb = find_by_name(pass, &identity.lb_name)
                    .await?
                    .ok_or_else(|| LbError::not_found("load balancer", identity.lb_name.clone()))?;
                return Ok((lb, false));
            }
            Err(e) => return Err(e),
        };
        record_resource_created("load_balancer");
        info!(
            service = %identity.key(),
            lb_id = %lb.id,
            name = %lb.name,
            "Created load balancer"
        );

        let lb = self.wait_for_active(pass, &lb.id).await?;
        Ok((lb, true))
    }

    /// Poll a new load balancer until it is `ACTIVE`.
    async fn wait_for_active(&self, pass: &Pass<'_>, lb_id: &str) -> Result<LoadBalancer> {
        let mut backoff = lb_active_backoff(&self.options.lb_active_wait);
        loop {
            let lb = pass
                .call("get_load_balancer", pass.cloud.get_load_balancer(lb_id))
                .await?;
            match lb.provisioning_status {
                ProvisioningStatus::Active => return Ok(lb),
                ProvisioningStatus::Error => {
                    warn!(lb_id = %lb_id, "Load balancer went to ERROR, deleting it");
                    pass.call_delete(
                        "delete_load_balancer",
                        pass.cloud.delete_load_balancer(lb_id, true),
                    )
                    .await?;
                    record_resource_deleted("load_balancer");
                    return Err(LbError::ProviderErrorState {
                        lb_id: lb_id.to_string(),
                    });
                }
                status => {
                    let Some(delay) = backoff.next_delay() else {
                        return Err(LbError::NotActive {
                            lb_id: lb_id.to_string(),
                            status,
                        });
                    };
                    debug!(lb_id = %lb_id, status = %status, ?delay, "Waiting for load balancer");
                    tokio::select! {
                        () = tokio::time::sleep(delay) => {}
                        () = pass.cancel.cancelled() => return Err(LbError::Cancelled),
                    }
                }
            }
        }
    }

    async fn update(&self, pass: &Pass<'_>, service: &Service, nodes: &[Node]) -> Result<()> {
        let config = ServiceConfig::resolve(pass, service, nodes, self.capability_set()).await?;
        let identity = &config.identity;

        let lb = find_load_balancer(pass, identity)
            .await?
            .ok_or_else(|| LbError::not_found("load balancer", identity.lb_name.clone()))?;

        let listeners = list_listeners(pass, &lb.id).await?;
        let by_key = index_listeners(&listeners);
        for (index, port) in config.ports.iter().enumerate() {
            let protocol = config.listener_protocol(port);
            let listener = by_key.get(&(protocol, port.port)).ok_or_else(|| {
                LbError::not_found("listener", format!("{protocol}/{} on {}", port.port, lb.id))
            })?;

            let pool = ensure_pool(pass, &config, &lb.id, listener, index).await?;
            let members = desired_members(
                &config,
                nodes,
                port,
                health_check_port(&config, pool.protocol),
            );
            ensure_members(pass, &config, &lb.id, &pool, &members).await?;
            ensure_monitor(pass, &config, &lb.id, &pool, index, port).await?;
        }

        ensure_security_group(pass, &config, &lb, nodes).await?;
        info!(service = %identity.key(), lb_id = %lb.id, "Load balancer updated");
        Ok(())
    }

    async fn delete(&self, pass: &Pass<'_>, service: &Service) -> Result<()> {
        let identity = ServiceIdentity::from_service(service, &self.options);

        let Some(lb) = find_load_balancer(pass, &identity).await? else {
            debug!(service = %identity.key(), "No load balancer to delete");
            return delete_security_group(pass, &identity).await;
        };
        let is_owner = is_named_for(&lb, &identity);
        let others = other_sources(&lb, &identity.lb_name);

        if others.is_empty() && is_created_by_controller(&lb, &identity) {
            if let Some(fip) = attached_floating_ip(pass, &lb.vip_port_id).await? {
                let keep = AnnotationReader::new(service.metadata.annotations.as_ref())
                    .get_bool(ANNOTATION_KEEP_FLOATING_IP, false);
                release_floating_ip(pass, &fip, keep).await?;
            }
            pass.mutate_delete(
                &lb.id,
                "delete_load_balancer",
                pass.cloud.delete_load_balancer(&lb.id, true),
            )
            .await?;
            record_resource_deleted("load_balancer");
            info!(service = %identity.key(), lb_id = %lb.id, "Deleted load balancer");
        } else {
            info!(
                service = %identity.key(),
                lb_id = %lb.id,
                remaining = others.len(),
                "Load balancer is still in use, removing only this service's listeners"
            );
            let listeners = list_listeners(pass, &lb.id).await?;
            delete_unclaimed(
                pass,
                &lb.id,
                &listeners,
                &HashSet::new(),
                &identity.lb_name,
                is_owner,
            )
            .await?;
            remove_source_tag(pass, &lb, &identity.lb_name).await?;
        }

        delete_security_group(pass, &identity).await
    }
}

fn record_outcome<T>(pass: &Pass<'_>, result: &Result<T>, start: Instant) {
    let verb = pass.verb.as_str();
    match result {
        Ok(_) => record_reconciliation_success(verb, start.elapsed()),
        Err(e) => {
            record_reconciliation_error(verb, e.reason(), start.elapsed());
            if e.is_retryable() {
                debug!(
                    service = %pass.target.name,
                    verb = %verb,
                    error = %e,
                    "Reconciliation pass will be retried"
                );
            }
        }
    }
}

#[cfg(test)]
#[path = "loadbalancer_tests.rs"]
mod loadbalancer_tests;
