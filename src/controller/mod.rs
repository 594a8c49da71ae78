// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Kubernetes controller driving the engine from `LoadBalancer` Services.
//!
//! [`run_service_controller`] watches Services cluster wide and re-queues every managed
//! Service whenever a Node changes. Each reconciliation:
//!
//! 1. releases the load balancer and drops the cleanup finalizer when the Service is
//!    being deleted or is no longer of type `LoadBalancer`;
//! 2. adds the cleanup finalizer;
//! 3. lists the eligible nodes (ready, not excluded);
//! 4. runs an ensure pass when the spec changed since the last successful ensure (tracked
//!    in the observed-generation annotation) or no ingress is published yet, and an
//!    update pass otherwise;
//! 5. after an ensure, persists the load balancer ID and address annotations and patches
//!    `status.loadBalancer.ingress`.
//!
//! Failures publish a warning event and requeue after [`ERROR_REQUEUE_DURATION_SECS`]
//! when retryable, [`FATAL_REQUEUE_DURATION_SECS`] otherwise.

pub mod finalizers;

use crate::annotations::{
    AnnotationReader, ANNOTATION_LOAD_BALANCER_ADDRESS, ANNOTATION_LOAD_BALANCER_ID,
    ANNOTATION_OBSERVED_GENERATION,
};
use crate::constants::{
    ERROR_REQUEUE_DURATION_SECS, FATAL_REQUEUE_DURATION_SECS, FIELD_MANAGER,
    LOAD_BALANCER_CLEANUP_FINALIZER, RESYNC_DURATION_SECS, SERVICE_TYPE_LOAD_BALANCER,
};
use crate::errors::LbError;
use crate::events::{EventSink, EventTarget, LbEvent, REASON_SYNC_FAILED};
use crate::reconcilers::loadbalancer::{EnsureOutcome, OctaviaLoadBalancer};
use crate::reconcilers::nodes::eligible_nodes;
use crate::reconcilers::pagination::list_all_paginated;
use crate::reconcilers::retry::retry_api_call;
use crate::reconcilers::should_reconcile;
use anyhow::Result;
use finalizers::{ensure_finalizer, handle_deletion, has_finalizer};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Service};
use kube::api::{ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::runtime::reflector::ObjectRef;
use kube::runtime::watcher::Config;
use kube::runtime::Controller;
use kube::{Api, Client, ResourceExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ReconcileError(#[from] anyhow::Error);

impl ReconcileError {
    /// The engine error behind this failure, if any.
    #[must_use]
    pub fn engine_error(&self) -> Option<&LbError> {
        self.0.downcast_ref::<LbError>()
    }

    /// Requeue delay after this failure.
    #[must_use]
    pub fn requeue_after(&self) -> Duration {
        match self.engine_error() {
            Some(e) if !e.is_retryable() => Duration::from_secs(FATAL_REQUEUE_DURATION_SECS),
            _ => Duration::from_secs(ERROR_REQUEUE_DURATION_SECS),
        }
    }

    fn reason(&self) -> &'static str {
        self.engine_error().map_or("KubernetesApiError", LbError::reason)
    }
}

impl From<LbError> for ReconcileError {
    fn from(e: LbError) -> Self {
        Self(anyhow::Error::new(e))
    }
}

/// Collaborators shared by every reconciliation.
pub struct Context {
    pub client: Client,
    pub engine: OctaviaLoadBalancer,
    pub events: Arc<dyn EventSink>,
    /// Cancelled on shutdown; each pass runs under a child token
    pub shutdown: CancellationToken,
}

/// Whether the controller manages this Service.
#[must_use]
pub fn is_load_balancer_service(service: &Service) -> bool {
    service
        .spec
        .as_ref()
        .and_then(|spec| spec.type_.as_deref())
        == Some(SERVICE_TYPE_LOAD_BALANCER)
}

/// Whether the Service needs a full ensure pass rather than a node update.
#[must_use]
pub fn needs_ensure(service: &Service) -> bool {
    let has_ingress = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .is_some_and(|ingress| !ingress.is_empty());
    if !has_ingress {
        return true;
    }
    let observed = AnnotationReader::new(service.metadata.annotations.as_ref())
        .get_optional(ANNOTATION_OBSERVED_GENERATION)
        .and_then(|g| g.parse::<i64>().ok());
    should_reconcile(service.metadata.generation, observed)
}

/// Metadata patch recording the ensured load balancer.
#[must_use]
pub fn annotation_patch(outcome: &EnsureOutcome, generation: Option<i64>) -> Value {
    let mut annotations = serde_json::Map::new();
    annotations.insert(
        ANNOTATION_LOAD_BALANCER_ID.to_string(),
        Value::String(outcome.lb_id.clone()),
    );
    annotations.insert(
        ANNOTATION_LOAD_BALANCER_ADDRESS.to_string(),
        Value::String(outcome.address.clone()),
    );
    if let Some(generation) = generation {
        annotations.insert(
            ANNOTATION_OBSERVED_GENERATION.to_string(),
            Value::String(generation.to_string()),
        );
    }
    json!({ "metadata": { "annotations": annotations } })
}

/// Status patch publishing the ingress point.
///
/// A hostname replaces the IP so clients resolve through DNS.
#[must_use]
pub fn status_patch(outcome: &EnsureOutcome) -> Value {
    let ingress = match &outcome.hostname {
        Some(hostname) => json!({ "hostname": hostname }),
        None => json!({ "ip": outcome.address, "ipMode": outcome.ingress_mode.as_str() }),
    };
    json!({ "status": { "loadBalancer": { "ingress": [ingress] } } })
}

async fn persist_outcome(client: &Client, service: &Service, outcome: &EnsureOutcome) -> Result<()> {
    let api: Api<Service> =
        Api::namespaced(client.clone(), &service.namespace().unwrap_or_default());
    let name = service.name_any();
    let params = PatchParams::apply(FIELD_MANAGER);
    let annotations = Patch::Merge(annotation_patch(outcome, service.metadata.generation));
    let status = Patch::Merge(status_patch(outcome));

    retry_api_call(
        || api.patch(&name, &params, &annotations),
        "patch_service_annotations",
    )
    .await?;
    retry_api_call(
        || api.patch_status(&name, &params, &status),
        "patch_service_status",
    )
    .await?;
    Ok(())
}

async fn clear_status(client: &Client, service: &Service) -> Result<()> {
    let api: Api<Service> =
        Api::namespaced(client.clone(), &service.namespace().unwrap_or_default());
    let name = service.name_any();
    let params = PatchParams::apply(FIELD_MANAGER);
    let patch = Patch::Merge(json!({ "status": { "loadBalancer": {} } }));
    retry_api_call(
        || api.patch_status(&name, &params, &patch),
        "clear_service_status",
    )
    .await?;
    Ok(())
}

async fn reconcile_service(
    service: Arc<Service>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let key = format!(
        "{}/{}",
        service.namespace().unwrap_or_default(),
        service.name_any()
    );
    let cancel = ctx.shutdown.child_token();
    let deleting = service.metadata.deletion_timestamp.is_some();

    if deleting || !is_load_balancer_service(&service) {
        if has_finalizer(service.as_ref(), LOAD_BALANCER_CLEANUP_FINALIZER) {
            info!(service = %key, deleting, "Releasing load balancer");
            handle_deletion(
                &ctx.client,
                service.as_ref(),
                LOAD_BALANCER_CLEANUP_FINALIZER,
                async {
                    ctx.engine.delete_load_balancer(&service, &cancel).await?;
                    if !deleting {
                        clear_status(&ctx.client, &service).await?;
                    }
                    Ok::<(), anyhow::Error>(())
                },
            )
            .await?;
        }
        return Ok(Action::await_change());
    }

    ensure_finalizer(&ctx.client, service.as_ref(), LOAD_BALANCER_CLEANUP_FINALIZER).await?;

    let nodes_api: Api<Node> = Api::all(ctx.client.clone());
    let nodes = eligible_nodes(list_all_paginated(&nodes_api, ListParams::default()).await?);
    debug!(service = %key, nodes = nodes.len(), "Listed eligible nodes");

    let ensure = needs_ensure(&service);
    if !ensure {
        match ctx
            .engine
            .update_load_balancer(&service, &nodes, &cancel)
            .await
        {
            Ok(()) => return Ok(Action::requeue(Duration::from_secs(RESYNC_DURATION_SECS))),
            Err(LbError::NotFound { kind, name }) => {
                warn!(
                    service = %key,
                    kind,
                    name = %name,
                    "Load balancer resources missing, running a full ensure"
                );
            }
            Err(e) => return Err(e.into()),
        }
    }

    let outcome = ctx
        .engine
        .ensure_load_balancer(&service, &nodes, &cancel)
        .await?;
    persist_outcome(&ctx.client, &service, &outcome).await?;
    info!(
        service = %key,
        lb_id = %outcome.lb_id,
        address = %outcome.address,
        "Service load balancer ready"
    );
    Ok(Action::requeue(Duration::from_secs(RESYNC_DURATION_SECS)))
}

fn error_policy(service: Arc<Service>, err: &ReconcileError, ctx: Arc<Context>) -> Action {
    let delay = err.requeue_after();
    error!(
        service = %service.name_any(),
        namespace = ?service.namespace(),
        error = %err,
        requeue_secs = delay.as_secs(),
        "Reconciliation failed"
    );
    ctx.events.publish(
        &EventTarget::from_service(&service),
        LbEvent::warning(
            REASON_SYNC_FAILED,
            format!("Error syncing load balancer ({}): {err}", err.reason()),
        ),
    );
    Action::requeue(delay)
}

/// Run the Service controller until shutdown.
///
/// # Errors
///
/// Currently always returns `Ok(())` once the controller stream ends.
pub async fn run_service_controller(ctx: Arc<Context>) -> Result<()> {
    info!("Starting LoadBalancer Service controller");

    let services = Api::<Service>::all(ctx.client.clone());
    let nodes = Api::<Node>::all(ctx.client.clone());
    let shutdown = ctx.shutdown.clone();

    let controller = Controller::new(services, Config::default());
    let store = controller.store();
    controller
        .watches(nodes, Config::default(), move |_node: Node| {
            store
                .state()
                .into_iter()
                .filter(|svc| is_load_balancer_service(svc))
                .map(|svc| ObjectRef::from_obj(svc.as_ref()))
                .collect::<Vec<_>>()
        })
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile_service, error_policy, ctx)
        .for_each(|result| {
            if let Err(e) = result {
                debug!(error = %e, "Controller event");
            }
            futures::future::ready(())
        })
        .await;

    info!("LoadBalancer Service controller stopped");
    Ok(())
}
