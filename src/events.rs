// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! User-visible event notifications.
//!
//! Reconcilers report degradations (dropped source ranges, forced internal load balancers)
//! through an [`EventSink`]. Publishing is fire-and-forget: a sink must never block the
//! pass or change its outcome.

use k8s_openapi::api::core::v1::{ObjectReference, Service};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, ResourceExt};
use std::sync::Mutex;
use tracing::{info, warn};

/// Reason of events emitted when a load balancer falls back to internal-only.
pub const REASON_FORCED_INTERNAL: &str = "LoadBalancerForcedInternal";

/// Reason of events emitted when source ranges cannot be enforced.
pub const REASON_SOURCE_RANGES_IGNORED: &str = "LoadBalancerSourceRangesIgnored";

/// Reason of events emitted when an availability zone cannot be honored.
pub const REASON_AVAILABILITY_ZONE_IGNORED: &str = "LoadBalancerAvailabilityZoneIgnored";

/// Reason of events emitted after a successful ensure.
pub const REASON_ENSURED: &str = "EnsuredLoadBalancer";

/// Reason of events emitted when a reconciliation pass fails.
pub const REASON_SYNC_FAILED: &str = "SyncLoadBalancerFailed";

/// Severity of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Normal,
    Warning,
}

/// A notification about a Service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbEvent {
    pub severity: Severity,
    pub reason: String,
    pub message: String,
}

impl LbEvent {
    #[must_use]
    pub fn warning(reason: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            reason: reason.to_string(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn normal(reason: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Normal,
            reason: reason.to_string(),
            message: message.into(),
        }
    }
}

/// Identity of the Service an event is about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EventTarget {
    pub namespace: String,
    pub name: String,
    pub uid: String,
}

impl EventTarget {
    #[must_use]
    pub fn from_service(service: &Service) -> Self {
        Self {
            namespace: service.namespace().unwrap_or_default(),
            name: service.name_any(),
            uid: service.uid().unwrap_or_default(),
        }
    }

    #[must_use]
    pub fn object_reference(&self) -> ObjectReference {
        ObjectReference {
            api_version: Some("v1".to_string()),
            kind: Some("Service".to_string()),
            namespace: Some(self.namespace.clone()),
            name: Some(self.name.clone()),
            uid: (!self.uid.is_empty()).then(|| self.uid.clone()),
            ..ObjectReference::default()
        }
    }
}

/// Destination of reconciliation events.
pub trait EventSink: Send + Sync {
    fn publish(&self, target: &EventTarget, event: LbEvent);
}

/// Sink that only logs events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn publish(&self, target: &EventTarget, event: LbEvent) {
        match event.severity {
            Severity::Normal => info!(
                namespace = %target.namespace,
                service = %target.name,
                reason = %event.reason,
                "{}", event.message
            ),
            Severity::Warning => warn!(
                namespace = %target.namespace,
                service = %target.name,
                reason = %event.reason,
                "{}", event.message
            ),
        }
    }
}

/// Sink that keeps events in memory for inspection.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<(EventTarget, LbEvent)>>,
}

impl MemoryEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<(EventTarget, LbEvent)> {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Reasons of all recorded events, in order.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .map(|(_, event)| event.reason)
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn publish(&self, target: &EventTarget, event: LbEvent) {
        self.events
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((target.clone(), event));
    }
}

/// Sink publishing Kubernetes events through the kube runtime recorder.
#[derive(Clone)]
pub struct KubeEventSink {
    recorder: Recorder,
}

impl KubeEventSink {
    #[must_use]
    pub fn new(client: Client, controller: &str) -> Self {
        let reporter = Reporter {
            controller: controller.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

impl EventSink for KubeEventSink {
    fn publish(&self, target: &EventTarget, event: LbEvent) {
        let recorder = self.recorder.clone();
        let reference = target.object_reference();
        let kube_event = Event {
            type_: match event.severity {
                Severity::Normal => EventType::Normal,
                Severity::Warning => EventType::Warning,
            },
            reason: event.reason.clone(),
            note: Some(event.message),
            action: "Reconcile".to_string(),
            secondary: None,
        };
        let service = target.name.clone();
        tokio::spawn(async move {
            if let Err(e) = recorder.publish(&kube_event, &reference).await {
                warn!(service = %service, error = %e, "Failed to publish event");
            }
        });
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod events_tests;
