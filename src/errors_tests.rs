// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Unit tests for `errors.rs`

#[cfg(test)]
mod tests {
    use super::super::*;
    use crate::cloud::types::ProvisioningStatus;
    use reqwest::StatusCode;

    /// Test cloud error retryability by status
    #[test]
    fn test_cloud_error_classification() {
        let not_found = CloudError::not_found("no such listener");
        assert!(not_found.is_not_found());
        assert!(!not_found.is_conflict());
        assert!(!not_found.is_retryable());

        let conflict = CloudError::conflict("load balancer is immutable");
        assert!(conflict.is_conflict());
        assert!(conflict.is_retryable());

        let unavailable = CloudError::new(StatusCode::SERVICE_UNAVAILABLE, "try later");
        assert!(unavailable.is_retryable());

        let bad_request =
            CloudError::new(StatusCode::BAD_REQUEST, "bad cidr").with_body("{\"faultstring\":1}");
        assert!(!bad_request.is_retryable());
        assert_eq!(bad_request.body.as_deref(), Some("{\"faultstring\":1}"));

        assert!(CloudError::transport("connection reset").is_retryable());
    }

    /// Test which engine errors are retried
    #[test]
    fn test_lb_error_retryable() {
        let transient = LbError::NotActive {
            lb_id: "lb-1".into(),
            status: ProvisioningStatus::PendingUpdate,
        };
        assert!(transient.is_retryable());
        assert!(LbError::ProviderErrorState {
            lb_id: "lb-1".into()
        }
        .is_retryable());
        assert!(LbError::Cancelled.is_retryable());

        assert!(!LbError::Conflict("port 80".into()).is_retryable());
        assert!(!LbError::Ownership("fip".into()).is_retryable());
        assert!(!LbError::invalid("unknown class").is_retryable());
        assert!(!LbError::MultipleResults {
            kind: "load balancer",
            name: "x".into()
        }
        .is_retryable());
    }

    /// Test that a wrapped cloud error keeps its source's retryability
    #[test]
    fn test_cloud_variant_follows_source() {
        let err = LbError::Cloud {
            operation: "create_pool",
            source: CloudError::new(StatusCode::INTERNAL_SERVER_ERROR, "boom"),
        };
        assert!(err.is_retryable());
        assert_eq!(err.reason(), "CloudApiError");
        assert_eq!(err.to_string(), "create_pool failed: boom");

        let missing = LbError::Cloud {
            operation: "get_pool",
            source: CloudError::not_found("gone"),
        };
        assert!(missing.is_cloud_not_found());
        assert!(!missing.is_retryable());
    }

    /// Test event reasons and rendered messages
    #[test]
    fn test_reasons_and_messages() {
        let err = LbError::NotActive {
            lb_id: "lb-9".into(),
            status: ProvisioningStatus::PendingCreate,
        };
        assert_eq!(err.reason(), "LoadBalancerNotActive");
        assert_eq!(
            err.to_string(),
            "load balancer lb-9 is PENDING_CREATE, expected ACTIVE"
        );

        assert_eq!(
            LbError::not_found("listener", "TCP/80").to_string(),
            "listener TCP/80 not found"
        );
        assert_eq!(LbError::Ownership(String::new()).reason(), "OwnershipViolation");
    }
}
