//! Load-balancer collaborator.
//!
//! Scripts hand the raw directive text to the balancer unchanged; the
//! console only consumes the `(success, message)` result.

use async_trait::async_trait;

/// Result of a load-balancer apply call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LbResult {
    pub success: bool,
    pub message: String,
}

impl LbResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Load-balancer control plane.
#[async_trait]
pub trait LoadBalancer: Send + Sync {
    /// Apply the configuration described by the directive text.
    async fn apply(&self, raw: &str) -> LbResult;

    /// Fetch instance information for the directive text.
    async fn info(&self, raw: &str) -> String;
}

/// Balancer used when no control plane is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredLoadBalancer;

#[async_trait]
impl LoadBalancer for UnconfiguredLoadBalancer {
    async fn apply(&self, raw: &str) -> LbResult {
        LbResult::failed(format!("no load balancer configured, cannot apply: {}", raw))
    }

    async fn info(&self, _raw: &str) -> String {
        "no load balancer configured".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_apply_fails() {
        let result = UnconfiguredLoadBalancer.apply("LB web-1 off").await;
        assert!(!result.success);
        assert!(result.message.contains("LB web-1 off"));
    }

    #[tokio::test]
    async fn test_unconfigured_info() {
        let info = UnconfiguredLoadBalancer.info("LB-INFO web-1").await;
        assert_eq!(info, "no load balancer configured");
    }
}
