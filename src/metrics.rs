//! Provisioner metrics
//!
//! Counters are registered on an injected [`prometheus::Registry`] so tests
//! and embedders each get their own set.

use crate::domain::ports::ProvisioningState;
use crate::error::Result;
use prometheus::{IntCounterVec, Opts, Registry};

/// Counters for provision and delete outcomes
#[derive(Clone)]
pub struct ProvisionerMetrics {
    provisions: IntCounterVec,
    deletions: IntCounterVec,
}

impl ProvisionerMetrics {
    /// Create and register the counters
    pub fn new(registry: &Registry) -> Result<Self> {
        let provisions = IntCounterVec::new(
            Opts::new(
                "snapshot_provisioner_provision_total",
                "Provision calls by reported state and outcome",
            ),
            &["state", "outcome"],
        )?;
        let deletions = IntCounterVec::new(
            Opts::new(
                "snapshot_provisioner_delete_total",
                "Delete calls by result",
            ),
            &["result"],
        )?;

        registry.register(Box::new(provisions.clone()))?;
        registry.register(Box::new(deletions.clone()))?;

        Ok(Self {
            provisions,
            deletions,
        })
    }

    pub fn record_provision(&self, state: ProvisioningState, success: bool) {
        let outcome = if success { "success" } else { "error" };
        let state = state.to_string();
        self.provisions
            .with_label_values(&[state.as_str(), outcome])
            .inc();
    }

    /// `result` is one of `deleted`, `ignored` or `error`
    pub fn record_delete(&self, result: &str) {
        self.deletions.with_label_values(&[result]).inc();
    }

    pub fn provision_count(&self, state: ProvisioningState, success: bool) -> u64 {
        let outcome = if success { "success" } else { "error" };
        let state = state.to_string();
        self.provisions
            .with_label_values(&[state.as_str(), outcome])
            .get()
    }

    pub fn delete_count(&self, result: &str) -> u64 {
        self.deletions.with_label_values(&[result]).get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_registered() {
        let registry = Registry::new();
        let metrics = ProvisionerMetrics::new(&registry).unwrap();

        metrics.record_provision(ProvisioningState::Finished, true);
        metrics.record_provision(ProvisioningState::NoChange, false);
        metrics.record_delete("ignored");

        assert_eq!(metrics.provision_count(ProvisioningState::Finished, true), 1);
        assert_eq!(metrics.provision_count(ProvisioningState::NoChange, false), 1);
        assert_eq!(metrics.delete_count("ignored"), 1);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"snapshot_provisioner_provision_total".to_string()));
        assert!(names.contains(&"snapshot_provisioner_delete_total".to_string()));
    }

    #[test]
    fn test_double_registration_fails() {
        let registry = Registry::new();
        ProvisionerMetrics::new(&registry).unwrap();
        assert!(ProvisionerMetrics::new(&registry).is_err());
    }
}
