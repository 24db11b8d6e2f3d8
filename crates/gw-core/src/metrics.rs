//! Telemetry descriptors for workspace training metrics.
//!
//! A lightweight registry of well-known metric names so dashboards and
//! exporters can discover what the step orchestrator emits without parsing
//! metric strings.

use once_cell::sync::Lazy;
use std::sync::RwLock;

/// Units associated with a metric descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricUnit {
    /// Dimensionless scalar value (losses, ratios, etc.).
    Scalar,
    /// Raw count of occurrences, batches, or steps.
    Count,
}

/// Descriptor describing a metric emitted by the workspace orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricDescriptor {
    /// Canonical metric name registered with the telemetry layer.
    pub name: &'static str,
    /// Unit associated with the metric value.
    pub unit: MetricUnit,
    /// Human readable description for dashboards and registries.
    pub description: &'static str,
}

static REGISTRY: Lazy<RwLock<Vec<MetricDescriptor>>> = Lazy::new(|| RwLock::new(Vec::new()));

/// Registers a collection of metric descriptors, ignoring duplicates.
pub fn register_descriptors(descriptors: &[MetricDescriptor]) {
    let mut registry = REGISTRY
        .write()
        .expect("metric registry write lock should not be poisoned");
    for descriptor in descriptors {
        if registry
            .iter()
            .all(|existing| existing.name != descriptor.name)
        {
            registry.push(*descriptor);
        }
    }
}

/// Returns the list of descriptors that were registered so far.
pub fn descriptors() -> Vec<MetricDescriptor> {
    REGISTRY
        .read()
        .expect("metric registry read lock should not be poisoned")
        .clone()
}

/// Canonical descriptors for the loss-family summary metrics.
pub const STEP_DESCRIPTORS: &[MetricDescriptor] = &[
    MetricDescriptor {
        name: "loss",
        unit: MetricUnit::Scalar,
        description: "Combined weighted training loss for the step.",
    },
    MetricDescriptor {
        name: "demi_cycles",
        unit: MetricUnit::Scalar,
        description: "Mean domain-to-same-domain round-trip loss.",
    },
    MetricDescriptor {
        name: "cycles",
        unit: MetricUnit::Scalar,
        description: "Mean source-through-intermediate round-trip loss.",
    },
    MetricDescriptor {
        name: "translations",
        unit: MetricUnit::Scalar,
        description: "Mean fused-sources-to-target decoding loss.",
    },
    MetricDescriptor {
        name: "contrastives",
        unit: MetricUnit::Scalar,
        description: "Mean pairwise contrastive alignment loss.",
    },
    MetricDescriptor {
        name: "fused",
        unit: MetricUnit::Scalar,
        description: "Mean multi-domain fused reconstruction loss.",
    },
    MetricDescriptor {
        name: "kl",
        unit: MetricUnit::Scalar,
        description: "Mean per-domain KL divergence against the prior.",
    },
];

/// Convenience wrapper that registers the built-in step descriptors.
pub fn register_step_descriptors() {
    register_descriptors(STEP_DESCRIPTORS);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_descriptors_is_idempotent() {
        register_step_descriptors();
        register_step_descriptors();
        let names: Vec<&str> = descriptors()
            .into_iter()
            .filter(|d| d.name == "loss")
            .map(|d| d.name)
            .collect();
        assert_eq!(names.len(), 1);
    }
}
