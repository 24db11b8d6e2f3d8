//! Strongly-typed records for each loss family.
//!
//! The engines accumulate results into these records and only flatten them
//! into the flat string-keyed metrics map at the reporting boundary. Loss
//! names are unique per step; a collision during flattening is fatal.

use gw_core::{GwError, LossOutput, Result};
use std::collections::BTreeMap;

pub(crate) fn insert_unique(
    out: &mut BTreeMap<String, f32>,
    name: String,
    value: f32,
) -> Result<()> {
    if out.contains_key(&name) {
        return Err(GwError::DuplicateLossName { name });
    }
    out.insert(name, value);
    Ok(())
}

fn mean_of(values: &[f32]) -> Option<f32> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }
}

fn flatten_entry(
    out: &mut BTreeMap<String, f32>,
    name: &str,
    output: &LossOutput,
) -> Result<()> {
    insert_unique(out, name.to_string(), output.loss)?;
    for (key, &value) in &output.metrics {
        out.insert(format!("{name}_{key}"), value);
    }
    Ok(())
}

/// Per-domain demi-cycle results (`demi_cycle_{domain}`).
#[derive(Debug, Default)]
pub struct DemiCycleMetrics {
    pub entries: Vec<(String, LossOutput)>,
}

impl DemiCycleMetrics {
    pub fn mean(&self) -> Option<f32> {
        mean_of(&self.entries.iter().map(|(_, o)| o.loss).collect::<Vec<_>>())
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        for (domain, output) in &self.entries {
            flatten_entry(out, &format!("demi_cycle_{domain}"), output)?;
        }
        if let Some(mean) = self.mean() {
            insert_unique(out, "demi_cycles".to_string(), mean)?;
        }
        Ok(())
    }
}

/// Per ordered (source, intermediate) cycle results
/// (`cycle_{source}_through_{intermediate}`).
#[derive(Debug, Default)]
pub struct CycleMetrics {
    pub entries: Vec<((String, String), LossOutput)>,
}

impl CycleMetrics {
    pub fn mean(&self) -> Option<f32> {
        mean_of(&self.entries.iter().map(|(_, o)| o.loss).collect::<Vec<_>>())
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        for ((source, through), output) in &self.entries {
            flatten_entry(out, &format!("cycle_{source}_through_{through}"), output)?;
        }
        if let Some(mean) = self.mean() {
            insert_unique(out, "cycles".to_string(), mean)?;
        }
        Ok(())
    }
}

/// Per (source-set, target) translation results
/// (`translation_{s1/s2}_to_{target}`).
#[derive(Debug, Default)]
pub struct TranslationMetrics {
    pub entries: Vec<(String, LossOutput)>,
}

impl TranslationMetrics {
    pub fn mean(&self) -> Option<f32> {
        mean_of(&self.entries.iter().map(|(_, o)| o.loss).collect::<Vec<_>>())
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        for (label, output) in &self.entries {
            flatten_entry(out, &format!("translation_{label}"), output)?;
        }
        if let Some(mean) = self.mean() {
            insert_unique(out, "translations".to_string(), mean)?;
        }
        Ok(())
    }
}

/// Per unordered-pair contrastive results (`contrastive_{a}_and_{b}`).
#[derive(Debug, Default)]
pub struct ContrastiveMetrics {
    pub entries: Vec<((String, String), LossOutput)>,
}

impl ContrastiveMetrics {
    pub fn mean(&self) -> Option<f32> {
        mean_of(&self.entries.iter().map(|(_, o)| o.loss).collect::<Vec<_>>())
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        for ((a, b), output) in &self.entries {
            flatten_entry(out, &format!("contrastive_{a}_and_{b}"), output)?;
        }
        if let Some(mean) = self.mean() {
            insert_unique(out, "contrastives".to_string(), mean)?;
        }
        Ok(())
    }
}

/// Per-domain KL-divergence results (`kl_{domain}`).
#[derive(Debug, Default)]
pub struct KlMetrics {
    pub entries: Vec<(String, f32)>,
}

impl KlMetrics {
    pub fn mean(&self) -> Option<f32> {
        mean_of(&self.entries.iter().map(|(_, v)| *v).collect::<Vec<_>>())
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        for (domain, value) in &self.entries {
            insert_unique(out, format!("kl_{domain}"), *value)?;
        }
        if let Some(mean) = self.mean() {
            insert_unique(out, "kl".to_string(), mean)?;
        }
        Ok(())
    }
}

/// Aggregation policy for the broadcast cycle bucket.
///
/// `PositionBoost` reproduces an inherited behaviour whose comment claimed a
/// domain-identity intent ("non-attribute cycles weighted more") while the
/// code weighted by list position: the cycle loss at `index` is upweighted by
/// `gain`, the weights are renormalised to sum to the bucket length, and the
/// bucket value is the weighted *sum* rather than the mean. The two do not
/// agree; treat `PositionBoost` as a compatibility switch, not a semantic one.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CycleWeighting {
    /// Unweighted mean over cycle losses.
    Uniform,
    /// Position-dependent upweighting matching the inherited behaviour.
    PositionBoost { index: usize, gain: f32 },
}

impl Default for CycleWeighting {
    fn default() -> Self {
        CycleWeighting::Uniform
    }
}

impl CycleWeighting {
    /// Matches the inherited configuration (second cycle term weighted 3x).
    pub fn legacy() -> Self {
        CycleWeighting::PositionBoost {
            index: 1,
            gain: 3.0,
        }
    }

    fn aggregate(&self, losses: &[f32]) -> Option<f32> {
        if losses.is_empty() {
            return None;
        }
        match *self {
            CycleWeighting::Uniform => mean_of(losses),
            CycleWeighting::PositionBoost { index, gain } => {
                let mut weights = vec![1.0f32; losses.len()];
                if losses.len() > 1 && index < weights.len() {
                    weights[index] = gain;
                    let total: f32 = weights.iter().sum();
                    let scale = losses.len() as f32 / total;
                    for w in &mut weights {
                        *w *= scale;
                    }
                }
                Some(
                    losses
                        .iter()
                        .zip(&weights)
                        .map(|(loss, w)| loss * w)
                        .sum(),
                )
            }
        }
    }
}

/// Broadcast-loss results, bucketed by the role each decoded target played.
#[derive(Debug, Default)]
pub struct BroadcastMetrics {
    pub demi_cycles: Vec<(String, LossOutput)>,
    pub cycles: Vec<(String, LossOutput)>,
    pub translations: Vec<(String, LossOutput)>,
    pub fused: Vec<(String, LossOutput)>,
    pub cycle_weighting: CycleWeighting,
}

impl BroadcastMetrics {
    fn bucket_losses(bucket: &[(String, LossOutput)]) -> Vec<f32> {
        bucket.iter().map(|(_, o)| o.loss).collect()
    }

    pub fn flatten_into(&self, out: &mut BTreeMap<String, f32>) -> Result<()> {
        // Two groups can activate the same subset (a singleton group and the
        // same subset of a larger group share a label). The last entry wins in
        // the flat map; the bucket summaries below still count every entry.
        for (label, output) in self
            .demi_cycles
            .iter()
            .chain(&self.cycles)
            .chain(&self.translations)
            .chain(&self.fused)
        {
            out.insert(format!("{label}_loss"), output.loss);
            for (key, &value) in &output.metrics {
                out.insert(format!("{label}_{key}"), value);
            }
        }
        if let Some(mean) = mean_of(&Self::bucket_losses(&self.demi_cycles)) {
            insert_unique(out, "demi_cycles".to_string(), mean)?;
        }
        if let Some(value) = self
            .cycle_weighting
            .aggregate(&Self::bucket_losses(&self.cycles))
        {
            insert_unique(out, "cycles".to_string(), value)?;
        }
        if let Some(mean) = mean_of(&Self::bucket_losses(&self.translations)) {
            insert_unique(out, "translations".to_string(), mean)?;
        }
        if let Some(mean) = mean_of(&Self::bucket_losses(&self.fused)) {
            insert_unique(out, "fused".to_string(), mean)?;
        }
        Ok(())
    }
}
