use gw_core::{GwError, LatentGroup, Result};
use ndarray::{Array1, Axis};
use std::collections::BTreeMap;

/// Per-domain, per-sample fusion weights. For every sample the weights across
/// domains sum to one.
pub type SelectionScores = BTreeMap<String, Array1<f32>>;

/// Scores which domains to favour when fusing a latent group into a single
/// workspace vector.
pub trait Selection: Send + Sync {
    /// Produces fusion weights for the given unimodal latents and their
    /// workspace-space encodings. Both maps carry the same keys.
    fn score(&self, latents: &LatentGroup, encoded: &LatentGroup) -> Result<SelectionScores>;
}

fn group_batch(encoded: &LatentGroup) -> Result<usize> {
    encoded
        .values()
        .next()
        .map(|tensor| tensor.nrows())
        .ok_or(GwError::EmptyBatch)
}

/// Weights every present domain equally.
#[derive(Clone, Copy, Debug, Default)]
pub struct UniformSelection;

impl Selection for UniformSelection {
    fn score(&self, _latents: &LatentGroup, encoded: &LatentGroup) -> Result<SelectionScores> {
        let batch = group_batch(encoded)?;
        let weight = 1.0 / encoded.len() as f32;
        Ok(encoded
            .keys()
            .map(|name| (name.clone(), Array1::from_elem(batch, weight)))
            .collect())
    }
}

/// Softmax over per-domain activation energy, sharpened by a temperature.
///
/// Each domain's raw score for a sample is the L2 norm of its encoded row;
/// the softmax across domains then decides how much each domain contributes
/// to the fused workspace vector.
#[derive(Clone, Copy, Debug)]
pub struct SoftmaxSelection {
    temperature: f32,
}

impl SoftmaxSelection {
    pub fn new(temperature: f32) -> Result<Self> {
        if !temperature.is_finite() || temperature <= 0.0 {
            return Err(GwError::Config {
                context: format!("selection temperature must be > 0, got {temperature}"),
            });
        }
        Ok(Self { temperature })
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }
}

impl Selection for SoftmaxSelection {
    fn score(&self, _latents: &LatentGroup, encoded: &LatentGroup) -> Result<SelectionScores> {
        let batch = group_batch(encoded)?;
        let names: Vec<&String> = encoded.keys().collect();
        // raw scores: (domain, sample) -> row norm / temperature
        let mut scores: Vec<Array1<f32>> = Vec::with_capacity(names.len());
        for name in &names {
            let tensor = &encoded[*name];
            if tensor.nrows() != batch {
                return Err(GwError::Shape {
                    context: format!(
                        "selection batch mismatch for {name}: {} vs {batch}",
                        tensor.nrows()
                    ),
                });
            }
            let norms = tensor
                .map_axis(Axis(1), |row| row.dot(&row).sqrt())
                .mapv(|v| v / self.temperature);
            scores.push(norms);
        }

        let mut weights: Vec<Array1<f32>> = vec![Array1::zeros(batch); names.len()];
        for sample in 0..batch {
            let max = scores
                .iter()
                .map(|s| s[sample])
                .fold(f32::NEG_INFINITY, f32::max);
            let mut total = 0.0f32;
            let exps: Vec<f32> = scores
                .iter()
                .map(|s| {
                    let e = (s[sample] - max).exp();
                    total += e;
                    e
                })
                .collect();
            for (domain, e) in exps.into_iter().enumerate() {
                weights[domain][sample] = e / total;
            }
        }

        Ok(names
            .into_iter()
            .cloned()
            .zip(weights)
            .collect())
    }
}
