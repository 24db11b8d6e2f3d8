use gw_core::{GwError, LossOutput, RawSample, Result, Tensor};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Per-modality encoder/decoder plus loss hooks, consumed by the loss engines.
///
/// The four `compute_*` hooks default to [`DomainAdapter::compute_loss`], so a
/// modality that scores every consistency check the same way only implements
/// that one method. Returning `Ok(None)` from a hook means "skip this metric"
/// (for example: no applicable ground truth); it is never an error.
pub trait DomainAdapter: Send + Sync {
    /// Dimensionality of this domain's unimodal latent space.
    fn latent_dim(&self) -> usize;

    /// Encodes a raw payload into the domain's latent space.
    fn encode(&self, raw: &RawSample) -> Result<Tensor>;

    /// Decodes a latent back into the original space.
    fn decode(&self, latent: &Tensor) -> Result<RawSample>;

    /// Generic reconstruction loss between a prediction and its target.
    fn compute_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        raw_target: &RawSample,
    ) -> Result<Option<LossOutput>>;

    /// Scores a demi-cycle (domain -> workspace -> same domain) round trip.
    fn compute_dcy_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        raw_target: &RawSample,
    ) -> Result<Option<LossOutput>> {
        self.compute_loss(pred, target, raw_target)
    }

    /// Scores a cycle (domain -> other domain -> back) round trip.
    fn compute_cy_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        raw_target: &RawSample,
    ) -> Result<Option<LossOutput>> {
        self.compute_loss(pred, target, raw_target)
    }

    /// Scores a translation from fused other domains into this domain.
    fn compute_tr_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        raw_target: &RawSample,
    ) -> Result<Option<LossOutput>> {
        self.compute_loss(pred, target, raw_target)
    }

    /// Scores a multi-domain fused reconstruction of this domain.
    fn compute_fused_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        raw_target: &RawSample,
    ) -> Result<Option<LossOutput>> {
        self.compute_loss(pred, target, raw_target)
    }
}

/// Domain adapters keyed by domain name.
pub type DomainAdapters = BTreeMap<String, Arc<dyn DomainAdapter>>;

/// Reference adapter: tensor payloads passed through unchanged and scored with
/// mean squared error. Useful as a test double and for pre-encoded datasets.
#[derive(Clone, Debug)]
pub struct MseDomain {
    latent_dim: usize,
}

impl MseDomain {
    pub fn new(latent_dim: usize) -> Self {
        Self { latent_dim }
    }
}

impl DomainAdapter for MseDomain {
    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn encode(&self, raw: &RawSample) -> Result<Tensor> {
        let tensor = raw.as_tensor().ok_or_else(|| GwError::Shape {
            context: "MseDomain expects tensor payloads".to_string(),
        })?;
        if tensor.ncols() != self.latent_dim {
            return Err(GwError::Shape {
                context: format!(
                    "MseDomain expects {} features, got {}",
                    self.latent_dim,
                    tensor.ncols()
                ),
            });
        }
        Ok(tensor.clone())
    }

    fn decode(&self, latent: &Tensor) -> Result<RawSample> {
        Ok(RawSample::Tensor(latent.clone()))
    }

    fn compute_loss(
        &self,
        pred: &Tensor,
        target: &Tensor,
        _raw_target: &RawSample,
    ) -> Result<Option<LossOutput>> {
        if pred.dim() != target.dim() {
            return Err(GwError::Shape {
                context: format!(
                    "loss prediction {:?} does not match target {:?}",
                    pred.dim(),
                    target.dim()
                ),
            });
        }
        let diff = pred - target;
        let mse = diff.mapv(|v| v * v).mean().unwrap_or(0.0);
        let mut metrics = BTreeMap::new();
        metrics.insert("mse".to_string(), mse);
        Ok(Some(LossOutput::with_metrics(mse, metrics)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn mse_domain_round_trips_tensors() {
        let domain = MseDomain::new(3);
        let raw = RawSample::Tensor(array![[1.0f32, 2.0, 3.0]]);
        let latent = domain.encode(&raw).unwrap();
        assert_eq!(domain.decode(&latent).unwrap(), raw);
    }

    #[test]
    fn mse_domain_scores_squared_error() {
        let domain = MseDomain::new(2);
        let pred = array![[1.0f32, 1.0]];
        let target = array![[0.0f32, 0.0]];
        let raw = RawSample::Tensor(target.clone());
        let out = domain.compute_loss(&pred, &target, &raw).unwrap().unwrap();
        assert_abs_diff_eq!(out.loss, 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(out.metrics["mse"], 1.0, epsilon = 1e-6);
    }

    #[test]
    fn mse_domain_rejects_feature_mismatch() {
        let domain = MseDomain::new(4);
        let raw = RawSample::Tensor(Tensor::zeros((2, 3)));
        assert!(domain.encode(&raw).is_err());
    }
}
