use gw_core::{GwError, LossOutput, Result, Tensor};
use ndarray::Axis;
use std::collections::BTreeMap;

/// Contrastive scorer over two domains' independent workspace encodings.
pub type ContrastiveFn = Box<dyn Fn(&Tensor, &Tensor) -> Result<LossOutput> + Send + Sync>;

/// Uncertainty-aware contrastive scorer: `(mean1, logvar1, mean2, logvar2)`.
pub type VarContrastiveFn =
    Box<dyn Fn(&Tensor, &Tensor, &Tensor, &Tensor) -> Result<LossOutput> + Send + Sync>;

fn validate_pair(anchors: &Tensor, positives: &Tensor) -> Result<usize> {
    if anchors.nrows() == 0 {
        return Err(GwError::Shape {
            context: "contrastive batches must be non-empty".to_string(),
        });
    }
    if anchors.dim() != positives.dim() {
        return Err(GwError::Shape {
            context: format!(
                "contrastive batch mismatch (anchors={:?}, positives={:?})",
                anchors.dim(),
                positives.dim()
            ),
        });
    }
    Ok(anchors.nrows())
}

/// Compute the InfoNCE loss between matched rows of two encoded batches.
///
/// Matched rows are positives; every other pairing in the batch acts as a
/// negative. Logits are scaled by `1/temperature`, optionally after L2
/// normalisation of both sides.
pub fn info_nce(
    anchors: &Tensor,
    positives: &Tensor,
    temperature: f32,
    normalize: bool,
) -> Result<LossOutput> {
    if !temperature.is_finite() || temperature <= 0.0 {
        return Err(GwError::Config {
            context: format!("temperature must be > 0, got {temperature}"),
        });
    }
    let batch = validate_pair(anchors, positives)?;

    let norms = |t: &Tensor| {
        t.map_axis(Axis(1), |row| row.dot(&row).sqrt().max(f32::EPSILON))
    };
    let anchor_norms = norms(anchors);
    let positive_norms = norms(positives);

    let mut logits = anchors.dot(&positives.t());
    if normalize {
        for i in 0..batch {
            for j in 0..batch {
                logits[[i, j]] /= anchor_norms[i] * positive_norms[j];
            }
        }
    }
    logits.mapv_inplace(|v| v / temperature);

    let mut loss = 0.0f32;
    for i in 0..batch {
        let row = logits.row(i);
        let max_logit = row.iter().fold(f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let exp_sum: f32 = row
            .iter()
            .map(|&v| ((v - max_logit) as f64).exp() as f32)
            .sum();
        let log_prob = row[i] - max_logit - exp_sum.ln();
        loss += -log_prob;
    }
    loss /= batch as f32;

    Ok(LossOutput::new(loss))
}

/// InfoNCE over posterior means, with per-row losses reweighted by the
/// combined predictive precision of the two domains. Rows where either domain
/// is uncertain contribute less.
pub fn info_nce_with_uncertainty(
    mean1: &Tensor,
    logvar1: &Tensor,
    mean2: &Tensor,
    logvar2: &Tensor,
    temperature: f32,
    normalize: bool,
) -> Result<LossOutput> {
    let batch = validate_pair(mean1, mean2)?;
    if logvar1.dim() != mean1.dim() || logvar2.dim() != mean2.dim() {
        return Err(GwError::Shape {
            context: "log-variance shapes must match their means".to_string(),
        });
    }

    let base = info_nce(mean1, mean2, temperature, normalize)?;

    // mean predictive variance per sample, pooled over both domains
    let var1 = logvar1.mapv(|v| v.exp()).mean_axis(Axis(1)).ok_or(GwError::EmptyBatch)?;
    let var2 = logvar2.mapv(|v| v.exp()).mean_axis(Axis(1)).ok_or(GwError::EmptyBatch)?;
    let mut weight_sum = 0.0f32;
    let mut uncertainty_sum = 0.0f32;
    for i in 0..batch {
        let pooled = 0.5 * (var1[i] + var2[i]);
        weight_sum += 1.0 / (1.0 + pooled);
        uncertainty_sum += pooled;
    }
    let precision = weight_sum / batch as f32;

    let mut metrics = BTreeMap::new();
    metrics.insert("mean_uncertainty".to_string(), uncertainty_sum / batch as f32);
    Ok(LossOutput::with_metrics(base.loss * precision, metrics))
}

/// Builds a boxed InfoNCE scorer with the given temperature.
pub fn info_nce_contrastive(temperature: f32) -> ContrastiveFn {
    Box::new(move |z1, z2| info_nce(z1, z2, temperature, true))
}

/// Builds a boxed uncertainty-aware InfoNCE scorer with the given temperature.
pub fn uncertainty_contrastive(temperature: f32) -> VarContrastiveFn {
    Box::new(move |m1, lv1, m2, lv2| {
        info_nce_with_uncertainty(m1, lv1, m2, lv2, temperature, true)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn synthetic_batch(seed: u64, batch: usize, dim: usize) -> Tensor {
        let mut rng = StdRng::seed_from_u64(seed);
        Tensor::from_shape_fn((batch, dim), |_| rng.gen_range(-1.0f32..1.0))
    }

    #[test]
    fn aligned_batches_score_lower_than_shuffled() {
        let anchors = synthetic_batch(7, 8, 16);
        let aligned = info_nce(&anchors, &anchors, 0.1, true).unwrap();
        let shuffled = info_nce(&anchors, &synthetic_batch(99, 8, 16), 0.1, true).unwrap();
        assert!(aligned.loss < shuffled.loss);
    }

    #[test]
    fn info_nce_is_reproducible() {
        let anchors = synthetic_batch(42, 4, 8);
        let positives = synthetic_batch(1337, 4, 8);
        let first = info_nce(&anchors, &positives, 0.1, true).unwrap();
        let second = info_nce(&anchors, &positives, 0.1, true).unwrap();
        assert_abs_diff_eq!(first.loss, second.loss, epsilon = 1e-6);
    }

    #[test]
    fn rejects_invalid_temperature() {
        let batch = synthetic_batch(1, 2, 4);
        assert!(info_nce(&batch, &batch, 0.0, true).is_err());
        assert!(info_nce(&batch, &batch, -1.0, true).is_err());
    }

    #[test]
    fn rejects_mismatched_batches() {
        let a = synthetic_batch(1, 3, 4);
        let b = synthetic_batch(2, 2, 4);
        assert!(info_nce(&a, &b, 0.2, true).is_err());
    }

    #[test]
    fn uncertainty_downweights_noisy_pairs() {
        let means = synthetic_batch(5, 4, 6);
        let confident = Tensor::from_elem((4, 6), -4.0);
        let noisy = Tensor::from_elem((4, 6), 2.0);
        let low = info_nce_with_uncertainty(&means, &confident, &means, &confident, 0.2, true)
            .unwrap();
        let high =
            info_nce_with_uncertainty(&means, &noisy, &means, &noisy, 0.2, true).unwrap();
        assert!(high.loss < low.loss);
        assert!(high.metrics["mean_uncertainty"] > low.metrics["mean_uncertainty"]);
    }

    #[test]
    fn normalized_logits_are_cosine_similarities() {
        let anchors = array![[3.0f32, 0.0], [0.0, 5.0]];
        // identical directions: the diagonal should dominate
        let out = info_nce(&anchors, &anchors, 1.0, true).unwrap();
        assert!(out.loss < (2.0f32).ln());
    }
}
