use serde::Deserialize;
use std::collections::BTreeMap;

/// Scalar loss value plus auxiliary metrics produced by every loss-computing
/// operation.
#[derive(Clone, Debug, PartialEq)]
pub struct LossOutput {
    pub loss: f32,
    pub metrics: BTreeMap<String, f32>,
}

impl LossOutput {
    pub fn new(loss: f32) -> Self {
        Self {
            loss,
            metrics: BTreeMap::new(),
        }
    }

    pub fn with_metrics(loss: f32, metrics: BTreeMap<String, f32>) -> Self {
        Self { loss, metrics }
    }
}

/// Loss coefficients for the 2-domain (deterministic/variational) engines.
///
/// A field left as `None` means "not configured": the metric is not logged as
/// a contribution and does not take part in the total. A field explicitly set
/// to `Some(0.0)` is present in the table but excluded from the combination.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct LossCoefs {
    /// Demi-cycle loss coefficient.
    pub demi_cycles: Option<f32>,
    /// Cycle loss coefficient.
    pub cycles: Option<f32>,
    /// Translation loss coefficient.
    pub translations: Option<f32>,
    /// Contrastive loss coefficient.
    pub contrastives: Option<f32>,
    /// KL-divergence coefficient (variational engine only).
    pub kl: Option<f32>,
}

impl LossCoefs {
    pub fn to_map(&self) -> BTreeMap<String, f32> {
        let mut map = BTreeMap::new();
        insert_coef(&mut map, "demi_cycles", self.demi_cycles);
        insert_coef(&mut map, "cycles", self.cycles);
        insert_coef(&mut map, "translations", self.translations);
        insert_coef(&mut map, "contrastives", self.contrastives);
        insert_coef(&mut map, "kl", self.kl);
        map
    }
}

/// Loss coefficients for the fusion (broadcast) engine.
///
/// Same absent-versus-zero semantics as [`LossCoefs`].
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastLossCoefs {
    /// Contrastive loss coefficient.
    pub contrastives: Option<f32>,
    /// Fused loss coefficient (encode multiple domains, decode to one of them).
    pub fused: Option<f32>,
    /// Demi-cycle coefficient. Demi-cycles are always one-to-one.
    pub demi_cycles: Option<f32>,
    /// Cycle coefficient. Cycles can be many-to-one.
    pub cycles: Option<f32>,
    /// Translation coefficient. Translations, like cycles, can be many-to-one.
    pub translations: Option<f32>,
}

impl BroadcastLossCoefs {
    pub fn to_map(&self) -> BTreeMap<String, f32> {
        let mut map = BTreeMap::new();
        insert_coef(&mut map, "contrastives", self.contrastives);
        insert_coef(&mut map, "fused", self.fused);
        insert_coef(&mut map, "demi_cycles", self.demi_cycles);
        insert_coef(&mut map, "cycles", self.cycles);
        insert_coef(&mut map, "translations", self.translations);
        map
    }
}

fn insert_coef(map: &mut BTreeMap<String, f32>, name: &str, coef: Option<f32>) {
    if let Some(value) = coef {
        map.insert(name.to_string(), value);
    }
}

/// Combines the metrics selected by `coefs` into one scalar.
///
/// The result is the mean over `metric * coef` for every name present in both
/// maps with a coefficient strictly greater than zero. A coefficient of
/// exactly zero keeps the metric logged but excludes it here; coefficient keys
/// with no matching metric are ignored silently. Returns `0.0` when nothing is
/// selected.
pub fn combine_loss(metrics: &BTreeMap<String, f32>, coefs: &BTreeMap<String, f32>) -> f32 {
    let mut total = 0.0f32;
    let mut count = 0usize;
    for (name, &coef) in coefs {
        if coef <= 0.0 {
            continue;
        }
        if let Some(&value) = metrics.get(name) {
            total += value * coef;
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        total / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn map(entries: &[(&str, f32)]) -> BTreeMap<String, f32> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), *v))
            .collect()
    }

    #[test]
    fn zero_coefficient_is_excluded_even_when_present() {
        let metrics = map(&[("x", 2.0), ("y", 4.0)]);
        let coefs = map(&[("x", 1.0), ("y", 0.0)]);
        assert_abs_diff_eq!(combine_loss(&metrics, &coefs), 2.0);
    }

    #[test]
    fn absent_metric_key_is_ignored() {
        let metrics = map(&[("x", 2.0)]);
        let coefs = map(&[("x", 1.0), ("ghost", 3.0)]);
        assert_abs_diff_eq!(combine_loss(&metrics, &coefs), 2.0);
    }

    #[test]
    fn weighted_mean_over_selected_terms() {
        let metrics = map(&[("a", 1.0), ("b", 3.0)]);
        let coefs = map(&[("a", 2.0), ("b", 1.0)]);
        // (1*2 + 3*1) / 2
        assert_abs_diff_eq!(combine_loss(&metrics, &coefs), 2.5);
    }

    #[test]
    fn empty_selection_yields_zero() {
        let metrics = map(&[("a", 1.0)]);
        let coefs = map(&[("a", 0.0)]);
        assert_abs_diff_eq!(combine_loss(&metrics, &coefs), 0.0);
    }

    #[test]
    fn coefs_struct_distinguishes_absent_from_zero() {
        let coefs = LossCoefs {
            demi_cycles: Some(1.0),
            cycles: Some(0.0),
            ..LossCoefs::default()
        };
        let table = coefs.to_map();
        assert_eq!(table.get("demi_cycles"), Some(&1.0));
        assert_eq!(table.get("cycles"), Some(&0.0));
        assert_eq!(table.get("translations"), None);
    }

    #[test]
    fn coefs_deserialize_from_json() {
        let coefs: BroadcastLossCoefs =
            serde_json::from_str(r#"{"fused": 1.0, "contrastives": 0.1}"#).unwrap();
        assert_eq!(coefs.fused, Some(1.0));
        assert_eq!(coefs.contrastives, Some(0.1));
        assert_eq!(coefs.cycles, None);
    }
}
