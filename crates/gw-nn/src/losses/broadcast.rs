use super::families::{BroadcastMetrics, CycleWeighting};
use super::two_domains::contrastive_loss;
use super::{check_group_batches, raw_for, LossEngine};
use crate::contrastive::ContrastiveFn;
use crate::domain::DomainAdapters;
use crate::gw_module::GwModule;
use crate::selection::Selection;
use gw_core::{
    combine_loss, BroadcastLossCoefs, GwError, LatentGroup, LatentGroups, LossOutput, Mode,
    RawGroups, Result,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Enumerates every non-empty activation pattern over `n` slots, first slot
/// most significant, so `n = 2` yields `[01, 10, 11]`.
pub fn generate_partitions(n: usize) -> impl Iterator<Item = Vec<bool>> {
    (1u64..(1u64 << n)).map(move |mask| (0..n).map(|j| mask >> (n - 1 - j) & 1 == 1).collect())
}

fn set_label<'a>(names: impl Iterator<Item = &'a String>) -> String {
    let joined = names.map(String::as_str).collect::<Vec<_>>().join(",");
    format!("{{{joined}}}")
}

fn adapter_for<'a>(
    adapters: &'a DomainAdapters,
    domain: &str,
) -> Result<&'a Arc<dyn crate::domain::DomainAdapter>> {
    adapters.get(domain).ok_or_else(|| GwError::UnknownDomain {
        name: domain.to_string(),
    })
}

/// Broadcast loss over every activation pattern of every group.
///
/// For each pattern the active domains are fused into one workspace state and
/// decoded everywhere. Each decoded target with ground truth is scored by the
/// role it played: the sole active domain decoded to itself is a demi-cycle,
/// an inactive target is a translation, and an active domain decoded alongside
/// others is a fused reconstruction. When the pattern leaves some decoded
/// domains inactive, those are re-encoded, re-fused, and decoded back onto the
/// active set as a cycle.
pub fn broadcast_loss(
    gw: &dyn GwModule,
    selection: &dyn Selection,
    adapters: &DomainAdapters,
    latents: &LatentGroups,
    raw: &RawGroups,
) -> Result<BroadcastMetrics> {
    let mut out = BroadcastMetrics::default();
    for (group, group_latents) in latents {
        let encoded = gw.encode(group_latents)?;
        let domain_names: Vec<String> = group_latents.keys().cloned().collect();
        let group_label = group.label();

        for partition in generate_partitions(domain_names.len()) {
            let selected: LatentGroup = domain_names
                .iter()
                .zip(&partition)
                .filter(|(_, &active)| active)
                .map(|(name, _)| (name.clone(), group_latents[name].clone()))
                .collect();
            let selected_encoded: LatentGroup = selected
                .keys()
                .map(|name| (name.clone(), encoded[name].clone()))
                .collect();
            let selected_label = set_label(selected.keys());

            let scores = selection.score(&selected, &selected_encoded)?;
            let state = gw.fuse(&selected_encoded, &scores)?;
            let decoded = gw.decode(&state, None)?;

            let num_active = selected.len();
            let num_total = decoded.len();

            for (domain, pred) in &decoded {
                if !group.contains(domain) {
                    continue;
                }
                let ground_truth = &group_latents[domain];
                let adapter = adapter_for(adapters, domain)?;
                let raw_target = raw_for(raw, group, domain)?;
                let is_active = selected.contains_key(domain);

                let loss_output = if num_active == 1 && is_active {
                    adapter.compute_dcy_loss(pred, ground_truth, raw_target)?
                } else if !is_active {
                    adapter.compute_tr_loss(pred, ground_truth, raw_target)?
                } else {
                    adapter.compute_fused_loss(pred, ground_truth, raw_target)?
                };
                let Some(output) = loss_output else {
                    continue;
                };

                let label = format!("from_{selected_label}_to_{domain}");
                if num_active == 1 && is_active {
                    out.demi_cycles.push((label, output));
                } else if !is_active {
                    out.translations.push((label, output));
                } else {
                    out.fused.push((label, output));
                }
            }

            if num_active < num_total {
                let inverse: LatentGroup = decoded
                    .iter()
                    .filter(|(domain, _)| !selected.contains_key(domain.as_str()))
                    .map(|(domain, tensor)| (domain.clone(), tensor.clone()))
                    .collect();
                let inverse_label = set_label(inverse.keys());

                let re_encoded = gw.encode(&inverse)?;
                let re_scores = selection.score(&inverse, &re_encoded)?;
                let re_state = gw.fuse(&re_encoded, &re_scores)?;
                let re_targets: Vec<String> = selected.keys().cloned().collect();
                let re_decoded = gw.decode(&re_state, Some(&re_targets))?;

                for domain in selected.keys() {
                    let adapter = adapter_for(adapters, domain)?;
                    let loss_output = adapter.compute_cy_loss(
                        &re_decoded[domain],
                        &group_latents[domain],
                        raw_for(raw, group, domain)?,
                    )?;
                    let Some(output) = loss_output else {
                        continue;
                    };
                    let label = format!(
                        "from_{selected_label}_through_{inverse_label}_to_{domain}_case_{group_label}"
                    );
                    out.cycles.push((label, output));
                }
            }
        }
    }
    Ok(out)
}

/// Fusion-model loss engine: contrastive loss plus the broadcast loss, with a
/// `broadcast_loss` summary over the positively weighted non-contrastive
/// buckets.
pub struct GwLossesFusion {
    gw: Arc<dyn GwModule>,
    selection: Arc<dyn Selection>,
    adapters: DomainAdapters,
    coefs: BTreeMap<String, f32>,
    contrastive_fn: ContrastiveFn,
    cycle_weighting: CycleWeighting,
}

impl GwLossesFusion {
    pub fn new(
        gw: Arc<dyn GwModule>,
        selection: Arc<dyn Selection>,
        adapters: DomainAdapters,
        coefs: &BroadcastLossCoefs,
        contrastive_fn: ContrastiveFn,
    ) -> Self {
        Self {
            gw,
            selection,
            adapters,
            coefs: coefs.to_map(),
            contrastive_fn,
            cycle_weighting: CycleWeighting::default(),
        }
    }

    /// Overrides how the cycle bucket is aggregated.
    pub fn with_cycle_weighting(mut self, weighting: CycleWeighting) -> Self {
        self.cycle_weighting = weighting;
        self
    }
}

impl LossEngine for GwLossesFusion {
    fn step(&self, raw: &RawGroups, latents: &LatentGroups, _mode: Mode) -> Result<LossOutput> {
        check_group_batches(latents)?;
        let mut metrics = BTreeMap::new();
        contrastive_loss(self.gw.as_ref(), latents, &self.contrastive_fn)?
            .flatten_into(&mut metrics)?;

        let mut broadcast = broadcast_loss(
            self.gw.as_ref(),
            self.selection.as_ref(),
            &self.adapters,
            latents,
            raw,
        )?;
        broadcast.cycle_weighting = self.cycle_weighting;
        broadcast.flatten_into(&mut metrics)?;

        let loss = combine_loss(&metrics, &self.coefs);

        let contributing: Vec<f32> = self
            .coefs
            .iter()
            .filter(|(name, &coef)| coef > 0.0 && name.as_str() != "contrastives")
            .filter_map(|(name, _)| metrics.get(name).copied())
            .collect();
        if !contributing.is_empty() {
            let summary = contributing.iter().sum::<f32>() / contributing.len() as f32;
            metrics.insert("broadcast_loss".to_string(), summary);
        }

        Ok(LossOutput::with_metrics(loss, metrics))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrastive::info_nce_contrastive;
    use crate::domain::MseDomain;
    use crate::gw_module::DeterministicGwModule;
    use crate::selection::UniformSelection;
    use gw_core::{DomainGroup, RawGroup, RawSample, Tensor};
    use ndarray::Array2;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    const DIM: usize = 4;

    fn fixture(domains: &[&str]) -> (Arc<dyn GwModule>, DomainAdapters) {
        let dims: BTreeMap<String, usize> =
            domains.iter().map(|d| (d.to_string(), DIM)).collect();
        let gw = DeterministicGwModule::identity(&dims, DIM).unwrap();
        let adapters: DomainAdapters = domains
            .iter()
            .map(|d| {
                (
                    d.to_string(),
                    Arc::new(MseDomain::new(DIM)) as Arc<dyn crate::domain::DomainAdapter>,
                )
            })
            .collect();
        (Arc::new(gw), adapters)
    }

    fn two_domain_batch(rows: usize, seed: u64) -> (LatentGroups, RawGroups) {
        let mut rng = StdRng::seed_from_u64(seed);
        let group = DomainGroup::new(["a".to_string(), "b".to_string()]).unwrap();
        let mut group_latents = LatentGroup::new();
        let mut group_raw = RawGroup::new();
        for domain in ["a", "b"] {
            let tensor: Tensor =
                Array2::from_shape_fn((rows, DIM), |_| rng.gen_range(-1.0f32..1.0));
            group_raw.insert(domain.to_string(), RawSample::Tensor(tensor.clone()));
            group_latents.insert(domain.to_string(), tensor);
        }
        let mut latents = LatentGroups::new();
        latents.insert(group.clone(), group_latents);
        let mut raw = RawGroups::new();
        raw.insert(group, group_raw);
        (latents, raw)
    }

    #[test]
    fn partitions_skip_the_empty_pattern() {
        let patterns: Vec<Vec<bool>> = generate_partitions(2).collect();
        assert_eq!(
            patterns,
            vec![
                vec![false, true],
                vec![true, false],
                vec![true, true],
            ]
        );
        assert_eq!(generate_partitions(1).count(), 1);
        assert_eq!(generate_partitions(3).count(), 7);
    }

    #[test]
    fn buckets_cover_every_role() {
        let (gw, adapters) = fixture(&["a", "b"]);
        let (latents, raw) = two_domain_batch(3, 17);
        let metrics =
            broadcast_loss(gw.as_ref(), &UniformSelection, &adapters, &latents, &raw).unwrap();
        assert_eq!(metrics.demi_cycles.len(), 2);
        assert_eq!(metrics.cycles.len(), 2);
        assert_eq!(metrics.translations.len(), 2);
        assert_eq!(metrics.fused.len(), 2);
    }

    #[test]
    fn labels_follow_the_from_through_case_scheme() {
        let (gw, adapters) = fixture(&["a", "b"]);
        let (latents, raw) = two_domain_batch(2, 23);
        let metrics =
            broadcast_loss(gw.as_ref(), &UniformSelection, &adapters, &latents, &raw).unwrap();
        let cycle_labels: Vec<&str> =
            metrics.cycles.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(
            cycle_labels,
            vec![
                "from_{b}_through_{a}_to_b_case_{a,b}",
                "from_{a}_through_{b}_to_a_case_{a,b}",
            ]
        );
        let demi_labels: Vec<&str> =
            metrics.demi_cycles.iter().map(|(l, _)| l.as_str()).collect();
        assert_eq!(demi_labels, vec!["from_{b}_to_b", "from_{a}_to_a"]);
    }

    #[test]
    fn identity_module_reconstructs_exactly() {
        let (gw, adapters) = fixture(&["a", "b"]);
        let (latents, raw) = two_domain_batch(3, 5);
        let metrics =
            broadcast_loss(gw.as_ref(), &UniformSelection, &adapters, &latents, &raw).unwrap();
        for (_, output) in &metrics.demi_cycles {
            assert!(output.loss.abs() < 1e-5);
        }
        for (_, output) in &metrics.cycles {
            assert!(output.loss.is_finite());
        }
    }

    #[test]
    fn fusion_engine_emits_buckets_and_summary() {
        let (gw, adapters) = fixture(&["a", "b"]);
        let (latents, raw) = two_domain_batch(5, 41);
        let coefs = BroadcastLossCoefs {
            contrastives: Some(0.1),
            fused: Some(1.0),
            demi_cycles: Some(1.0),
            cycles: Some(1.0),
            translations: Some(1.0),
        };
        let engine = GwLossesFusion::new(
            gw,
            Arc::new(UniformSelection),
            adapters,
            &coefs,
            info_nce_contrastive(0.1),
        );
        let output = engine.step(&raw, &latents, Mode::Train).unwrap();
        assert!(output.loss.is_finite());
        for key in [
            "demi_cycles",
            "cycles",
            "translations",
            "fused",
            "contrastives",
            "broadcast_loss",
        ] {
            assert!(output.metrics.contains_key(key), "missing {key}");
        }
        assert!(output.metrics.contains_key("from_{a}_to_a_loss"));
        assert!(output.metrics.contains_key("from_{a,b}_to_a_loss"));
    }
}
