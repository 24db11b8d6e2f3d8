use super::families::{
    ContrastiveMetrics, CycleMetrics, DemiCycleMetrics, TranslationMetrics,
};
use super::{check_group_batches, raw_for, LossEngine};
use crate::contrastive::ContrastiveFn;
use crate::domain::DomainAdapters;
use crate::gw_module::GwModule;
use crate::selection::Selection;
use gw_core::{
    combine_loss, GwError, LatentGroups, LossCoefs, LossOutput, Mode, RawGroups, Result,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

fn adapter_for<'a>(
    adapters: &'a DomainAdapters,
    domain: &str,
) -> Result<&'a Arc<dyn crate::domain::DomainAdapter>> {
    adapters.get(domain).ok_or_else(|| GwError::UnknownDomain {
        name: domain.to_string(),
    })
}

/// Demi-cycle loss: for every singleton group, round-trip the latent through
/// the workspace and back to the same domain, scored by that domain's
/// autoencoding hook. Domains whose hook returns `None` are skipped.
pub fn demi_cycle_loss(
    gw: &dyn GwModule,
    selection: &dyn Selection,
    adapters: &DomainAdapters,
    latents: &LatentGroups,
    raw: &RawGroups,
) -> Result<DemiCycleMetrics> {
    let mut out = DemiCycleMetrics::default();
    for (group, group_latents) in latents {
        let Some(domain) = group.sole_member() else {
            continue;
        };
        let adapter = adapter_for(adapters, domain)?;
        let z = gw.encode_and_fuse(group_latents, selection)?;
        let targets = [domain.to_string()];
        let decoded = gw.decode(&z, Some(&targets))?;
        let loss_output = adapter.compute_dcy_loss(
            &decoded[domain],
            &group_latents[domain],
            raw_for(raw, group, domain)?,
        )?;
        if let Some(output) = loss_output {
            out.entries.push((domain.to_string(), output));
        }
    }
    Ok(out)
}

/// Cycle loss: for every singleton source group and every *other* known
/// domain as intermediate, translate source -> intermediate -> back to
/// source and score the round trip.
pub fn cycle_loss(
    gw: &dyn GwModule,
    selection: &dyn Selection,
    adapters: &DomainAdapters,
    latents: &LatentGroups,
    raw: &RawGroups,
) -> Result<CycleMetrics> {
    let mut out = CycleMetrics::default();
    for (group, group_latents) in latents {
        let Some(source) = group.sole_member() else {
            continue;
        };
        let adapter = adapter_for(adapters, source)?;
        let z = gw.encode_and_fuse(group_latents, selection)?;
        for target in adapters.keys() {
            if target.as_str() == source {
                continue;
            }
            let intermediate_targets = [target.clone()];
            let intermediate = gw.decode(&z, Some(&intermediate_targets))?;
            let source_targets = [source.to_string()];
            let recons = gw.decode(
                &gw.encode_and_fuse(&intermediate, selection)?,
                Some(&source_targets),
            )?;
            let loss_output = adapter.compute_cy_loss(
                &recons[source],
                &group_latents[source],
                raw_for(raw, group, source)?,
            )?;
            if let Some(output) = loss_output {
                out.entries
                    .push(((source.to_string(), target.clone()), output));
            }
        }
    }
    Ok(out)
}

/// Translation loss: for every multi-domain group and every member acting as
/// target, fuse the remaining domains and decode into the target. Duplicate
/// (source-set, target) loss names are a fatal configuration error.
pub fn translation_loss(
    gw: &dyn GwModule,
    selection: &dyn Selection,
    adapters: &DomainAdapters,
    latents: &LatentGroups,
    raw: &RawGroups,
) -> Result<TranslationMetrics> {
    let mut out = TranslationMetrics::default();
    let mut seen: BTreeSet<String> = BTreeSet::new();
    for (group, group_latents) in latents {
        if group.len() < 2 {
            continue;
        }
        for target in group.iter() {
            let sources: gw_core::LatentGroup = group_latents
                .iter()
                .filter(|(domain, _)| domain.as_str() != target)
                .map(|(domain, tensor)| (domain.clone(), tensor.clone()))
                .collect();

            let source_names: Vec<&str> = sources.keys().map(String::as_str).collect();
            let label = format!("{}_to_{target}", source_names.join("/"));
            if !seen.insert(label.clone()) {
                return Err(GwError::DuplicateLossName {
                    name: format!("translation_{label}"),
                });
            }

            let z = gw.encode_and_fuse(&sources, selection)?;
            let decode_targets = [target.to_string()];
            let decoded = gw.decode(&z, Some(&decode_targets))?;
            let adapter = adapter_for(adapters, target)?;
            let loss_output = adapter.compute_tr_loss(
                &decoded[target],
                &group_latents[target],
                raw_for(raw, group, target)?,
            )?;
            if let Some(output) = loss_output {
                out.entries.push((label, output));
            }
        }
    }
    Ok(out)
}

/// Contrastive loss: for every group holding at least two domains, score
/// every unordered pair of independent workspace encodings. A pair is scored
/// at most once per invocation regardless of enumeration order.
pub fn contrastive_loss(
    gw: &dyn GwModule,
    latents: &LatentGroups,
    contrastive_fn: &ContrastiveFn,
) -> Result<ContrastiveMetrics> {
    let mut out = ContrastiveMetrics::default();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for group_latents in latents.values() {
        if group_latents.len() < 2 {
            continue;
        }
        let encoded = gw.encode(group_latents)?;
        for (a, z1) in &encoded {
            for (b, z2) in &encoded {
                if a >= b {
                    continue;
                }
                if !seen.insert((a.clone(), b.clone())) {
                    continue;
                }
                let output = contrastive_fn(z1, z2)?;
                out.entries.push(((a.clone(), b.clone()), output));
            }
        }
    }
    Ok(out)
}

/// Deterministic 2-domain loss engine: demi-cycle, cycle, translation, and
/// contrastive families combined under the configured coefficients.
pub struct GwLosses2Domains {
    gw: Arc<dyn GwModule>,
    selection: Arc<dyn Selection>,
    adapters: DomainAdapters,
    coefs: BTreeMap<String, f32>,
    contrastive_fn: ContrastiveFn,
}

impl GwLosses2Domains {
    pub fn new(
        gw: Arc<dyn GwModule>,
        selection: Arc<dyn Selection>,
        adapters: DomainAdapters,
        coefs: &LossCoefs,
        contrastive_fn: ContrastiveFn,
    ) -> Self {
        Self {
            gw,
            selection,
            adapters,
            coefs: coefs.to_map(),
            contrastive_fn,
        }
    }
}

impl LossEngine for GwLosses2Domains {
    fn step(&self, raw: &RawGroups, latents: &LatentGroups, _mode: Mode) -> Result<LossOutput> {
        check_group_batches(latents)?;
        let mut metrics = BTreeMap::new();
        demi_cycle_loss(
            self.gw.as_ref(),
            self.selection.as_ref(),
            &self.adapters,
            latents,
            raw,
        )?
        .flatten_into(&mut metrics)?;
        cycle_loss(
            self.gw.as_ref(),
            self.selection.as_ref(),
            &self.adapters,
            latents,
            raw,
        )?
        .flatten_into(&mut metrics)?;
        translation_loss(
            self.gw.as_ref(),
            self.selection.as_ref(),
            &self.adapters,
            latents,
            raw,
        )?
        .flatten_into(&mut metrics)?;
        contrastive_loss(self.gw.as_ref(), latents, &self.contrastive_fn)?
            .flatten_into(&mut metrics)?;

        let loss = combine_loss(&metrics, &self.coefs);
        Ok(LossOutput::with_metrics(loss, metrics))
    }
}
