use super::families::{ContrastiveMetrics, KlMetrics};
use super::two_domains::{contrastive_loss, cycle_loss, demi_cycle_loss, translation_loss};
use super::{check_group_batches, LossEngine};
use crate::contrastive::{ContrastiveFn, VarContrastiveFn};
use crate::domain::DomainAdapters;
use crate::gw_module::{GwModule, VariationalGwModule};
use crate::selection::Selection;
use gw_core::{
    combine_loss, GwError, LatentGroups, LossCoefs, LossOutput, Mode, RawGroups, Result, Tensor,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// `KL(N(mean, exp(logvar)) || N(0, 1))`, summed over every element.
pub fn kl_divergence(mean: &Tensor, logvar: &Tensor) -> Result<f32> {
    if mean.dim() != logvar.dim() {
        return Err(GwError::Shape {
            context: format!(
                "kl divergence mean {:?} does not match logvar {:?}",
                mean.dim(),
                logvar.dim()
            ),
        });
    }
    let mut total = 0.0f32;
    for (&m, &lv) in mean.iter().zip(logvar.iter()) {
        total += lv.exp() + m * m - 1.0 - lv;
    }
    Ok(0.5 * total)
}

/// Per-domain KL regularizer over singleton groups, normalized by the sum of
/// batch size and workspace dimensionality.
pub fn kl_loss(gw: &VariationalGwModule, latents: &LatentGroups) -> Result<KlMetrics> {
    let mut out = KlMetrics::default();
    for (group, group_latents) in latents {
        let Some(domain) = group.sole_member() else {
            continue;
        };
        let distributions = gw.encoded_distribution(group_latents)?;
        let dist = distributions
            .get(domain)
            .ok_or_else(|| GwError::UnknownDomain {
                name: domain.to_string(),
            })?;
        let norm = (dist.mean.nrows() + gw.workspace_dim()) as f32;
        let value = kl_divergence(&dist.mean, &dist.logvar)? / norm;
        out.entries.push((domain.to_string(), value));
    }
    Ok(out)
}

fn uncertainty_contrastive_loss(
    gw: &VariationalGwModule,
    latents: &LatentGroups,
    contrastive_fn: &VarContrastiveFn,
) -> Result<ContrastiveMetrics> {
    let mut out = ContrastiveMetrics::default();
    let mut seen: BTreeSet<(String, String)> = BTreeSet::new();
    for group_latents in latents.values() {
        if group_latents.len() < 2 {
            continue;
        }
        let distributions = gw.encoded_distribution(group_latents)?;
        for (a, da) in &distributions {
            for (b, db) in &distributions {
                if a >= b {
                    continue;
                }
                if !seen.insert((a.clone(), b.clone())) {
                    continue;
                }
                let output = contrastive_fn(&da.mean, &da.logvar, &db.mean, &db.logvar)?;
                out.entries.push(((a.clone(), b.clone()), output));
            }
        }
    }
    Ok(out)
}

enum Contrastive {
    Plain(ContrastiveFn),
    Uncertainty(VarContrastiveFn),
}

/// Variational loss engine: the 2-domain families plus the KL regularizer,
/// with either a plain or an uncertainty-aware contrastive objective.
pub struct VariationalGwLosses {
    gw: Arc<VariationalGwModule>,
    selection: Arc<dyn Selection>,
    adapters: DomainAdapters,
    coefs: BTreeMap<String, f32>,
    contrastive: Contrastive,
}

impl VariationalGwLosses {
    /// Exactly one of `contrastive_fn` and `var_contrastive_fn` must be
    /// supplied; anything else is a configuration error.
    pub fn new(
        gw: Arc<VariationalGwModule>,
        selection: Arc<dyn Selection>,
        adapters: DomainAdapters,
        coefs: &LossCoefs,
        contrastive_fn: Option<ContrastiveFn>,
        var_contrastive_fn: Option<VarContrastiveFn>,
    ) -> Result<Self> {
        let contrastive = match (contrastive_fn, var_contrastive_fn) {
            (Some(f), None) => Contrastive::Plain(f),
            (None, Some(f)) => Contrastive::Uncertainty(f),
            (Some(_), Some(_)) => {
                return Err(GwError::Config {
                    context: "both a plain and an uncertainty-aware contrastive function were supplied; pick one".to_string(),
                });
            }
            (None, None) => {
                return Err(GwError::Config {
                    context: "a contrastive function is required".to_string(),
                });
            }
        };
        Ok(Self {
            gw,
            selection,
            adapters,
            coefs: coefs.to_map(),
            contrastive,
        })
    }
}

impl LossEngine for VariationalGwLosses {
    fn step(&self, raw: &RawGroups, latents: &LatentGroups, _mode: Mode) -> Result<LossOutput> {
        check_group_batches(latents)?;
        let gw = self.gw.as_ref();
        let selection = self.selection.as_ref();
        let mut metrics = BTreeMap::new();
        demi_cycle_loss(gw, selection, &self.adapters, latents, raw)?
            .flatten_into(&mut metrics)?;
        cycle_loss(gw, selection, &self.adapters, latents, raw)?.flatten_into(&mut metrics)?;
        translation_loss(gw, selection, &self.adapters, latents, raw)?
            .flatten_into(&mut metrics)?;
        match &self.contrastive {
            Contrastive::Plain(f) => contrastive_loss(gw, latents, f)?,
            Contrastive::Uncertainty(f) => uncertainty_contrastive_loss(gw, latents, f)?,
        }
        .flatten_into(&mut metrics)?;
        kl_loss(gw, latents)?.flatten_into(&mut metrics)?;

        let loss = combine_loss(&metrics, &self.coefs);
        Ok(LossOutput::with_metrics(loss, metrics))
    }
}
