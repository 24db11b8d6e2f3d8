//! Loss-composition engines.
//!
//! Each loss family is a pure free function over (workspace module, selection,
//! domain adapters, latent groups, raw groups) returning a typed record; the
//! engines run the families relevant to their variant, flatten the records
//! into one metrics map, and combine the configured coefficients into the
//! scalar training signal.

mod broadcast;
mod families;
mod two_domains;
mod variational;

pub use broadcast::{broadcast_loss, generate_partitions, GwLossesFusion};
pub use families::{
    BroadcastMetrics, ContrastiveMetrics, CycleMetrics, CycleWeighting, DemiCycleMetrics,
    KlMetrics, TranslationMetrics,
};
pub use two_domains::{
    contrastive_loss, cycle_loss, demi_cycle_loss, translation_loss, GwLosses2Domains,
};
pub use variational::{kl_divergence, kl_loss, VariationalGwLosses};

use gw_core::{DomainGroup, GwError, LatentGroups, LossOutput, Mode, RawGroups, RawSample, Result};

/// One training/validation/test step worth of loss computation.
pub trait LossEngine: Send + Sync {
    fn step(&self, raw: &RawGroups, latents: &LatentGroups, mode: Mode) -> Result<LossOutput>;
}

/// Every latent tensor inside one domain group must share its leading (batch)
/// dimension.
pub(crate) fn check_group_batches(latents: &LatentGroups) -> Result<()> {
    for (group, group_latents) in latents {
        let mut batch: Option<usize> = None;
        for (domain, tensor) in group_latents {
            match batch {
                None => batch = Some(tensor.nrows()),
                Some(expected) if expected != tensor.nrows() => {
                    return Err(GwError::Shape {
                        context: format!(
                            "group {group} has inconsistent batch sizes: {domain} has {}, expected {expected}",
                            tensor.nrows()
                        ),
                    });
                }
                Some(_) => {}
            }
        }
    }
    Ok(())
}

/// Looks up the raw payload parallel to a latent tensor.
pub(crate) fn raw_for<'a>(
    raw: &'a RawGroups,
    group: &DomainGroup,
    domain: &str,
) -> Result<&'a RawSample> {
    raw.get(group)
        .and_then(|g| g.get(domain))
        .ok_or_else(|| GwError::Config {
            context: format!("no raw data for domain {domain} in group {group}"),
        })
}
