//! Training-facing orchestrator around a workspace module, its domain
//! adapters, and a loss engine.
//!
//! The orchestrator owns no optimizer; it encodes raw batches, runs the loss
//! engine, and records every metric under a `{mode}/{name}` key so an outer
//! training loop can consume them.

use crate::domain::DomainAdapters;
use crate::gw_module::GwModule;
use crate::losses::LossEngine;
use crate::selection::Selection;
use gw_core::{
    DomainGroup, GwError, LatentGroup, LatentGroups, Mode, RawGroup, RawGroups, RawSample, Result,
    Tensor,
};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Sink for per-step metrics.
pub trait MetricRecorder: Send + Sync {
    fn record(&self, name: &str, value: f32, batch_size: usize);
}

/// Default recorder: one structured log event per metric.
pub struct TracingRecorder;

impl MetricRecorder for TracingRecorder {
    fn record(&self, name: &str, value: f32, batch_size: usize) {
        tracing::debug!(metric = name, value, batch_size, "step metric");
    }
}

/// Optimizer settings surfaced to the outer training loop.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptimConfig {
    pub lr: f32,
    pub weight_decay: f32,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            lr: 1e-3,
            weight_decay: 0.0,
        }
    }
}

/// One-cycle scheduler settings surfaced to the outer training loop.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerArgs {
    pub max_lr: f32,
    pub total_steps: usize,
}

impl Default for SchedulerArgs {
    fn default() -> Self {
        Self {
            max_lr: 1e-3,
            total_steps: 1,
        }
    }
}

/// Batched predictions over every workspace primitive.
#[derive(Debug, Default)]
pub struct GwPredictions {
    /// Per-domain autoencoding through the workspace.
    pub demi_cycles: BTreeMap<String, Tensor>,
    /// `(source, through)` round trips back to the source latent space.
    pub cycles: BTreeMap<(String, String), Tensor>,
    /// `(source, target)` one-way translations.
    pub translations: BTreeMap<(String, String), Tensor>,
    /// Per-domain fused workspace states.
    pub states: BTreeMap<String, Tensor>,
}

fn batch_size(latents: &LatentGroups) -> Result<usize> {
    for group_latents in latents.values() {
        if let Some(tensor) = group_latents.values().next() {
            return Ok(tensor.nrows());
        }
    }
    Err(GwError::EmptyBatch)
}

/// The full matched group plus one singleton group per member.
fn expand_group(data: &RawGroup) -> Result<RawGroups> {
    let mut batch = RawGroups::new();
    let full = DomainGroup::new(data.keys().cloned())?;
    batch.insert(full, data.clone());
    for (domain, sample) in data {
        let mut one = RawGroup::new();
        one.insert(domain.clone(), sample.clone());
        batch.insert(DomainGroup::singleton(domain.clone()), one);
    }
    Ok(batch)
}

pub struct GlobalWorkspace {
    gw: Arc<dyn GwModule>,
    adapters: DomainAdapters,
    selection: Arc<dyn Selection>,
    loss_engine: Box<dyn LossEngine>,
    optim: OptimConfig,
    scheduler: SchedulerArgs,
    recorder: Box<dyn MetricRecorder>,
}

impl GlobalWorkspace {
    pub fn new(
        gw: Arc<dyn GwModule>,
        adapters: DomainAdapters,
        selection: Arc<dyn Selection>,
        loss_engine: Box<dyn LossEngine>,
    ) -> Self {
        gw_core::metrics::register_step_descriptors();
        let optim = OptimConfig::default();
        let scheduler = SchedulerArgs {
            max_lr: optim.lr,
            total_steps: 1,
        };
        Self {
            gw,
            adapters,
            selection,
            loss_engine,
            optim,
            scheduler,
            recorder: Box::new(TracingRecorder),
        }
    }

    /// Also resets the scheduler peak rate to the new learning rate.
    pub fn with_optim(mut self, optim: OptimConfig) -> Self {
        self.scheduler.max_lr = optim.lr;
        self.optim = optim;
        self
    }

    pub fn with_scheduler(mut self, scheduler: SchedulerArgs) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_recorder(mut self, recorder: Box<dyn MetricRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn module(&self) -> &dyn GwModule {
        self.gw.as_ref()
    }

    pub fn optim(&self) -> OptimConfig {
        self.optim
    }

    pub fn scheduler_args(&self) -> SchedulerArgs {
        self.scheduler
    }

    fn adapter(&self, name: &str) -> Result<&Arc<dyn crate::domain::DomainAdapter>> {
        self.adapters.get(name).ok_or_else(|| GwError::UnknownDomain {
            name: name.to_string(),
        })
    }

    pub fn encode_domain(&self, name: &str, raw: &RawSample) -> Result<Tensor> {
        self.adapter(name)?.encode(raw)
    }

    pub fn decode_domain(&self, name: &str, latent: &Tensor) -> Result<RawSample> {
        self.adapter(name)?.decode(latent)
    }

    pub fn encode_domains(&self, batch: &RawGroups) -> Result<LatentGroups> {
        let mut out = LatentGroups::new();
        for (group, data) in batch {
            let mut group_latents = LatentGroup::new();
            for (name, sample) in data {
                group_latents.insert(name.clone(), self.encode_domain(name, sample)?);
            }
            out.insert(group.clone(), group_latents);
        }
        Ok(out)
    }

    pub fn decode_domains(&self, latents: &LatentGroups) -> Result<RawGroups> {
        let mut out = RawGroups::new();
        for (group, group_latents) in latents {
            let mut data = RawGroup::new();
            for (name, latent) in group_latents {
                data.insert(name.clone(), self.decode_domain(name, latent)?);
            }
            out.insert(group.clone(), data);
        }
        Ok(out)
    }

    /// Encodes, runs the loss engine, and records every metric under
    /// `{mode}/{name}` plus the combined `{mode}/loss` scalar.
    pub fn generic_step(&self, batch: &RawGroups, mode: Mode) -> Result<f32> {
        self.gw.set_training(mode == Mode::Train);
        let latents = self.encode_domains(batch)?;
        let batch_size = batch_size(&latents)?;
        let output = self.loss_engine.step(batch, &latents, mode)?;
        let prefix = mode.as_str();
        for (name, value) in &output.metrics {
            self.recorder.record(&format!("{prefix}/{name}"), *value, batch_size);
        }
        self.recorder.record(&format!("{prefix}/loss"), output.loss, batch_size);
        Ok(output.loss)
    }

    pub fn training_step(&self, batch: &RawGroups) -> Result<f32> {
        self.generic_step(batch, Mode::Train)
    }

    /// Builds the full matched group plus every singleton projection, then
    /// steps under `val` (`val/ood` for any non-zero dataloader index).
    pub fn validation_step(&self, data: &RawGroup, dataloader_idx: usize) -> Result<f32> {
        let mode = if dataloader_idx == 0 {
            Mode::Val
        } else {
            Mode::ValOod
        };
        self.generic_step(&expand_group(data)?, mode)
    }

    pub fn test_step(&self, data: &RawGroup, dataloader_idx: usize) -> Result<f32> {
        let mode = if dataloader_idx == 0 {
            Mode::Test
        } else {
            Mode::TestOod
        };
        self.generic_step(&expand_group(data)?, mode)
    }

    /// Per-singleton-group fused workspace states.
    pub fn batch_gw_states(&self, latents: &LatentGroups) -> Result<BTreeMap<String, Tensor>> {
        let mut out = BTreeMap::new();
        for (group, group_latents) in latents {
            let Some(domain) = group.sole_member() else {
                continue;
            };
            let z = self.gw.encode_and_fuse(group_latents, self.selection.as_ref())?;
            out.insert(domain.to_string(), z);
        }
        Ok(out)
    }

    /// Per-singleton-group autoencoding through the workspace.
    pub fn batch_demi_cycles(&self, latents: &LatentGroups) -> Result<BTreeMap<String, Tensor>> {
        let mut out = BTreeMap::new();
        for (group, group_latents) in latents {
            let Some(domain) = group.sole_member() else {
                continue;
            };
            let z = self
                .gw
                .translate(group_latents, domain, self.selection.as_ref())?;
            out.insert(domain.to_string(), z);
        }
        Ok(out)
    }

    /// Round trips from every singleton group through every other domain.
    pub fn batch_cycles(
        &self,
        latents: &LatentGroups,
    ) -> Result<BTreeMap<(String, String), Tensor>> {
        let mut out = BTreeMap::new();
        for (group, group_latents) in latents {
            let Some(source) = group.sole_member() else {
                continue;
            };
            for through in self.adapters.keys() {
                if through.as_str() == source {
                    continue;
                }
                let mut cycled =
                    self.gw
                        .cycle(group_latents, through, self.selection.as_ref())?;
                let tensor = cycled.remove(source).ok_or_else(|| GwError::UnknownDomain {
                    name: source.to_string(),
                })?;
                out.insert((source.to_string(), through.clone()), tensor);
            }
        }
        Ok(out)
    }

    /// One-way translations between every ordered pair within multi-domain
    /// groups, each source encoded alone.
    pub fn batch_translations(
        &self,
        latents: &LatentGroups,
    ) -> Result<BTreeMap<(String, String), Tensor>> {
        let mut out = BTreeMap::new();
        for (group, group_latents) in latents {
            if group.len() < 2 {
                continue;
            }
            for source in group.iter() {
                for target in group.iter() {
                    if source == target {
                        continue;
                    }
                    let mut alone = LatentGroup::new();
                    alone.insert(source.to_string(), group_latents[source].clone());
                    let prediction =
                        self.gw.translate(&alone, target, self.selection.as_ref())?;
                    out.insert((source.to_string(), target.to_string()), prediction);
                }
            }
        }
        Ok(out)
    }

    /// Expands the matched group, encodes it, and runs every prediction
    /// primitive.
    pub fn predict_step(&self, data: &RawGroup) -> Result<GwPredictions> {
        self.gw.set_training(false);
        let batch = expand_group(data)?;
        let latents = self.encode_domains(&batch)?;
        Ok(GwPredictions {
            demi_cycles: self.batch_demi_cycles(&latents)?,
            cycles: self.batch_cycles(&latents)?,
            translations: self.batch_translations(&latents)?,
            states: self.batch_gw_states(&latents)?,
        })
    }
}
