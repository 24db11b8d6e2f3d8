//! Global-workspace model: domain adapters project each modality into a
//! shared latent space, a selection mechanism weighs them, and the loss
//! engines enumerate every consistency check (demi-cycle, cycle, translation,
//! contrastive, broadcast, KL) across matched domain groups.
//!
//! The crate follows the split of the training stack: [`layers`] holds the
//! parameterized projections, [`gw_module`] the workspace itself, [`losses`]
//! the composition engines, and [`workspace`] the step orchestrator an outer
//! training loop drives.

pub mod contrastive;
pub mod domain;
pub mod gw_module;
pub mod layers;
pub mod losses;
pub mod selection;
pub mod workspace;

pub use contrastive::{
    info_nce, info_nce_contrastive, info_nce_with_uncertainty, uncertainty_contrastive,
    ContrastiveFn, VarContrastiveFn,
};
pub use domain::{DomainAdapter, DomainAdapters, MseDomain};
pub use gw_module::{
    weighted_fuse, DeterministicGwModule, GaussianLatent, GwModule, GwModuleConfig,
    VariationalGwModule,
};
pub use layers::{Linear, Parameter, Projector};
pub use losses::{
    broadcast_loss, contrastive_loss, cycle_loss, demi_cycle_loss, generate_partitions,
    kl_divergence, kl_loss, translation_loss, CycleWeighting, GwLosses2Domains, GwLossesFusion,
    LossEngine, VariationalGwLosses,
};
pub use selection::{Selection, SelectionScores, SoftmaxSelection, UniformSelection};
pub use workspace::{
    GlobalWorkspace, GwPredictions, MetricRecorder, OptimConfig, SchedulerArgs, TracingRecorder,
};
