//! Core vocabulary for the global-workspace model.
//!
//! Everything here is model-agnostic bookkeeping: the sorted domain-group key,
//! latent/raw group aliases, loss outputs and coefficient tables, and the
//! metric descriptor registry. The actual networks and loss engines live in
//! `gw-nn`.

pub mod group;
pub mod loss;
pub mod metrics;
pub mod types;

use thiserror::Error;

pub use group::DomainGroup;
pub use loss::{combine_loss, BroadcastLossCoefs, LossCoefs, LossOutput};
pub use types::{LatentGroup, LatentGroups, Mode, RawGroup, RawGroups, RawSample, Tensor};

/// Errors surfaced by the global-workspace core and model crates.
///
/// Every variant is a programming or configuration error; nothing here is
/// retryable. The external trainer decides whether to abort the run.
#[derive(Debug, Error, PartialEq)]
pub enum GwError {
    /// No tensor was found when probing a batch for its size.
    #[error("empty batch: no tensors available to determine batch size")]
    EmptyBatch,
    /// A domain group was constructed without any domain names.
    #[error("domain groups must contain at least one domain")]
    EmptyGroup,
    /// A domain name was requested that no adapter or projector covers.
    #[error("unknown domain: {name}")]
    UnknownDomain { name: String },
    /// Two loss enumerations produced the same metric name in one step.
    #[error("loss name collision: {name} is already computed")]
    DuplicateLossName { name: String },
    /// Tensor dimensions do not line up.
    #[error("shape mismatch: {context}")]
    Shape { context: String },
    /// Invalid model or engine configuration detected at construction time.
    #[error("invalid configuration: {context}")]
    Config { context: String },
}

pub type Result<T> = std::result::Result<T, GwError>;
