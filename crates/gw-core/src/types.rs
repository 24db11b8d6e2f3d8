use crate::group::DomainGroup;
use std::collections::BTreeMap;

/// Batch-major dense tensor used throughout the workspace (rows = batch).
pub type Tensor = ndarray::Array2<f32>;

/// Matched unimodal latent representations from multiple domains.
/// Keys are domain names.
pub type LatentGroup = BTreeMap<String, Tensor>;

/// Mapping of latent groups keyed by the set of domains matched in each group.
/// Each group is independent and may contain different data (unpaired).
pub type LatentGroups = BTreeMap<DomainGroup, LatentGroup>;

/// Raw (pre-encoding) payload for one domain of one batch.
///
/// A closed enum rather than dynamic typing: domain-specific loss hooks that
/// need original-space information match on the variant they expect.
#[derive(Clone, Debug, PartialEq)]
pub enum RawSample {
    Tensor(Tensor),
    Text(Vec<String>),
    Bytes(Vec<u8>),
}

impl RawSample {
    /// The underlying tensor, when the payload is numeric.
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            RawSample::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Leading (batch) dimension of the payload.
    pub fn batch_len(&self) -> usize {
        match self {
            RawSample::Tensor(t) => t.nrows(),
            RawSample::Text(rows) => rows.len(),
            RawSample::Bytes(bytes) => bytes.len(),
        }
    }
}

/// Matched raw unimodal data from multiple domains. Keys are domain names.
pub type RawGroup = BTreeMap<String, RawSample>;

/// Mapping of raw groups keyed by the matched domain set, parallel to
/// [`LatentGroups`].
pub type RawGroups = BTreeMap<DomainGroup, RawGroup>;

/// Step mode controlling the metric-name prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Val,
    Test,
    ValOod,
    TestOod,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Train => "train",
            Mode::Val => "val",
            Mode::Test => "test",
            Mode::ValOod => "val/ood",
            Mode::TestOod => "test/ood",
        }
    }
}
