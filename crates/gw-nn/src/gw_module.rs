use crate::layers::{Parameter, Projector};
use crate::selection::{Selection, SelectionScores};
use gw_core::{GwError, LatentGroup, Result, Tensor};
use ndarray::{s, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Hyperparameters shared by the workspace projection stacks.
#[derive(Clone, Copy, Debug, Deserialize)]
#[serde(default)]
pub struct GwModuleConfig {
    /// Dimensionality of the shared workspace latent.
    pub workspace_dim: usize,
    /// Hidden width of each projection MLP.
    pub hidden_dim: usize,
    /// Number of hidden blocks per projection MLP.
    pub n_layers: usize,
    /// Explicit parameter-init seed; falls back to the deterministic config.
    pub seed: Option<u64>,
}

impl Default for GwModuleConfig {
    fn default() -> Self {
        Self {
            workspace_dim: 12,
            hidden_dim: 32,
            n_layers: 2,
            seed: None,
        }
    }
}

/// Combines per-domain workspace encodings into a single vector using
/// per-sample selection weights.
pub fn weighted_fuse(encoded: &LatentGroup, scores: &SelectionScores) -> Result<Tensor> {
    let mut fused: Option<Tensor> = None;
    for (name, tensor) in encoded {
        let weights = scores.get(name).ok_or_else(|| GwError::UnknownDomain {
            name: name.clone(),
        })?;
        if weights.len() != tensor.nrows() {
            return Err(GwError::Shape {
                context: format!(
                    "selection weights for {name} cover {} samples, tensor has {}",
                    weights.len(),
                    tensor.nrows()
                ),
            });
        }
        let weighted = tensor * &weights.clone().insert_axis(Axis(1));
        fused = Some(match fused {
            Some(acc) => acc + weighted,
            None => weighted,
        });
    }
    fused.ok_or(GwError::EmptyBatch)
}

/// Shared latent space: one projection per domain into the workspace and one
/// back out, plus the fuse/translate/cycle primitives composed from them.
pub trait GwModule: Send + Sync {
    /// Dimensionality of the workspace latent.
    fn workspace_dim(&self) -> usize;

    /// Every domain this module can encode and decode.
    fn domain_names(&self) -> Vec<String>;

    /// Toggles training-time behaviour (reparameterized sampling). Point
    ///-estimate modules ignore this.
    fn set_training(&self, _training: bool) {}

    /// Projects each present domain's latent into workspace space. No fusion.
    fn encode(&self, latents: &LatentGroup) -> Result<LatentGroup>;

    /// Projects a workspace latent back out to the requested domains
    /// (default: every known domain).
    fn decode(&self, z: &Tensor, domains: Option<&[String]>) -> Result<LatentGroup>;

    /// Pure combination step, separable from encoding for reuse.
    fn fuse(&self, encoded: &LatentGroup, scores: &SelectionScores) -> Result<Tensor> {
        weighted_fuse(encoded, scores)
    }

    /// Encodes each present domain and fuses them into one workspace vector.
    fn encode_and_fuse(
        &self,
        latents: &LatentGroup,
        selection: &dyn Selection,
    ) -> Result<Tensor> {
        let encoded = self.encode(latents)?;
        let scores = selection.score(latents, &encoded)?;
        self.fuse(&encoded, &scores)
    }

    /// Fuses the given latents and decodes into a single target domain.
    fn translate(
        &self,
        latents: &LatentGroup,
        to: &str,
        selection: &dyn Selection,
    ) -> Result<Tensor> {
        let z = self.encode_and_fuse(latents, selection)?;
        let targets = [to.to_string()];
        let mut decoded = self.decode(&z, Some(&targets))?;
        decoded.remove(to).ok_or_else(|| GwError::UnknownDomain {
            name: to.to_string(),
        })
    }

    /// Translates to an intermediate domain and decodes back to the original
    /// domain(s).
    fn cycle(
        &self,
        latents: &LatentGroup,
        through: &str,
        selection: &dyn Selection,
    ) -> Result<LatentGroup> {
        let intermediate = self.translate(latents, through, selection)?;
        let mut mid = LatentGroup::new();
        mid.insert(through.to_string(), intermediate);
        let z = self.encode_and_fuse(&mid, selection)?;
        let originals: Vec<String> = latents.keys().cloned().collect();
        self.decode(&z, Some(&originals))
    }
}

fn build_projectors(
    domain_dims: &BTreeMap<String, usize>,
    config: &GwModuleConfig,
    encoder_out: usize,
    rng: &mut StdRng,
) -> Result<(BTreeMap<String, Projector>, BTreeMap<String, Projector>)> {
    let mut encoders = BTreeMap::new();
    let mut decoders = BTreeMap::new();
    for (name, &dim) in domain_dims {
        encoders.insert(
            name.clone(),
            Projector::new(
                format!("gw_encoder::{name}"),
                dim,
                config.hidden_dim,
                encoder_out,
                config.n_layers,
                rng,
            )?,
        );
        decoders.insert(
            name.clone(),
            Projector::new(
                format!("gw_decoder::{name}"),
                config.workspace_dim,
                config.hidden_dim,
                dim,
                config.n_layers,
                rng,
            )?,
        );
    }
    Ok((encoders, decoders))
}

fn encode_with(
    encoders: &BTreeMap<String, Projector>,
    latents: &LatentGroup,
) -> Result<LatentGroup> {
    let mut out = LatentGroup::new();
    for (name, latent) in latents {
        let encoder = encoders.get(name).ok_or_else(|| GwError::UnknownDomain {
            name: name.clone(),
        })?;
        out.insert(name.clone(), encoder.forward(latent)?);
    }
    Ok(out)
}

fn decode_with(
    decoders: &BTreeMap<String, Projector>,
    z: &Tensor,
    domains: Option<&[String]>,
) -> Result<LatentGroup> {
    let mut out = LatentGroup::new();
    match domains {
        Some(targets) => {
            for name in targets {
                let decoder = decoders.get(name).ok_or_else(|| GwError::UnknownDomain {
                    name: name.clone(),
                })?;
                out.insert(name.clone(), decoder.forward(z)?);
            }
        }
        None => {
            for (name, decoder) in decoders {
                out.insert(name.clone(), decoder.forward(z)?);
            }
        }
    }
    Ok(out)
}

/// Point-estimate workspace module: one projection MLP per domain, each way.
#[derive(Clone, Debug)]
pub struct DeterministicGwModule {
    workspace_dim: usize,
    encoders: BTreeMap<String, Projector>,
    decoders: BTreeMap<String, Projector>,
}

impl DeterministicGwModule {
    pub fn new(domain_dims: &BTreeMap<String, usize>, config: &GwModuleConfig) -> Result<Self> {
        let mut rng = gw_config::determinism::rng_from_optional(config.seed, "gw::projectors");
        let (encoders, decoders) =
            build_projectors(domain_dims, config, config.workspace_dim, &mut rng)?;
        Ok(Self {
            workspace_dim: config.workspace_dim,
            encoders,
            decoders,
        })
    }

    /// Identity-initialised module for round-trip sanity checks. Every domain
    /// latent dim must equal the workspace dim.
    pub fn identity(domain_dims: &BTreeMap<String, usize>, workspace_dim: usize) -> Result<Self> {
        let mut encoders = BTreeMap::new();
        let mut decoders = BTreeMap::new();
        for (name, &dim) in domain_dims {
            if dim != workspace_dim {
                return Err(GwError::Config {
                    context: format!(
                        "identity workspace requires latent dim {dim} == workspace dim {workspace_dim} for {name}"
                    ),
                });
            }
            encoders.insert(
                name.clone(),
                Projector::identity(format!("gw_encoder::{name}"), dim)?,
            );
            decoders.insert(
                name.clone(),
                Projector::identity(format!("gw_decoder::{name}"), dim)?,
            );
        }
        Ok(Self {
            workspace_dim,
            encoders,
            decoders,
        })
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> Result<()>,
    ) -> Result<()> {
        for projector in self.encoders.values().chain(self.decoders.values()) {
            projector.visit_parameters(visitor)?;
        }
        Ok(())
    }

    pub fn visit_parameters_mut(
        &mut self,
        visitor: &mut dyn FnMut(&mut Parameter) -> Result<()>,
    ) -> Result<()> {
        for projector in self
            .encoders
            .values_mut()
            .chain(self.decoders.values_mut())
        {
            projector.visit_parameters_mut(visitor)?;
        }
        Ok(())
    }
}

impl GwModule for DeterministicGwModule {
    fn workspace_dim(&self) -> usize {
        self.workspace_dim
    }

    fn domain_names(&self) -> Vec<String> {
        self.encoders.keys().cloned().collect()
    }

    fn encode(&self, latents: &LatentGroup) -> Result<LatentGroup> {
        encode_with(&self.encoders, latents)
    }

    fn decode(&self, z: &Tensor, domains: Option<&[String]>) -> Result<LatentGroup> {
        decode_with(&self.decoders, z, domains)
    }
}

/// Per-domain Gaussian posterior over the workspace latent.
#[derive(Clone, Debug, PartialEq)]
pub struct GaussianLatent {
    pub mean: Tensor,
    pub logvar: Tensor,
}

impl GaussianLatent {
    /// Standard reparameterization: `mean + eps * exp(0.5 * logvar)`.
    pub fn sample(&self, rng: &mut StdRng) -> Tensor {
        let mut out = self.mean.clone();
        for (value, &lv) in out.iter_mut().zip(self.logvar.iter()) {
            let eps: f32 = rng.sample(StandardNormal);
            *value += eps * (0.5 * lv).exp();
        }
        out
    }
}

/// Variational workspace module: encoders emit mean and log-variance heads;
/// encoding samples via reparameterization while in training mode and uses
/// the mean otherwise.
pub struct VariationalGwModule {
    workspace_dim: usize,
    encoders: BTreeMap<String, Projector>,
    decoders: BTreeMap<String, Projector>,
    training: AtomicBool,
    sampler: Mutex<StdRng>,
}

impl VariationalGwModule {
    pub fn new(domain_dims: &BTreeMap<String, usize>, config: &GwModuleConfig) -> Result<Self> {
        let mut rng = gw_config::determinism::rng_from_optional(config.seed, "gw::var_projectors");
        // encoder heads emit mean and logvar side by side
        let (encoders, decoders) =
            build_projectors(domain_dims, config, 2 * config.workspace_dim, &mut rng)?;
        let sampler = gw_config::determinism::rng_from_optional(config.seed, "gw::sampler");
        Ok(Self {
            workspace_dim: config.workspace_dim,
            encoders,
            decoders,
            training: AtomicBool::new(false),
            sampler: Mutex::new(sampler),
        })
    }

    /// Per-domain posterior parameters, without sampling.
    pub fn encoded_distribution(
        &self,
        latents: &LatentGroup,
    ) -> Result<BTreeMap<String, GaussianLatent>> {
        let dim = self.workspace_dim;
        let mut out = BTreeMap::new();
        for (name, head) in encode_with(&self.encoders, latents)? {
            let mean = head.slice(s![.., 0..dim]).to_owned();
            let logvar = head.slice(s![.., dim..2 * dim]).to_owned();
            out.insert(name, GaussianLatent { mean, logvar });
        }
        Ok(out)
    }

    pub fn visit_parameters(
        &self,
        visitor: &mut dyn FnMut(&Parameter) -> Result<()>,
    ) -> Result<()> {
        for projector in self.encoders.values().chain(self.decoders.values()) {
            projector.visit_parameters(visitor)?;
        }
        Ok(())
    }
}

impl GwModule for VariationalGwModule {
    fn workspace_dim(&self) -> usize {
        self.workspace_dim
    }

    fn domain_names(&self) -> Vec<String> {
        self.encoders.keys().cloned().collect()
    }

    fn set_training(&self, training: bool) {
        self.training.store(training, Ordering::Relaxed);
    }

    fn encode(&self, latents: &LatentGroup) -> Result<LatentGroup> {
        let distributions = self.encoded_distribution(latents)?;
        let training = self.training.load(Ordering::Relaxed);
        let mut out = LatentGroup::new();
        if training {
            let mut rng = self
                .sampler
                .lock()
                .map_err(|_| GwError::Config {
                    context: "variational sampler lock poisoned".to_string(),
                })?;
            for (name, dist) in distributions {
                out.insert(name, dist.sample(&mut rng));
            }
        } else {
            for (name, dist) in distributions {
                out.insert(name, dist.mean);
            }
        }
        Ok(out)
    }

    fn decode(&self, z: &Tensor, domains: Option<&[String]>) -> Result<LatentGroup> {
        decode_with(&self.decoders, z, domains)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::UniformSelection;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn dims(entries: &[(&str, usize)]) -> BTreeMap<String, usize> {
        entries
            .iter()
            .map(|(name, dim)| (name.to_string(), *dim))
            .collect()
    }

    #[test]
    fn unknown_domain_is_fatal() {
        let module =
            DeterministicGwModule::new(&dims(&[("t", 4)]), &GwModuleConfig::default()).unwrap();
        let mut latents = LatentGroup::new();
        latents.insert("ghost".to_string(), Tensor::zeros((2, 4)));
        assert!(matches!(
            module.encode(&latents),
            Err(GwError::UnknownDomain { .. })
        ));
        let z = Tensor::zeros((2, module.workspace_dim()));
        assert!(matches!(
            module.decode(&z, Some(&["ghost".to_string()])),
            Err(GwError::UnknownDomain { .. })
        ));
    }

    #[test]
    fn identity_module_round_trips_single_domain() {
        let module = DeterministicGwModule::identity(&dims(&[("t", 4)]), 4).unwrap();
        let mut latents = LatentGroup::new();
        let input = array![[0.3f32, -0.7, 1.5, 0.0], [2.0, 0.1, -0.2, 0.9]];
        latents.insert("t".to_string(), input.clone());
        let z = module
            .encode_and_fuse(&latents, &UniformSelection)
            .unwrap();
        let decoded = module.decode(&z, Some(&["t".to_string()])).unwrap();
        for (a, b) in input.iter().zip(decoded["t"].iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-5);
        }
    }

    #[test]
    fn decode_defaults_to_all_domains() {
        let module = DeterministicGwModule::new(
            &dims(&[("t", 4), ("v", 6)]),
            &GwModuleConfig::default(),
        )
        .unwrap();
        let z = Tensor::zeros((3, module.workspace_dim()));
        let decoded = module.decode(&z, None).unwrap();
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded["t"].dim(), (3, 4));
        assert_eq!(decoded["v"].dim(), (3, 6));
    }

    #[test]
    fn variational_encode_is_deterministic_in_eval_mode() {
        let module = VariationalGwModule::new(
            &dims(&[("t", 5)]),
            &GwModuleConfig {
                seed: Some(9),
                ..GwModuleConfig::default()
            },
        )
        .unwrap();
        let mut latents = LatentGroup::new();
        latents.insert("t".to_string(), Tensor::ones((4, 5)));

        module.set_training(false);
        let a = module.encode(&latents).unwrap();
        let b = module.encode(&latents).unwrap();
        assert_eq!(a["t"], b["t"]);

        module.set_training(true);
        let c = module.encode(&latents).unwrap();
        let d = module.encode(&latents).unwrap();
        assert_ne!(c["t"], d["t"]);
    }

    #[test]
    fn distribution_splits_mean_and_logvar() {
        let module = VariationalGwModule::new(
            &dims(&[("t", 5)]),
            &GwModuleConfig {
                workspace_dim: 7,
                ..GwModuleConfig::default()
            },
        )
        .unwrap();
        let mut latents = LatentGroup::new();
        latents.insert("t".to_string(), Tensor::zeros((2, 5)));
        let dists = module.encoded_distribution(&latents).unwrap();
        assert_eq!(dists["t"].mean.dim(), (2, 7));
        assert_eq!(dists["t"].logvar.dim(), (2, 7));
    }

    #[test]
    fn fuse_weights_single_domain_to_itself() {
        let module = DeterministicGwModule::identity(&dims(&[("t", 3)]), 3).unwrap();
        let mut latents = LatentGroup::new();
        latents.insert("t".to_string(), array![[1.0f32, 2.0, 3.0]]);
        let encoded = module.encode(&latents).unwrap();
        let scores = UniformSelection.score(&latents, &encoded).unwrap();
        let fused = module.fuse(&encoded, &scores).unwrap();
        assert_abs_diff_eq!(fused[[0, 0]], 1.0, epsilon = 1e-6);
        assert_abs_diff_eq!(fused[[0, 2]], 3.0, epsilon = 1e-6);
    }
}
