use gw_core::{BroadcastLossCoefs, RawGroup, RawSample};
use gw_nn::{
    info_nce_contrastive, DeterministicGwModule, DomainAdapter, DomainAdapters, GlobalWorkspace,
    GwLossesFusion, GwModule, GwModuleConfig, MetricRecorder, MseDomain, UniformSelection,
};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

const LATENT_DIM: usize = 6;

#[derive(Default)]
struct CollectingRecorder {
    events: Mutex<Vec<(String, f32, usize)>>,
}

impl MetricRecorder for CollectingRecorder {
    fn record(&self, name: &str, value: f32, batch_size: usize) {
        self.events
            .lock()
            .unwrap()
            .push((name.to_string(), value, batch_size));
    }
}

struct SharedRecorder(Arc<CollectingRecorder>);

impl MetricRecorder for SharedRecorder {
    fn record(&self, name: &str, value: f32, batch_size: usize) {
        self.0.record(name, value, batch_size);
    }
}

fn build_workspace(domains: &[&str], recorder: Arc<CollectingRecorder>) -> GlobalWorkspace {
    let dims: BTreeMap<String, usize> = domains
        .iter()
        .map(|name| (name.to_string(), LATENT_DIM))
        .collect();
    let config = GwModuleConfig {
        workspace_dim: 8,
        hidden_dim: 16,
        n_layers: 1,
        seed: Some(13),
    };
    let gw: Arc<dyn GwModule> = Arc::new(DeterministicGwModule::new(&dims, &config).unwrap());
    let adapters: DomainAdapters = domains
        .iter()
        .map(|name| {
            (
                name.to_string(),
                Arc::new(MseDomain::new(LATENT_DIM)) as Arc<dyn DomainAdapter>,
            )
        })
        .collect();
    let coefs = BroadcastLossCoefs {
        contrastives: Some(0.1),
        fused: Some(1.0),
        demi_cycles: Some(1.0),
        cycles: Some(1.0),
        translations: Some(1.0),
    };
    let engine = GwLossesFusion::new(
        gw.clone(),
        Arc::new(UniformSelection),
        adapters.clone(),
        &coefs,
        info_nce_contrastive(0.1),
    );
    GlobalWorkspace::new(gw, adapters, Arc::new(UniformSelection), Box::new(engine))
        .with_recorder(Box::new(SharedRecorder(recorder)))
}

fn matched_group(domains: &[&str], rows: usize, seed: u64) -> RawGroup {
    let mut rng = StdRng::seed_from_u64(seed);
    domains
        .iter()
        .map(|name| {
            let tensor =
                Array2::from_shape_fn((rows, LATENT_DIM), |_| rng.gen_range(-1.0f32..1.0));
            (name.to_string(), RawSample::Tensor(tensor))
        })
        .collect()
}

#[test]
fn validation_expands_the_batch_into_full_and_singleton_groups() {
    let recorder = Arc::new(CollectingRecorder::default());
    let ws = build_workspace(&["t", "v"], Arc::clone(&recorder));
    let data = matched_group(&["t", "v"], 4, 1);
    ws.validation_step(&data, 0).unwrap();

    let events = recorder.events.lock().unwrap();
    // singleton groups feed the per-domain demi-cycle subsets
    assert!(events
        .iter()
        .any(|(name, _, _)| name == "val/from_{t}_to_t_loss"));
    // the full group feeds the fused reconstruction
    assert!(events
        .iter()
        .any(|(name, _, _)| name == "val/from_{t,v}_to_v_loss"));
    assert!(events.iter().any(|(name, _, _)| name == "val/loss"));
    for (_, _, batch_size) in events.iter() {
        assert_eq!(*batch_size, 4);
    }
}

#[test]
fn secondary_dataloaders_land_in_the_ood_namespace() {
    let recorder = Arc::new(CollectingRecorder::default());
    let ws = build_workspace(&["t", "v"], Arc::clone(&recorder));
    let data = matched_group(&["t", "v"], 2, 8);

    ws.test_step(&data, 0).unwrap();
    ws.test_step(&data, 3).unwrap();

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().any(|(name, _, _)| name.starts_with("test/")));
    assert!(events
        .iter()
        .any(|(name, _, _)| name.starts_with("test/ood/")));
    assert!(events.iter().any(|(name, _, _)| name == "test/ood/loss"));
}

#[test]
fn predictions_enumerate_every_direction() {
    let recorder = Arc::new(CollectingRecorder::default());
    let ws = build_workspace(&["t", "v"], recorder);
    let data = matched_group(&["t", "v"], 3, 21);
    let predictions = ws.predict_step(&data).unwrap();

    assert_eq!(predictions.states.len(), 2);
    assert_eq!(predictions.demi_cycles.len(), 2);
    assert_eq!(predictions.cycles.len(), 2);
    assert_eq!(predictions.translations.len(), 2);
    for key in [("t", "v"), ("v", "t")] {
        let key = (key.0.to_string(), key.1.to_string());
        assert!(predictions.cycles.contains_key(&key));
        assert!(predictions.translations.contains_key(&key));
    }
    for tensor in predictions.translations.values() {
        assert_eq!(tensor.dim(), (3, LATENT_DIM));
    }
    for state in predictions.states.values() {
        assert_eq!(state.ncols(), 8);
    }
}
