use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use image::{DynamicImage, GrayImage, ImageFormat, Luma};

use mlaas_core::common::config::AppCfg;
use mlaas_core::data::{DatasetId, DocumentStore, Label, MemoryDocStore};
use mlaas_core::training::{
    AutoConfig, BackendConfig, BackendKind, FittedState, FsModelStore, ModelDetails, ModelStore,
    SvmConfig,
};
use mlaas_core::{Engine, MlaasCode, MlaasResult};

/// Model store that counts how often it is read.
struct CountingStore {
    inner: FsModelStore,
    loads: AtomicUsize,
}

impl CountingStore {
    fn new(root: &Path) -> Self {
        Self {
            inner: FsModelStore::with_root(root),
            loads: AtomicUsize::new(0),
        }
    }

    fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ModelStore for CountingStore {
    fn save(&self, dsid: DatasetId, kind: BackendKind, state: &FittedState) -> MlaasResult<PathBuf> {
        self.inner.save(dsid, kind, state)
    }

    fn load(&self, dsid: DatasetId, kind: BackendKind) -> MlaasResult<FittedState> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        self.inner.load(dsid, kind)
    }

    fn active_kind(&self, dsid: DatasetId) -> MlaasResult<Option<BackendKind>> {
        self.inner.active_kind(dsid)
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    models: PathBuf,
    cfg: AppCfg,
    docs: Arc<MemoryDocStore>,
    store: Arc<CountingStore>,
    engine: Engine,
}

impl Fixture {
    fn new(side: u32) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cfg = AppCfg {
            data_root: dir.path().to_path_buf(),
            workers: 2,
            feature_width: side,
            feature_height: side,
            ..AppCfg::default()
        };
        let models = cfg.models_dir();
        let docs = Arc::new(MemoryDocStore::new());
        let store = Arc::new(CountingStore::new(&models));
        let engine = Engine::new(cfg.clone(), docs.clone(), store.clone()).unwrap();
        Self {
            _dir: dir,
            models,
            cfg,
            docs,
            store,
            engine,
        }
    }

    /// Second engine over the same artifacts with an empty cache.
    fn restarted(&self) -> (Arc<CountingStore>, Engine) {
        let store = Arc::new(CountingStore::new(&self.models));
        let engine = Engine::new(self.cfg.clone(), self.docs.clone(), store.clone()).unwrap();
        (store, engine)
    }

    async fn seed(&self, dsid: DatasetId, labels: &[Label]) -> Vec<Vec<u8>> {
        let mut images = Vec::new();
        for (i, label) in labels.iter().enumerate() {
            let image = sample_image(*label, i as u8);
            self.engine
                .add_sample(dsid, *label, image.clone())
                .await
                .unwrap();
            images.push(image);
        }
        images
    }
}

/// Dark textured images for label 0, bright ones otherwise.
fn sample_image(label: Label, variant: u8) -> Vec<u8> {
    let base: u8 = if label == 0 { 20 } else { 200 };
    let img = GrayImage::from_fn(16, 16, |x, y| {
        Luma([base + variant * 3 + ((x + y) % 4) as u8 * 5])
    });
    let mut out = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(img)
        .write_to(&mut out, ImageFormat::Png)
        .unwrap();
    out.into_inner()
}

fn rbf(c: f64) -> BackendConfig {
    BackendConfig::ScaledSvm(SvmConfig::from_params("rbf", c, "scale").unwrap())
}

#[tokio::test]
async fn trains_and_predicts_a_training_sample() {
    let fx = Fixture::new(128);
    let dsid = DatasetId(1);
    let labels: Vec<Label> = (0..10).map(|i| i % 2).collect();
    let images = fx.seed(dsid, &labels).await;

    let summary = fx.engine.train(dsid, rbf(1.0)).await.unwrap();
    assert_eq!(summary.kind, BackendKind::ScaledSvm);
    assert_eq!(summary.samples, 10);
    assert_eq!(summary.classes, 2);
    match &summary.details {
        ModelDetails::ScaledSvm { kernel, c, gamma, .. } => {
            assert_eq!(kernel, "rbf");
            assert_eq!(*c, 1.0);
            assert_eq!(gamma, "scale");
        }
        other => panic!("unexpected details {other:?}"),
    }

    let prediction = fx.engine.predict(dsid, images[3].clone()).await.unwrap();
    assert_eq!(prediction.label, labels[3]);
    assert_eq!(prediction.trained_on, 10);
}

#[tokio::test]
async fn fresh_model_is_served_from_cache() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(7);
    let images = fx.seed(dsid, &[0, 1, 0, 1]).await;

    fx.engine.train(dsid, rbf(1.0)).await.unwrap();
    for image in images {
        fx.engine.predict(dsid, image).await.unwrap();
    }
    assert_eq!(fx.store.loads(), 0);
}

#[tokio::test]
async fn cold_start_loads_once_then_caches() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(4);
    let images = fx.seed(dsid, &[0, 1, 0, 1, 1]).await;
    fx.engine.train(dsid, rbf(2.0)).await.unwrap();

    let (store, engine) = fx.restarted();
    assert!(engine.cache().get(dsid).is_none());

    let first = engine.predict(dsid, images[1].clone()).await.unwrap();
    assert_eq!(first.label, 1);
    assert_eq!(store.loads(), 1);
    assert!(engine.cache().get(dsid).is_some());

    engine.predict(dsid, images[0].clone()).await.unwrap();
    assert_eq!(store.loads(), 1);
}

#[tokio::test]
async fn tiny_datasets_are_rejected() {
    let fx = Fixture::new(16);

    let err = fx.engine.train(DatasetId(3), rbf(1.0)).await.unwrap_err();
    assert_eq!(err.code(), MlaasCode::InsufficientData);

    fx.seed(DatasetId(3), &[1]).await;
    let err = fx.engine.train(DatasetId(3), rbf(1.0)).await.unwrap_err();
    assert_eq!(err.code(), MlaasCode::InsufficientData);

    fx.seed(DatasetId(5), &[1, 1, 1]).await;
    let err = fx.engine.train(DatasetId(5), rbf(1.0)).await.unwrap_err();
    assert_eq!(err.code(), MlaasCode::InsufficientData);

    assert!(fx.engine.cache().is_empty());
}

#[tokio::test]
async fn untrained_dataset_is_unavailable() {
    let fx = Fixture::new(16);
    let err = fx
        .engine
        .predict(DatasetId(99), sample_image(0, 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), MlaasCode::ModelUnavailable);
    assert!(err.code().is_client_fault());
}

#[tokio::test]
async fn undecodable_image_is_a_decode_error() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(2);
    fx.seed(dsid, &[0, 1, 0, 1]).await;
    fx.engine.train(dsid, rbf(1.0)).await.unwrap();

    let err = fx
        .engine
        .predict(dsid, b"definitely not a png".to_vec())
        .await
        .unwrap_err();
    assert_eq!(err.code(), MlaasCode::Decode);
}

#[tokio::test]
async fn concurrent_trains_leave_cache_and_store_in_agreement() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(8);
    fx.seed(dsid, &[0, 1, 0, 1, 0, 1]).await;

    // same kind, different C, so only the details tell the two fits apart
    for round in 0..4 {
        let (a, b) = tokio::join!(
            fx.engine.train(dsid, rbf(1.0)),
            fx.engine.train(dsid, rbf(4.0)),
        );
        a.unwrap();
        b.unwrap();

        let cached = fx.engine.cache().get(dsid).unwrap();
        assert_eq!(fx.store.active_kind(dsid).unwrap(), Some(cached.kind));
        let stored = fx.store.load(dsid, cached.kind).unwrap();
        assert_eq!(stored.details(), cached.state.details(), "round {round}");
    }

    let (a, b) = tokio::join!(
        fx.engine.train(dsid, rbf(2.0)),
        fx.engine.train(dsid, BackendConfig::Auto(AutoConfig::default())),
    );
    a.unwrap();
    b.unwrap();
    let cached = fx.engine.cache().get(dsid).unwrap();
    assert_eq!(fx.store.active_kind(dsid).unwrap(), Some(cached.kind));
    let stored = fx.store.load(dsid, cached.kind).unwrap();
    assert_eq!(stored.details(), cached.state.details());
}

#[tokio::test]
async fn switching_backends_retires_the_old_kind() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(6);
    let images = fx.seed(dsid, &[0, 1, 0, 1]).await;

    fx.engine.train(dsid, rbf(1.0)).await.unwrap();
    let summary = fx
        .engine
        .train(dsid, BackendConfig::default_for(BackendKind::Auto))
        .await
        .unwrap();
    assert!(matches!(summary.details, ModelDetails::Auto { .. }));

    let prediction = fx.engine.predict(dsid, images[1].clone()).await.unwrap();
    assert_eq!(prediction.kind, BackendKind::Auto);
    let err = fx
        .engine
        .predict_with(dsid, BackendKind::ScaledSvm, images[1].clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), MlaasCode::ModelUnavailable);

    let (_, engine) = fx.restarted();
    let err = engine
        .predict_with(dsid, BackendKind::ScaledSvm, images[1].clone())
        .await
        .unwrap_err();
    assert_eq!(err.code(), MlaasCode::ModelUnavailable);
    let prediction = engine
        .predict_with(dsid, BackendKind::Auto, images[1].clone())
        .await
        .unwrap();
    assert_eq!(prediction.label, 1);
}

#[tokio::test]
async fn ingestion_enforces_bounds_and_lists_in_order() {
    let fx = Fixture::new(16);
    for dsid in [0, 51] {
        let err = fx
            .engine
            .add_sample(DatasetId(dsid), 1, sample_image(1, 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), MlaasCode::InvalidInput);
    }

    fx.seed(DatasetId(9), &[1, 0, 1]).await;
    let listed = fx.engine.list_samples(DatasetId(9)).await.unwrap();
    let labels: Vec<Label> = listed.iter().map(|s| s.label).collect();
    assert_eq!(labels, vec![1, 0, 1]);
    assert_eq!(fx.docs.find_samples(DatasetId(9)).unwrap().len(), 3);
}

#[tokio::test]
async fn dropped_train_future_still_commits() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(10);
    fx.seed(dsid, &[0, 1, 0, 1]).await;

    // poll once so the job is submitted, then abandon it
    let train = fx.engine.train(dsid, rbf(1.0));
    let _ = tokio::time::timeout(std::time::Duration::from_millis(1), train).await;

    // the next train for the dsid waits for the abandoned one to finish
    fx.engine.train(dsid, rbf(1.0)).await.unwrap();
    assert!(fx.engine.cache().get(dsid).is_some());
    assert_eq!(fx.store.active_kind(dsid).unwrap(), Some(BackendKind::ScaledSvm));
}

#[tokio::test]
async fn shutdown_waits_for_abandoned_trains() {
    let fx = Fixture::new(16);
    let dsid = DatasetId(11);
    fx.seed(dsid, &[0, 1, 0, 1]).await;

    let train = fx.engine.train(dsid, rbf(1.0));
    let _ = tokio::time::timeout(std::time::Duration::from_millis(1), train).await;

    let Fixture { engine, store, .. } = fx;
    engine.shutdown().await.unwrap();
    assert_eq!(store.active_kind(dsid).unwrap(), Some(BackendKind::ScaledSvm));
}
