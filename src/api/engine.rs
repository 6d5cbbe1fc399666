//! Async entry point for the request layer.
//!
//! One [`Engine`] owns the cache, both stores, the worker pool and the per-dsid
//! locks; request handlers share it behind an `Arc`. Every method that touches
//! disk or does CPU work runs on the worker pool and suspends the caller until
//! the job completes.

use std::sync::Arc;

use tracing::info;

use crate::common::config::AppCfg;
use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::{DatasetId, DocumentStore, Label, LabeledSample, SampleId};
use crate::data::repo_fs::FsDocStore;
use crate::data::service as data_service;
use crate::features::FeatureExtractor;
use crate::inference::cache::ModelCache;
use crate::inference::domain::Prediction;
use crate::inference::service as inference_service;
use crate::inference::workers::Pool;
use crate::training::domain::{BackendConfig, BackendKind, ModelStore, TrainingSummary};
use crate::training::locks::DsidLocks;
use crate::training::repo_fs::FsModelStore;
use crate::training::service as training_service;

pub struct Engine {
    cfg: Arc<AppCfg>,
    docs: Arc<dyn DocumentStore>,
    store: Arc<dyn ModelStore>,
    cache: Arc<ModelCache>,
    extractor: FeatureExtractor,
    pool: Pool,
    locks: DsidLocks,
}

impl Engine {
    /// Wire an engine over explicit collaborators.
    pub fn new(
        cfg: AppCfg,
        docs: Arc<dyn DocumentStore>,
        store: Arc<dyn ModelStore>,
    ) -> MlaasResult<Self> {
        cfg.validate()?;
        let pool = Pool::new(cfg.workers)?;
        let cache = Arc::new(ModelCache::new(Arc::clone(&store)));
        info!(
            workers = pool.size(),
            width = cfg.feature_width,
            height = cfg.feature_height,
            "engine ready"
        );
        Ok(Self {
            extractor: FeatureExtractor::from_config(&cfg),
            cfg: Arc::new(cfg),
            docs,
            store,
            cache,
            pool,
            locks: DsidLocks::new(),
        })
    }

    /// Filesystem document and model stores under `cfg.data_root`.
    pub fn from_config(cfg: AppCfg) -> MlaasResult<Self> {
        let docs = Arc::new(FsDocStore::new(&cfg));
        let store = Arc::new(FsModelStore::new(&cfg));
        Self::new(cfg, docs, store)
    }

    pub fn config(&self) -> &AppCfg {
        &self.cfg
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    pub async fn add_sample(
        &self,
        dsid: DatasetId,
        label: Label,
        image: Vec<u8>,
    ) -> MlaasResult<SampleId> {
        let docs = Arc::clone(&self.docs);
        let cfg = Arc::clone(&self.cfg);
        self.pool
            .submit(move || data_service::ingest(docs.as_ref(), &cfg, dsid, label, image))?
            .wait()
            .await?
    }

    pub async fn list_samples(&self, dsid: DatasetId) -> MlaasResult<Vec<LabeledSample>> {
        let docs = Arc::clone(&self.docs);
        let cfg = Arc::clone(&self.cfg);
        self.pool
            .submit(move || data_service::list(docs.as_ref(), &cfg, dsid))?
            .wait()
            .await?
    }

    /// Train `dsid` with `config`, replacing its stored and cached model.
    ///
    /// Runs are serialized per dsid. If the returned future is dropped, the fit
    /// still completes and commits, and the dsid stays locked until it has.
    pub async fn train(
        &self,
        dsid: DatasetId,
        config: BackendConfig,
    ) -> MlaasResult<TrainingSummary> {
        let guard = self.locks.lock_owned(dsid).await;
        let docs = Arc::clone(&self.docs);
        let store = Arc::clone(&self.store);
        let cache = Arc::clone(&self.cache);
        let extractor = self.extractor;
        self.pool
            .submit(move || {
                let _guard = guard;
                training_service::train(
                    docs.as_ref(),
                    &extractor,
                    store.as_ref(),
                    &cache,
                    dsid,
                    &config,
                )
            })?
            .wait()
            .await?
    }

    /// Predict with whichever backend was trained last for `dsid`.
    pub async fn predict(&self, dsid: DatasetId, image: Vec<u8>) -> MlaasResult<Prediction> {
        let cache = Arc::clone(&self.cache);
        let extractor = self.extractor;
        self.pool
            .submit(move || inference_service::predict(&cache, &extractor, dsid, &image))?
            .wait()
            .await?
    }

    /// Stop accepting work and wait for queued jobs, including abandoned trains,
    /// to commit. Dropping the engine inside a runtime does not wait.
    pub async fn shutdown(self) -> MlaasResult<()> {
        let Engine { pool, .. } = self;
        tokio::task::spawn_blocking(move || pool.join())
            .await
            .map_err(|_| MlaasError::WorkerUnavailable)?;
        info!("engine stopped");
        Ok(())
    }

    /// Predict with the `kind` model of `dsid`.
    pub async fn predict_with(
        &self,
        dsid: DatasetId,
        kind: BackendKind,
        image: Vec<u8>,
    ) -> MlaasResult<Prediction> {
        let cache = Arc::clone(&self.cache);
        let extractor = self.extractor;
        self.pool
            .submit(move || {
                inference_service::predict_with(&cache, &extractor, dsid, kind, &image)
            })?
            .wait()
            .await?
    }
}
