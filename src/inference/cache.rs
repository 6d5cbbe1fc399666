//! Process-wide dsid → model map with lazy fallback to the model store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info};

use crate::common::error::{MlaasError, MlaasResult};
use crate::data::domain::DatasetId;
use crate::training::domain::{BackendKind, ModelStore, TrainedModel};

const ACTIVE_LOOKUP_ATTEMPTS: usize = 3;

/// At most one resident model per dsid; entries live until replaced.
pub struct ModelCache {
    entries: RwLock<HashMap<DatasetId, Arc<TrainedModel>>>,
    store: Arc<dyn ModelStore>,
}

impl ModelCache {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            store,
        }
    }

    // a panicked writer leaves the map itself intact, so poison is ignored
    fn read(&self) -> RwLockReadGuard<'_, HashMap<DatasetId, Arc<TrainedModel>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<DatasetId, Arc<TrainedModel>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Resident entry only; never touches the store.
    pub fn get(&self, dsid: DatasetId) -> Option<Arc<TrainedModel>> {
        self.read().get(&dsid).cloned()
    }

    /// Replace whatever is resident for `dsid`.
    pub fn put(&self, dsid: DatasetId, model: TrainedModel) -> Arc<TrainedModel> {
        let model = Arc::new(model);
        self.write().insert(dsid, Arc::clone(&model));
        debug!(dsid = %dsid, kind = %model.kind, "cache entry replaced");
        model
    }

    /// Resident model of `kind`, loading it from the store on a miss.
    ///
    /// A resident model of another kind, or nothing stored, is `ModelUnavailable`.
    pub fn get_or_load(&self, dsid: DatasetId, kind: BackendKind) -> MlaasResult<Arc<TrainedModel>> {
        if let Some(model) = self.get(dsid) {
            return matching(dsid, kind, model);
        }

        let state = match self.store.load(dsid, kind) {
            Ok(state) => state,
            Err(MlaasError::ArtifactMissing { .. }) => {
                return Err(MlaasError::ModelUnavailable { dsid })
            }
            Err(e) => return Err(e),
        };
        info!(dsid = %dsid, kind = %kind, samples = state.n_samples(), "model loaded from store");

        // a put that raced this load is newer than what was read from disk
        let resident = Arc::clone(
            self.write()
                .entry(dsid)
                .or_insert_with(|| Arc::new(TrainedModel::new(dsid, kind, state))),
        );
        matching(dsid, kind, resident)
    }

    /// Like [`get_or_load`](Self::get_or_load) for whichever kind is active for `dsid`.
    ///
    /// A train that switches kinds can commit between reading the active kind and
    /// loading it. The lookup then starts over, so the caller gets the new model
    /// rather than `ModelUnavailable`.
    pub fn get_or_load_active(&self, dsid: DatasetId) -> MlaasResult<Arc<TrainedModel>> {
        let mut tried = None;
        for _ in 0..ACTIVE_LOOKUP_ATTEMPTS {
            if let Some(model) = self.get(dsid) {
                return Ok(model);
            }
            let Some(kind) = self.store.active_kind(dsid)? else {
                break;
            };
            if tried == Some(kind) {
                break;
            }
            match self.get_or_load(dsid, kind) {
                Err(MlaasError::ModelUnavailable { .. }) => {
                    debug!(dsid = %dsid, kind = %kind, "active kind changed during lookup");
                    tried = Some(kind);
                }
                other => return other,
            }
        }
        Err(MlaasError::ModelUnavailable { dsid })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn matching(
    dsid: DatasetId,
    kind: BackendKind,
    model: Arc<TrainedModel>,
) -> MlaasResult<Arc<TrainedModel>> {
    if model.kind == kind {
        Ok(model)
    } else {
        Err(MlaasError::ModelUnavailable { dsid })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::Mutex;

    use crate::common::error::MlaasCode;
    use crate::training::backend::{backend_of, FittedState};
    use crate::training::backend::test_support::two_clusters;
    use crate::training::repo_fs::FsModelStore;

    fn trained(dsid: DatasetId, kind: BackendKind) -> TrainedModel {
        let (x, y) = two_clusters(4, 3);
        TrainedModel::new(dsid, kind, backend_of(kind).fit(&x, &y).unwrap())
    }

    #[test]
    fn unknown_dsid_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(Arc::new(FsModelStore::with_root(dir.path())));
        let err = cache.get_or_load_active(DatasetId(99)).unwrap_err();
        assert_eq!(err.code(), MlaasCode::ModelUnavailable);
        let err = cache.get_or_load(DatasetId(99), BackendKind::Auto).unwrap_err();
        assert_eq!(err.code(), MlaasCode::ModelUnavailable);
        assert!(cache.is_empty());
    }

    #[test]
    fn put_overwrites_and_kind_must_match() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ModelCache::new(Arc::new(FsModelStore::with_root(dir.path())));
        let dsid = DatasetId(4);

        cache.put(dsid, trained(dsid, BackendKind::ScaledSvm));
        cache.put(dsid, trained(dsid, BackendKind::Auto));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(dsid).unwrap().kind, BackendKind::Auto);

        assert!(cache.get_or_load(dsid, BackendKind::Auto).is_ok());
        let err = cache.get_or_load(dsid, BackendKind::ScaledSvm).unwrap_err();
        assert_eq!(err.code(), MlaasCode::ModelUnavailable);
    }

    type Hook = Box<dyn FnOnce() + Send>;

    /// Reports `stale` as the active kind once, after running a hook that stands
    /// in for a train committing in between.
    struct RacingStore {
        inner: Arc<FsModelStore>,
        stale: BackendKind,
        before_lookup: Mutex<Option<Hook>>,
    }

    impl RacingStore {
        fn arm(&self, hook: impl FnOnce() + Send + 'static) {
            *self.before_lookup.lock().unwrap() = Some(Box::new(hook));
        }
    }

    impl ModelStore for RacingStore {
        fn save(
            &self,
            dsid: DatasetId,
            kind: BackendKind,
            state: &FittedState,
        ) -> MlaasResult<PathBuf> {
            self.inner.save(dsid, kind, state)
        }

        fn load(&self, dsid: DatasetId, kind: BackendKind) -> MlaasResult<FittedState> {
            self.inner.load(dsid, kind)
        }

        fn active_kind(&self, dsid: DatasetId) -> MlaasResult<Option<BackendKind>> {
            let hook = self.before_lookup.lock().unwrap().take();
            match hook {
                Some(hook) => {
                    hook();
                    Ok(Some(self.stale))
                }
                None => self.inner.active_kind(dsid),
            }
        }
    }

    fn racing(root: &std::path::Path, dsid: DatasetId) -> (Arc<RacingStore>, Arc<ModelCache>) {
        let inner = Arc::new(FsModelStore::with_root(root));
        let old = trained(dsid, BackendKind::ScaledSvm);
        inner.save(dsid, old.kind, &old.state).unwrap();
        let store = Arc::new(RacingStore {
            inner,
            stale: BackendKind::ScaledSvm,
            before_lookup: Mutex::new(None),
        });
        let cache = Arc::new(ModelCache::new(store.clone()));
        (store, cache)
    }

    #[test]
    fn kind_switch_during_lookup_returns_the_resident_model() {
        let dir = tempfile::tempdir().unwrap();
        let dsid = DatasetId(11);
        let (store, cache) = racing(dir.path(), dsid);

        let (inner, committed) = (Arc::clone(&store.inner), Arc::clone(&cache));
        store.arm(move || {
            let new = trained(dsid, BackendKind::Auto);
            inner.save(dsid, new.kind, &new.state).unwrap();
            committed.put(dsid, new);
        });

        let model = cache.get_or_load_active(dsid).unwrap();
        assert_eq!(model.kind, BackendKind::Auto);
        assert!(Arc::ptr_eq(&model, &cache.get(dsid).unwrap()));
    }

    #[test]
    fn kind_switch_during_lookup_loads_the_new_kind() {
        let dir = tempfile::tempdir().unwrap();
        let dsid = DatasetId(12);
        let (store, cache) = racing(dir.path(), dsid);

        let inner = Arc::clone(&store.inner);
        store.arm(move || {
            let new = trained(dsid, BackendKind::Auto);
            inner.save(dsid, new.kind, &new.state).unwrap();
        });

        let model = cache.get_or_load_active(dsid).unwrap();
        assert_eq!(model.kind, BackendKind::Auto);
        assert_eq!(cache.get(dsid).unwrap().kind, BackendKind::Auto);
    }

    #[test]
    fn cold_lookup_populates_from_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsModelStore::with_root(dir.path()));
        let dsid = DatasetId(6);
        let model = trained(dsid, BackendKind::ScaledSvm);
        store.save(dsid, model.kind, &model.state).unwrap();

        let cache = ModelCache::new(store);
        let loaded = cache.get_or_load_active(dsid).unwrap();
        assert_eq!(loaded.kind, BackendKind::ScaledSvm);
        assert_eq!(loaded.n_samples(), 6);
        assert!(Arc::ptr_eq(&loaded, &cache.get(dsid).unwrap()));
    }
}
