//! Per-dataset mutual exclusion around fit, persist and cache update.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::data::domain::DatasetId;

/// Lazily created async lock per dsid. Unrelated datasets never contend.
#[derive(Default)]
pub struct DsidLocks {
    slots: Mutex<HashMap<DatasetId, Arc<AsyncMutex<()>>>>,
}

impl DsidLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, dsid: DatasetId) -> Arc<AsyncMutex<()>> {
        // the map lock is only held for the lookup, never across an await
        let mut slots = match self.slots.lock() {
            Ok(slots) => slots,
            Err(poisoned) => poisoned.into_inner(),
        };
        slots.entry(dsid).or_default().clone()
    }

    /// Wait for exclusive access to `dsid`. The guard is `'static` so it can move
    /// into a worker job and outlive the awaiting future.
    pub async fn lock_owned(&self, dsid: DatasetId) -> OwnedMutexGuard<()> {
        self.slot(dsid).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_dsid_is_exclusive() {
        let locks = DsidLocks::new();
        let guard = locks.lock_owned(DatasetId(1)).await;
        let second = tokio::time::timeout(Duration::from_millis(20), locks.lock_owned(DatasetId(1)));
        assert!(second.await.is_err());
        drop(guard);
        let _again = locks.lock_owned(DatasetId(1)).await;
    }

    #[tokio::test]
    async fn different_dsids_do_not_contend() {
        let locks = DsidLocks::new();
        let _a = locks.lock_owned(DatasetId(1)).await;
        let b = tokio::time::timeout(Duration::from_millis(20), locks.lock_owned(DatasetId(2)));
        assert!(b.await.is_ok());
    }
}
