//! Fixed-size pool of store handles.
//!
//! Handlers borrow a handle for the duration of one logical step; when all
//! handles are out, `acquire` waits until one is returned. The pool is built
//! once during coordinator startup and passed to handlers through shared
//! state — no global instance.

use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::store::{Store, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool is shut down")]
    Closed,
}

struct PoolInner {
    free: Mutex<Vec<Store>>,
    permits: Arc<Semaphore>,
    size: usize,
}

#[derive(Clone)]
pub struct StorePool {
    inner: Arc<PoolInner>,
}

impl StorePool {
    /// Build a pool of `size` handles against an opened store.
    pub fn new(store: &Store, size: usize) -> Self {
        assert!(size > 0, "pool size must be positive");
        let free = (0..size).map(|_| store.clone()).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                permits: Arc::new(Semaphore::new(size)),
                size,
            }),
        }
    }

    /// Borrow a handle, waiting until one is free. The handle returns to the
    /// pool when the guard drops.
    pub async fn acquire(&self) -> Result<PooledStore, PoolError> {
        let permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;

        let store = self
            .inner
            .free
            .lock()
            .expect("pool mutex poisoned")
            .pop()
            .expect("permit held without a free handle");

        Ok(PooledStore {
            inner: Arc::clone(&self.inner),
            store: Some(store),
            _permit: permit,
        })
    }

    /// Stop handing out connections; outstanding guards drain normally.
    pub fn shutdown(&self) {
        self.inner.permits.close();
    }

    pub fn size(&self) -> usize {
        self.inner.size
    }

    /// Handles currently available without waiting.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }
}

impl std::fmt::Debug for StorePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorePool")
            .field("size", &self.inner.size)
            .field("available", &self.available())
            .finish()
    }
}

/// RAII guard for a borrowed store handle.
pub struct PooledStore {
    inner: Arc<PoolInner>,
    store: Option<Store>,
    _permit: OwnedSemaphorePermit,
}

impl Drop for PooledStore {
    fn drop(&mut self) {
        if let Some(store) = self.store.take() {
            self.inner
                .free
                .lock()
                .expect("pool mutex poisoned")
                .push(store);
        }
    }
}

impl std::ops::Deref for PooledStore {
    type Target = Store;

    fn deref(&self) -> &Store {
        self.store.as_ref().expect("store present until drop")
    }
}

impl From<PoolError> for StorageError {
    fn from(_: PoolError) -> Self {
        StorageError::Busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::setup_store;
    use std::time::Duration;

    #[tokio::test]
    async fn acquire_blocks_when_exhausted_and_resumes_on_release() {
        let (store, _temp) = setup_store();
        let pool = StorePool::new(&store, 1);

        let first = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        // Second acquire cannot complete while the first guard is held
        let second = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(second.is_err());

        drop(first);
        let second = tokio::time::timeout(Duration::from_millis(200), pool.acquire())
            .await
            .expect("acquire resumed after release")
            .unwrap();
        drop(second);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn shutdown_fails_new_acquires() {
        let (store, _temp) = setup_store();
        let pool = StorePool::new(&store, 2);

        pool.shutdown();
        assert!(pool.acquire().await.is_err());
    }

    #[tokio::test]
    async fn pooled_handle_runs_storage_operations() {
        let (store, _temp) = setup_store();
        let pool = StorePool::new(&store, 2);

        let conn = pool.acquire().await.unwrap();
        let user = crate::testutil::make_user("1234567890123");
        conn.register_user(&user).unwrap();
        assert!(conn.user_exists("1234567890123").unwrap());
    }
}
