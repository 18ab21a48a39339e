//! Disposable storage for diagnostic runs.

use crate::error::StorageError;
use crate::repositories::LocalStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

type ReleaseHook = Box<dyn FnOnce() + Send + Sync>;

/// A storage instance living in its own temporary directory.
///
/// The directory is removed when the instance is closed, and also when it is
/// dropped on any other path (early return, error, panic).
pub struct EphemeralStorage {
    store: LocalStore,
    dir: Option<TempDir>,
    on_release: Option<ReleaseHook>,
}

impl EphemeralStorage {
    /// Creates a fresh instance in a new temporary directory under `root`
    /// (the system temporary directory when `None`).
    ///
    /// # Errors
    /// Returns an error if the directory cannot be created.
    pub fn create(root: Option<&Path>) -> Result<Self, StorageError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("ledger-check-");
        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root)?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let store = LocalStore::scratch(dir.path());
        debug!(store = %store.id(), path = %dir.path().display(), "Provisioned ephemeral storage");
        Ok(Self {
            store,
            dir: Some(dir),
            on_release: None,
        })
    }

    /// Registers a callback fired exactly once when the instance is released.
    #[must_use]
    pub fn with_release_hook(mut self, hook: impl FnOnce() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// The underlying store.
    #[must_use]
    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Closes the store and removes its directory.
    ///
    /// # Errors
    /// Returns an error if the store fails to close. The directory is
    /// removed regardless.
    pub async fn close(mut self) -> Result<(), StorageError> {
        let closed = self.store.close().await;
        self.release();
        closed
    }

    fn release(&mut self) {
        if let Some(dir) = self.dir.take() {
            self.store.close_now();
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "Failed to remove ephemeral storage");
            }
        }
        if let Some(hook) = self.on_release.take() {
            hook();
        }
    }
}

impl Drop for EphemeralStorage {
    fn drop(&mut self) {
        self.release();
    }
}

/// Source of ephemeral storage instances.
#[async_trait]
pub trait StorageProvisioner: Send + Sync {
    /// Provisions a fresh, empty instance.
    async fn provision(&self) -> Result<EphemeralStorage, StorageError>;
}

/// Provisions instances in temporary directories.
#[derive(Debug, Clone, Default)]
pub struct TempDirProvisioner {
    root: Option<PathBuf>,
}

impl TempDirProvisioner {
    /// Creates a provisioner using `root` as the parent directory.
    #[must_use]
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }
}

#[async_trait]
impl StorageProvisioner for TempDirProvisioner {
    async fn provision(&self) -> Result<EphemeralStorage, StorageError> {
        EphemeralStorage::create(self.root.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let storage = TempDirProvisioner::new(Some(root.path().to_path_buf()))
            .provision()
            .await
            .unwrap();
        let path = storage.store().path().to_path_buf();
        let store = storage.store().clone();
        assert!(path.exists());

        storage.close().await.unwrap();
        assert!(!path.exists());
        assert!(store.is_closed().await);
    }

    #[tokio::test]
    async fn test_drop_releases_once() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let storage = EphemeralStorage::create(None).unwrap().with_release_hook(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let path = storage.store().path().to_path_buf();

        drop(storage);
        assert!(!path.exists());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_release_on_panic() {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();

        let result = tokio::spawn(async move {
            let _storage = EphemeralStorage::create(None).unwrap().with_release_hook(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            panic!("diagnostic attempt blew up");
        })
        .await;

        assert!(result.is_err());
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }
}
