use core::ops::{Deref, DerefMut};

use embassy_sync::{
    blocking_mutex::raw::RawMutex,
    mutex::{Mutex, MutexGuard, TryLockError},
};

use crate::domain::ports::FlashDriver;
use crate::infrastructure::services::StorageDevice;

/// Storage device shared between the update session and other flash users.
///
/// The guard derefs directly to [`StorageDevice`], so call sites don't deal
/// with the mutex guard type.
pub struct SharedStorage<M: RawMutex, D: FlashDriver> {
    inner: Mutex<M, StorageDevice<D>>,
}

impl<M: RawMutex, D: FlashDriver> SharedStorage<M, D> {
    pub const fn new(device: StorageDevice<D>) -> Self {
        Self {
            inner: Mutex::new(device),
        }
    }

    pub async fn lock(&self) -> SharedStorageLock<'_, M, D> {
        SharedStorageLock {
            guard: self.inner.lock().await,
        }
    }

    /// Fails instead of waiting while another session holds the device.
    pub fn try_lock(&self) -> Result<SharedStorageLock<'_, M, D>, TryLockError> {
        self.inner
            .try_lock()
            .map(|guard| SharedStorageLock { guard })
    }

    pub fn into_inner(self) -> StorageDevice<D> {
        self.inner.into_inner()
    }
}

pub struct SharedStorageLock<'a, M: RawMutex, D: FlashDriver> {
    guard: MutexGuard<'a, M, StorageDevice<D>>,
}

impl<M: RawMutex, D: FlashDriver> Deref for SharedStorageLock<'_, M, D> {
    type Target = StorageDevice<D>;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<M: RawMutex, D: FlashDriver> DerefMut for SharedStorageLock<'_, M, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}
