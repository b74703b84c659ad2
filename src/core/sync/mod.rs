mod abort;
mod shared_storage;

pub use abort::AbortSignal;
pub use shared_storage::{SharedStorage, SharedStorageLock};
