pub mod progress;
pub mod region;
pub mod retry;
pub mod sync;

pub use progress::ProgressGate;
pub use region::{BlockIndex, BlockSpan, EraseBlock, RegionError, RegionMap, SectorGroup};
pub use retry::{RetryBudget, RetryDecision};
pub use sync::{AbortSignal, SharedStorage, SharedStorageLock};
