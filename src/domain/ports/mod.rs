pub mod firmware;
pub mod storage;

pub use firmware::*;
pub use storage::*;
