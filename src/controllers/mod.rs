mod update;
mod writer;

pub use update::{SessionError, SessionOutcome, UpdateController};
