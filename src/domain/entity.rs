use core::fmt;

use embassy_time::Instant;

use crate::domain::ports::{FetchFault, StorageError};

/// Application image slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BootSlot {
    A,
    B,
}

impl BootSlot {
    pub const fn as_u8(self) -> u8 {
        match self {
            BootSlot::A => 0,
            BootSlot::B => 1,
        }
    }

    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(BootSlot::A),
            1 => Some(BootSlot::B),
            _ => None,
        }
    }

    /// The other slot, i.e. the update target while `self` is running.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            BootSlot::A => BootSlot::B,
            BootSlot::B => BootSlot::A,
        }
    }
}

/// Address range reserved for one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRegion {
    pub base: u32,
    pub len: u32,
}

/// Placement of both application slots on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLayout {
    pub slot_a: SlotRegion,
    pub slot_b: SlotRegion,
}

impl SlotLayout {
    pub const fn new(slot_a: SlotRegion, slot_b: SlotRegion) -> Self {
        Self { slot_a, slot_b }
    }

    pub const fn region(&self, slot: BootSlot) -> SlotRegion {
        match slot {
            BootSlot::A => self.slot_a,
            BootSlot::B => self.slot_b,
        }
    }
}

/// Image received during one update session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareImage {
    /// `None` while streaming an image of unknown size
    pub total_size: Option<u32>,
    /// Bytes received from the source and committed to the write path
    pub bytes_written: u32,
    pub target_base: u32,
    pub slot: Option<BootSlot>,
}

impl FirmwareImage {
    pub const fn new(total_size: Option<u32>, target_base: u32) -> Self {
        Self {
            total_size,
            bytes_written: 0,
            target_base,
            slot: None,
        }
    }

    #[must_use]
    pub const fn with_slot(mut self, slot: BootSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    /// Whether every expected byte has arrived. Always `false` for unknown sizes.
    pub fn is_complete(&self) -> bool {
        self.total_size
            .is_some_and(|total| self.bytes_written >= total)
    }

    pub fn remaining(&self) -> Option<u32> {
        self.total_size
            .map(|total| total.saturating_sub(self.bytes_written))
    }
}

/// Next flash address to program. Moves by whole program units only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteCursor {
    base: u32,
    address: u32,
}

impl WriteCursor {
    pub const fn new(base: u32) -> Self {
        Self {
            base,
            address: base,
        }
    }

    pub const fn address(&self) -> u32 {
        self.address
    }

    /// Bytes programmed since the session start.
    pub const fn offset(&self) -> u32 {
        self.address - self.base
    }

    pub fn advance(&mut self, len: u32) {
        self.address += len;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSample {
    pub bytes_done: u32,
    pub bytes_total: Option<u32>,
    pub at: Instant,
}

impl ProgressSample {
    /// Completion percentage, `0` when the total is unknown.
    #[allow(clippy::cast_possible_truncation)]
    pub fn percent(&self) -> u8 {
        match self.bytes_total {
            Some(0) => 100,
            Some(total) => {
                let done = u64::from(self.bytes_done.min(total));
                (done * 100 / u64::from(total)) as u8
            }
            None => 0,
        }
    }
}

/// Why a session ended without an installable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortReason {
    /// Retry budget ran out
    FetchExhausted,
    FetchFatal(FetchFault),
    WriteFailed(StorageError),
    ValidationFailed,
    /// External abort request
    Cancelled,
    /// Source finished before the announced size arrived
    Truncated,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::FetchExhausted => f.write_str("fetch retries exhausted"),
            AbortReason::FetchFatal(fault) => write!(f, "fetch failed: {fault}"),
            AbortReason::WriteFailed(err) => write!(f, "write failed: {err}"),
            AbortReason::ValidationFailed => f.write_str("image validation failed"),
            AbortReason::Cancelled => f.write_str("cancelled"),
            AbortReason::Truncated => f.write_str("image truncated"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Fetching,
    Writing,
    Validating,
    Completed,
    Aborted(AbortReason),
}

impl SessionState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Aborted(_))
    }

    pub const fn is_active(&self) -> bool {
        matches!(
            self,
            SessionState::Fetching | SessionState::Writing | SessionState::Validating
        )
    }
}
