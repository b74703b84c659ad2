use core::fmt;

use crate::domain::{
    entity::{AbortReason, BootSlot, ProgressSample},
    ports::RegionReader,
};

/// Why a fetch attempt produced no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FetchFault {
    /// No answer within the per-chunk timeout
    Timeout,
    /// Source answered with zero bytes
    Stalled,
    Network,
    /// Source broke the pull contract (e.g. returned more than requested)
    Protocol,
    /// Remote side refused to serve the image
    Rejected,
    Other,
}

impl fmt::Display for FetchFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FetchFault::Timeout => "timeout",
            FetchFault::Stalled => "stalled",
            FetchFault::Network => "network",
            FetchFault::Protocol => "protocol",
            FetchFault::Rejected => "rejected",
            FetchFault::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PullResult {
    /// `n` bytes were stored at the start of the buffer
    Data(usize),
    Eof,
    Retryable(FetchFault),
    Fatal(FetchFault),
}

/// Remote image supplier (HTTP body, MQTT stream, cloud SDK download).
#[allow(async_fn_in_trait)]
pub trait ByteSource {
    /// Reads up to `buf.len()` bytes starting at `offset` of the remote image.
    async fn pull(&mut self, offset: u32, buf: &mut [u8]) -> PullResult;
}

/// Decides whether a fully written image may be booted.
pub trait Validator {
    fn validate<R: RegionReader>(&mut self, reader: &mut R, base: u32, len: u32) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Started { total: Option<u32>, target: u32 },
    Progress(ProgressSample),
    Completed { bytes: u32 },
    Aborted { reason: AbortReason },
}

pub trait StatusSink {
    fn on_event(&mut self, event: StatusEvent);
}

impl<T: StatusSink + ?Sized> StatusSink for &mut T {
    fn on_event(&mut self, event: StatusEvent) {
        (**self).on_event(event);
    }
}

/// Sink that drops every event.
impl StatusSink for () {
    fn on_event(&mut self, _event: StatusEvent) {}
}

/// Error type for the firmware use cases
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FirmwareError {
    /// Another session owns the storage
    Busy,
    InvalidOffer,
    /// Offered image does not fit into the target slot
    ImageTooLarge,
    Aborted(AbortReason),
    /// Boot selection could not be switched to the new slot
    Activate,
}

impl fmt::Display for FirmwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FirmwareError::Busy => f.write_str("update already in progress"),
            FirmwareError::InvalidOffer => f.write_str("invalid firmware offer"),
            FirmwareError::ImageTooLarge => f.write_str("image larger than slot"),
            FirmwareError::Aborted(reason) => write!(f, "update aborted: {reason}"),
            FirmwareError::Activate => f.write_str("failed to activate slot"),
        }
    }
}

/// Bootloader hand-off.
#[allow(async_fn_in_trait)]
pub trait BootTrigger {
    /// Slot the running image was booted from.
    fn active_slot(&mut self) -> BootSlot;

    /// Marks `slot` as the boot image and resets into it. Hardware
    /// implementations do not return on success.
    async fn commit_and_reset(&mut self, slot: BootSlot) -> Result<(), FirmwareError>;
}
