use core::fmt;

use crate::core::region::{EraseBlock, RegionError, RegionMap};

/// Fault flags reported by the flash controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DriverFault {
    /// Write to a hardware-protected page
    WriteProtect,
    /// Program rejected, typically a unit that was not erased
    Program,
    Erase,
    Read,
    Other,
}

impl fmt::Display for DriverFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriverFault::WriteProtect => "write protect",
            DriverFault::Program => "program",
            DriverFault::Erase => "erase",
            DriverFault::Read => "read",
            DriverFault::Other => "other",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashStatus {
    Ready,
    /// An operation is still in progress
    Busy,
    Fault(DriverFault),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    /// Mutating call outside of an unlock scope
    NotUnlocked,
    /// Target block is write protected
    Protected,
    /// Device stayed busy past the poll limit
    Busy,
    Hardware(DriverFault),
    Misaligned,
    OutOfRange,
    /// Read-back differs from the programmed data
    VerifyMismatch,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::NotUnlocked => f.write_str("storage is locked"),
            StorageError::Protected => f.write_str("block is write protected"),
            StorageError::Busy => f.write_str("device busy"),
            StorageError::Hardware(fault) => write!(f, "hardware fault ({fault})"),
            StorageError::Misaligned => f.write_str("misaligned access"),
            StorageError::OutOfRange => f.write_str("address out of range"),
            StorageError::VerifyMismatch => f.write_str("read-back mismatch"),
        }
    }
}

impl From<RegionError> for StorageError {
    fn from(_: RegionError) -> Self {
        StorageError::OutOfRange
    }
}

/// Vendor flash controller.
///
/// Drivers only issue raw operations. Range, protection, alignment and
/// read-back checks are done by [`crate::StorageDevice`].
pub trait FlashDriver {
    fn layout(&self) -> &RegionMap;

    /// Size of the smallest programmable unit in bytes.
    fn unit_size(&self) -> usize;

    fn unlock(&mut self);

    fn lock(&mut self);

    fn status(&mut self) -> FlashStatus;

    /// Clears latched fault flags.
    fn clear_status(&mut self) {}

    fn erase(&mut self, block: &EraseBlock) -> Result<(), DriverFault>;

    /// Programs exactly one unit at a unit-aligned address.
    fn program(&mut self, addr: u32, unit: &[u8]) -> Result<(), DriverFault>;

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DriverFault>;
}

/// Read access to a programmed region, used by validators.
pub trait RegionReader {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;
}
