//! Policy layer over a raw flash driver.
//!
//! Every mutating call is checked for range, write protection, alignment and
//! unlock state before the driver is touched, and every programmed unit is
//! read back and compared.

use core::ops::{Deref, DerefMut};

use crate::config;
use crate::core::region::{BlockIndex, RegionMap};
use crate::domain::ports::{FlashDriver, FlashStatus, RegionReader, StorageError};
use crate::fmt::{debug, warn};

/// Maximum number of blocks tracked by a [`ProtectionMap`].
pub const MAX_PROTECTED_BLOCKS: usize = 1024;

const VERIFY_CHUNK: usize = 32;

/// Bitmap of write protected erase blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtectionMap {
    bits: [u32; MAX_PROTECTED_BLOCKS / 32],
}

impl ProtectionMap {
    pub const fn new() -> Self {
        Self {
            bits: [0; MAX_PROTECTED_BLOCKS / 32],
        }
    }

    pub fn protect(&mut self, block: BlockIndex) -> Result<(), StorageError> {
        let (word, bit) = Self::position(block)?;
        self.bits[word] |= 1 << bit;
        Ok(())
    }

    pub fn unprotect(&mut self, block: BlockIndex) -> Result<(), StorageError> {
        let (word, bit) = Self::position(block)?;
        self.bits[word] &= !(1 << bit);
        Ok(())
    }

    /// Protects every block overlapping `[start, end)`, e.g. the bootloader.
    pub fn protect_range(
        &mut self,
        layout: &RegionMap,
        start: u32,
        end: u32,
    ) -> Result<(), StorageError> {
        for block in layout.span_to_blocks(start, end)? {
            self.protect(block)?;
        }
        Ok(())
    }

    pub fn is_protected(&self, block: BlockIndex) -> bool {
        Self::position(block)
            .map(|(word, bit)| self.bits[word] & (1 << bit) != 0)
            .unwrap_or(false)
    }

    fn position(block: BlockIndex) -> Result<(usize, u32), StorageError> {
        let index = block.0 as usize;
        if index >= MAX_PROTECTED_BLOCKS {
            return Err(StorageError::OutOfRange);
        }
        Ok((index / 32, block.0 % 32))
    }
}

impl Default for ProtectionMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Operation issued to the driver that was still running when the ready
/// poll gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Erase(u32),
    Program(u32),
}

pub struct StorageDevice<D: FlashDriver> {
    driver: D,
    protection: ProtectionMap,
    unlocked: bool,
    busy_poll_limit: u32,
    in_flight: Option<InFlight>,
}

impl<D: FlashDriver> StorageDevice<D> {
    pub const fn new(driver: D) -> Self {
        Self::with_protection(driver, ProtectionMap::new())
    }

    pub const fn with_protection(driver: D, protection: ProtectionMap) -> Self {
        Self {
            driver,
            protection,
            unlocked: false,
            busy_poll_limit: config::STORAGE.busy_poll_limit,
            in_flight: None,
        }
    }

    #[must_use]
    pub fn with_busy_poll_limit(mut self, limit: u32) -> Self {
        self.busy_poll_limit = limit;
        self
    }

    pub fn layout(&self) -> &RegionMap {
        self.driver.layout()
    }

    pub fn unit_size(&self) -> usize {
        self.driver.unit_size()
    }

    pub fn protection(&self) -> &ProtectionMap {
        &self.protection
    }

    pub fn protection_mut(&mut self) -> &mut ProtectionMap {
        &mut self.protection
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn into_driver(self) -> D {
        self.driver
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked
    }

    /// Opens a write scope. The driver is locked again when the guard drops.
    pub fn unlock(&mut self) -> WriteGuard<'_, D> {
        self.driver.unlock();
        self.unlocked = true;
        WriteGuard { device: self }
    }

    /// Checks that `[start, end)` is mapped and not write protected.
    pub fn check_writable(&self, start: u32, end: u32) -> Result<(), StorageError> {
        let layout = self.driver.layout();
        for block in layout.span_to_blocks(start, end)? {
            if self.protection.is_protected(block) {
                return Err(StorageError::Protected);
            }
        }
        Ok(())
    }

    /// Erases the block containing `addr`.
    ///
    /// [`StorageError::Busy`] is transient: calling again with the same
    /// address finishes the erase already issued instead of restarting it.
    pub fn erase_block(&mut self, addr: u32) -> Result<(), StorageError> {
        let block = self.driver.layout().block_at(addr)?;
        if self.protection.is_protected(block.index) {
            return Err(StorageError::Protected);
        }
        if !self.unlocked {
            return Err(StorageError::NotUnlocked);
        }

        let op = InFlight::Erase(block.base_address);
        if self.settle()? != Some(op) {
            self.driver.erase(&block).map_err(StorageError::Hardware)?;
            self.complete(op)?;
        }

        debug!(
            "flash: erased block {} at {:#x} ({} bytes)",
            block.index.0,
            block.base_address,
            block.size
        );
        Ok(())
    }

    /// Erases the minimal block run covering `[start, end)` in ascending
    /// order. Returns the number of erased blocks.
    ///
    /// A span reaching into a protected block erases nothing. Driver failures
    /// stop the run, leaving the blocks before it erased.
    pub fn erase_span(&mut self, start: u32, end: u32) -> Result<u32, StorageError> {
        self.check_writable(start, end)?;
        let span = self.driver.layout().span_to_blocks(start, end)?;
        let mut erased = 0;
        for index in span {
            let block = self.driver.layout().block(index)?;
            self.erase_block(block.base_address)?;
            erased += 1;
        }
        Ok(erased)
    }

    /// Programs `data` unit by unit, verifying every unit by read-back.
    ///
    /// All preconditions are checked for the whole span before the first
    /// unit is written. On [`StorageError::Busy`] the units before the stalled
    /// one are committed. Retrying from the stalled unit finishes it without
    /// programming it twice.
    #[allow(clippy::cast_possible_truncation)]
    pub fn program(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        let unit = self.driver.unit_size();
        let aligned = unit != 0 && addr as usize % unit == 0 && data.len() % unit == 0;
        debug_assert!(
            aligned,
            "flash: misaligned program at {:#x} ({} bytes)",
            addr,
            data.len()
        );
        if !aligned {
            return Err(StorageError::Misaligned);
        }

        let len = u32::try_from(data.len()).map_err(|_| StorageError::OutOfRange)?;
        let end = addr.checked_add(len).ok_or(StorageError::OutOfRange)?;
        if !self.driver.layout().contains_span(addr, end) {
            return Err(StorageError::OutOfRange);
        }
        self.check_writable(addr, end)?;
        if !self.unlocked {
            return Err(StorageError::NotUnlocked);
        }

        let mut at = addr;
        for chunk in data.chunks_exact(unit) {
            let op = InFlight::Program(at);
            if self.settle()? != Some(op) {
                self.driver
                    .program(at, chunk)
                    .map_err(StorageError::Hardware)?;
                self.complete(op)?;
            }
            self.verify(at, chunk)?;
            // unit fits into u32 since the span did
            at += chunk.len() as u32;
        }

        Ok(())
    }

    /// Reads `buf.len()` bytes at `addr`.
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let in_range = u32::try_from(buf.len())
            .ok()
            .and_then(|len| addr.checked_add(len))
            .is_some_and(|end| self.driver.layout().contains_span(addr, end));
        debug_assert!(
            in_range,
            "flash: read out of range at {:#x} ({} bytes)",
            addr,
            buf.len()
        );
        if !in_range {
            return Err(StorageError::OutOfRange);
        }

        self.driver.read(addr, buf).map_err(StorageError::Hardware)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn verify(&mut self, addr: u32, expected: &[u8]) -> Result<(), StorageError> {
        let mut readback = [0u8; VERIFY_CHUNK];
        let mut at = addr;
        for part in expected.chunks(VERIFY_CHUNK) {
            let buf = &mut readback[..part.len()];
            self.driver.read(at, buf).map_err(StorageError::Hardware)?;
            if buf != part {
                warn!("flash: verify mismatch at {:#x}", at);
                return Err(StorageError::VerifyMismatch);
            }
            at += part.len() as u32;
        }
        Ok(())
    }

    /// Waits for any interrupted operation to finish and returns it.
    fn settle(&mut self) -> Result<Option<InFlight>, StorageError> {
        self.wait_ready()?;
        Ok(self.in_flight.take())
    }

    /// Waits for `op` to finish, remembering it when the device stays busy.
    fn complete(&mut self, op: InFlight) -> Result<(), StorageError> {
        let result = self.wait_ready();
        if result == Err(StorageError::Busy) {
            self.in_flight = Some(op);
        }
        result
    }

    /// Bounded wait for the driver to become ready.
    fn wait_ready(&mut self) -> Result<(), StorageError> {
        for _ in 0..self.busy_poll_limit {
            match self.driver.status() {
                FlashStatus::Ready => return Ok(()),
                FlashStatus::Busy => core::hint::spin_loop(),
                FlashStatus::Fault(fault) => {
                    self.driver.clear_status();
                    warn!("flash: driver fault {:?}", fault);
                    return Err(StorageError::Hardware(fault));
                }
            }
        }

        warn!("flash: still busy after {} polls", self.busy_poll_limit);
        Err(StorageError::Busy)
    }
}

impl<D: FlashDriver> RegionReader for StorageDevice<D> {
    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        StorageDevice::read(self, addr, buf)
    }
}

/// Write access scope. Locks the driver again on drop.
pub struct WriteGuard<'a, D: FlashDriver> {
    device: &'a mut StorageDevice<D>,
}

impl<D: FlashDriver> Deref for WriteGuard<'_, D> {
    type Target = StorageDevice<D>;

    fn deref(&self) -> &Self::Target {
        self.device
    }
}

impl<D: FlashDriver> DerefMut for WriteGuard<'_, D> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.device
    }
}

impl<D: FlashDriver> Drop for WriteGuard<'_, D> {
    fn drop(&mut self) {
        self.device.unlocked = false;
        self.device.driver.lock();
    }
}
