//! RAM-backed flash simulator.
//!
//! Behaves like NOR flash: erased bytes read `0xFF`, programming only clears
//! bits and a unit must be erased before it is programmed again. Keeps a log of
//! the issued operations and supports fault injection for host tests.

use heapless::Vec;

use crate::core::region::{BlockIndex, EraseBlock, RegionError, RegionMap};
use crate::domain::ports::{DriverFault, FlashDriver, FlashStatus};

const ERASE_LOG_LEN: usize = 256;

/// Operations performed by a [`RamFlash`].
#[derive(Debug, Clone, Default)]
pub struct OpLog {
    erased: Vec<BlockIndex, ERASE_LOG_LEN>,
    pub erase_count: u32,
    /// Number of single-unit program operations
    pub program_count: u32,
    pub program_bytes: u32,
    pub unlock_count: u32,
    pub lock_count: u32,
}

impl OpLog {
    /// Erased blocks in issue order. Only the first entries are kept.
    pub fn erased(&self) -> &[BlockIndex] {
        &self.erased
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Faults {
    stuck_busy: bool,
    busy_after_erase: u32,
    bit_flip_at: Option<u32>,
    erase: Option<DriverFault>,
    program: Option<DriverFault>,
}

pub struct RamFlash<const SIZE: usize> {
    memory: [u8; SIZE],
    layout: RegionMap,
    unit: usize,
    locked: bool,
    latched: Option<DriverFault>,
    faults: Faults,
    busy_polls: u32,
    log: OpLog,
}

impl<const SIZE: usize> RamFlash<SIZE> {
    /// Fully erased device. `layout` must span exactly `SIZE` bytes and every
    /// block must be a multiple of `unit_size`.
    pub fn new(layout: RegionMap, unit_size: usize) -> Result<Self, RegionError> {
        if layout.len() as usize != SIZE || unit_size == 0 {
            return Err(RegionError::InvalidLayout);
        }
        for index in 0..layout.block_count() {
            let block = layout.block(BlockIndex(index))?;
            if block.size as usize % unit_size != 0 {
                return Err(RegionError::InvalidLayout);
            }
        }

        Ok(Self {
            memory: [0xFF; SIZE],
            layout,
            unit: unit_size,
            locked: true,
            latched: None,
            faults: Faults::default(),
            busy_polls: 0,
            log: OpLog::default(),
        })
    }

    pub fn memory(&self) -> &[u8; SIZE] {
        &self.memory
    }

    /// Bytes at device address `addr`.
    pub fn bytes_at(&self, addr: u32, len: usize) -> &[u8] {
        let start = (addr - self.layout.base()) as usize;
        &self.memory[start..start + len]
    }

    pub fn log(&self) -> &OpLog {
        &self.log
    }

    pub fn reset_log(&mut self) {
        self.log = OpLog::default();
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Keeps the status register busy forever.
    pub fn inject_stuck_busy(&mut self, stuck: bool) {
        self.faults.stuck_busy = stuck;
    }

    /// Every erase keeps the device busy for the next `polls` status reads.
    pub fn inject_busy_after_erase(&mut self, polls: u32) {
        self.faults.busy_after_erase = polls;
    }

    /// Flips bit 0 of the byte at `addr` whenever a unit covering it is programmed.
    pub fn inject_bit_flip(&mut self, addr: u32) {
        self.faults.bit_flip_at = Some(addr);
    }

    /// Every erase latches `fault` instead of erasing.
    pub fn inject_erase_fault(&mut self, fault: DriverFault) {
        self.faults.erase = Some(fault);
    }

    /// Every program latches `fault` instead of programming.
    pub fn inject_program_fault(&mut self, fault: DriverFault) {
        self.faults.program = Some(fault);
    }

    pub fn clear_faults(&mut self) {
        self.faults = Faults::default();
        self.latched = None;
        self.busy_polls = 0;
    }

    fn offset(&self, addr: u32, len: usize) -> Option<usize> {
        let start = addr.checked_sub(self.layout.base())? as usize;
        (start.checked_add(len)? <= SIZE).then_some(start)
    }
}

impl<const SIZE: usize> FlashDriver for RamFlash<SIZE> {
    fn layout(&self) -> &RegionMap {
        &self.layout
    }

    fn unit_size(&self) -> usize {
        self.unit
    }

    fn unlock(&mut self) {
        self.locked = false;
        self.log.unlock_count += 1;
    }

    fn lock(&mut self) {
        self.locked = true;
        self.log.lock_count += 1;
    }

    fn status(&mut self) -> FlashStatus {
        if self.faults.stuck_busy {
            return FlashStatus::Busy;
        }
        if self.busy_polls > 0 {
            self.busy_polls -= 1;
            return FlashStatus::Busy;
        }
        match self.latched {
            Some(fault) => FlashStatus::Fault(fault),
            None => FlashStatus::Ready,
        }
    }

    fn clear_status(&mut self) {
        self.latched = None;
    }

    fn erase(&mut self, block: &EraseBlock) -> Result<(), DriverFault> {
        if self.locked {
            return Err(DriverFault::WriteProtect);
        }
        if let Some(fault) = self.faults.erase {
            self.latched = Some(fault);
            return Ok(());
        }

        let start = self
            .offset(block.base_address, block.size as usize)
            .ok_or(DriverFault::Erase)?;
        self.memory[start..start + block.size as usize].fill(0xFF);

        self.busy_polls = self.faults.busy_after_erase;
        self.log.erase_count += 1;
        // the log is informational, overflowing entries are dropped
        let _ = self.log.erased.push(block.index);
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn program(&mut self, addr: u32, unit: &[u8]) -> Result<(), DriverFault> {
        if self.locked {
            return Err(DriverFault::WriteProtect);
        }
        if unit.len() != self.unit || addr as usize % self.unit != 0 {
            return Err(DriverFault::Program);
        }
        if let Some(fault) = self.faults.program {
            self.latched = Some(fault);
            return Ok(());
        }

        let start = self.offset(addr, unit.len()).ok_or(DriverFault::Program)?;
        let target = &mut self.memory[start..start + unit.len()];
        if target.iter().any(|&b| b != 0xFF) {
            self.latched = Some(DriverFault::Program);
            return Ok(());
        }
        for (cell, byte) in target.iter_mut().zip(unit) {
            *cell &= byte;
        }

        if let Some(flip) = self.faults.bit_flip_at {
            if flip >= addr && flip < addr + unit.len() as u32 {
                self.memory[start + (flip - addr) as usize] ^= 0x01;
            }
        }

        self.log.program_count += 1;
        self.log.program_bytes += unit.len() as u32;
        Ok(())
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DriverFault> {
        let start = self.offset(addr, buf.len()).ok_or(DriverFault::Read)?;
        buf.copy_from_slice(&self.memory[start..start + buf.len()]);
        Ok(())
    }
}
