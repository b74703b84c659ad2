//! Adapter for `embedded-storage` NOR flash (e.g. `esp_storage::FlashStorage`).

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::core::region::{EraseBlock, RegionError, RegionMap};
use crate::domain::ports::{DriverFault, FlashDriver, FlashStatus};
use crate::fmt::warn;

/// Flash driver over any [`NorFlash`] implementation.
///
/// Layout addresses are the flash offsets understood by `F`. Operations are
/// synchronous, so the device always reports ready. NOR flash has no lock
/// register, lock/unlock only track the scope.
pub struct NorFlashDriver<F: NorFlash> {
    flash: F,
    layout: RegionMap,
    locked: bool,
}

impl<F: NorFlash> NorFlashDriver<F> {
    pub fn new(flash: F, layout: RegionMap) -> Self {
        Self {
            flash,
            layout,
            locked: true,
        }
    }

    /// Uniform layout of `F::ERASE_SIZE` sectors covering `[start, start + len)`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn with_range(flash: F, start: u32, len: u32) -> Result<Self, RegionError> {
        let sector = F::ERASE_SIZE as u32;
        if sector == 0 || start % sector != 0 || len % sector != 0 {
            return Err(RegionError::InvalidLayout);
        }
        let layout = RegionMap::uniform(start, sector, len / sector)?;
        Ok(Self::new(flash, layout))
    }

    pub fn inner(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_inner(self) -> F {
        self.flash
    }
}

fn map_error<E: NorFlashError>(err: &E, fallback: DriverFault) -> DriverFault {
    match err.kind() {
        NorFlashErrorKind::NotAligned | NorFlashErrorKind::OutOfBounds => DriverFault::Other,
        _ => fallback,
    }
}

impl<F: NorFlash> FlashDriver for NorFlashDriver<F> {
    fn layout(&self) -> &RegionMap {
        &self.layout
    }

    fn unit_size(&self) -> usize {
        F::WRITE_SIZE
    }

    fn unlock(&mut self) {
        self.locked = false;
    }

    fn lock(&mut self) {
        self.locked = true;
    }

    fn status(&mut self) -> FlashStatus {
        FlashStatus::Ready
    }

    fn erase(&mut self, block: &EraseBlock) -> Result<(), DriverFault> {
        if self.locked {
            return Err(DriverFault::WriteProtect);
        }
        self.flash
            .erase(block.base_address, block.end())
            .map_err(|e| {
                warn!("flash: erase failed at {:#x}", block.base_address);
                map_error(&e, DriverFault::Erase)
            })
    }

    fn program(&mut self, addr: u32, unit: &[u8]) -> Result<(), DriverFault> {
        if self.locked {
            return Err(DriverFault::WriteProtect);
        }
        self.flash.write(addr, unit).map_err(|e| {
            warn!("flash: write failed at {:#x}", addr);
            map_error(&e, DriverFault::Program)
        })
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), DriverFault> {
        self.flash
            .read(addr, buf)
            .map_err(|e| map_error(&e, DriverFault::Read))
    }
}

#[cfg(test)]
mod tests {
    use embedded_storage::nor_flash::{ErrorType, ReadNorFlash};

    use super::*;
    use crate::infrastructure::services::StorageDevice;

    const CAPACITY: usize = 8192;

    /// Minimal in-memory NOR flash with 4 KiB sectors and 4-byte writes.
    struct MockNor {
        data: [u8; CAPACITY],
        writes: u32,
    }

    impl MockNor {
        fn new() -> Self {
            Self {
                data: [0xFF; CAPACITY],
                writes: 0,
            }
        }
    }

    impl ErrorType for MockNor {
        type Error = NorFlashErrorKind;
    }

    impl ReadNorFlash for MockNor {
        const READ_SIZE: usize = 1;

        fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            let end = start + bytes.len();
            if end > CAPACITY {
                return Err(NorFlashErrorKind::OutOfBounds);
            }
            bytes.copy_from_slice(&self.data[start..end]);
            Ok(())
        }

        fn capacity(&self) -> usize {
            CAPACITY
        }
    }

    impl NorFlash for MockNor {
        const WRITE_SIZE: usize = 4;
        const ERASE_SIZE: usize = 4096;

        fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
            if from % 4096 != 0 || to % 4096 != 0 {
                return Err(NorFlashErrorKind::NotAligned);
            }
            self.data[from as usize..to as usize].fill(0xFF);
            Ok(())
        }

        fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
            let start = offset as usize;
            for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
                *cell &= byte;
            }
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn range_must_be_sector_aligned() {
        assert!(NorFlashDriver::with_range(MockNor::new(), 0, 8192).is_ok());
        assert!(NorFlashDriver::with_range(MockNor::new(), 100, 4096).is_err());
        assert!(NorFlashDriver::with_range(MockNor::new(), 0, 5000).is_err());
    }

    #[test]
    fn storage_device_runs_on_nor_flash() {
        let driver = NorFlashDriver::with_range(MockNor::new(), 4096, 4096).unwrap();
        let mut device = StorageDevice::new(driver);

        {
            let mut guard = device.unlock();
            guard.erase_block(4096).unwrap();
            guard.program(4100, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        }

        let mut buf = [0u8; 12];
        device.read(4096, &mut buf).unwrap();
        assert_eq!(buf, [0xFF, 0xFF, 0xFF, 0xFF, 1, 2, 3, 4, 5, 6, 7, 8]);

        let mut nor = device.into_driver().into_inner();
        assert_eq!(nor.writes, 2);
        let mut outside = [0u8; 4];
        nor.read(0, &mut outside).unwrap();
        assert_eq!(outside, [0xFF; 4]);
    }
}
