use crc::{CRC_32_ISO_HDLC, Crc};

use crate::domain::ports::{RegionReader, Validator};
use crate::fmt::{info, warn};

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);
const READ_CHUNK: usize = 256;

/// Accepts an image whose CRC-32 (ISO-HDLC) matches the announced value.
#[derive(Debug, Clone, Copy)]
pub struct Crc32Validator {
    expected: u32,
}

impl Crc32Validator {
    pub const fn new(expected: u32) -> Self {
        Self { expected }
    }

    /// CRC-32 of `len` bytes at `base`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn checksum<R: RegionReader>(reader: &mut R, base: u32, len: u32) -> Option<u32> {
        let mut digest = CRC32.digest();
        let mut buf = [0u8; READ_CHUNK];
        let mut offset = 0;
        while offset < len {
            let n = (len - offset).min(READ_CHUNK as u32);
            let part = &mut buf[..n as usize];
            reader.read(base + offset, part).ok()?;
            digest.update(part);
            offset += n;
        }
        Some(digest.finalize())
    }
}

impl Validator for Crc32Validator {
    fn validate<R: RegionReader>(&mut self, reader: &mut R, base: u32, len: u32) -> bool {
        let Some(actual) = Self::checksum(reader, base, len) else {
            warn!("fota: image read failed during validation");
            return false;
        };

        if actual == self.expected {
            info!("fota: image crc32 {:#x} ok", actual);
            true
        } else {
            warn!(
                "fota: image crc32 mismatch (expected {:#x}, got {:#x})",
                self.expected,
                actual
            );
            false
        }
    }
}
