use crate::domain::entity::WriteCursor;
use crate::domain::ports::{FlashDriver, StorageError};
use crate::infrastructure::services::StorageDevice;

/// Largest program unit a session can buffer.
pub(crate) const MAX_PROGRAM_UNIT: usize = 32;

/// Sequential image writer for one session.
///
/// Stream chunks may be arbitrarily sized, so the bytes past the last whole
/// program unit are kept in a tail buffer until the next chunk (or the final
/// flush, which pads with the erased value). Blocks are erased right before
/// the first write that touches them, tracked by a high-water mark.
///
/// A failed write keeps everything committed so far. [`Self::consumed`]
/// tells how much of the chunk was taken, the rest can be written again.
pub(crate) struct ImageWriter {
    cursor: WriteCursor,
    erased_to: u32,
    unit: usize,
    tail: [u8; MAX_PROGRAM_UNIT],
    tail_len: usize,
    consumed: usize,
}

impl ImageWriter {
    pub(crate) fn new(base: u32, unit: usize) -> Self {
        Self {
            cursor: WriteCursor::new(base),
            erased_to: base,
            unit,
            tail: [0xFF; MAX_PROGRAM_UNIT],
            tail_len: 0,
            consumed: 0,
        }
    }

    pub(crate) fn cursor(&self) -> WriteCursor {
        self.cursor
    }

    /// Bytes of the last [`Self::write`] chunk that were taken, including a
    /// failed call.
    pub(crate) fn consumed(&self) -> usize {
        self.consumed
    }

    /// Erases every block of `[erased_to, end)` that was not erased yet.
    ///
    /// `erased_to` starts on a block boundary and moves one block at a time,
    /// so a failed call resumes at the block that failed.
    pub(crate) fn ensure_erased<D: FlashDriver>(
        &mut self,
        device: &mut StorageDevice<D>,
        end: u32,
    ) -> Result<(), StorageError> {
        while self.erased_to < end {
            let block = device.layout().block_at(self.erased_to)?;
            device.erase_block(block.base_address)?;
            self.erased_to = block.end();
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn write<D: FlashDriver>(
        &mut self,
        device: &mut StorageDevice<D>,
        data: &[u8],
    ) -> Result<(), StorageError> {
        self.consumed = 0;
        let pending =
            u32::try_from(self.tail_len + data.len()).map_err(|_| StorageError::OutOfRange)?;
        let end = align_up(pending, self.unit as u32)
            .and_then(|padded| self.cursor.address().checked_add(padded))
            .ok_or(StorageError::OutOfRange)?;
        self.ensure_erased(device, end)?;

        let mut idx = 0;

        // Complete the partial unit left by the previous chunk
        if self.tail_len > 0 {
            let take = (self.unit - self.tail_len).min(data.len());
            self.tail[self.tail_len..self.tail_len + take].copy_from_slice(&data[..take]);
            self.tail_len += take;
            idx += take;
            self.consumed = idx;

            if self.tail_len == self.unit {
                self.program_tail(device)?;
            }
        }

        // Whole units
        let rem = &data[idx..];
        let aligned_len = rem.len() - rem.len() % self.unit;
        for unit in rem[..aligned_len].chunks_exact(self.unit) {
            device.program(self.cursor.address(), unit)?;
            self.cursor.advance(self.unit as u32);
            self.consumed += self.unit;
        }

        // Keep trailing bytes for the next chunk
        let tail_bytes = &rem[aligned_len..];
        if !tail_bytes.is_empty() {
            self.tail[..tail_bytes.len()].copy_from_slice(tail_bytes);
            self.tail_len = tail_bytes.len();
            self.consumed += tail_bytes.len();
        }

        Ok(())
    }

    /// Pads and programs the final partial unit, if any.
    pub(crate) fn flush<D: FlashDriver>(
        &mut self,
        device: &mut StorageDevice<D>,
    ) -> Result<(), StorageError> {
        if self.tail_len == 0 {
            return Ok(());
        }
        self.tail[self.tail_len..self.unit].fill(0xFF);
        self.program_tail(device)
    }

    #[allow(clippy::cast_possible_truncation)]
    fn program_tail<D: FlashDriver>(
        &mut self,
        device: &mut StorageDevice<D>,
    ) -> Result<(), StorageError> {
        device.program(self.cursor.address(), &self.tail[..self.unit])?;
        self.cursor.advance(self.unit as u32);
        self.tail_len = 0;
        self.tail.fill(0xFF);
        Ok(())
    }
}

/// Rounds `len` up to a multiple of `unit`.
pub(crate) fn align_up(len: u32, unit: u32) -> Option<u32> {
    len.checked_next_multiple_of(unit)
}
