//! Linear address to erase-block arithmetic.
//!
//! A layout is a run of sector groups starting at a base address. Uniform
//! parts (ESP32 4 KiB sectors) use a single group; mixed parts such as the
//! GD32F4 (16 KiB, 64 KiB and 128 KiB sectors) use one group per size.

use heapless::Vec;

/// Maximum number of sector groups in a layout.
pub const MAX_SECTOR_GROUPS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RegionError {
    /// Address (or span end) outside of the mapped device range
    AddressOutOfRange(u32),
    /// Layout has no blocks or a group with zero count/size
    InvalidLayout,
    /// More than [`MAX_SECTOR_GROUPS`] groups
    TooManyGroups,
    /// Layout end does not fit into the 32-bit address space
    Overflow,
}

/// `count` consecutive sectors of `size` bytes each.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectorGroup {
    pub count: u32,
    pub size: u32,
}

impl SectorGroup {
    pub const fn new(count: u32, size: u32) -> Self {
        Self { count, size }
    }
}

/// Device-wide erase block number, counted from the layout base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BlockIndex(pub u32);

/// One erasable unit of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseBlock {
    pub index: BlockIndex,
    pub base_address: u32,
    pub size: u32,
}

impl EraseBlock {
    /// First address past the block.
    pub fn end(&self) -> u32 {
        self.base_address + self.size
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base_address && addr < self.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMap {
    base: u32,
    end: u32,
    block_count: u32,
    groups: Vec<SectorGroup, MAX_SECTOR_GROUPS>,
}

impl RegionMap {
    /// Layout made of `count` blocks of `block_size` bytes.
    pub fn uniform(base: u32, block_size: u32, count: u32) -> Result<Self, RegionError> {
        Self::new(base, &[SectorGroup::new(count, block_size)])
    }

    pub fn new(base: u32, groups: &[SectorGroup]) -> Result<Self, RegionError> {
        if groups.is_empty() {
            return Err(RegionError::InvalidLayout);
        }

        let mut stored = Vec::new();
        let mut end = base;
        let mut block_count: u32 = 0;
        for group in groups {
            if group.count == 0 || group.size == 0 {
                return Err(RegionError::InvalidLayout);
            }
            let len = group
                .count
                .checked_mul(group.size)
                .ok_or(RegionError::Overflow)?;
            end = end.checked_add(len).ok_or(RegionError::Overflow)?;
            block_count = block_count
                .checked_add(group.count)
                .ok_or(RegionError::Overflow)?;
            stored.push(*group).map_err(|_| RegionError::TooManyGroups)?;
        }

        Ok(Self {
            base,
            end,
            block_count,
            groups: stored,
        })
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    /// First address past the device.
    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn len(&self) -> u32 {
        self.end - self.base
    }

    pub fn is_empty(&self) -> bool {
        self.block_count == 0
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn contains(&self, addr: u32) -> bool {
        addr >= self.base && addr < self.end
    }

    /// Whether `[start, end)` lies within the device.
    pub fn contains_span(&self, start: u32, end: u32) -> bool {
        start <= end && start >= self.base && end <= self.end
    }

    pub fn block_of(&self, addr: u32) -> Result<BlockIndex, RegionError> {
        self.block_at(addr).map(|block| block.index)
    }

    /// Block containing `addr`.
    pub fn block_at(&self, addr: u32) -> Result<EraseBlock, RegionError> {
        if !self.contains(addr) {
            return Err(RegionError::AddressOutOfRange(addr));
        }

        let mut offset = addr - self.base;
        let mut group_base = self.base;
        let mut first_index = 0;
        for group in &self.groups {
            let group_len = group.count * group.size;
            if offset < group_len {
                let within = offset / group.size;
                return Ok(EraseBlock {
                    index: BlockIndex(first_index + within),
                    base_address: group_base + within * group.size,
                    size: group.size,
                });
            }
            offset -= group_len;
            group_base += group_len;
            first_index += group.count;
        }

        Err(RegionError::AddressOutOfRange(addr))
    }

    pub fn block(&self, index: BlockIndex) -> Result<EraseBlock, RegionError> {
        let mut remaining = index.0;
        let mut group_base = self.base;
        for group in &self.groups {
            if remaining < group.count {
                return Ok(EraseBlock {
                    index,
                    base_address: group_base + remaining * group.size,
                    size: group.size,
                });
            }
            remaining -= group.count;
            group_base += group.count * group.size;
        }

        Err(RegionError::AddressOutOfRange(self.end))
    }

    /// Minimal ascending run of blocks covering `[start, end)`.
    ///
    /// An empty span (`start == end`) covers no block.
    pub fn span_to_blocks(&self, start: u32, end: u32) -> Result<BlockSpan, RegionError> {
        if start > end || start < self.base {
            return Err(RegionError::AddressOutOfRange(start));
        }
        if end > self.end {
            return Err(RegionError::AddressOutOfRange(end));
        }
        if start == end {
            return Ok(BlockSpan { next: 0, end: 0 });
        }

        let first = self.block_of(start)?;
        let last = self.block_of(end - 1)?;
        Ok(BlockSpan {
            next: first.0,
            end: last.0 + 1,
        })
    }
}

/// Ascending run of block indices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpan {
    next: u32,
    end: u32,
}

impl BlockSpan {
    pub fn first(&self) -> Option<BlockIndex> {
        (self.next < self.end).then_some(BlockIndex(self.next))
    }
}

impl Iterator for BlockSpan {
    type Item = BlockIndex;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let index = BlockIndex(self.next);
        self.next += 1;
        Some(index)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.end.saturating_sub(self.next) as usize;
        (len, Some(len))
    }
}

impl ExactSizeIterator for BlockSpan {}
