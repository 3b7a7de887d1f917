//! Flash geometry and address arithmetic
//!
//! [`FlashGeometry`] answers how a logical address and length map onto
//! hardware operations: where reads must stop and pad, where erases must
//! start, and how much of a page a single program transaction may cover.

use crate::error::{Error, Result};

/// Log2 of the only supported erase sector size (4 KiB)
pub const SECTOR_SIZE_LOG2: u32 = 12;

/// Erase sector size in bytes
pub const SECTOR_SIZE: u32 = 1 << SECTOR_SIZE_LOG2;

/// The erased value for flash memory (all bits set)
pub const ERASED_VALUE: u8 = 0xFF;

/// Physical layout of the attached flash device
///
/// Immutable once the device has been initialised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlashGeometry {
    total_size: u32,
    sector_size_log2: u32,
    page_size: u32,
}

/// Result of clamping one read chunk against the end of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadSplit {
    /// Clamped start address of the transfer
    pub address: u32,
    /// Number of bytes to fetch from the device
    pub len: usize,
    /// Number of trailing bytes to fill with [`ERASED_VALUE`]
    pub fill: usize,
}

impl FlashGeometry {
    /// Create a geometry for a device of `total_size` bytes
    ///
    /// # Errors
    /// * `UnsupportedSectorSize` - if `sector_size` is not 4096
    /// * `InvalidGeometry` - if `total_size` is zero or `page_size` is not a
    ///   non-zero power of two
    pub fn new(total_size: u32, page_size: u32, sector_size: u32) -> Result<Self> {
        if sector_size != SECTOR_SIZE {
            return Err(Error::UnsupportedSectorSize(sector_size));
        }
        if total_size == 0 || !page_size.is_power_of_two() {
            return Err(Error::InvalidGeometry);
        }

        Ok(Self {
            total_size,
            sector_size_log2: SECTOR_SIZE_LOG2,
            page_size,
        })
    }

    /// Total flash size in bytes
    pub fn total_size(&self) -> u32 {
        self.total_size
    }

    /// Program page size in bytes
    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    /// Erase sector size in bytes
    pub fn sector_size(&self) -> u32 {
        1 << self.sector_size_log2
    }

    /// Number of whole pages on the device
    pub fn page_count(&self) -> u32 {
        self.total_size / self.page_size
    }

    /// Number of whole sectors on the device
    pub fn sector_count(&self) -> u32 {
        self.total_size >> self.sector_size_log2
    }

    /// Clamp an address to the end of the device
    ///
    /// Any address at or beyond `total_size` becomes `total_size`, which
    /// callers treat as "past the end".
    pub fn clamp_address(&self, addr: u32) -> u32 {
        addr.min(self.total_size)
    }

    /// Split one read chunk into the part backed by the device and the
    /// trailing part that reads as erased
    ///
    /// Reads never fail at the end of the device; the gap is padded with
    /// `0xFF`.
    pub fn split_for_read(&self, addr: u32, len: usize) -> ReadSplit {
        let address = self.clamp_address(addr);
        let available = (self.total_size - address) as usize;

        if len > available {
            ReadSplit {
                address,
                len: available,
                fill: len - available,
            }
        } else {
            ReadSplit {
                address,
                len,
                fill: 0,
            }
        }
    }

    /// Round an erase start down to its sector boundary
    ///
    /// The bytes skipped over by the rounding are added back to the length,
    /// so the originally requested range stays covered. Lengths that would
    /// overflow saturate, which still means "to the end of the device".
    pub fn align_erase_start(&self, addr: u32, len: usize) -> (u32, usize) {
        let aligned = self.sector_floor(addr);
        (aligned, len.saturating_add((addr - aligned) as usize))
    }

    /// Bytes left in the page containing `addr`
    pub fn page_remaining(&self, addr: u32) -> u32 {
        self.page_size - (addr & (self.page_size - 1))
    }

    /// Whether an erase of `[addr, addr + len)` covers the whole chip
    pub fn is_whole_chip(&self, addr: u32, len: usize) -> bool {
        addr == 0 && len as u64 >= self.total_size as u64
    }

    /// Whether `addr` sits on a sector boundary
    pub fn is_sector_aligned(&self, addr: u32) -> bool {
        self.sector_floor(addr) == addr
    }

    fn sector_floor(&self, addr: u32) -> u32 {
        (addr >> self.sector_size_log2) << self.sector_size_log2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FlashGeometry {
        FlashGeometry::new(0x10_0000, 256, 4096).unwrap()
    }

    #[test]
    fn test_rejects_other_sector_sizes() {
        assert_eq!(
            FlashGeometry::new(0x10_0000, 256, 65536),
            Err(Error::UnsupportedSectorSize(65536))
        );
        assert_eq!(
            FlashGeometry::new(0x10_0000, 200, 4096),
            Err(Error::InvalidGeometry)
        );
        assert_eq!(FlashGeometry::new(0, 256, 4096), Err(Error::InvalidGeometry));
    }

    #[test]
    fn test_counts() {
        let g = geometry();
        assert_eq!(g.sector_size(), 4096);
        assert_eq!(g.sector_count(), 256);
        assert_eq!(g.page_count(), 4096);
    }

    #[test]
    fn test_clamp_address() {
        let g = geometry();
        assert_eq!(g.clamp_address(0x1234), 0x1234);
        assert_eq!(g.clamp_address(0x10_0000), 0x10_0000);
        assert_eq!(g.clamp_address(u32::MAX), 0x10_0000);
    }

    #[test]
    fn test_split_inside_device() {
        let split = geometry().split_for_read(0x1000, 64);
        assert_eq!(
            split,
            ReadSplit {
                address: 0x1000,
                len: 64,
                fill: 0
            }
        );
    }

    #[test]
    fn test_split_straddling_end() {
        let split = geometry().split_for_read(0x0F_FFF0, 64);
        assert_eq!(split.address, 0x0F_FFF0);
        assert_eq!(split.len, 16);
        assert_eq!(split.fill, 48);
    }

    #[test]
    fn test_split_past_end() {
        let split = geometry().split_for_read(0x20_0000, 32);
        assert_eq!(split.address, 0x10_0000);
        assert_eq!(split.len, 0);
        assert_eq!(split.fill, 32);
    }

    #[test]
    fn test_align_erase_start() {
        let g = geometry();
        assert_eq!(g.align_erase_start(0x2000, 4096), (0x2000, 4096));
        // 0x100 bytes skipped by the rounding are added back
        assert_eq!(g.align_erase_start(0x2100, 4096), (0x2000, 4096 + 0x100));
        assert_eq!(g.align_erase_start(0x1800, usize::MAX), (0x1000, usize::MAX));
        assert!(g.is_sector_aligned(0x3000));
        assert!(!g.is_sector_aligned(0x3001));
    }

    #[test]
    fn test_page_remaining() {
        let g = geometry();
        assert_eq!(g.page_remaining(0x0FF0), 16);
        assert_eq!(g.page_remaining(0x1000), 256);
        assert_eq!(g.page_remaining(0x10FF), 1);
    }

    #[test]
    fn test_whole_chip() {
        let g = geometry();
        assert!(g.is_whole_chip(0, 0x10_0000));
        assert!(g.is_whole_chip(0, 0x20_0000));
        assert!(!g.is_whole_chip(0, 0x0F_F000));
        assert!(!g.is_whole_chip(0x1000, 0x10_0000));
    }
}
