//! Flash styles.
//!
//! The SPI NOR parts these file systems target all share 4 KiB erase
//! sectors but differ in how many of them a given board carries.  The
//! layouts here cover the device the design was sized for plus smaller
//! ones that keep full-device tests quick.

use crate::SimFlash;
use anyhow::Result;

/// The configuration of a single flash device.
pub struct FlashLayout {
    pub sector_size: usize,
    pub sector_count: usize,
}

impl FlashLayout {
    pub fn build(&self) -> Result<SimFlash> {
        SimFlash::new(self.sector_size, self.sector_count)
    }
}

/// The 2 MiB part the named-file store was sized for: 512 sectors of
/// 4 KiB, 32 pages per sector.
pub static SPI_2M: FlashLayout = FlashLayout {
    sector_size: 4096,
    sector_count: 512,
};

/// A 256 KiB device.  Large enough to hold a useful population of files,
/// small enough that whole-device scans stay cheap in tests.
pub static SPI_256K: FlashLayout = FlashLayout {
    sector_size: 4096,
    sector_count: 64,
};

/// A 64 KiB device matching the canonical circular-log region: 16
/// sectors, 2048 slots of 32 bytes.
pub static RING_64K: FlashLayout = FlashLayout {
    sector_size: 4096,
    sector_count: 16,
};

/// All of the layouts.
pub static ALL_LAYOUTS: [&'static FlashLayout; 3] = [&SPI_2M, &SPI_256K, &RING_64K];

/// An iterator that builds each layout in turn.
pub fn all_layouts() -> impl Iterator<Item = Result<SimFlash>> {
    ALL_LAYOUTS.iter().map(|l| l.build())
}
