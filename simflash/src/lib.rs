//! Simulated NOR flash.
//!
//! An in-memory flash device with the semantics the file system engines
//! are built against: reads at any byte offset, writes that bitwise-AND
//! the source into the array, and sector erases that restore 0xFF.  A
//! write never sets a bit; only `erase` does.
//!
//! Beyond the bare device the simulator keeps the accounting that tests
//! care about: how often each sector has been erased (the cost the whole
//! design tries to minimize) and how many writes have been issued.  A
//! write fault can be injected to exercise device-failure paths, and the
//! [`Checked`] wrapper asserts the bit-clearing discipline on every write
//! that reaches the device.

use anyhow::{bail, Result};
use storage::{check_sector, check_slice, Flash, ReadFlash};

pub mod gen;
pub mod styles;

pub struct SimFlash {
    sector_size: usize,
    sector_count: usize,
    data: Vec<u8>,
    erase_counts: Vec<u32>,
    write_count: usize,
    fail_after: Option<usize>,
}

impl SimFlash {
    /// Create a device of `sector_count` sectors, each `sector_size`
    /// bytes, fully erased.
    pub fn new(sector_size: usize, sector_count: usize) -> Result<SimFlash> {
        if sector_size == 0 || !sector_size.is_power_of_two() {
            bail!("sector size {} is not a power of two", sector_size);
        }
        if sector_count == 0 {
            bail!("device must have at least one sector");
        }
        Ok(SimFlash {
            sector_size,
            sector_count,
            data: vec![0xFF; sector_size * sector_count],
            erase_counts: vec![0; sector_count],
            write_count: 0,
            fail_after: None,
        })
    }

    /// Copy raw bytes into the backing array, bypassing the NOR write
    /// rules.  Intended for seeding test fixtures.
    pub fn install(&mut self, data: &[u8], offset: usize) -> Result<()> {
        if offset + data.len() > self.data.len() {
            bail!("install of {} bytes at {} overruns device", data.len(), offset);
        }
        self.data[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// The raw contents of the device.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// How many times `sector` has been erased.
    pub fn erase_count(&self, sector: usize) -> u32 {
        self.erase_counts[sector]
    }

    /// Total erases across the device.
    pub fn total_erases(&self) -> u32 {
        self.erase_counts.iter().sum()
    }

    /// Number of write calls issued so far.
    pub fn write_count(&self) -> usize {
        self.write_count
    }

    /// Let `n` more writes succeed, then fail every subsequent write with
    /// [`storage::Error::Io`] until cleared.
    pub fn set_write_failure(&mut self, n: usize) {
        self.fail_after = Some(n);
    }

    pub fn clear_write_failure(&mut self) {
        self.fail_after = None;
    }
}

impl ReadFlash for SimFlash {
    fn capacity(&self) -> usize {
        self.data.len()
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn sector_count(&self) -> usize {
        self.sector_count
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        check_slice(self, offset, bytes.len())?;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }
}

impl Flash for SimFlash {
    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        check_slice(self, offset, bytes.len())?;
        if let Some(n) = self.fail_after {
            if n == 0 {
                return Err(storage::Error::Io);
            }
            self.fail_after = Some(n - 1);
        }
        self.write_count += 1;
        for (slot, &b) in self.data[offset..offset + bytes.len()].iter_mut().zip(bytes) {
            *slot &= b;
        }
        Ok(())
    }

    fn erase(&mut self, sector: usize) -> storage::Result<()> {
        check_sector(self, sector)?;
        let base = sector * self.sector_size;
        self.data[base..base + self.sector_size].fill(0xFF);
        self.erase_counts[sector] += 1;
        Ok(())
    }
}

/// A wrapper that asserts, for every write reaching the device, that the
/// stored result is exactly `old & buf` byte for byte.  Panics on a
/// violation, which is the useful behavior in a test harness.
pub struct Checked<F> {
    inner: F,
}

impl<F: Flash> Checked<F> {
    pub fn new(inner: F) -> Checked<F> {
        Checked { inner }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    pub fn into_inner(self) -> F {
        self.inner
    }
}

impl<F: Flash> ReadFlash for Checked<F> {
    fn capacity(&self) -> usize {
        self.inner.capacity()
    }

    fn sector_size(&self) -> usize {
        self.inner.sector_size()
    }

    fn sector_count(&self) -> usize {
        self.inner.sector_count()
    }

    fn read(&mut self, offset: usize, bytes: &mut [u8]) -> storage::Result<()> {
        self.inner.read(offset, bytes)
    }
}

impl<F: Flash> Flash for Checked<F> {
    fn write(&mut self, offset: usize, bytes: &[u8]) -> storage::Result<()> {
        let mut before = vec![0u8; bytes.len()];
        self.inner.read(offset, &mut before)?;
        self.inner.write(offset, bytes)?;
        let mut after = vec![0u8; bytes.len()];
        self.inner.read(offset, &mut after)?;
        for (i, ((&old, &new), &src)) in before.iter().zip(&after).zip(bytes).enumerate() {
            assert_eq!(
                new,
                old & src,
                "write at {:#x}+{} set a cleared bit: {:#04x} -> {:#04x} (wrote {:#04x})",
                offset,
                i,
                old,
                new,
                src
            );
        }
        Ok(())
    }

    fn erase(&mut self, sector: usize) -> storage::Result<()> {
        self.inner.erase(sector)?;
        let base = sector * self.inner.sector_size();
        let mut wiped = vec![0u8; self.inner.sector_size()];
        self.inner.read(base, &mut wiped)?;
        assert!(
            wiped.iter().all(|&b| b == 0xFF),
            "erase of sector {} left non-0xFF bytes",
            sector
        );
        Ok(())
    }
}
