//! The page-level engine: descriptors, the write-through page cache,
//! allocation, and garbage collection.

use storage::{tag, Flash};

use crate::page::{
    is_file_header_tag, PageHeader, FS_NAME_MAX, NO_ADDR, OFFS_FWD, OFFS_NEXT, OFFS_SIZE,
    PAGE_DATA_SIZE, PAGE_FILEDATA, PAGE_FILEHEADER, PAGE_HEADER_LEN, PAGE_SIZE, TAG_COMPLETED,
    TAG_EOF, TAG_OBSOLETE, TAG_USED,
};
use crate::{Error, Result};

/// Size of the open-file descriptor table.
pub const MAX_OPEN_FILES: usize = 4;

bitflags::bitflags! {
    /// Open modes.  Both bits may be combined.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Mode: u8 {
        const READ = 0x01;
        const WRITE = 0x02;
    }
}

/// Garbage collection policies: reclaim a couple of sectors and return,
/// or sweep the whole device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GcMode {
    Greedy,
    Reluctant,
}

/// Handle to an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fd(usize);

/// One directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: heapless::String<FS_NAME_MAX>,
    pub len: u32,
}

/// Per-open-file state.  The cache buffer mirrors the flash region
/// `[cache_start, cache_end)`; `filled` counts the valid content bytes at
/// the front of that window.  `cache_start == NO_ADDR` means the cache
/// holds nothing.
#[derive(Clone, Copy)]
struct Descriptor {
    mode: Mode,
    /// Sector the allocator resumes scanning from.
    cur_sector: usize,
    /// Logical position in the file.
    pos: u32,
    /// Flash address of the byte cursor, inside some page's payload.
    addr: u32,
    /// Address of the page the cursor is on.
    page: u32,
    /// Address of the file's header page.
    start: u32,
    cache: [u8; PAGE_DATA_SIZE as usize],
    cache_start: u32,
    cache_end: u32,
    filled: u32,
}

impl Descriptor {
    fn new(mode: Mode, start: u32, cur_sector: usize) -> Descriptor {
        Descriptor {
            mode,
            cur_sector,
            pos: 0,
            addr: start + PAGE_HEADER_LEN,
            page: start,
            start,
            cache: [0xFF; PAGE_DATA_SIZE as usize],
            cache_start: NO_ADDR,
            cache_end: NO_ADDR,
            filled: 0,
        }
    }
}

enum FlushOutcome {
    /// Nothing cached, nothing written.
    Clean,
    /// The cache went to flash over the existing page.
    InPlace,
    /// The page moved; the descriptor now sits on the replacement.
    Relocated,
    /// The page would have to move but is not full yet; the caller
    /// should keep filling it.
    Deferred,
}

enum ReadLoad {
    Loaded,
    Eof,
}

/// The named-file store over a flash device.
pub struct Neofs<F: Flash> {
    flash: F,
    fds: [Option<Descriptor>; MAX_OPEN_FILES],
    dir_sector: usize,
}

impl<F: Flash> Neofs<F> {
    /// Take ownership of a flash device.  The sector size must be a
    /// multiple of the page size.
    pub fn new(flash: F) -> Neofs<F> {
        assert!(
            flash.sector_size() % PAGE_SIZE as usize == 0,
            "sector size must be a multiple of the page size"
        );
        Neofs {
            flash,
            fds: [None; MAX_OPEN_FILES],
            dir_sector: 0,
        }
    }

    pub fn flash(&self) -> &F {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    pub fn into_flash(self) -> F {
        self.flash
    }

    /// Erase every sector of the device.
    pub fn format(&mut self) -> Result<()> {
        for s in 0..self.flash.sector_count() {
            self.flash.erase(s)?;
        }
        Ok(())
    }

    /// Open `name`.  With [`Mode::WRITE`], a missing file is created;
    /// without it, opening a missing file fails.  Existing files are
    /// positioned at offset zero.
    pub fn open(&mut self, name: &str, mode: Mode) -> Result<Fd> {
        if name.is_empty() || name.len() >= FS_NAME_MAX {
            return Err(Error::InvalidArgument);
        }
        if !mode.intersects(Mode::READ | Mode::WRITE) {
            return Err(Error::InvalidArgument);
        }
        let Self { flash, fds, .. } = self;
        let slot = fds
            .iter()
            .position(|s| s.is_none())
            .ok_or(Error::TooManyOpenFiles)?;

        let ssz = flash.sector_size();
        for s in 0..flash.sector_count() {
            let base = (s * ssz) as u32;
            let t = Self::read_byte(flash, base)?;
            if !is_file_header_tag(t) {
                continue;
            }
            let mut raw = [0u8; FS_NAME_MAX];
            flash.read((base + PAGE_HEADER_LEN) as usize, &mut raw)?;
            if !name_matches(&raw, name) {
                continue;
            }
            log::debug!("open {name:?}: found at sector {s}");
            let mut d = Descriptor::new(mode, base, s);
            Self::seek(flash, &mut d, 0)?;
            fds[slot] = Some(d);
            return Ok(Fd(slot));
        }

        if !mode.contains(Mode::WRITE) {
            log::debug!("open {name:?}: not found");
            return Err(Error::NotFound);
        }

        // Create: a header page at the start of a free sector, the name
        // as its payload, and a first data page linked behind it.
        let sector = Self::find_free_sector(flash)?.ok_or(Error::NoSpace)?;
        let base = (sector * ssz) as u32;
        log::debug!("open {name:?}: creating at sector {sector}");
        Self::write_tag(flash, base, tag::apply(TAG_USED, PAGE_FILEHEADER))?;
        let mut padded = [0u8; FS_NAME_MAX];
        padded[..name.len()].copy_from_slice(name.as_bytes());
        flash.write((base + PAGE_HEADER_LEN) as usize, &padded)?;

        let mut d = Descriptor::new(mode, base, sector);
        let data_page =
            Self::find_free_page(flash, &mut d.cur_sector)?.ok_or(Error::NoSpace)?;
        Self::write_addr(flash, base + OFFS_NEXT, data_page)?;
        d.page = data_page;
        d.addr = data_page + PAGE_HEADER_LEN;
        d.cache_start = d.addr;
        d.cache_end = data_page + PAGE_SIZE;
        d.filled = 0;
        fds[slot] = Some(d);
        Ok(Fd(slot))
    }

    /// Read up to `buf.len()` bytes from the cursor.  Returns the number
    /// of bytes read, which is short at end of file.
    pub fn read(&mut self, fd: Fd, buf: &mut [u8]) -> Result<usize> {
        let Self { flash, fds, .. } = self;
        let d = fds
            .get_mut(fd.0)
            .and_then(|s| s.as_mut())
            .ok_or(Error::InvalidArgument)?;
        let mut count = 0;
        for out in buf.iter_mut() {
            if d.cache_start == NO_ADDR || d.addr < d.cache_start || d.addr >= d.cache_end {
                match Self::load_cache_read(flash, d)? {
                    ReadLoad::Loaded => {}
                    ReadLoad::Eof => return Ok(count),
                }
            }
            *out = d.cache[(d.addr - d.cache_start) as usize];
            d.addr += 1;
            d.pos += 1;
            count += 1;
        }
        Ok(count)
    }

    /// Write `buf` at the cursor, through the page cache.
    pub fn write(&mut self, fd: Fd, buf: &[u8]) -> Result<usize> {
        let Self { flash, fds, .. } = self;
        let d = fds
            .get_mut(fd.0)
            .and_then(|s| s.as_mut())
            .ok_or(Error::InvalidArgument)?;
        if !d.mode.contains(Mode::WRITE) {
            return Err(Error::InvalidArgument);
        }
        for &b in buf {
            if d.cache_start == NO_ADDR || d.addr < d.cache_start || d.addr >= d.cache_end {
                Self::write_miss(flash, d)?;
            }
            d.cache[(d.addr - d.cache_start) as usize] = b;
            d.addr += 1;
            d.pos += 1;
            let off = d.addr - d.cache_start;
            if off > d.filled {
                d.filled = off;
            }
        }
        Ok(buf.len())
    }

    /// Flush (write mode), mark the final page, and release the
    /// descriptor.  The descriptor is released even if the flush fails.
    pub fn close(&mut self, fd: Fd) -> Result<()> {
        let Self { flash, fds, .. } = self;
        let mut d = fds
            .get_mut(fd.0)
            .and_then(|s| s.take())
            .ok_or(Error::InvalidArgument)?;
        if d.mode.contains(Mode::WRITE) {
            Self::flush_cache(flash, &mut d, true)?;
            Self::write_tag(flash, d.page, TAG_EOF)?;
        }
        Ok(())
    }

    /// Directory iteration.  `first` restarts the walk; each call yields
    /// the next file and its current length, or `None` past the end.
    pub fn dir(&mut self, first: bool) -> Result<Option<DirEntry>> {
        let Self {
            flash, dir_sector, ..
        } = self;
        if first {
            *dir_sector = 0;
        }
        let ssz = flash.sector_size();
        while *dir_sector < flash.sector_count() {
            let s = *dir_sector;
            *dir_sector += 1;
            let base = (s * ssz) as u32;
            let t = Self::read_byte(flash, base)?;
            if !is_file_header_tag(t) {
                continue;
            }
            let mut raw = [0u8; FS_NAME_MAX];
            flash.read((base + PAGE_HEADER_LEN) as usize, &mut raw)?;
            let name = name_from_raw(&raw)?;
            // measure the file with a scratch descriptor
            let mut d = Descriptor::new(Mode::READ, base, s);
            let len = Self::seek(flash, &mut d, u32::MAX)?;
            return Ok(Some(DirEntry { name, len }));
        }
        Ok(None)
    }

    /// Pages that are erased or obsolete, i.e. usable after reclaim.
    pub fn disk_free(&mut self) -> Result<u32> {
        let flash = &mut self.flash;
        let mut count = 0;
        Self::for_each_page_tag(flash, |t| {
            if tag::is_erased(t) || tag::reached(t, TAG_OBSOLETE) {
                count += 1;
            }
        })?;
        Ok(count)
    }

    /// Counts the same population as [`Neofs::disk_free`]: erased pages
    /// and obsolete pages both show up here.
    pub fn num_erased_pages(&mut self) -> Result<u32> {
        self.disk_free()
    }

    /// Sectors whose every page tag is still erased.
    pub fn num_clean_sectors(&mut self) -> Result<u32> {
        self.count_sectors(|t| tag::is_erased(t))
    }

    /// Sectors whose every page is erased or obsolete.  Entirely clean
    /// sectors are included in the count.
    pub fn num_reclaimable_sectors(&mut self) -> Result<u32> {
        self.count_sectors(|t| tag::is_erased(t) || tag::reached(t, TAG_OBSOLETE))
    }

    /// Erase every sector whose pages are all erased or obsolete.
    /// Reluctant mode stops after reclaiming more than one sector;
    /// greedy mode sweeps the whole device.  Returns a reclaimed sector
    /// index, or `None` if nothing could be reclaimed.
    pub fn garbage_collect(&mut self, mode: GcMode) -> Result<Option<usize>> {
        Self::collect(&mut self.flash, mode)
    }

    // ----- internals -----

    fn pages_per_sector(flash: &F) -> u32 {
        flash.sector_size() as u32 / PAGE_SIZE
    }

    fn read_byte(flash: &mut F, addr: u32) -> Result<u8> {
        let mut b = [0u8; 1];
        flash.read(addr as usize, &mut b)?;
        Ok(b[0])
    }

    fn read_header(flash: &mut F, page: u32) -> Result<PageHeader> {
        let mut raw = [0u8; PageHeader::LEN];
        flash.read(page as usize, &mut raw)?;
        Ok(PageHeader::parse(&raw))
    }

    /// Write a clearing mask into a page's tag byte.
    fn write_tag(flash: &mut F, page: u32, mask: u8) -> Result<()> {
        flash.write(page as usize, &[mask])?;
        Ok(())
    }

    fn write_addr(flash: &mut F, at: u32, value: u32) -> Result<()> {
        flash.write(at as usize, &value.to_le_bytes())?;
        Ok(())
    }

    fn for_each_page_tag(flash: &mut F, mut f: impl FnMut(u8)) -> Result<()> {
        let ssz = flash.sector_size();
        let pps = Self::pages_per_sector(flash);
        for s in 0..flash.sector_count() {
            for p in 0..pps {
                f(Self::read_byte(flash, (s * ssz) as u32 + p * PAGE_SIZE)?);
            }
        }
        Ok(())
    }

    fn count_sectors(&mut self, pred: impl Fn(u8) -> bool) -> Result<u32> {
        let flash = &mut self.flash;
        let ssz = flash.sector_size();
        let pps = Self::pages_per_sector(flash);
        let mut count = 0;
        for s in 0..flash.sector_count() {
            let mut all = true;
            for p in 0..pps {
                let t = Self::read_byte(flash, (s * ssz) as u32 + p * PAGE_SIZE)?;
                if !pred(t) {
                    all = false;
                }
            }
            if all {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Chase forwarding addresses from `page` to the page that currently
    /// stands in for it.
    fn resolve_forward(flash: &mut F, mut page: u32) -> Result<u32> {
        let limit = flash.capacity() as u32 / PAGE_SIZE;
        let mut hops = 0u32;
        loop {
            let hdr = Self::read_header(flash, page)?;
            if hdr.fwd == NO_ADDR {
                return Ok(page);
            }
            page = hdr.fwd;
            hops += 1;
            if hops > limit {
                return Err(Error::Corrupt);
            }
        }
    }

    /// The effective successor of `page`: its next pointer with any
    /// forwarding hops applied.
    fn effective_next(flash: &mut F, page: u32) -> Result<Option<u32>> {
        let hdr = Self::read_header(flash, page)?;
        if hdr.next == NO_ADDR {
            return Ok(None);
        }
        Ok(Some(Self::resolve_forward(flash, hdr.next)?))
    }

    /// Number of valid payload bytes on a data page.  A page whose write
    /// was interrupted (USED cleared, COMPLETED still set) is retired
    /// here by clearing its whole tag, so later scans skip it.
    fn valid_len(flash: &mut F, page: u32) -> Result<u32> {
        let hdr = Self::read_header(flash, page)?;
        if hdr.is_erased() || hdr.is_file_header() {
            return Ok(0);
        }
        if hdr.is_obsolete() {
            return Ok(0);
        }
        if hdr.is_completed() {
            // a size beyond the payload region can only be corruption
            return Ok((hdr.size as u32).min(PAGE_DATA_SIZE));
        }
        if hdr.is_used() {
            log::debug!("retiring interrupted page {:#x}", page);
            Self::write_tag(flash, page, 0x00)?;
        }
        Ok(0)
    }

    fn fill_cache(flash: &mut F, fd: &mut Descriptor, page: u32, len: u32) -> Result<()> {
        let start = page + PAGE_HEADER_LEN;
        flash.read(start as usize, &mut fd.cache[..len as usize])?;
        fd.cache_start = start;
        fd.cache_end = start + len;
        fd.filled = len;
        Ok(())
    }

    /// A fresh window over the whole payload region of the (erased)
    /// page the descriptor sits on.
    fn fresh_cache(fd: &mut Descriptor) {
        fd.cache.fill(0xFF);
        fd.cache_start = fd.page + PAGE_HEADER_LEN;
        fd.cache_end = fd.page + PAGE_SIZE;
        fd.filled = 0;
    }

    /// Walk the chain from the first data page, summing page sizes,
    /// until `target` falls inside a page or the chain ends.  The cursor
    /// lands inside the containing page (or at end of file) with the
    /// cache loaded.  Returns the position actually reached, so a
    /// `u32::MAX` target measures the file.
    fn seek(flash: &mut F, fd: &mut Descriptor, target: u32) -> Result<u32> {
        fd.pos = 0;
        fd.page = fd.start;
        fd.addr = fd.start + PAGE_HEADER_LEN;
        fd.cache_start = NO_ADDR;
        fd.cache_end = NO_ADDR;
        fd.filled = 0;

        // one hop past the file header page
        let mut page = match Self::effective_next(flash, fd.start)? {
            Some(p) => p,
            None => return Ok(0),
        };

        let limit = flash.capacity() as u32 / PAGE_SIZE;
        let mut visited = 0u32;
        let mut base = 0u32;
        loop {
            visited += 1;
            if visited > limit {
                return Err(Error::Corrupt);
            }
            let len = Self::valid_len(flash, page)?;
            let next = Self::effective_next(flash, page)?;
            if target.wrapping_sub(base) < len {
                fd.page = page;
                fd.pos = target;
                fd.addr = page + PAGE_HEADER_LEN + (target - base);
                Self::fill_cache(flash, fd, page, len)?;
                return Ok(target);
            }
            match next {
                Some(n) => {
                    base += len;
                    page = n;
                }
                None => {
                    fd.page = page;
                    fd.pos = base + len;
                    fd.addr = page + PAGE_HEADER_LEN + len;
                    Self::fill_cache(flash, fd, page, len)?;
                    return Ok(fd.pos);
                }
            }
        }
    }

    /// Point the cache at the page under the cursor, moving to the
    /// effective next page when the cursor has run off the current one.
    fn load_cache_read(flash: &mut F, fd: &mut Descriptor) -> Result<ReadLoad> {
        let payload_start = fd.page + PAGE_HEADER_LEN;
        let len = Self::valid_len(flash, fd.page)?;
        if fd.addr >= payload_start && fd.addr < payload_start + len {
            Self::fill_cache(flash, fd, fd.page, len)?;
            return Ok(ReadLoad::Loaded);
        }
        match Self::effective_next(flash, fd.page)? {
            None => Ok(ReadLoad::Eof),
            Some(p) => {
                let len = Self::valid_len(flash, p)?;
                fd.page = p;
                fd.addr = p + PAGE_HEADER_LEN;
                if len == 0 {
                    return Ok(ReadLoad::Eof);
                }
                Self::fill_cache(flash, fd, p, len)?;
                Ok(ReadLoad::Loaded)
            }
        }
    }

    /// Write-path cache miss: flush, then set the window up for the page
    /// the cursor belongs on, allocating and linking a new tail page
    /// when the chain has run out.
    fn write_miss(flash: &mut F, fd: &mut Descriptor) -> Result<()> {
        match Self::flush_cache(flash, fd, false)? {
            FlushOutcome::Deferred => {
                // Keep filling the same page: widen the window to the
                // end of the payload region.  The uncovered tail of the
                // region is still erased, so the cache stays a faithful
                // mirror.
                let cap_end = fd.page + PAGE_SIZE;
                let have = (fd.cache_end - fd.cache_start) as usize;
                let want = (cap_end - fd.cache_start) as usize;
                flash.read(fd.cache_end as usize, &mut fd.cache[have..want])?;
                fd.cache_end = cap_end;
                Ok(())
            }
            _ => Self::load_cache_write(flash, fd),
        }
    }

    fn load_cache_write(flash: &mut F, fd: &mut Descriptor) -> Result<()> {
        let hdr = Self::read_header(flash, fd.page)?;
        let payload_start = fd.page + PAGE_HEADER_LEN;
        if !hdr.is_file_header() {
            let len = Self::valid_len(flash, fd.page)?;
            if fd.addr >= payload_start && fd.addr < payload_start + len {
                return Self::fill_cache(flash, fd, fd.page, len);
            }
            if hdr.is_erased() && fd.addr == payload_start {
                // a pristine tail page takes a fresh window in place
                Self::fresh_cache(fd);
                return Ok(());
            }
        }
        match Self::effective_next(flash, fd.page)? {
            Some(p) => {
                fd.page = p;
                fd.addr = p + PAGE_HEADER_LEN;
                let h2 = Self::read_header(flash, p)?;
                if h2.is_erased() {
                    Self::fresh_cache(fd);
                } else {
                    let len = Self::valid_len(flash, p)?;
                    Self::fill_cache(flash, fd, p, len)?;
                }
                Ok(())
            }
            None => {
                // end of the chain: hang a new page off it
                let page =
                    Self::find_free_page(flash, &mut fd.cur_sector)?.ok_or(Error::NoSpace)?;
                log::trace!("linking new page {:#x}", page);
                Self::write_addr(flash, fd.page + OFFS_NEXT, page)?;
                fd.page = page;
                fd.addr = page + PAGE_HEADER_LEN;
                Self::fresh_cache(fd);
                Ok(())
            }
        }
    }

    /// Push the cache out.  The new bytes go over the existing page when
    /// every byte only clears bits that are still set; otherwise the
    /// content moves to a fresh page and the old page is left forwarding
    /// to it.  An unforced flush of a page that is not full yet defers
    /// instead of relocating.
    fn flush_cache(flash: &mut F, fd: &mut Descriptor, force: bool) -> Result<FlushOutcome> {
        if fd.cache_start == NO_ADDR {
            return Ok(FlushOutcome::Clean);
        }
        let filled = fd.filled as usize;
        let mut on_flash = [0u8; PAGE_DATA_SIZE as usize];
        flash.read(fd.cache_start as usize, &mut on_flash[..filled])?;
        let compatible = fd.cache[..filled]
            .iter()
            .zip(&on_flash[..filled])
            .all(|(&want, &have)| tag::can_transition(have, want));

        let hdr = Self::read_header(flash, fd.page)?;
        if compatible {
            log::trace!("flush in place, page {:#x}, {} bytes", fd.page, filled);
            Self::write_tag(flash, fd.page, tag::apply(TAG_USED, PAGE_FILEDATA))?;
            flash.write(fd.cache_start as usize, &fd.cache[..filled])?;
            // a completed page already carries its final size
            let size = if hdr.is_completed() { hdr.size } else { fd.filled as u8 };
            flash.write((fd.page + OFFS_SIZE) as usize, &[size])?;
            Self::write_tag(flash, fd.page, TAG_COMPLETED)?;
            return Ok(FlushOutcome::InPlace);
        }

        if fd.filled < PAGE_DATA_SIZE && !force {
            log::trace!("page {:#x} not full, deferring relocation", fd.page);
            return Ok(FlushOutcome::Deferred);
        }

        let new_page = Self::find_free_page(flash, &mut fd.cur_sector)?.ok_or(Error::NoSpace)?;
        log::debug!("relocating page {:#x} -> {:#x}", fd.page, new_page);
        Self::write_tag(flash, new_page, tag::apply(TAG_USED, PAGE_FILEDATA))?;
        flash.write((new_page + PAGE_HEADER_LEN) as usize, &fd.cache[..filled])?;
        flash.write((new_page + OFFS_SIZE) as usize, &[fd.filled as u8])?;
        Self::write_tag(flash, new_page, TAG_COMPLETED)?;
        // the old page's successor becomes the new page's successor
        Self::write_addr(flash, new_page + OFFS_NEXT, hdr.next)?;
        // only then may the old page point at its replacement and retire
        Self::write_addr(flash, fd.page + OFFS_FWD, new_page)?;
        Self::write_tag(flash, fd.page, TAG_OBSOLETE)?;
        fd.addr = new_page + PAGE_HEADER_LEN + (fd.addr - fd.cache_start);
        fd.page = new_page;
        fd.cache_start = NO_ADDR;
        fd.cache_end = NO_ADDR;
        fd.filled = 0;
        Ok(FlushOutcome::Relocated)
    }

    /// Scan for a sector to start a file or continue allocation in,
    /// keeping a reserve of erased sectors.  Falls back to reluctant
    /// garbage collection when the reserve runs dry.
    fn find_free_sector(flash: &mut F) -> Result<Option<usize>> {
        let ssz = flash.sector_size();
        let reserve = Self::pages_per_sector(flash);
        let mut count = 0;
        for s in 0..flash.sector_count() {
            let t = Self::read_byte(flash, (s * ssz) as u32)?;
            if tag::is_erased(t) {
                count += 1;
                if count > reserve {
                    return Ok(Some(s));
                }
            }
        }
        log::debug!("free sector reserve exhausted, collecting garbage");
        Self::collect(flash, GcMode::Reluctant)
    }

    /// Find an erased page, scanning the descriptor's current sector
    /// first and moving to further sectors as they fill.
    fn find_free_page(flash: &mut F, cur_sector: &mut usize) -> Result<Option<u32>> {
        let ssz = flash.sector_size();
        let pps = Self::pages_per_sector(flash);
        let mut sector = *cur_sector;
        for _ in 0..=flash.sector_count() {
            for p in 0..pps {
                let addr = (sector * ssz) as u32 + p * PAGE_SIZE;
                if tag::is_erased(Self::read_byte(flash, addr)?) {
                    *cur_sector = sector;
                    return Ok(Some(addr));
                }
            }
            sector = match Self::find_free_sector(flash)? {
                Some(s) => s,
                None => return Ok(None),
            };
        }
        Ok(None)
    }

    fn collect(flash: &mut F, mode: GcMode) -> Result<Option<usize>> {
        let ssz = flash.sector_size();
        let pps = Self::pages_per_sector(flash);
        let mut reclaimed = None;
        let mut count = 0;
        for s in 0..flash.sector_count() {
            let mut reclaimable = 0;
            for p in 0..pps {
                let t = Self::read_byte(flash, (s * ssz) as u32 + p * PAGE_SIZE)?;
                if tag::is_erased(t) || tag::reached(t, TAG_OBSOLETE) {
                    reclaimable += 1;
                }
            }
            if reclaimable == pps {
                log::debug!("reclaiming sector {s}");
                flash.erase(s)?;
                count += 1;
                reclaimed = Some(s);
                if mode == GcMode::Reluctant && count > 1 {
                    return Ok(reclaimed);
                }
            }
        }
        Ok(reclaimed)
    }
}

fn name_matches(raw: &[u8; FS_NAME_MAX], name: &str) -> bool {
    let b = name.as_bytes();
    raw[..b.len()] == *b && raw[b.len()] == 0
}

fn name_from_raw(raw: &[u8; FS_NAME_MAX]) -> Result<heapless::String<FS_NAME_MAX>> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(FS_NAME_MAX);
    let s = core::str::from_utf8(&raw[..end]).map_err(|_| Error::Corrupt)?;
    let mut name = heapless::String::new();
    name.push_str(s).map_err(|_| Error::Corrupt)?;
    Ok(name)
}
