//! The circular log engine: head/tail recovery, record append and
//! consumption, and sector reclaim.

use storage::{tag, Flash};

use crate::record::{
    CircFileSpec, FileFlags, TAG_OBSOLETE, TAG_WRITE_DONE, TAG_WRITE_STARTED,
};
use crate::{Error, Result};

/// Capacity of the declared-file table.
pub const MAX_CIRC_FILES: usize = 8;

/// Handle to a declared file, stable for the life of the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId(usize);

/// Cursor state recovered by open and discarded by close.
#[derive(Debug, Clone, Copy)]
struct Cursors {
    /// Next slot to write.
    head: u32,
    /// Oldest slot not yet consumed.
    tail: u32,
    /// Next slot a read returns.
    read_pos: u32,
}

struct CircFile {
    spec: CircFileSpec,
    cursors: Option<Cursors>,
}

/// The circular log store over a flash device.
pub struct Neocfs<F: Flash> {
    flash: F,
    files: heapless::Vec<CircFile, MAX_CIRC_FILES>,
    initialised: bool,
}

impl<F: Flash> Neocfs<F> {
    /// Take ownership of a flash device and register the declared
    /// files.  The store starts uninitialized; call [`Neocfs::init`].
    pub fn new(flash: F, specs: &[CircFileSpec]) -> Result<Neocfs<F>> {
        let mut files = heapless::Vec::new();
        for spec in specs {
            files
                .push(CircFile {
                    spec: *spec,
                    cursors: None,
                })
                .map_err(|_| Error::InvalidArgument)?;
        }
        Ok(Neocfs {
            flash,
            files,
            initialised: false,
        })
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

    /// Validate every declaration.  A slot (`record_size + 2`) must be a
    /// power of two no larger than a sector, the region sector-aligned,
    /// a whole number of slots long, and inside the device.  Failure
    /// leaves the store uninitialized and every operation erroring.
    pub fn init(&mut self) -> Result<()> {
        self.initialised = false;
        let cap = self.flash.capacity() as u32;
        let ssz = self.flash.sector_size() as u32;
        for f in &self.files {
            let s = &f.spec;
            let slot = s.slot_len();
            log::debug!("checking {:?}: slot {}", s.name, slot);
            let ok = slot.is_power_of_two()
                && slot <= ssz
                && s.start_addr < s.end_addr
                && s.end_addr < cap
                && s.start_addr % ssz == 0
                && s.ring_len() % slot == 0;
            if !ok {
                log::debug!("{:?}: bad declaration", s.name);
                return Err(Error::InvalidArgument);
            }
        }
        self.initialised = true;
        Ok(())
    }

    /// Erase every sector of the device.
    pub fn format(&mut self) -> Result<()> {
        for s in 0..self.flash.sector_count() {
            self.flash.erase(s)?;
        }
        Ok(())
    }

    /// The declared files.
    pub fn dir(&self) -> Result<impl Iterator<Item = &CircFileSpec>> {
        self.check_init()?;
        Ok(self.files.iter().map(|f| &f.spec))
    }

    /// Look a file up by name and open it.
    pub fn open_by_name(&mut self, name: &str) -> Result<FileId> {
        self.check_init()?;
        let id = self
            .files
            .iter()
            .position(|f| f.spec.name == name)
            .map(FileId)
            .ok_or(Error::NotFound)?;
        self.open(id)?;
        Ok(id)
    }

    /// (Re)open a file: scan its region to recover the tail and head,
    /// and rest the read cursor on the tail.
    pub fn open(&mut self, id: FileId) -> Result<()> {
        self.check_init()?;
        let Self { flash, files, .. } = self;
        let f = files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let tail = Self::find_tail(flash, &f.spec)?;
        let head = Self::find_head(flash, &f.spec, tail)?;
        log::debug!("open {:?}: tail {:#x}, head {:#x}", f.spec.name, tail, head);
        f.cursors = Some(Cursors {
            head,
            tail,
            read_pos: tail,
        });
        Ok(())
    }

    /// Drop the cursor state.  The next open rediscovers it from flash.
    pub fn close(&mut self, id: FileId) -> Result<()> {
        self.check_init()?;
        let f = self.files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        f.cursors = None;
        Ok(())
    }

    /// Append one record at the head.  When the head has wrapped onto
    /// old data the enclosing sector is reclaimed first, subject to the
    /// file's policy; a reclaim-only file whose head is closing in on
    /// the tail reports a full log instead.
    pub fn write_record(&mut self, id: FileId, payload: &[u8]) -> Result<()> {
        self.check_init()?;
        let Self { flash, files, .. } = self;
        let f = files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let spec = f.spec;
        let cur = f.cursors.as_mut().ok_or(Error::InvalidArgument)?;
        if payload.len() != spec.record_size as usize {
            return Err(Error::InvalidArgument);
        }

        let t = Self::read_byte(flash, cur.head)?;
        if !tag::is_erased(t) {
            // the ring has wrapped onto old data
            if !spec.flags.contains(FileFlags::OVERWRITE_OLDEST)
                && Self::sectors_collide(flash, &spec, cur.head, cur.tail)
            {
                log::debug!("{:?}: head closing on tail, log full", spec.name);
                return Err(Error::NoSpace);
            }
            Self::collect(flash, &spec, cur.head)?;
        }

        flash.write(cur.head as usize, &[TAG_WRITE_STARTED])?;
        flash.write((cur.head + 1) as usize, payload)?;
        flash.write((cur.head + 1 + spec.record_size) as usize, &[TAG_WRITE_DONE])?;
        cur.head = spec.next_slot(cur.head);
        Ok(())
    }

    /// Copy the record at the read cursor into `buf`, which must be
    /// exactly one record long.  An unwritten slot reads as an empty
    /// log.
    pub fn read_record(&mut self, id: FileId, buf: &mut [u8]) -> Result<()> {
        self.check_init()?;
        let Self { flash, files, .. } = self;
        let f = files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let spec = f.spec;
        let cur = f.cursors.as_ref().ok_or(Error::InvalidArgument)?;
        if buf.len() != spec.record_size as usize {
            return Err(Error::InvalidArgument);
        }
        let t = Self::read_byte(flash, cur.read_pos)?;
        if tag::is_erased(t) {
            return Err(Error::LogEmpty);
        }
        flash.read((cur.read_pos + 1) as usize, buf)?;
        Ok(())
    }

    /// Advance the read cursor one slot, wrapping.
    pub fn next_record(&mut self, id: FileId) -> Result<()> {
        self.check_init()?;
        let f = self.files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let spec = f.spec;
        let cur = f.cursors.as_mut().ok_or(Error::InvalidArgument)?;
        cur.read_pos = spec.next_slot(cur.read_pos);
        Ok(())
    }

    /// Retire the record under the read cursor.  Only the oldest live
    /// record may be retired: nothing happens unless the cursor sits on
    /// the tail, in which case both tags take the obsolete bit and the
    /// tail advances one slot.
    pub fn mark_obsolete(&mut self, id: FileId) -> Result<()> {
        self.check_init()?;
        let Self { flash, files, .. } = self;
        let f = files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let spec = f.spec;
        let cur = f.cursors.as_mut().ok_or(Error::InvalidArgument)?;
        if cur.read_pos == cur.tail {
            flash.write(cur.tail as usize, &[TAG_OBSOLETE])?;
            flash.write(
                (cur.tail + 1 + spec.record_size) as usize,
                &[TAG_OBSOLETE],
            )?;
            cur.tail = spec.next_slot(cur.tail);
        }
        Ok(())
    }

    /// Place the read cursor `slots` records past the tail.
    pub fn seek_from_tail(&mut self, id: FileId, slots: u32) -> Result<()> {
        self.check_init()?;
        let f = self.files.get_mut(id.0).ok_or(Error::InvalidArgument)?;
        let spec = f.spec;
        let cur = f.cursors.as_mut().ok_or(Error::InvalidArgument)?;
        let off = (cur.tail - spec.start_addr) as u64
            + (slots as u64 % spec.slots() as u64) * spec.slot_len() as u64;
        cur.read_pos = spec.start_addr + (off % spec.ring_len() as u64) as u32;
        Ok(())
    }

    /// Head address of an open file.
    pub fn head(&self, id: FileId) -> Result<u32> {
        Ok(self.cursors(id)?.head)
    }

    /// Tail address of an open file.
    pub fn tail(&self, id: FileId) -> Result<u32> {
        Ok(self.cursors(id)?.tail)
    }

    /// Read cursor address of an open file.
    pub fn read_pos(&self, id: FileId) -> Result<u32> {
        Ok(self.cursors(id)?.read_pos)
    }

    // ----- internals -----

    fn check_init(&self) -> Result<()> {
        if !self.initialised {
            return Err(Error::NotInitialized);
        }
        Ok(())
    }

    fn cursors(&self, id: FileId) -> Result<Cursors> {
        self.check_init()?;
        self.files
            .get(id.0)
            .and_then(|f| f.cursors)
            .ok_or(Error::InvalidArgument)
    }

    fn read_byte(flash: &mut F, addr: u32) -> Result<u8> {
        let mut b = [0u8; 1];
        flash.read(addr as usize, &mut b)?;
        Ok(b[0])
    }

    /// Erase every sector of the file's region.
    fn format_file(flash: &mut F, spec: &CircFileSpec) -> Result<()> {
        let ssz = flash.sector_size() as u32;
        let mut a = spec.start_addr;
        while a < spec.end_addr {
            flash.erase((a / ssz) as usize)?;
            a += ssz;
        }
        Ok(())
    }

    /// Recover the tail: find the boundary where an erased slot is
    /// followed by a written one (where data begins after the free gap),
    /// then skip past any obsolete prefix.  A fully erased ring starts
    /// at the region start; a ring of nothing but obsolete records is
    /// reformatted.
    fn find_tail(flash: &mut F, spec: &CircFileSpec) -> Result<u32> {
        let slots = spec.slots();
        let mut all_erased = true;
        let mut i = spec.start_addr;
        for _ in 0..=slots {
            let t1 = Self::read_byte(flash, i)?;
            let j = spec.next_slot(i);
            let t2 = Self::read_byte(flash, j)?;
            if !tag::is_erased(t1) {
                all_erased = false;
            }
            if tag::is_erased(t1) && !tag::is_erased(t2) {
                let mut k = j;
                for _ in 0..=slots {
                    let t = Self::read_byte(flash, k)?;
                    if !tag::reached(t, TAG_OBSOLETE) {
                        return Ok(k);
                    }
                    k = spec.next_slot(k);
                }
                log::debug!("{:?}: every record obsolete, reformatting", spec.name);
                Self::format_file(flash, spec)?;
                return Ok(spec.start_addr);
            }
            i = spec.next_slot(i);
        }
        if all_erased {
            Ok(spec.start_addr)
        } else {
            Err(Error::Corrupt)
        }
    }

    /// The head is the first erased slot at or after the tail.
    fn find_head(flash: &mut F, spec: &CircFileSpec, tail: u32) -> Result<u32> {
        let mut i = tail;
        for _ in 0..=spec.slots() {
            if tag::is_erased(Self::read_byte(flash, i)?) {
                return Ok(i);
            }
            i = spec.next_slot(i);
        }
        Err(Error::Corrupt)
    }

    /// True when writing into the head's sector would leave less than
    /// two sectors of slack before the tail's sector.
    fn sectors_collide(flash: &F, spec: &CircFileSpec, head: u32, tail: u32) -> bool {
        let ssz = flash.sector_size() as u32;
        let head_base = head / ssz * ssz - spec.start_addr;
        let tail_base = tail / ssz * ssz - spec.start_addr;
        (head_base + 2 * ssz) % spec.ring_len() == tail_base
    }

    /// Make the head's sector writable again.  Overwrite-oldest files
    /// just erase it; otherwise it is erased only if every slot in it
    /// has been consumed.
    fn collect(flash: &mut F, spec: &CircFileSpec, head: u32) -> Result<()> {
        let ssz = flash.sector_size() as u32;
        let sector = head / ssz;
        if spec.flags.contains(FileFlags::OVERWRITE_OLDEST) {
            log::debug!("{:?}: overwriting oldest, erasing sector {}", spec.name, sector);
            flash.erase(sector as usize)?;
            return Ok(());
        }
        let base = sector * ssz;
        let mut a = base;
        while a < base + ssz {
            let end_tag = Self::read_byte(flash, a + 1 + spec.record_size)?;
            if !tag::reached(end_tag, TAG_OBSOLETE) {
                return Err(Error::NoSpace);
            }
            a += spec.slot_len();
        }
        log::debug!("{:?}: reclaiming sector {}", spec.name, sector);
        flash.erase(sector as usize)?;
        Ok(())
    }
}
