//! Fixed-record circular log store for NOR flash.
//!
//! Files are declared up front: a name, a fixed record size, and the
//! start and end of the flash region backing them.  Records are produced
//! at a head, consumed at a tail, and the region wraps.  Every slot is
//! framed by a start tag and an end tag whose bits are cleared as the
//! record moves through its life (see [`storage::tag`]), which is what
//! makes the head and tail rediscoverable by a bare scan after a reboot:
//! no index is stored anywhere.
//!
//! When the head wraps onto old data, space is reclaimed a sector at a
//! time: either unconditionally (overwrite-oldest files) or only once
//! every record in the sector has been consumed.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod record;
mod store;

pub use record::{
    CircFileSpec, FileFlags, SLOT_OVERHEAD, TAG_OBSOLETE, TAG_WRITE_DONE, TAG_WRITE_STARTED,
};
pub use store::{FileId, Neocfs, MAX_CIRC_FILES};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// The store was not initialized, or initialization failed.
    NotInitialized,
    /// Bad declaration, wrong buffer size, or a file that is not open.
    InvalidArgument,
    /// No file with the requested name is declared.
    NotFound,
    /// The log is full and the file does not overwrite oldest data.
    NoSpace,
    /// No record at the read cursor.
    LogEmpty,
    /// No consistent head/tail could be recovered from flash.
    Corrupt,
    /// The backing flash device failed.
    Device(storage::Error),
}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Error {
        Error::Device(e)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
