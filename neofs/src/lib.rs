//! Random-access named-file store for NOR flash.
//!
//! Files carry arbitrary textual names, are written and rewritten from
//! offset zero, and are read back by name.  Storage is organized as
//! chains of 128-byte pages: every page records its state in a tag byte
//! whose bits are only ever cleared (see [`storage::tag`]), so updates
//! are log-structured.  A page is overwritten in place when the new bytes
//! only clear bits that are still set; otherwise the page is relocated to
//! a fresh one and the old page left behind with a forwarding address, so
//! predecessors never need rewriting.  Whole sectors are reclaimed once
//! every page in them is erased or obsolete.
//!
//! The store owns its flash device and a small table of open-file
//! descriptors; there is no global state.

#![cfg_attr(not(any(feature = "std", test)), no_std)]

mod fs;
mod page;

pub use fs::{DirEntry, Fd, GcMode, Mode, Neofs, MAX_OPEN_FILES};
pub use page::{
    FS_NAME_MAX, NO_ADDR, PAGETYPE_MASK, PAGE_DATA_SIZE, PAGE_FILEDATA, PAGE_FILEHEADER,
    PAGE_HEADER_LEN, PAGE_SIZE, TAG_COMPLETED, TAG_EOF, TAG_OBSOLETE, TAG_USED,
};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Error {
    /// Bad name, bad mode, or an operation on a stale descriptor.
    InvalidArgument,
    /// No file with the requested name exists.
    NotFound,
    /// The open-file table is exhausted.
    TooManyOpenFiles,
    /// No free page or sector remains, even after garbage collection.
    NoSpace,
    /// The on-flash structure is inconsistent.
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
