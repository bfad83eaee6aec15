#![forbid(unsafe_code)]
//! Typed views of AmigaDOS on-disk block structures.
//!
//! Every view owns a 512-byte buffer and decodes each field at its explicit
//! byte offset through the big-endian codec in `amifs-types` — no structure
//! casting, no alignment assumptions. Mutable views recompute their AmigaDOS
//! checksum with `rechecksum()` before the buffer is written back.
//!
//! The root block and non-root directory headers overlap only in their
//! 72-entry hash table; [`HashTableOwner`] abstracts that shared range, and
//! [`DirBlock`] carries the root/non-root dispatch decided at load time.

mod bitmap;
mod boot;
mod data;
mod header;
mod root;

pub use bitmap::BitmapBlock;
pub use boot::{boot_block_for_format, parse_boot_block, BootInfo};
pub use data::DataBlock;
pub use header::HeaderBlock;
pub use root::RootBlock;

use amifs_types::{BlockNumber, BLOCK_SIZE};

/// A 512-byte block buffer.
pub type BlockBuf = [u8; BLOCK_SIZE];

/// Accessor over the 72-entry hash table shared by the root block and
/// directory headers.
pub trait HashTableOwner {
    /// Head of bucket `idx`, or [`BlockNumber::NULL`] when empty.
    fn bucket(&self, idx: usize) -> BlockNumber;

    /// Replace the head of bucket `idx`.
    fn set_bucket(&mut self, idx: usize, block: BlockNumber);
}

/// A directory container: either the root block or a directory header.
///
/// The two layouts diverge everywhere except the hash table, so the dispatch
/// happens once, when the container is loaded, instead of at every field
/// access.
pub enum DirBlock {
    Root(RootBlock),
    Dir(HeaderBlock),
}

impl DirBlock {
    /// Update the container's modification stamp.
    pub fn set_mtime_unix(&mut self, unix_secs: i64) {
        match self {
            Self::Root(root) => root.set_mtime_unix(unix_secs),
            Self::Dir(dir) => dir.set_mtime_unix(unix_secs),
        }
    }

    /// Recompute the container's checksum.
    pub fn rechecksum(&mut self) {
        match self {
            Self::Root(root) => root.rechecksum(),
            Self::Dir(dir) => dir.rechecksum(),
        }
    }

    #[must_use]
    pub fn bytes(&self) -> &BlockBuf {
        match self {
            Self::Root(root) => root.bytes(),
            Self::Dir(dir) => dir.bytes(),
        }
    }
}

impl HashTableOwner for DirBlock {
    fn bucket(&self, idx: usize) -> BlockNumber {
        match self {
            Self::Root(root) => root.bucket(idx),
            Self::Dir(dir) => dir.bucket(idx),
        }
    }

    fn set_bucket(&mut self, idx: usize, block: BlockNumber) {
        match self {
            Self::Root(root) => root.set_bucket(idx, block),
            Self::Dir(dir) => dir.set_bucket(idx, block),
        }
    }
}
