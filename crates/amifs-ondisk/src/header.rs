//! File and directory header view.
//!
//! Files and directories share one 512-byte header layout, told apart by the
//! secondary type at offset 508 (−3 file, 2 directory). For directories the
//! 24..312 table holds hash buckets; for files it is unused by this
//! implementation (OFS block lists are redundant with the data chain).

use crate::{BlockBuf, HashTableOwner};
use amifs_types::{
    amiga_to_unix, apply_checksum, bcpl_read, bcpl_write, be_i32, be_u32, set_be_i32, set_be_u32,
    unix_to_amiga, verify_checksum, BlockNumber, BLOCK_SIZE, HASH_TABLE_SIZE,
    HEADER_CHECKSUM_WORD, ST_DIR, ST_FILE, T_HEADER,
};

const OFF_TYPE: usize = 0;
const OFF_OWN_KEY: usize = 4;
const OFF_FIRST_DATA: usize = 16;
const OFF_TABLE: usize = 24;
const OFF_FILE_SIZE: usize = 324;
const OFF_DAYS: usize = 408;
const OFF_MINS: usize = 412;
const OFF_TICKS: usize = 416;
const OFF_NAME: usize = 432;
const OFF_HASH_CHAIN: usize = 496;
const OFF_PARENT: usize = 500;
const OFF_SEC_TYPE: usize = 508;

/// Owned view of a file or directory header block.
pub struct HeaderBlock {
    buf: BlockBuf,
}

impl HeaderBlock {
    #[must_use]
    pub fn from_buf(buf: BlockBuf) -> Self {
        Self { buf }
    }

    fn new(own: BlockNumber, parent: BlockNumber, name: &str, sec_type: i32, now: i64) -> Self {
        let mut header = Self {
            buf: [0_u8; BLOCK_SIZE],
        };
        set_be_u32(&mut header.buf, OFF_TYPE, T_HEADER);
        set_be_u32(&mut header.buf, OFF_OWN_KEY, own.0);
        set_be_u32(&mut header.buf, OFF_PARENT, parent.0);
        set_be_i32(&mut header.buf, OFF_SEC_TYPE, sec_type);
        header.set_name(name);
        header.set_mtime_unix(now);
        header.rechecksum();
        header
    }

    /// Draft header for a new empty file.
    #[must_use]
    pub fn new_file(own: BlockNumber, parent: BlockNumber, name: &str, now: i64) -> Self {
        Self::new(own, parent, name, ST_FILE, now)
    }

    /// Draft header for a new empty directory.
    #[must_use]
    pub fn new_dir(own: BlockNumber, parent: BlockNumber, name: &str, now: i64) -> Self {
        Self::new(own, parent, name, ST_DIR, now)
    }

    #[must_use]
    pub fn block_type(&self) -> u32 {
        be_u32(&self.buf, OFF_TYPE)
    }

    #[must_use]
    pub fn own_key(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_OWN_KEY))
    }

    #[must_use]
    pub fn sec_type(&self) -> i32 {
        be_i32(&self.buf, OFF_SEC_TYPE)
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.sec_type() == ST_DIR
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.sec_type() == ST_FILE
    }

    #[must_use]
    pub fn name(&self) -> String {
        bcpl_read(&self.buf[OFF_NAME..OFF_NAME + 32])
    }

    pub fn set_name(&mut self, name: &str) {
        bcpl_write(&mut self.buf[OFF_NAME..OFF_NAME + 32], name);
    }

    #[must_use]
    pub fn first_data(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_FIRST_DATA))
    }

    pub fn set_first_data(&mut self, block: BlockNumber) {
        set_be_u32(&mut self.buf, OFF_FIRST_DATA, block.0);
    }

    /// File size in bytes. Zero for directories.
    #[must_use]
    pub fn file_size(&self) -> u32 {
        be_u32(&self.buf, OFF_FILE_SIZE)
    }

    pub fn set_file_size(&mut self, size: u32) {
        set_be_u32(&mut self.buf, OFF_FILE_SIZE, size);
    }

    #[must_use]
    pub fn hash_chain(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_HASH_CHAIN))
    }

    pub fn set_hash_chain(&mut self, block: BlockNumber) {
        set_be_u32(&mut self.buf, OFF_HASH_CHAIN, block.0);
    }

    #[must_use]
    pub fn parent(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_PARENT))
    }

    #[must_use]
    pub fn mtime_unix(&self) -> i64 {
        amiga_to_unix(
            be_u32(&self.buf, OFF_DAYS),
            be_u32(&self.buf, OFF_MINS),
            be_u32(&self.buf, OFF_TICKS),
        )
    }

    pub fn set_mtime_unix(&mut self, unix_secs: i64) {
        let (days, mins, ticks) = unix_to_amiga(unix_secs);
        set_be_u32(&mut self.buf, OFF_DAYS, days);
        set_be_u32(&mut self.buf, OFF_MINS, mins);
        set_be_u32(&mut self.buf, OFF_TICKS, ticks);
    }

    pub fn rechecksum(&mut self) {
        apply_checksum(&mut self.buf, HEADER_CHECKSUM_WORD);
    }

    #[must_use]
    pub fn checksum_ok(&self) -> bool {
        verify_checksum(&self.buf, HEADER_CHECKSUM_WORD)
    }

    #[must_use]
    pub fn bytes(&self) -> &BlockBuf {
        &self.buf
    }
}

impl HashTableOwner for HeaderBlock {
    fn bucket(&self, idx: usize) -> BlockNumber {
        debug_assert!(idx < HASH_TABLE_SIZE);
        BlockNumber(be_u32(&self.buf, OFF_TABLE + idx * 4))
    }

    fn set_bucket(&mut self, idx: usize, block: BlockNumber) {
        debug_assert!(idx < HASH_TABLE_SIZE);
        set_be_u32(&mut self.buf, OFF_TABLE + idx * 4, block.0);
    }
}
