//! Root block view (always block 880 on a floppy volume).

use crate::{BlockBuf, HashTableOwner};
use amifs_types::{
    amiga_to_unix, apply_checksum, bcpl_read, bcpl_write, be_i32, be_u32, set_be_i32, set_be_u32,
    unix_to_amiga, verify_checksum, BlockNumber, ParseError, BITMAP_PAGE_SLOTS, BLOCK_SIZE,
    HASH_TABLE_SIZE, HEADER_CHECKSUM_WORD, ST_ROOT, T_HEADER,
};

const OFF_TYPE: usize = 0;
const OFF_HT_SIZE: usize = 12;
const OFF_HASH_TABLE: usize = 24;
const OFF_BM_FLAG: usize = 312;
const OFF_BM_PAGES: usize = 316;
const OFF_DAYS: usize = 420;
const OFF_MINS: usize = 424;
const OFF_TICKS: usize = 428;
const OFF_NAME: usize = 432;
const OFF_SEC_TYPE: usize = 508;

/// Owned view of the root block.
pub struct RootBlock {
    buf: BlockBuf,
}

impl RootBlock {
    #[must_use]
    pub fn from_buf(buf: BlockBuf) -> Self {
        Self { buf }
    }

    /// Build the root block of a freshly formatted volume.
    ///
    /// AmigaDOS formatters write sec_type 1; lenient readers also accept 0,
    /// but this writer always emits 1.
    #[must_use]
    pub fn for_format(volume_name: &str, bitmap_page: BlockNumber, now_unix: i64) -> Self {
        let mut root = Self {
            buf: [0_u8; BLOCK_SIZE],
        };
        set_be_u32(&mut root.buf, OFF_TYPE, T_HEADER);
        set_be_u32(&mut root.buf, OFF_HT_SIZE, HASH_TABLE_SIZE as u32);
        // Bitmap-valid flag: all ones.
        set_be_u32(&mut root.buf, OFF_BM_FLAG, u32::MAX);
        root.set_bitmap_page(0, bitmap_page);
        root.set_mtime_unix(now_unix);
        root.set_volume_name(volume_name);
        set_be_i32(&mut root.buf, OFF_SEC_TYPE, ST_ROOT);
        root.rechecksum();
        root
    }

    /// Check the fields that identify a root block.
    ///
    /// Some formatters leave sec_type as 0 instead of 1; both are accepted.
    pub fn validate(&self) -> Result<(), ParseError> {
        if be_u32(&self.buf, OFF_TYPE) != T_HEADER {
            return Err(ParseError::InvalidField {
                field: "root.type",
                reason: "expected header type 2",
            });
        }
        let sec_type = be_i32(&self.buf, OFF_SEC_TYPE);
        if sec_type != ST_ROOT && sec_type != 0 {
            return Err(ParseError::InvalidField {
                field: "root.sec_type",
                reason: "expected root secondary type",
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn volume_name(&self) -> String {
        bcpl_read(&self.buf[OFF_NAME..OFF_NAME + 32])
    }

    pub fn set_volume_name(&mut self, name: &str) {
        bcpl_write(&mut self.buf[OFF_NAME..OFF_NAME + 32], name);
    }

    /// Whether the on-disk bitmap is flagged valid.
    #[must_use]
    pub fn bitmap_valid(&self) -> bool {
        be_u32(&self.buf, OFF_BM_FLAG) != 0
    }

    /// Block number of bitmap page `slot` (0..25), or NULL when absent.
    #[must_use]
    pub fn bitmap_page(&self, slot: usize) -> BlockNumber {
        debug_assert!(slot < BITMAP_PAGE_SLOTS);
        BlockNumber(be_u32(&self.buf, OFF_BM_PAGES + slot * 4))
    }

    pub fn set_bitmap_page(&mut self, slot: usize, block: BlockNumber) {
        debug_assert!(slot < BITMAP_PAGE_SLOTS);
        set_be_u32(&mut self.buf, OFF_BM_PAGES + slot * 4, block.0);
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

impl HashTableOwner for RootBlock {
    fn bucket(&self, idx: usize) -> BlockNumber {
        debug_assert!(idx < HASH_TABLE_SIZE);
        BlockNumber(be_u32(&self.buf, OFF_HASH_TABLE + idx * 4))
    }

    fn set_bucket(&mut self, idx: usize, block: BlockNumber) {
        debug_assert!(idx < HASH_TABLE_SIZE);
        set_be_u32(&mut self.buf, OFF_HASH_TABLE + idx * 4, block.0);
    }
}
