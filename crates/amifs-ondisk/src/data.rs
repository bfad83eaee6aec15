//! OFS data block view.
//!
//! Writes always emit OFS framing (24-byte header, 488 payload bytes), even
//! on FFS-flavored volumes; the flavor is detected and reported but not
//! honored at write time.

use crate::BlockBuf;
use amifs_types::{
    apply_checksum, be_u32, set_be_u32, verify_checksum, BlockNumber, BLOCK_SIZE,
    DATA_BLOCK_PAYLOAD, HEADER_CHECKSUM_WORD, T_DATA,
};

const OFF_TYPE: usize = 0;
const OFF_HEADER_KEY: usize = 4;
const OFF_SEQ_NUM: usize = 8;
const OFF_DATA_SIZE: usize = 12;
const OFF_NEXT_DATA: usize = 16;
const OFF_PAYLOAD: usize = 24;

/// Owned view of an OFS data block.
pub struct DataBlock {
    buf: BlockBuf,
}

impl DataBlock {
    #[must_use]
    pub fn from_buf(buf: BlockBuf) -> Self {
        Self { buf }
    }

    /// Fresh data block owned by `header`, with 1-based sequence `seq` and
    /// no payload yet.
    #[must_use]
    pub fn new(header: BlockNumber, seq: u32) -> Self {
        let mut data = Self {
            buf: [0_u8; BLOCK_SIZE],
        };
        set_be_u32(&mut data.buf, OFF_TYPE, T_DATA);
        set_be_u32(&mut data.buf, OFF_HEADER_KEY, header.0);
        set_be_u32(&mut data.buf, OFF_SEQ_NUM, seq);
        data.rechecksum();
        data
    }

    #[must_use]
    pub fn block_type(&self) -> u32 {
        be_u32(&self.buf, OFF_TYPE)
    }

    /// Block number of the owning file header.
    #[must_use]
    pub fn header_key(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_HEADER_KEY))
    }

    /// 1-based position in the file's data chain.
    #[must_use]
    pub fn seq_num(&self) -> u32 {
        be_u32(&self.buf, OFF_SEQ_NUM)
    }

    /// Valid payload bytes, clamped to the 488-byte payload capacity.
    #[must_use]
    pub fn data_size(&self) -> usize {
        (be_u32(&self.buf, OFF_DATA_SIZE) as usize).min(DATA_BLOCK_PAYLOAD)
    }

    pub fn set_data_size(&mut self, size: usize) {
        debug_assert!(size <= DATA_BLOCK_PAYLOAD);
        set_be_u32(&mut self.buf, OFF_DATA_SIZE, size as u32);
    }

    #[must_use]
    pub fn next_data(&self) -> BlockNumber {
        BlockNumber(be_u32(&self.buf, OFF_NEXT_DATA))
    }

    pub fn set_next_data(&mut self, block: BlockNumber) {
        set_be_u32(&mut self.buf, OFF_NEXT_DATA, block.0);
    }

    /// The full 488-byte payload region.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.buf[OFF_PAYLOAD..OFF_PAYLOAD + DATA_BLOCK_PAYLOAD]
    }

    /// Copy `bytes` into the payload at `offset` (within-block).
    pub fn write_payload(&mut self, offset: usize, bytes: &[u8]) {
        debug_assert!(offset + bytes.len() <= DATA_BLOCK_PAYLOAD);
        let start = OFF_PAYLOAD + offset;
        self.buf[start..start + bytes.len()].copy_from_slice(bytes);
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
