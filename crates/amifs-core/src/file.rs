//! File I/O over linked OFS data chains.
//!
//! Files are singly linked chains of data blocks, each carrying up to 488
//! payload bytes. Logical file offsets advance by a fixed 488-byte stride
//! per link regardless of each block's `data_size`, which is what makes
//! sparse files work: a missing link, or the tail of a block beyond its
//! `data_size`, reads back as zeros.

use crate::volume::Volume;
use amifs_block::BlockIo;
use amifs_error::{AdfError, Result};
use amifs_ondisk::DataBlock;
use amifs_types::{BlockNumber, DATA_BLOCK_PAYLOAD};

const STRIDE: u64 = DATA_BLOCK_PAYLOAD as u64;

impl<D: BlockIo> Volume<D> {
    /// Read up to `size` bytes of the file at `header_block`, starting at
    /// `offset`. Out-of-range offsets are not errors: the result is simply
    /// shorter, possibly empty. Holes read as zeros.
    pub(crate) fn read_at(
        &self,
        header_block: BlockNumber,
        offset: u64,
        size: usize,
    ) -> Result<Vec<u8>> {
        let header = self.read_header(header_block)?;
        let file_size = u64::from(header.file_size());
        if offset >= file_size || size == 0 {
            return Ok(Vec::new());
        }
        let size = size.min((file_size - offset) as usize);

        // Walk to the link containing `offset`.
        let mut current = header.first_data();
        let mut hops = 0_u32;
        for _ in 0..offset / STRIDE {
            if current.is_null() {
                break;
            }
            hops += 1;
            if hops > self.total_blocks() {
                return Err(AdfError::Invalid("data chain loops"));
            }
            current = self.read_data(current)?.next_data();
        }

        let mut position = (offset % STRIDE) as usize;
        let mut out = Vec::with_capacity(size);
        while out.len() < size {
            if current.is_null() {
                // The chain ended inside the declared file size: a hole.
                out.resize(size, 0);
                break;
            }
            hops += 1;
            if hops > self.total_blocks() {
                return Err(AdfError::Invalid("data chain loops"));
            }
            let data = self.read_data(current)?;
            let wanted = (size - out.len()).min(DATA_BLOCK_PAYLOAD - position);
            let valid_end = data.data_size().min(position + wanted);
            if position < valid_end {
                out.extend_from_slice(&data.payload()[position..valid_end]);
            }
            // Intra-block hole: zero-fill the stretch past data_size.
            let copied = valid_end.saturating_sub(position);
            out.resize(out.len() + (wanted - copied), 0);

            position = 0;
            current = data.next_data();
        }
        Ok(out)
    }

    /// Write `buf` at `offset`, extending the chain and bridging sparse gaps
    /// with zero blocks as needed.
    ///
    /// Returns the byte count written plus whether the file size changed.
    /// Running out of blocks mid-stream is a short write, not an error: the
    /// header size then reflects only the bytes actually written.
    pub(crate) fn write_at(
        &mut self,
        header_block: BlockNumber,
        offset: u64,
        buf: &[u8],
    ) -> Result<(usize, bool)> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        let mut header = self.read_header(header_block)?;
        if header.is_directory() {
            return Err(AdfError::IsDirectory);
        }
        if buf.is_empty() {
            return Ok((0, false));
        }
        if offset + buf.len() as u64 > u64::from(u32::MAX) {
            return Err(AdfError::NoSpace);
        }
        let old_size = u64::from(header.file_size());
        let mut header_dirty = false;

        if header.first_data().is_null() {
            // First data block of the file. Failing to get even this one is a
            // clean error: nothing has been mutated yet.
            let first = self.alloc.allocate(&mut self.dev)?;
            let mut block = DataBlock::new(header_block, 1);
            self.write_data(first, &mut block)?;
            header.set_first_data(first);
            header_dirty = true;
        }

        let mut previous = BlockNumber::NULL;
        let mut current = header.first_data();
        let mut logical = 0_u64;
        let mut written = 0_usize;
        while written < buf.len() {
            if current.is_null() {
                // Extend the chain: either a bridging zero block before the
                // target offset or the next payload block.
                match self.alloc.allocate(&mut self.dev) {
                    Ok(fresh) => {
                        let seq = (logical / STRIDE + 1) as u32;
                        let mut block = DataBlock::new(header_block, seq);
                        self.write_data(fresh, &mut block)?;
                        let mut pred = self.read_data(previous)?;
                        pred.set_next_data(fresh);
                        self.write_data(previous, &mut pred)?;
                        current = fresh;
                    }
                    Err(AdfError::NoSpace) => break,
                    Err(other) => return Err(other),
                }
            }

            if logical + STRIDE <= offset {
                // Still in front of the write window; bridging blocks keep
                // data_size 0 so a later failure cannot inflate the file.
                previous = current;
                current = self.read_data(current)?.next_data();
                logical += STRIDE;
                continue;
            }

            let block_offset = offset.saturating_sub(logical) as usize;
            let count = (buf.len() - written).min(DATA_BLOCK_PAYLOAD - block_offset);
            let mut data = self.read_data(current)?;
            data.write_payload(block_offset, &buf[written..written + count]);
            if block_offset + count > data.data_size() {
                data.set_data_size(block_offset + count);
            }
            self.write_data(current, &mut data)?;

            written += count;
            logical += STRIDE;
            previous = current;
            current = data.next_data();
        }

        let new_size = old_size.max(offset + written as u64);
        let size_changed = new_size != old_size;
        if size_changed {
            header.set_file_size(new_size as u32);
            header_dirty = true;
        }
        if written > 0 || header_dirty {
            header.set_mtime_unix(Self::now_unix());
            self.write_header(header_block, &mut header)?;
        }
        Ok((written, size_changed))
    }

    /// Truncate the file at `header_block` to `new_size` bytes.
    ///
    /// Shrinking frees every block past ceil(new_size/488) and trims the
    /// retained tail; growing just raises the size and leaves a hole (the
    /// read path zero-fills it).
    pub(crate) fn truncate_header(&mut self, header_block: BlockNumber, new_size: u64) -> Result<()> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        let mut header = self.read_header(header_block)?;
        if header.is_directory() {
            return Err(AdfError::IsDirectory);
        }
        let old_size = u64::from(header.file_size());
        if new_size == old_size {
            return Ok(());
        }
        if new_size > u64::from(u32::MAX) {
            return Err(AdfError::NoSpace);
        }

        if new_size < old_size {
            if new_size == 0 {
                let chain = header.first_data();
                header.set_first_data(BlockNumber::NULL);
                self.free_chain(chain)?;
            } else {
                let keep = ((new_size - 1) / STRIDE + 1) as u32;
                let mut tail = BlockNumber::NULL;
                let mut current = header.first_data();
                let mut kept = 0_u32;
                while !current.is_null() && kept < keep {
                    tail = current;
                    current = self.read_data(current)?.next_data();
                    kept += 1;
                }
                self.free_chain(current)?;
                if kept == keep && !tail.is_null() {
                    let mut block = self.read_data(tail)?;
                    block.set_next_data(BlockNumber::NULL);
                    block.set_data_size(((new_size - 1) % STRIDE + 1) as usize);
                    self.write_data(tail, &mut block)?;
                }
            }
        }

        header.set_file_size(new_size as u32);
        header.set_mtime_unix(Self::now_unix());
        self.write_header(header_block, &mut header)
    }

    /// Free an entire data chain, front to back.
    pub(crate) fn free_chain(&mut self, start: BlockNumber) -> Result<()> {
        let mut current = start;
        let mut hops = 0_u32;
        while !current.is_null() {
            hops += 1;
            if hops > self.total_blocks() {
                return Err(AdfError::Invalid("data chain loops"));
            }
            let next = self.read_data(current)?.next_data();
            self.alloc.free(&mut self.dev, current)?;
            current = next;
        }
        Ok(())
    }
}
