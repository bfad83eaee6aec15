#![forbid(unsafe_code)]
//! Block I/O layer for ADF images.
//!
//! An ADF image is a flat file of 512-byte blocks. [`ImageDevice`] opens it
//! read-write, falling back to read-only, and serves bounds-checked
//! positional block reads and writes via `std::os::unix::fs::FileExt` — the
//! image is mutated in place and made durable with an explicit [`BlockIo::sync`].
//! [`MemDevice`] provides the same interface over a byte vector for tests.

use amifs_error::{AdfError, Result};
use amifs_types::{BlockNumber, BLOCK_SIZE, BOOT_BLOCKS};
use std::fs::{File, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::Path;
use tracing::{debug, warn};

/// A 512-byte block buffer.
pub type BlockBuf = [u8; BLOCK_SIZE];

/// Block-addressed access to an ADF image.
pub trait BlockIo {
    /// Total number of blocks in the image.
    fn block_count(&self) -> u32;

    /// Whether writes are rejected.
    fn read_only(&self) -> bool;

    /// Read block `block` in full.
    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf>;

    /// Write block `block` in full.
    fn write_block(&mut self, block: BlockNumber, data: &BlockBuf) -> Result<()>;

    /// Flush pending writes to stable storage. Idempotent.
    fn sync(&self) -> Result<()>;

    /// Zero-fill block `block`.
    fn zero_block(&mut self, block: BlockNumber) -> Result<()> {
        self.write_block(block, &[0_u8; BLOCK_SIZE])
    }
}

fn check_bounds(block: BlockNumber, block_count: u32) -> Result<()> {
    if block.0 >= block_count {
        return Err(AdfError::BlockOutOfRange(block.0));
    }
    Ok(())
}

// ── File-backed device ──────────────────────────────────────────────────────

/// File-backed ADF image using positional `pread`/`pwrite` I/O.
#[derive(Debug)]
pub struct ImageDevice {
    file: File,
    block_count: u32,
    writable: bool,
}

impl ImageDevice {
    /// Open `path` read-write, falling back to read-only, and validate the
    /// image geometry (whole blocks, at least the two boot blocks).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let (file, writable) = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map(|file| (file, true))
            .or_else(|_| {
                OpenOptions::new()
                    .read(true)
                    .open(path)
                    .map(|file| (file, false))
            })?;
        Self::from_file(file, writable)
    }

    /// Open `path` read-only regardless of file permissions.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).open(path.as_ref())?;
        Self::from_file(file, false)
    }

    fn from_file(file: File, writable: bool) -> Result<Self> {
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(AdfError::InvalidImage(format!(
                "image length {len} is not a multiple of {BLOCK_SIZE}"
            )));
        }
        let blocks = len / BLOCK_SIZE as u64;
        if blocks < u64::from(BOOT_BLOCKS) {
            return Err(AdfError::InvalidImage(format!(
                "image too small: {blocks} blocks"
            )));
        }
        let block_count = u32::try_from(blocks)
            .map_err(|_| AdfError::InvalidImage(format!("image too large: {blocks} blocks")))?;
        debug!(blocks = block_count, writable, "opened image device");
        Ok(Self {
            file,
            block_count,
            writable,
        })
    }
}

impl BlockIo for ImageDevice {
    fn block_count(&self) -> u32 {
        self.block_count
    }

    fn read_only(&self) -> bool {
        !self.writable
    }

    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        check_bounds(block, self.block_count)?;
        let mut buf = [0_u8; BLOCK_SIZE];
        self.file.read_exact_at(&mut buf, block.byte_offset())?;
        Ok(buf)
    }

    fn write_block(&mut self, block: BlockNumber, data: &BlockBuf) -> Result<()> {
        if !self.writable {
            return Err(AdfError::ReadOnly);
        }
        check_bounds(block, self.block_count)?;
        self.file.write_all_at(data, block.byte_offset())?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        if self.writable {
            self.file.sync_all()?;
        }
        Ok(())
    }
}

impl Drop for ImageDevice {
    fn drop(&mut self) {
        if self.writable {
            if let Err(error) = self.file.sync_all() {
                warn!(%error, "sync on close failed");
            }
        }
    }
}

// ── In-memory device ────────────────────────────────────────────────────────

/// In-memory block device for unit tests.
#[derive(Debug, Clone)]
pub struct MemDevice {
    blocks: Vec<u8>,
    read_only: bool,
}

impl MemDevice {
    #[must_use]
    pub fn new(block_count: u32) -> Self {
        Self {
            blocks: vec![0_u8; block_count as usize * BLOCK_SIZE],
            read_only: false,
        }
    }

    /// Consume the device, returning a read-only view of the same contents.
    #[must_use]
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.blocks
    }
}

impl BlockIo for MemDevice {
    fn block_count(&self) -> u32 {
        (self.blocks.len() / BLOCK_SIZE) as u32
    }

    fn read_only(&self) -> bool {
        self.read_only
    }

    fn read_block(&self, block: BlockNumber) -> Result<BlockBuf> {
        check_bounds(block, self.block_count())?;
        let start = block.byte_offset() as usize;
        let mut buf = [0_u8; BLOCK_SIZE];
        buf.copy_from_slice(&self.blocks[start..start + BLOCK_SIZE]);
        Ok(buf)
    }

    fn write_block(&mut self, block: BlockNumber, data: &BlockBuf) -> Result<()> {
        if self.read_only {
            return Err(AdfError::ReadOnly);
        }
        check_bounds(block, self.block_count())?;
        let start = block.byte_offset() as usize;
        self.blocks[start..start + BLOCK_SIZE].copy_from_slice(data);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amifs_types::FLOPPY_DD_BLOCKS;
    use std::io::Write;

    fn temp_image(blocks: u32) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&vec![0_u8; blocks as usize * BLOCK_SIZE])
            .expect("fill image");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn open_and_round_trip_block() {
        let image = temp_image(FLOPPY_DD_BLOCKS);
        let mut dev = ImageDevice::open(image.path()).expect("open");
        assert_eq!(dev.block_count(), FLOPPY_DD_BLOCKS);
        assert!(!dev.read_only());

        let mut data = [0_u8; BLOCK_SIZE];
        data[0] = 0xAA;
        data[511] = 0x55;
        dev.write_block(BlockNumber(880), &data).expect("write");
        assert_eq!(dev.read_block(BlockNumber(880)).expect("read"), data);

        dev.zero_block(BlockNumber(880)).expect("zero");
        assert_eq!(
            dev.read_block(BlockNumber(880)).expect("read"),
            [0_u8; BLOCK_SIZE]
        );
        dev.sync().expect("sync");
    }

    #[test]
    fn out_of_range_block_fails() {
        let image = temp_image(16);
        let mut dev = ImageDevice::open(image.path()).expect("open");
        assert!(matches!(
            dev.read_block(BlockNumber(16)),
            Err(AdfError::BlockOutOfRange(16))
        ));
        assert!(matches!(
            dev.write_block(BlockNumber(100), &[0; BLOCK_SIZE]),
            Err(AdfError::BlockOutOfRange(100))
        ));
    }

    #[test]
    fn ragged_image_rejected() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(&[0_u8; BLOCK_SIZE + 7]).expect("write");
        file.flush().expect("flush");
        assert!(matches!(
            ImageDevice::open(file.path()),
            Err(AdfError::InvalidImage(_))
        ));
    }

    #[test]
    fn tiny_image_rejected() {
        let image = temp_image(1);
        assert!(matches!(
            ImageDevice::open(image.path()),
            Err(AdfError::InvalidImage(_))
        ));
    }

    #[test]
    fn read_only_fallback() {
        let image = temp_image(4);
        let dev = ImageDevice::open_read_only(image.path()).expect("open");
        assert!(dev.read_only());
        let mut dev = dev;
        assert!(matches!(
            dev.write_block(BlockNumber(2), &[0; BLOCK_SIZE]),
            Err(AdfError::ReadOnly)
        ));
    }

    #[test]
    fn mem_device_round_trip() {
        let mut dev = MemDevice::new(8);
        let mut data = [0_u8; BLOCK_SIZE];
        data[3] = 9;
        dev.write_block(BlockNumber(5), &data).expect("write");
        assert_eq!(dev.read_block(BlockNumber(5)).expect("read"), data);
        assert!(dev.read_block(BlockNumber(8)).is_err());

        let mut ro = MemDevice::new(8).into_read_only();
        assert!(matches!(
            ro.write_block(BlockNumber(2), &data),
            Err(AdfError::ReadOnly)
        ));
    }
}
