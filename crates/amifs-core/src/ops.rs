//! Namespace operations and the engine surface consumed by the boundary.

use crate::dir::{is_root, split_path, EntryKind};
use crate::volume::Volume;
use amifs_block::BlockIo;
use amifs_error::{AdfError, Result};
use amifs_ondisk::HeaderBlock;
use amifs_types::{BlockNumber, NAME_MAX};
use std::time::SystemTime;
use tracing::debug;

/// Attributes reported through `getattr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attr {
    pub kind: EntryKind,
    pub size: u64,
    pub mtime: SystemTime,
    /// Permission bits: 0755/0644 on writable volumes, 0555/0444 read-only.
    pub mode: u16,
    pub header: BlockNumber,
}

/// An open file: just its header block and the requested access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    pub header: BlockNumber,
    pub writable: bool,
}

impl<D: BlockIo> Volume<D> {
    fn mode_for(&self, kind: EntryKind) -> u16 {
        match (kind, self.read_only()) {
            (EntryKind::Directory, false) => 0o755,
            (EntryKind::Directory, true) => 0o555,
            (EntryKind::File, false) => 0o644,
            (EntryKind::File, true) => 0o444,
        }
    }

    /// Attributes of the entry at `path`.
    ///
    /// File sizes come straight from the header block rather than the
    /// listing cache, so attribute queries right after a write see the
    /// current size.
    pub fn getattr(&mut self, path: &str) -> Result<Attr> {
        let entry = self.lookup(path)?;
        let size = match entry.kind {
            EntryKind::Directory => 0,
            EntryKind::File => self.actual_file_size(entry.header)?,
        };
        Ok(Attr {
            kind: entry.kind,
            size,
            mtime: entry.mtime,
            mode: self.mode_for(entry.kind),
            header: entry.header,
        })
    }

    /// File size read directly from the header block, bypassing the cache.
    pub fn actual_file_size(&self, header_block: BlockNumber) -> Result<u64> {
        Ok(u64::from(self.read_header(header_block)?.file_size()))
    }

    /// Open the file at `path`.
    pub fn open(&mut self, path: &str, write_requested: bool) -> Result<FileHandle> {
        let entry = self.lookup(path)?;
        if entry.is_directory() {
            return Err(AdfError::IsDirectory);
        }
        if write_requested && self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        Ok(FileHandle {
            header: entry.header,
            writable: write_requested,
        })
    }

    /// Read through an open handle. Short reads past end of file are normal.
    pub fn read(&mut self, handle: FileHandle, offset: u64, size: usize) -> Result<Vec<u8>> {
        self.read_at(handle.header, offset, size)
    }

    /// Write through an open handle, returning the byte count actually
    /// written (short when the volume fills up mid-write).
    pub fn write(&mut self, handle: FileHandle, offset: u64, buf: &[u8]) -> Result<usize> {
        let (written, size_changed) = self.write_at(handle.header, offset, buf)?;
        if size_changed {
            self.cache.clear();
        }
        Ok(written)
    }

    /// Create an empty file at `path`. The mode is accepted for interface
    /// parity; AmigaDOS protection bits are not mapped.
    pub fn create(&mut self, path: &str, mode: u32) -> Result<FileHandle> {
        debug!(path, mode, "create file");
        let header = self.create_node(path, EntryKind::File)?;
        Ok(FileHandle {
            header,
            writable: true,
        })
    }

    /// Create an empty directory at `path`.
    pub fn mkdir(&mut self, path: &str, mode: u32) -> Result<()> {
        debug!(path, mode, "create directory");
        self.create_node(path, EntryKind::Directory)?;
        Ok(())
    }

    /// Header state machine: Unallocated → Draft (allocated + initialized)
    /// → Live (linked into the parent bucket). A failure after allocation
    /// frees the draft block before returning.
    fn create_node(&mut self, path: &str, kind: EntryKind) -> Result<BlockNumber> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        let (parent_path, name) = split_path(path);
        if name.len() > NAME_MAX {
            return Err(AdfError::NameTooLong);
        }
        if name.is_empty() {
            return Err(AdfError::Invalid("empty name"));
        }
        if self.lookup(path).is_ok() {
            return Err(AdfError::Exists);
        }
        let parent = self.dir_block_of(&parent_path)?;

        let block = self.alloc.allocate(&mut self.dev)?;
        let now = Self::now_unix();
        let mut header = match kind {
            EntryKind::File => HeaderBlock::new_file(block, parent, &name, now),
            EntryKind::Directory => HeaderBlock::new_dir(block, parent, &name, now),
        };
        let linked = self
            .write_header(block, &mut header)
            .and_then(|()| self.add_to_directory(parent, block, &name));
        if let Err(error) = linked {
            let _ = self.alloc.free(&mut self.dev, block);
            return Err(error);
        }

        self.cache.clear();
        Ok(block)
    }

    /// Delete the file at `path`: unlink, free its data chain in order,
    /// free the header.
    pub fn unlink(&mut self, path: &str) -> Result<()> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        let entry = self.lookup(path)?;
        if entry.is_directory() {
            return Err(AdfError::IsDirectory);
        }
        let (parent_path, name) = split_path(path);
        let parent = self.dir_block_of(&parent_path)?;

        self.remove_from_directory(parent, entry.header, &name)?;
        let chain = self.read_header(entry.header)?.first_data();
        self.free_chain(chain)?;
        self.alloc.free(&mut self.dev, entry.header)?;

        self.cache.clear();
        Ok(())
    }

    /// Delete the empty directory at `path`. The root is never deletable.
    pub fn rmdir(&mut self, path: &str) -> Result<()> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        if is_root(path) {
            return Err(AdfError::Invalid("cannot remove the root directory"));
        }
        let entry = self.lookup(path)?;
        if !entry.is_directory() {
            return Err(AdfError::NotDirectory);
        }
        if !self.list(path)?.is_empty() {
            return Err(AdfError::NotEmpty);
        }
        let (parent_path, name) = split_path(path);
        let parent = self.dir_block_of(&parent_path)?;

        self.remove_from_directory(parent, entry.header, &name)?;
        self.alloc.free(&mut self.dev, entry.header)?;

        self.cache.clear();
        Ok(())
    }

    /// Truncate the file at `path` to `size` bytes.
    pub fn truncate(&mut self, path: &str, size: u64) -> Result<()> {
        if self.read_only() {
            return Err(AdfError::ReadOnly);
        }
        let entry = self.lookup(path)?;
        if entry.is_directory() {
            return Err(AdfError::IsDirectory);
        }
        self.truncate_header(entry.header, size)?;
        self.cache.clear();
        Ok(())
    }
}
