//! Volume lifecycle: open, validation, reachability reconciliation, sync.

use crate::dir::DirCache;
use amifs_alloc::Allocator;
use amifs_block::BlockIo;
use amifs_error::{AdfError, Result};
use amifs_ondisk::{parse_boot_block, DataBlock, DirBlock, HashTableOwner, HeaderBlock, RootBlock};
use amifs_types::{unix_from_system_time, BlockNumber, FsFlavor, HASH_TABLE_SIZE, ROOT_BLOCK};
use std::collections::HashSet;
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A mounted ADF volume.
pub struct Volume<D: BlockIo> {
    pub(crate) dev: D,
    pub(crate) alloc: Allocator,
    pub(crate) cache: DirCache,
    root: BlockNumber,
    flavor: FsFlavor,
    volume_name: String,
}

impl<D: BlockIo> Volume<D> {
    /// Parse and validate the image, seed the allocator, and reconcile it
    /// against the directory tree.
    ///
    /// The boot block must carry a `DOS` signature with a known flavor; the
    /// root is always block 880 regardless of the boot block's hint, and must
    /// look like a root header. Failures here are the only "invalid image"
    /// errors the engine ever raises — after a successful open, every
    /// operation treats the volume as well formed.
    pub fn open(dev: D) -> Result<Self> {
        let boot = parse_boot_block(&dev.read_block(BlockNumber(0))?)?;
        if boot.root_hint != ROOT_BLOCK.0 {
            debug!(hint = boot.root_hint, "ignoring boot-block root hint");
        }
        if ROOT_BLOCK.0 >= dev.block_count() {
            return Err(AdfError::InvalidImage(format!(
                "image has {} blocks, root block {} does not exist",
                dev.block_count(),
                ROOT_BLOCK
            )));
        }

        let root = RootBlock::from_buf(dev.read_block(ROOT_BLOCK)?);
        root.validate()?;
        let volume_name = root.volume_name();
        let alloc = Allocator::load(&dev, &root, ROOT_BLOCK)?;

        let mut volume = Self {
            dev,
            alloc,
            cache: DirCache::new(),
            root: ROOT_BLOCK,
            flavor: boot.flavor,
            volume_name,
        };
        volume.reconcile_reachable()?;

        info!(
            volume = %volume.volume_name,
            flavor = %volume.flavor,
            read_only = volume.read_only(),
            free_blocks = volume.alloc.free_count(),
            "volume opened"
        );
        Ok(volume)
    }

    /// Walk the directory tree from the root and mark every reachable header
    /// and data block used, so a stale bitmap-valid flag cannot hand out
    /// live blocks.
    fn reconcile_reachable(&mut self) -> Result<()> {
        let root = RootBlock::from_buf(self.dev.read_block(self.root)?);
        let mut pending: Vec<BlockNumber> = (0..HASH_TABLE_SIZE)
            .map(|idx| root.bucket(idx))
            .filter(|block| !block.is_null())
            .collect();
        let mut seen: HashSet<u32> = HashSet::new();

        while let Some(block) = pending.pop() {
            if block.is_null() || !seen.insert(block.0) {
                continue;
            }
            if block.0 >= self.dev.block_count() {
                warn!(%block, "directory entry points outside the image");
                continue;
            }
            self.alloc.mark_used(block);

            let header = HeaderBlock::from_buf(self.dev.read_block(block)?);
            if header.is_directory() {
                for idx in 0..HASH_TABLE_SIZE {
                    let child = header.bucket(idx);
                    if !child.is_null() {
                        pending.push(child);
                    }
                }
            } else if header.is_file() {
                let mut data = header.first_data();
                while !data.is_null() && data.0 < self.dev.block_count() && seen.insert(data.0) {
                    self.alloc.mark_used(data);
                    data = DataBlock::from_buf(self.dev.read_block(data)?).next_data();
                }
            }

            let sibling = header.hash_chain();
            if !sibling.is_null() {
                pending.push(sibling);
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn volume_name(&self) -> &str {
        &self.volume_name
    }

    #[must_use]
    pub fn flavor(&self) -> FsFlavor {
        self.flavor
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.dev.read_only()
    }

    #[must_use]
    pub fn root_block(&self) -> BlockNumber {
        self.root
    }

    #[must_use]
    pub fn total_blocks(&self) -> u32 {
        self.dev.block_count()
    }

    #[must_use]
    pub fn free_blocks(&self) -> u32 {
        self.alloc.free_count()
    }

    /// Direct access to the underlying device (used by consistency checks).
    #[must_use]
    pub fn device(&self) -> &D {
        &self.dev
    }

    /// Snapshot of the allocator's free set, ascending.
    #[must_use]
    pub fn free_block_set(&self) -> Vec<BlockNumber> {
        self.alloc.free_blocks()
    }

    /// Flush pending mutations to stable storage. Idempotent.
    pub fn flush(&self) -> Result<()> {
        self.dev.sync()
    }

    /// Same durability point as [`Volume::flush`].
    pub fn fsync(&self) -> Result<()> {
        self.dev.sync()
    }

    // ── Block helpers ───────────────────────────────────────────────────

    pub(crate) fn read_header(&self, block: BlockNumber) -> Result<HeaderBlock> {
        Ok(HeaderBlock::from_buf(self.dev.read_block(block)?))
    }

    pub(crate) fn write_header(
        &mut self,
        block: BlockNumber,
        header: &mut HeaderBlock,
    ) -> Result<()> {
        header.rechecksum();
        self.dev.write_block(block, header.bytes())
    }

    pub(crate) fn read_data(&self, block: BlockNumber) -> Result<DataBlock> {
        Ok(DataBlock::from_buf(self.dev.read_block(block)?))
    }

    pub(crate) fn write_data(&mut self, block: BlockNumber, data: &mut DataBlock) -> Result<()> {
        data.rechecksum();
        self.dev.write_block(block, data.bytes())
    }

    /// Load a directory container, dispatching the root/non-root layout once.
    pub(crate) fn load_dir(&self, block: BlockNumber) -> Result<DirBlock> {
        let buf = self.dev.read_block(block)?;
        if block == self.root {
            Ok(DirBlock::Root(RootBlock::from_buf(buf)))
        } else {
            Ok(DirBlock::Dir(HeaderBlock::from_buf(buf)))
        }
    }

    pub(crate) fn store_dir(&mut self, block: BlockNumber, dir: &mut DirBlock) -> Result<()> {
        dir.rechecksum();
        self.dev.write_block(block, dir.bytes())
    }

    pub(crate) fn now_unix() -> i64 {
        unix_from_system_time(SystemTime::now())
    }
}
