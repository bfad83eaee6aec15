#![forbid(unsafe_code)]
//! Free-block allocation over the AmigaDOS bitmap.
//!
//! The allocator keeps an in-memory set of free blocks seeded from the
//! in-root bitmap pages and mirrors every change back into the persisted
//! pages, recomputing their checksums. The bitmap extension chain is not
//! supported: the 25 in-root pointers cover 25·4064 = 101 600 blocks, which
//! clears DD and HD floppies; allocation beyond a missing page reports
//! no-space instead of growing the chain.

use amifs_block::BlockIo;
use amifs_error::{AdfError, Result};
use amifs_ondisk::{BitmapBlock, RootBlock};
use amifs_types::{BlockNumber, BITMAP_PAGE_SLOTS, BLOCKS_PER_BITMAP_PAGE, BOOT_BLOCKS};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// In-memory mirror of the volume's allocation state.
pub struct Allocator {
    free: BTreeSet<u32>,
    bitmap_pages: [BlockNumber; BITMAP_PAGE_SLOTS],
    total_blocks: u32,
    root_block: BlockNumber,
}

impl Allocator {
    /// Seed the free set from the root block's bitmap pages.
    ///
    /// Every block in [2, total) starts free; the boot area, the root, the
    /// bitmap pages themselves, and every block whose bitmap bit is clear
    /// are subtracted. Directory-tree reachability is reconciled afterwards
    /// by the caller through [`Allocator::mark_used`], which keeps the set
    /// honest even when the bitmap-valid flag is stale.
    pub fn load<D: BlockIo>(dev: &D, root: &RootBlock, root_block: BlockNumber) -> Result<Self> {
        let total_blocks = dev.block_count();
        let mut free: BTreeSet<u32> = (BOOT_BLOCKS..total_blocks).collect();
        free.remove(&root_block.0);

        let mut bitmap_pages = [BlockNumber::NULL; BITMAP_PAGE_SLOTS];
        for slot in 0..BITMAP_PAGE_SLOTS {
            let page_block = root.bitmap_page(slot);
            if page_block.is_null() {
                continue;
            }
            bitmap_pages[slot] = page_block;
            free.remove(&page_block.0);

            let page = BitmapBlock::from_buf(dev.read_block(page_block)?);
            let base = slot as u32 * BLOCKS_PER_BITMAP_PAGE;
            for index in 0..BLOCKS_PER_BITMAP_PAGE {
                let block = base + index;
                if block >= total_blocks {
                    break;
                }
                if !page.is_free(index) {
                    free.remove(&block);
                }
            }
        }

        debug!(
            total = total_blocks,
            free = free.len(),
            bitmap_valid = root.bitmap_valid(),
            "allocator seeded"
        );
        Ok(Self {
            free,
            bitmap_pages,
            total_blocks,
            root_block,
        })
    }

    /// Remove `block` from the free set without touching the on-disk bitmap.
    ///
    /// Used by the reachability scan at mount: blocks found in use through
    /// the directory tree stay used regardless of what the bitmap claims.
    pub fn mark_used(&mut self, block: BlockNumber) {
        self.free.remove(&block.0);
    }

    /// Allocate the lowest-numbered free block.
    ///
    /// The target's bitmap page must exist before anything is mutated;
    /// otherwise the volume is out of coverable space. The block is
    /// zero-filled and its bitmap bit cleared before it leaves the free set.
    pub fn allocate<D: BlockIo>(&mut self, dev: &mut D) -> Result<BlockNumber> {
        let Some(&lowest) = self.free.iter().next() else {
            return Err(AdfError::NoSpace);
        };
        let block = BlockNumber(lowest);
        let page_block = self.page_for(block);
        if page_block.is_null() {
            warn!(%block, "no bitmap page covers candidate block");
            return Err(AdfError::NoSpace);
        }

        dev.zero_block(block)?;
        self.flip_bit(dev, page_block, block, false)?;
        self.free.remove(&lowest);
        Ok(block)
    }

    /// Return `block` to the free set and set its bitmap bit.
    ///
    /// The boot area and the root block are never freed.
    pub fn free<D: BlockIo>(&mut self, dev: &mut D, block: BlockNumber) -> Result<()> {
        if block.0 < BOOT_BLOCKS || block == self.root_block {
            warn!(%block, "refusing to free system block");
            return Ok(());
        }
        let page_block = self.page_for(block);
        if page_block.is_null() {
            warn!(%block, "freed block not covered by any bitmap page");
            return Ok(());
        }
        self.flip_bit(dev, page_block, block, true)?;
        self.free.insert(block.0);
        Ok(())
    }

    fn page_for(&self, block: BlockNumber) -> BlockNumber {
        let slot = block.bitmap_page_index();
        if slot < BITMAP_PAGE_SLOTS {
            self.bitmap_pages[slot]
        } else {
            BlockNumber::NULL
        }
    }

    fn flip_bit<D: BlockIo>(
        &self,
        dev: &mut D,
        page_block: BlockNumber,
        block: BlockNumber,
        free: bool,
    ) -> Result<()> {
        let mut page = BitmapBlock::from_buf(dev.read_block(page_block)?);
        page.set_free(block.0 % BLOCKS_PER_BITMAP_PAGE, free);
        page.rechecksum();
        dev.write_block(page_block, page.bytes())
    }

    #[must_use]
    pub fn is_free(&self, block: BlockNumber) -> bool {
        self.free.contains(&block.0)
    }

    #[must_use]
    pub fn free_count(&self) -> u32 {
        self.free.len() as u32
    }

    #[must_use]
    pub fn total_blocks(&self) -> u32 {
        self.total_blocks
    }

    /// Snapshot of the free set, ascending.
    #[must_use]
    pub fn free_blocks(&self) -> Vec<BlockNumber> {
        self.free.iter().map(|&b| BlockNumber(b)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amifs_block::MemDevice;
    use amifs_types::{FLOPPY_DD_BLOCKS, ROOT_BLOCK};

    /// A blank formatted DD volume: root at 880, one bitmap page at 881,
    /// blocks 0, 1, 880, 881 used.
    fn formatted() -> (MemDevice, RootBlock) {
        let mut dev = MemDevice::new(FLOPPY_DD_BLOCKS);
        let mut page = BitmapBlock::all_free();
        for used in [0, 1, 880, 881] {
            page.set_free(used, false);
        }
        page.rechecksum();
        dev.write_block(BlockNumber(881), page.bytes()).expect("bitmap");

        let root = RootBlock::for_format("Empty", BlockNumber(881), 0);
        dev.write_block(ROOT_BLOCK, root.bytes()).expect("root");
        (dev, root)
    }

    #[test]
    fn seeds_from_bitmap() {
        let (dev, root) = formatted();
        let alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        assert_eq!(alloc.total_blocks(), FLOPPY_DD_BLOCKS);
        // 1760 blocks minus boot pair, root, and the bitmap page.
        assert_eq!(alloc.free_count(), FLOPPY_DD_BLOCKS - 4);
        assert!(!alloc.is_free(BlockNumber(0)));
        assert!(!alloc.is_free(BlockNumber(1)));
        assert!(!alloc.is_free(ROOT_BLOCK));
        assert!(!alloc.is_free(BlockNumber(881)));
        assert!(alloc.is_free(BlockNumber(2)));
        assert!(alloc.is_free(BlockNumber(1759)));
    }

    #[test]
    fn allocate_returns_lowest_and_persists_bit() {
        let (mut dev, root) = formatted();
        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");

        let first = alloc.allocate(&mut dev).expect("allocate");
        assert_eq!(first, BlockNumber(2));
        assert!(!alloc.is_free(first));

        let second = alloc.allocate(&mut dev).expect("allocate");
        assert_eq!(second, BlockNumber(3));

        let page = BitmapBlock::from_buf(dev.read_block(BlockNumber(881)).expect("read"));
        assert!(!page.is_free(2));
        assert!(!page.is_free(3));
        assert!(page.is_free(4));
        assert!(page.checksum_ok());
    }

    #[test]
    fn allocate_zero_fills() {
        let (mut dev, root) = formatted();
        dev.write_block(BlockNumber(2), &[0xAB_u8; 512]).expect("dirty");
        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        let block = alloc.allocate(&mut dev).expect("allocate");
        assert_eq!(block, BlockNumber(2));
        assert_eq!(dev.read_block(block).expect("read"), [0_u8; 512]);
    }

    #[test]
    fn free_round_trip() {
        let (mut dev, root) = formatted();
        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        let before = alloc.free_count();

        let block = alloc.allocate(&mut dev).expect("allocate");
        assert_eq!(alloc.free_count(), before - 1);
        alloc.free(&mut dev, block).expect("free");
        assert_eq!(alloc.free_count(), before);
        assert!(alloc.is_free(block));

        let page = BitmapBlock::from_buf(dev.read_block(BlockNumber(881)).expect("read"));
        assert!(page.is_free(2));
        assert!(page.checksum_ok());
    }

    #[test]
    fn system_blocks_never_freed() {
        let (mut dev, root) = formatted();
        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        let before = alloc.free_count();
        alloc.free(&mut dev, BlockNumber(0)).expect("noop");
        alloc.free(&mut dev, BlockNumber(1)).expect("noop");
        alloc.free(&mut dev, ROOT_BLOCK).expect("noop");
        assert_eq!(alloc.free_count(), before);
        assert!(!alloc.is_free(ROOT_BLOCK));
    }

    #[test]
    fn mark_used_overrides_stale_bitmap() {
        let (dev, root) = formatted();
        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        assert!(alloc.is_free(BlockNumber(900)));
        alloc.mark_used(BlockNumber(900));
        assert!(!alloc.is_free(BlockNumber(900)));
    }

    #[test]
    fn exhaustion_reports_no_space() {
        let mut dev = MemDevice::new(8);
        let mut page = BitmapBlock::all_free();
        for used in 0..8 {
            page.set_free(used, false);
        }
        page.rechecksum();
        dev.write_block(BlockNumber(3), page.bytes()).expect("bitmap");
        let root = RootBlock::for_format("Full", BlockNumber(3), 0);
        dev.write_block(BlockNumber(2), root.bytes()).expect("root");

        let mut alloc = Allocator::load(&dev, &root, BlockNumber(2)).expect("load");
        assert_eq!(alloc.free_count(), 0);
        assert!(matches!(alloc.allocate(&mut dev), Err(AdfError::NoSpace)));
    }

    #[test]
    fn missing_bitmap_page_reports_no_space() {
        // Image larger than one bitmap page's coverage, with only page 0
        // present: candidates beyond 4064 cannot be allocated.
        let mut dev = MemDevice::new(4066);
        let mut page = BitmapBlock::all_free();
        // Use up everything page 0 covers.
        for used in 0..BLOCKS_PER_BITMAP_PAGE {
            page.set_free(used, false);
        }
        page.rechecksum();
        dev.write_block(BlockNumber(881), page.bytes()).expect("bitmap");
        let root = RootBlock::for_format("Wide", BlockNumber(881), 0);
        dev.write_block(ROOT_BLOCK, root.bytes()).expect("root");

        let mut alloc = Allocator::load(&dev, &root, ROOT_BLOCK).expect("load");
        // Blocks 4064 and 4065 are nominally free but uncovered.
        assert_eq!(alloc.free_count(), 2);
        assert!(matches!(alloc.allocate(&mut dev), Err(AdfError::NoSpace)));
        // Nothing was mutated by the failed attempt.
        assert_eq!(alloc.free_count(), 2);
    }
}
