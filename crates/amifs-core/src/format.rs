//! Volume formatting (mkfs).
//!
//! Lays down the minimal valid AmigaDOS volume: DOS boot signature, root
//! block at 880, and one bitmap page at 881 covering the whole floppy.

use amifs_block::{BlockIo, ImageDevice};
use amifs_error::{AdfError, Result};
use amifs_ondisk::{boot_block_for_format, BitmapBlock, RootBlock};
use amifs_types::{
    unix_from_system_time, BlockNumber, FsFlavor, BLOCKS_PER_BITMAP_PAGE, BLOCK_SIZE, NAME_MAX,
    ROOT_BLOCK,
};
use std::fs::OpenOptions;
use std::path::Path;
use std::time::SystemTime;
use tracing::info;

/// The bitmap page of a freshly formatted floppy sits right after the root.
const BITMAP_PAGE: BlockNumber = BlockNumber(881);

/// Write an empty AmigaDOS filesystem onto `dev`.
///
/// The device must be writable and large enough to hold the root block.
/// Every block is cleared first, so formatting an existing image discards
/// its contents.
pub fn format_volume<D: BlockIo>(dev: &mut D, volume_name: &str, flavor: FsFlavor) -> Result<()> {
    if dev.read_only() {
        return Err(AdfError::ReadOnly);
    }
    if volume_name.is_empty() || volume_name.len() > NAME_MAX {
        return Err(AdfError::NameTooLong);
    }
    let total = dev.block_count();
    if total <= BITMAP_PAGE.0 {
        return Err(AdfError::InvalidImage(format!(
            "{total} blocks is too small for a floppy volume"
        )));
    }
    if total > BLOCKS_PER_BITMAP_PAGE {
        return Err(AdfError::InvalidImage(format!(
            "{total} blocks exceed single-page bitmap coverage"
        )));
    }

    for block in 0..total {
        dev.zero_block(BlockNumber(block))?;
    }

    dev.write_block(BlockNumber(0), &boot_block_for_format(flavor, ROOT_BLOCK.0))?;

    let mut bitmap = BitmapBlock::all_free();
    for used in [0, 1, ROOT_BLOCK.0, BITMAP_PAGE.0] {
        bitmap.set_free(used, false);
    }
    for beyond in total..BLOCKS_PER_BITMAP_PAGE {
        bitmap.set_free(beyond, false);
    }
    bitmap.rechecksum();
    dev.write_block(BITMAP_PAGE, bitmap.bytes())?;

    let now = unix_from_system_time(SystemTime::now());
    let root = RootBlock::for_format(volume_name, BITMAP_PAGE, now);
    dev.write_block(ROOT_BLOCK, root.bytes())?;

    dev.sync()?;
    info!(volume = volume_name, %flavor, blocks = total, "volume formatted");
    Ok(())
}

/// Create a blank double-density ADF file (1760 blocks) at `path` and
/// format it as an OFS volume named `volume_name`.
pub fn create_dd_image(path: impl AsRef<Path>, volume_name: &str) -> Result<()> {
    let path = path.as_ref();
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    file.set_len(u64::from(amifs_types::FLOPPY_DD_BLOCKS) * BLOCK_SIZE as u64)?;
    drop(file);

    let mut dev = ImageDevice::open(path)?;
    format_volume(&mut dev, volume_name, FsFlavor::Ofs)
}
