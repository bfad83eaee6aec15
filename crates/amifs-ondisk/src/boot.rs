//! Boot block parsing.
//!
//! The boot area is blocks 0–1. Only the first four bytes matter for
//! mounting: the `'D' 'O' 'S'` signature and the flavor byte. The root-block
//! hint at offset 8 is decoded for diagnostics but never trusted — the
//! canonical root of a floppy volume is block 880.

use crate::BlockBuf;
use amifs_types::{read_be_u32, FsFlavor, ParseError, BLOCK_SIZE};

const DOS_SIGNATURE: &[u8; 3] = b"DOS";

const OFF_ROOT_HINT: usize = 8;

/// Parsed boot-block identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootInfo {
    pub flavor: FsFlavor,
    /// Root block recorded by the formatter. Informational only.
    pub root_hint: u32,
}

/// Validate the DOS signature of block 0 and decode the flavor.
pub fn parse_boot_block(block0: &BlockBuf) -> Result<BootInfo, ParseError> {
    if &block0[..3] != DOS_SIGNATURE {
        return Err(ParseError::InvalidField {
            field: "dos_type",
            reason: "missing DOS signature",
        });
    }
    let Some(flavor) = FsFlavor::from_signature_byte(block0[3]) else {
        return Err(ParseError::InvalidField {
            field: "dos_type",
            reason: "unknown filesystem flavor",
        });
    };
    let root_hint = read_be_u32(block0.as_slice(), OFF_ROOT_HINT)?;
    Ok(BootInfo { flavor, root_hint })
}

/// Build block 0 for a freshly formatted volume: DOS signature plus the
/// conventional root hint. Block 1 of the boot area stays zeroed.
#[must_use]
pub fn boot_block_for_format(flavor: FsFlavor, root: u32) -> BlockBuf {
    let mut buf = [0_u8; BLOCK_SIZE];
    buf[..3].copy_from_slice(DOS_SIGNATURE);
    buf[3] = flavor.signature_byte();
    buf[OFF_ROOT_HINT..OFF_ROOT_HINT + 4].copy_from_slice(&root.to_be_bytes());
    buf
}
