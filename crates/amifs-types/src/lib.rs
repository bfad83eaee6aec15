#![forbid(unsafe_code)]
//! Core types and codecs for AmigaDOS ADF images.
//!
//! Everything on an Amiga floppy is big-endian and addressed in 512-byte
//! blocks. This crate holds the geometry constants, the `BlockNumber`
//! newtype, the field-level big-endian codec, BCPL string handling, the
//! AmigaDOS block checksum, and AmigaDOS timestamp conversion.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

// ── Geometry ────────────────────────────────────────────────────────────────

/// Logical block size in bytes.
pub const BLOCK_SIZE: usize = 512;

/// 32-bit words per block.
pub const BLOCK_WORDS: usize = 128;

/// Blocks reserved for the boot area.
pub const BOOT_BLOCKS: u32 = 2;

/// Canonical root block of a floppy volume.
pub const ROOT_BLOCK: BlockNumber = BlockNumber(880);

/// Hash table entries per directory.
pub const HASH_TABLE_SIZE: usize = 72;

/// Maximum BCPL name length in bytes.
pub const NAME_MAX: usize = 30;

/// Payload bytes carried by one OFS data block.
pub const DATA_BLOCK_PAYLOAD: usize = 488;

/// Bitmap words per bitmap page (word 0 is the checksum).
pub const BITMAP_WORDS: usize = 127;

/// Blocks covered by one bitmap page (127 words of 32 bits).
pub const BLOCKS_PER_BITMAP_PAGE: u32 = 4064;

/// Bitmap page pointer slots in the root block.
pub const BITMAP_PAGE_SLOTS: usize = 25;

/// Standard double-density floppy block count (880 KB).
pub const FLOPPY_DD_BLOCKS: u32 = 1760;

/// Standard high-density floppy block count (1.76 MB).
pub const FLOPPY_HD_BLOCKS: u32 = 3520;

// ── Block type tags ─────────────────────────────────────────────────────────

/// Primary type of header-family blocks.
pub const T_HEADER: u32 = 2;
/// Primary type of OFS data blocks.
pub const T_DATA: u32 = 8;
/// Secondary type of the root block.
pub const ST_ROOT: i32 = 1;
/// Secondary type of directory headers.
pub const ST_DIR: i32 = 2;
/// Secondary type of file headers.
pub const ST_FILE: i32 = -3;

/// Checksum word index for header-family blocks (byte offset 20).
pub const HEADER_CHECKSUM_WORD: usize = 5;
/// Checksum word index for bitmap pages (byte offset 0).
pub const BITMAP_CHECKSUM_WORD: usize = 0;

// ── Block numbers ───────────────────────────────────────────────────────────

/// Index of a 512-byte block within the image.
///
/// Block 0 doubles as the null pointer in every on-disk chain (hash chains,
/// data chains, bucket heads): block 0 is the boot block and can never be a
/// chain member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockNumber(pub u32);

impl BlockNumber {
    /// The on-disk null pointer.
    pub const NULL: Self = Self(0);

    #[must_use]
    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Byte offset of this block within the image.
    #[must_use]
    pub fn byte_offset(self) -> u64 {
        u64::from(self.0) * BLOCK_SIZE as u64
    }

    /// Index of the bitmap page covering this block.
    #[must_use]
    pub fn bitmap_page_index(self) -> usize {
        (self.0 / BLOCKS_PER_BITMAP_PAGE) as usize
    }
}

impl fmt::Display for BlockNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Filesystem flavor ───────────────────────────────────────────────────────

/// AmigaDOS filesystem flavor from the boot block signature byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsFlavor {
    Ofs,
    Ffs,
    FfsIntl,
    FfsDircache,
}

impl FsFlavor {
    /// Decode the fourth signature byte (`'D' 'O' 'S' flavor`).
    #[must_use]
    pub fn from_signature_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Ofs),
            1 => Some(Self::Ffs),
            3 => Some(Self::FfsIntl),
            5 => Some(Self::FfsDircache),
            _ => None,
        }
    }

    #[must_use]
    pub fn signature_byte(self) -> u8 {
        match self {
            Self::Ofs => 0,
            Self::Ffs => 1,
            Self::FfsIntl => 3,
            Self::FfsDircache => 5,
        }
    }

    /// Whether data blocks on a native volume of this flavor carry no header.
    #[must_use]
    pub fn is_ffs(self) -> bool {
        !matches!(self, Self::Ofs)
    }
}

impl fmt::Display for FsFlavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ofs => "OFS",
            Self::Ffs => "FFS",
            Self::FfsIntl => "FFS-INTL",
            Self::FfsDircache => "FFS-DC",
        };
        f.write_str(name)
    }
}

// ── Parse errors ────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("insufficient data: need {needed} bytes at offset {offset}, got {actual}")]
    InsufficientData {
        needed: usize,
        offset: usize,
        actual: usize,
    },
    #[error("invalid field: {field} ({reason})")]
    InvalidField {
        field: &'static str,
        reason: &'static str,
    },
}

#[inline]
pub fn ensure_slice(data: &[u8], offset: usize, len: usize) -> Result<&[u8], ParseError> {
    let Some(end) = offset.checked_add(len) else {
        return Err(ParseError::InvalidField {
            field: "offset",
            reason: "overflow",
        });
    };

    if end > data.len() {
        return Err(ParseError::InsufficientData {
            needed: len,
            offset,
            actual: data.len().saturating_sub(offset),
        });
    }

    Ok(&data[offset..end])
}

/// Read a big-endian u32 from an arbitrary slice with bounds checking.
#[inline]
pub fn read_be_u32(data: &[u8], offset: usize) -> Result<u32, ParseError> {
    let bytes = ensure_slice(data, offset, 4)?;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

// ── In-block field codec ────────────────────────────────────────────────────
//
// Block buffers are always exactly `BLOCK_SIZE` bytes and field offsets are
// compile-time constants, so these accessors index directly.

#[inline]
#[must_use]
pub fn be_u32(block: &[u8; BLOCK_SIZE], offset: usize) -> u32 {
    u32::from_be_bytes([
        block[offset],
        block[offset + 1],
        block[offset + 2],
        block[offset + 3],
    ])
}

#[inline]
pub fn set_be_u32(block: &mut [u8; BLOCK_SIZE], offset: usize, value: u32) {
    block[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

#[inline]
#[must_use]
pub fn be_i32(block: &[u8; BLOCK_SIZE], offset: usize) -> i32 {
    be_u32(block, offset) as i32
}

#[inline]
pub fn set_be_i32(block: &mut [u8; BLOCK_SIZE], offset: usize, value: i32) {
    set_be_u32(block, offset, value as u32);
}

// ── BCPL strings ────────────────────────────────────────────────────────────

/// Decode a BCPL string field (length byte + up to 30 payload bytes).
///
/// The declared length is truncated to [`NAME_MAX`]; bytes are decoded
/// lossily to UTF-8 (Amiga names are Latin-1-ish byte strings).
#[must_use]
pub fn bcpl_read(field: &[u8]) -> String {
    if field.is_empty() || field[0] == 0 {
        return String::new();
    }
    let len = (field[0] as usize).min(NAME_MAX).min(field.len() - 1);
    String::from_utf8_lossy(&field[1..1 + len]).into_owned()
}

/// Encode `name` into a BCPL string field, zero-filling the fixed
/// `1 + NAME_MAX` byte region. Input longer than [`NAME_MAX`] is truncated;
/// length validation is the caller's job.
pub fn bcpl_write(field: &mut [u8], name: &str) {
    let bytes = name.as_bytes();
    let len = bytes.len().min(NAME_MAX);
    field[0] = len as u8;
    field[1..1 + len].copy_from_slice(&bytes[..len]);
    for byte in &mut field[1 + len..1 + NAME_MAX] {
        *byte = 0;
    }
}

// ── Block checksum ──────────────────────────────────────────────────────────

/// AmigaDOS block checksum: the two's-complement negation of the wrapping
/// 32-bit sum of the block's 128 big-endian words, with the designated
/// checksum word treated as zero.
#[must_use]
pub fn block_checksum(block: &[u8; BLOCK_SIZE], skip_word: usize) -> u32 {
    let mut sum = 0_u32;
    for word in 0..BLOCK_WORDS {
        if word == skip_word {
            continue;
        }
        sum = sum.wrapping_add(be_u32(block, word * 4));
    }
    sum.wrapping_neg()
}

/// Recompute and store the checksum in its designated word.
pub fn apply_checksum(block: &mut [u8; BLOCK_SIZE], skip_word: usize) {
    let sum = block_checksum(block, skip_word);
    set_be_u32(block, skip_word * 4, sum);
}

/// Whether the stored checksum matches the block contents.
#[must_use]
pub fn verify_checksum(block: &[u8; BLOCK_SIZE], skip_word: usize) -> bool {
    be_u32(block, skip_word * 4) == block_checksum(block, skip_word)
}

// ── AmigaDOS timestamps ─────────────────────────────────────────────────────

/// Seconds between the Unix epoch and the AmigaDOS epoch (1978-01-01).
pub const AMIGA_EPOCH_UNIX_SECS: i64 = 2922 * 86_400;

/// AmigaDOS clock ticks per second.
pub const TICKS_PER_SECOND: u32 = 50;

/// Convert an AmigaDOS (days, minutes, ticks) stamp to Unix seconds.
#[must_use]
pub fn amiga_to_unix(days: u32, mins: u32, ticks: u32) -> i64 {
    i64::from(days) * 86_400
        + i64::from(mins) * 60
        + i64::from(ticks / TICKS_PER_SECOND)
        + AMIGA_EPOCH_UNIX_SECS
}

/// Convert Unix seconds to an AmigaDOS (days, minutes, ticks) stamp.
///
/// Times before the AmigaDOS epoch clamp to zero.
#[must_use]
pub fn unix_to_amiga(unix_secs: i64) -> (u32, u32, u32) {
    let amiga = (unix_secs - AMIGA_EPOCH_UNIX_SECS).max(0);
    let days = (amiga / 86_400) as u32;
    let rem = amiga % 86_400;
    let mins = (rem / 60) as u32;
    let ticks = (rem % 60) as u32 * TICKS_PER_SECOND;
    (days, mins, ticks)
}

/// `SystemTime` for a Unix-seconds stamp (saturating for pre-epoch values).
#[must_use]
pub fn system_time_from_unix(unix_secs: i64) -> SystemTime {
    if unix_secs >= 0 {
        UNIX_EPOCH + Duration::from_secs(unix_secs as u64)
    } else {
        UNIX_EPOCH - Duration::from_secs(unix_secs.unsigned_abs())
    }
}

/// Unix seconds for a `SystemTime` (pre-epoch values become negative).
#[must_use]
pub fn unix_from_system_time(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => since.as_secs() as i64,
        Err(err) => -(err.duration().as_secs() as i64),
    }
}
