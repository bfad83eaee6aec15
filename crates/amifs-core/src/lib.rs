#![forbid(unsafe_code)]
//! The AmigaDOS filesystem engine.
//!
//! [`Volume`] owns a block device holding an ADF image and implements the
//! whole POSIX-facing surface over it: path resolution through hash-chained
//! directories, offset-addressed file reads and writes over linked OFS data
//! chains (with sparse-hole semantics), create/delete/truncate, and explicit
//! sync. Every operation commits all of its block mutations before
//! returning; the one documented exception is `write`, which may return a
//! short count when the volume runs out of blocks mid-stream.
//!
//! Blocks reference each other exclusively by block number — the device is
//! the only owner of storage, so the cyclic parent/child structure of the
//! directory tree needs no owning references.

mod dir;
mod file;
mod format;
mod ops;
mod volume;

pub use dir::{hash_name, Entry, EntryKind};
pub use format::{create_dd_image, format_volume};
pub use ops::{Attr, FileHandle};
pub use volume::Volume;
