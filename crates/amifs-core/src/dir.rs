//! Directory index: name hashing, path resolution, listing, bucket chains.
//!
//! Directories hash each child name into one of 72 buckets; colliding
//! entries are threaded through the child headers' `hash_chain` field.
//! Insertion is O(1) head insertion, so bucket order is LIFO — AmigaDOS
//! leaves the order unspecified.

use crate::volume::Volume;
use amifs_block::BlockIo;
use amifs_error::{AdfError, Result};
use amifs_ondisk::{HashTableOwner, RootBlock};
use amifs_types::{system_time_from_unix, BlockNumber, HASH_TABLE_SIZE};
use std::collections::HashMap;
use std::time::SystemTime;
use tracing::warn;

/// What a directory entry points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

/// A materialized directory entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    /// File size in bytes; 0 for directories.
    pub size: u64,
    pub mtime: SystemTime,
    /// Header block backing this entry.
    pub header: BlockNumber,
}

impl Entry {
    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// AmigaDOS directory name hash (non-international variant).
///
/// Starting from the byte length, each ASCII-uppercased byte folds in as
/// `h = h·13 + c` mod 2³²; the bucket is `h` mod 72.
#[must_use]
pub fn hash_name(name: &str) -> usize {
    let mut hash = name.len() as u32;
    for byte in name.bytes() {
        hash = hash
            .wrapping_mul(13)
            .wrapping_add(u32::from(byte.to_ascii_uppercase()));
    }
    (hash % HASH_TABLE_SIZE as u32) as usize
}

/// Canonical form of an absolute path, used as the cache key.
pub(crate) fn normalize(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        trimmed.to_owned()
    }
}

pub(crate) fn is_root(path: &str) -> bool {
    normalize(path) == "/"
}

/// Split an absolute path into its parent path and final component.
pub(crate) fn split_path(path: &str) -> (String, String) {
    let normalized = normalize(path);
    match normalized.rsplit_once('/') {
        Some(("", name)) => ("/".to_owned(), name.to_owned()),
        Some((parent, name)) => (parent.to_owned(), name.to_owned()),
        None => ("/".to_owned(), normalized),
    }
}

/// Path-keyed cache of directory listings.
///
/// Coarse by design: any namespace mutation clears the whole cache. It only
/// exists to keep repeated per-bucket scans out of quick directory browsing.
pub(crate) struct DirCache {
    listings: HashMap<String, Vec<Entry>>,
}

impl DirCache {
    pub(crate) fn new() -> Self {
        Self {
            listings: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, path: &str) -> Option<Vec<Entry>> {
        self.listings.get(path).cloned()
    }

    pub(crate) fn insert(&mut self, path: String, entries: Vec<Entry>) {
        self.listings.insert(path, entries);
    }

    pub(crate) fn clear(&mut self) {
        self.listings.clear();
    }
}

impl<D: BlockIo> Volume<D> {
    /// List a directory, serving from the cache when possible.
    pub fn list(&mut self, path: &str) -> Result<Vec<Entry>> {
        let path = normalize(path);
        if let Some(entries) = self.cache.get(&path) {
            return Ok(entries);
        }
        let dir_block = self.dir_block_of(&path)?;
        let entries = self.list_dir_block(dir_block)?;
        self.cache.insert(path, entries.clone());
        Ok(entries)
    }

    /// Resolve an absolute path to its entry.
    ///
    /// The root resolves to a synthetic entry carrying the root block and the
    /// volume's modification stamp.
    pub fn lookup(&mut self, path: &str) -> Result<Entry> {
        if is_root(path) {
            let root = RootBlock::from_buf(self.dev.read_block(self.root_block())?);
            return Ok(Entry {
                name: String::new(),
                kind: EntryKind::Directory,
                size: 0,
                mtime: system_time_from_unix(root.mtime_unix()),
                header: self.root_block(),
            });
        }

        let (parent, name) = split_path(path);
        let entries = self.list(&parent)?;
        entries
            .into_iter()
            .find(|entry| entry.name == name)
            .ok_or_else(|| AdfError::NoEntry(normalize(path)))
    }

    /// Header block of the directory at `path`.
    pub(crate) fn dir_block_of(&mut self, path: &str) -> Result<BlockNumber> {
        if is_root(path) {
            return Ok(self.root_block());
        }
        let entry = self.lookup(path)?;
        if entry.is_directory() {
            Ok(entry.header)
        } else {
            Err(AdfError::NotDirectory)
        }
    }

    /// Walk all 72 buckets of a directory block and materialize entries.
    ///
    /// Headers with an empty name are skipped rather than terminating the
    /// chain, so one damaged entry cannot hide its siblings.
    fn list_dir_block(&self, dir_block: BlockNumber) -> Result<Vec<Entry>> {
        let dir = self.load_dir(dir_block)?;
        let mut entries = Vec::new();

        for idx in 0..HASH_TABLE_SIZE {
            let mut current = dir.bucket(idx);
            let mut hops = 0_u32;
            while !current.is_null() {
                hops += 1;
                if hops > self.total_blocks() {
                    warn!(bucket = idx, "hash chain loops; truncating listing");
                    break;
                }
                let header = self.read_header(current)?;
                let name = header.name();
                if name.is_empty() {
                    warn!(block = %current, "entry with empty name skipped");
                    current = header.hash_chain();
                    continue;
                }
                let kind = if header.is_directory() {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                entries.push(Entry {
                    name,
                    kind,
                    size: match kind {
                        EntryKind::Directory => 0,
                        EntryKind::File => u64::from(header.file_size()),
                    },
                    mtime: system_time_from_unix(header.mtime_unix()),
                    header: current,
                });
                current = header.hash_chain();
            }
        }
        Ok(entries)
    }

    /// Link `child` into `dir`'s bucket for `name` (head insertion).
    pub(crate) fn add_to_directory(
        &mut self,
        dir_block: BlockNumber,
        child: BlockNumber,
        name: &str,
    ) -> Result<()> {
        let bucket = hash_name(name);
        let mut dir = self.load_dir(dir_block)?;
        let previous_head = dir.bucket(bucket);

        let mut child_header = self.read_header(child)?;
        child_header.set_hash_chain(previous_head);
        self.write_header(child, &mut child_header)?;

        dir.set_bucket(bucket, child);
        dir.set_mtime_unix(Self::now_unix());
        self.store_dir(dir_block, &mut dir)
    }

    /// Unlink `child` from `dir`'s bucket for `name`.
    ///
    /// The successor pointer is the target's `hash_chain` word copied
    /// through unchanged. Removing an entry never reorders its siblings.
    pub(crate) fn remove_from_directory(
        &mut self,
        dir_block: BlockNumber,
        child: BlockNumber,
        name: &str,
    ) -> Result<()> {
        let bucket = hash_name(name);
        let successor = self.read_header(child)?.hash_chain();
        let mut dir = self.load_dir(dir_block)?;

        if dir.bucket(bucket) == child {
            dir.set_bucket(bucket, successor);
        } else {
            let mut current = dir.bucket(bucket);
            let mut hops = 0_u32;
            loop {
                if current.is_null() {
                    return Err(AdfError::NoEntry(name.to_owned()));
                }
                hops += 1;
                if hops > self.total_blocks() {
                    return Err(AdfError::Invalid("hash chain loops"));
                }
                let mut predecessor = self.read_header(current)?;
                if predecessor.hash_chain() == child {
                    predecessor.set_hash_chain(successor);
                    self.write_header(current, &mut predecessor)?;
                    break;
                }
                current = predecessor.hash_chain();
            }
        }

        dir.set_mtime_unix(Self::now_unix());
        self.store_dir(dir_block, &mut dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_case_insensitive() {
        assert_eq!(hash_name("readme"), hash_name("README"));
        assert_eq!(hash_name("Startup-Sequence"), hash_name("startup-sequence"));
    }

    #[test]
    fn hash_matches_reference_values() {
        // h starts at the length and folds 13·h + uppercase(byte).
        // "S": (1*13 + 83) % 72 = 96 % 72 = 24.
        assert_eq!(hash_name("S"), 24);
        // Empty name hashes to bucket 0.
        assert_eq!(hash_name(""), 0);
    }

    #[test]
    fn hash_stays_in_table() {
        for name in ["a", "Workbench", "x".repeat(30).as_str()] {
            assert!(hash_name(name) < HASH_TABLE_SIZE);
        }
    }

    #[test]
    fn split_path_cases() {
        assert_eq!(split_path("/hello"), ("/".into(), "hello".into()));
        assert_eq!(split_path("/a/b"), ("/a".into(), "b".into()));
        assert_eq!(split_path("/a/b/c"), ("/a/b".into(), "c".into()));
        assert_eq!(split_path("/a/b/"), ("/a".into(), "b".into()));
    }

    #[test]
    fn normalize_cases() {
        assert_eq!(normalize("/"), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/a/"), "/a");
        assert!(is_root("/"));
        assert!(is_root(""));
        assert!(!is_root("/a"));
    }
}
