#![forbid(unsafe_code)]
//! FUSE adapter for amifs.
//!
//! A thin translation layer: kernel FUSE requests arrive via the `fuser`
//! crate, get forwarded to the path-addressed [`Volume`] engine, and errors
//! are mapped through [`AdfError::to_errno()`]. Because `fuser` speaks inode
//! numbers while the engine speaks absolute paths, the adapter keeps an
//! inode⇄path table: inode 1 is `/`, everything else is assigned on first
//! sight and dropped again on unlink/rmdir.

use amifs_block::BlockIo;
use amifs_core::{Attr, EntryKind, FileHandle, Volume};
use amifs_error::AdfError;
use amifs_types::{BlockNumber, BLOCK_SIZE, NAME_MAX};
use fuser::{
    FileAttr, FileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request,
    TimeOrNow,
};
use std::collections::HashMap;
use std::ffi::OsStr;
use std::os::raw::c_int;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// TTL for cached attributes and entries.
///
/// The engine is the only writer of the image, so short-lived kernel caching
/// is safe.
const ATTR_TTL: Duration = Duration::from_secs(1);

const ROOT_INO: u64 = 1;

// ── Error type ──────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MountError {
    #[error("invalid mountpoint: {0}")]
    InvalidMountpoint(String),
    #[error("mount I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── Inode table ─────────────────────────────────────────────────────────────

/// Bidirectional inode⇄path map. Paths are the engine's canonical absolute
/// form; numbers are assigned monotonically and never reused within a mount.
struct InodeTable {
    paths: HashMap<u64, String>,
    inos: HashMap<String, u64>,
    next: u64,
}

impl InodeTable {
    fn new() -> Self {
        let mut table = Self {
            paths: HashMap::new(),
            inos: HashMap::new(),
            next: 2,
        };
        table.paths.insert(ROOT_INO, "/".to_owned());
        table.inos.insert("/".to_owned(), ROOT_INO);
        table
    }

    fn path(&self, ino: u64) -> Option<String> {
        self.paths.get(&ino).cloned()
    }

    fn assign(&mut self, path: &str) -> u64 {
        if let Some(&ino) = self.inos.get(path) {
            return ino;
        }
        let ino = self.next;
        self.next += 1;
        self.paths.insert(ino, path.to_owned());
        self.inos.insert(path.to_owned(), ino);
        ino
    }

    /// Drop the mapping for `path` and everything beneath it.
    fn forget(&mut self, path: &str) {
        let prefix = format!("{path}/");
        let doomed: Vec<u64> = self
            .inos
            .iter()
            .filter(|(candidate, _)| *candidate == path || candidate.starts_with(&prefix))
            .map(|(_, &ino)| ino)
            .collect();
        for ino in doomed {
            if let Some(gone) = self.paths.remove(&ino) {
                self.inos.remove(&gone);
            }
        }
    }
}

fn join_child(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

// ── Attribute conversion ────────────────────────────────────────────────────

fn to_file_type(kind: EntryKind) -> FileType {
    match kind {
        EntryKind::File => FileType::RegularFile,
        EntryKind::Directory => FileType::Directory,
    }
}

fn to_file_attr(ino: u64, attr: &Attr, uid: u32, gid: u32) -> FileAttr {
    FileAttr {
        ino,
        size: attr.size,
        blocks: attr.size.div_ceil(BLOCK_SIZE as u64),
        atime: attr.mtime,
        mtime: attr.mtime,
        ctime: attr.mtime,
        crtime: attr.mtime,
        kind: to_file_type(attr.kind),
        perm: attr.mode,
        nlink: match attr.kind {
            EntryKind::Directory => 2,
            EntryKind::File => 1,
        },
        uid,
        gid,
        rdev: 0,
        blksize: BLOCK_SIZE as u32,
        flags: 0,
    }
}

// ── Mount options ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MountOptions {
    pub read_only: bool,
    pub allow_other: bool,
    pub auto_unmount: bool,
}

impl Default for MountOptions {
    fn default() -> Self {
        Self {
            read_only: false,
            allow_other: false,
            auto_unmount: true,
        }
    }
}

fn build_mount_options(options: &MountOptions) -> Vec<MountOption> {
    let mut opts = vec![
        MountOption::FSName("amifs".to_owned()),
        MountOption::Subtype("adf".to_owned()),
        MountOption::DefaultPermissions,
        MountOption::NoAtime,
    ];
    if options.read_only {
        opts.push(MountOption::RO);
    }
    if options.allow_other {
        opts.push(MountOption::AllowOther);
    }
    if options.auto_unmount {
        opts.push(MountOption::AutoUnmount);
    }
    opts
}

// ── FUSE filesystem adapter ─────────────────────────────────────────────────

/// FUSE adapter that delegates all operations to the [`Volume`] engine.
pub struct AmigaFuse<D: BlockIo> {
    vol: Volume<D>,
    inodes: InodeTable,
}

impl<D: BlockIo> AmigaFuse<D> {
    #[must_use]
    pub fn new(vol: Volume<D>) -> Self {
        Self {
            vol,
            inodes: InodeTable::new(),
        }
    }

    /// A file handle from a FUSE `fh`, falling back to path resolution when
    /// the kernel passes no handle.
    fn handle_for(&mut self, path: &str, fh: u64, writable: bool) -> Result<FileHandle, AdfError> {
        let block = u32::try_from(fh).unwrap_or(0);
        if block != 0 {
            Ok(FileHandle {
                header: BlockNumber(block),
                writable,
            })
        } else {
            self.vol.open(path, writable)
        }
    }

    fn attr_reply(&mut self, path: &str, req: &Request<'_>) -> Result<FileAttr, AdfError> {
        let attr = self.vol.getattr(path)?;
        let ino = self.inodes.assign(path);
        Ok(to_file_attr(ino, &attr, req.uid(), req.gid()))
    }
}

impl<D: BlockIo> Filesystem for AmigaFuse<D> {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), c_int> {
        Ok(())
    }

    fn destroy(&mut self) {
        if let Err(error) = self.vol.flush() {
            warn!(%error, "flush at unmount failed");
        }
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        match self.attr_reply(&path, req) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => {
                warn!(ino, %path, error = %e, "getattr failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let Some(parent_path) = self.inodes.path(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.attr_reply(&path, req) {
            Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
            Err(e) => {
                // ENOENT is expected for missing entries — don't warn for that.
                if e.to_errno() != libc::ENOENT {
                    warn!(parent, ?name, error = %e, "lookup failed");
                }
                reply.error(e.to_errno());
            }
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let entries = match self.vol.list(&path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(ino, %path, error = %e, "readdir failed");
                reply.error(e.to_errno());
                return;
            }
        };

        let mut rows: Vec<(u64, FileType, String)> = vec![
            (ino, FileType::Directory, ".".to_owned()),
            (ino, FileType::Directory, "..".to_owned()),
        ];
        for entry in entries {
            let child_path = join_child(&path, &entry.name);
            let child_ino = self.inodes.assign(&child_path);
            rows.push((child_ino, to_file_type(entry.kind), entry.name));
        }

        let start = usize::try_from(offset).unwrap_or(0);
        for (index, (entry_ino, kind, name)) in rows.into_iter().enumerate().skip(start) {
            let next_offset = index as i64 + 1;
            if reply.add(entry_ino, next_offset, kind, OsStr::new(&name)) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let writable = (flags & libc::O_ACCMODE) != libc::O_RDONLY;
        match self.vol.open(&path, writable) {
            Ok(handle) => reply.opened(u64::from(handle.header.0), 0),
            Err(e) => {
                warn!(ino, %path, error = %e, "open failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn opendir(&mut self, _req: &Request<'_>, _ino: u64, _flags: i32, reply: ReplyOpen) {
        // Stateless directory handles.
        reply.opened(0, 0);
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let byte_offset = u64::try_from(offset).unwrap_or(0);
        let result = self
            .handle_for(&path, fh, false)
            .and_then(|handle| self.vol.read(handle, byte_offset, size as usize));
        match result {
            Ok(data) => reply.data(&data),
            Err(e) => {
                warn!(ino, offset, size, error = %e, "read failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn write(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let byte_offset = u64::try_from(offset).unwrap_or(0);
        let result = self
            .handle_for(&path, fh, true)
            .and_then(|handle| self.vol.write(handle, byte_offset, data));
        match result {
            Ok(written) => reply.written(written as u32),
            Err(e) => {
                warn!(ino, offset, len = data.len(), error = %e, "write failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let Some(parent_path) = self.inodes.path(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.vol.create(&path, mode) {
            Ok(handle) => match self.attr_reply(&path, req) {
                Ok(attr) => reply.created(&ATTR_TTL, &attr, 0, u64::from(handle.header.0), 0),
                Err(e) => reply.error(e.to_errno()),
            },
            Err(e) => {
                debug!(%path, error = %e, "create failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn mkdir(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        _umask: u32,
        reply: ReplyEntry,
    ) {
        let Some(parent_path) = self.inodes.path(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.vol.mkdir(&path, mode) {
            Ok(()) => match self.attr_reply(&path, req) {
                Ok(attr) => reply.entry(&ATTR_TTL, &attr, 0),
                Err(e) => reply.error(e.to_errno()),
            },
            Err(e) => {
                debug!(%path, error = %e, "mkdir failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn unlink(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.vol.unlink(&path) {
            Ok(()) => {
                self.inodes.forget(&path);
                reply.ok();
            }
            Err(e) => {
                debug!(%path, error = %e, "unlink failed");
                reply.error(e.to_errno());
            }
        }
    }

    fn rmdir(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let Some(parent_path) = self.inodes.path(parent) else {
            reply.error(libc::ENOENT);
            return;
        };
        let path = join_child(&parent_path, &name.to_string_lossy());
        match self.vol.rmdir(&path) {
            Ok(()) => {
                self.inodes.forget(&path);
                reply.ok();
            }
            Err(e) => {
                debug!(%path, error = %e, "rmdir failed");
                reply.error(e.to_errno());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _mode: Option<u32>,
        _uid: Option<u32>,
        _gid: Option<u32>,
        size: Option<u64>,
        _atime: Option<TimeOrNow>,
        _mtime: Option<TimeOrNow>,
        _ctime: Option<std::time::SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<std::time::SystemTime>,
        _chgtime: Option<std::time::SystemTime>,
        _bkuptime: Option<std::time::SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let Some(path) = self.inodes.path(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        // Size changes become truncate; mode/ownership/time changes are
        // acknowledged without effect (protection bits are a non-goal).
        if let Some(new_size) = size {
            if let Err(e) = self.vol.truncate(&path, new_size) {
                warn!(ino, %path, new_size, error = %e, "truncate failed");
                reply.error(e.to_errno());
                return;
            }
        }
        match self.attr_reply(&path, req) {
            Ok(attr) => reply.attr(&ATTR_TTL, &attr),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn flush(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _lock_owner: u64, reply: ReplyEmpty) {
        match self.vol.flush() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn fsync(&mut self, _req: &Request<'_>, _ino: u64, _fh: u64, _datasync: bool, reply: ReplyEmpty) {
        match self.vol.fsync() {
            Ok(()) => reply.ok(),
            Err(e) => reply.error(e.to_errno()),
        }
    }

    fn statfs(&mut self, _req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let free = u64::from(self.vol.free_blocks());
        reply.statfs(
            u64::from(self.vol.total_blocks()),
            free,
            free,
            0,
            free,
            BLOCK_SIZE as u32,
            NAME_MAX as u32,
            BLOCK_SIZE as u32,
        );
    }
}

// ── Mount entrypoints ───────────────────────────────────────────────────────

/// Mount a volume at `mountpoint` (blocking until unmounted).
pub fn mount<D: BlockIo>(
    vol: Volume<D>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<(), MountError> {
    let mountpoint = mountpoint.as_ref();
    if mountpoint.as_os_str().is_empty() {
        return Err(MountError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    let fs = AmigaFuse::new(vol);
    fuser::mount2(fs, mountpoint, &fuse_opts)?;
    Ok(())
}

/// Mount in the background, returning a session handle that unmounts on drop.
pub fn mount_background<D: BlockIo + Send + 'static>(
    vol: Volume<D>,
    mountpoint: impl AsRef<Path>,
    options: &MountOptions,
) -> Result<fuser::BackgroundSession, MountError> {
    let mountpoint = mountpoint.as_ref();
    if mountpoint.as_os_str().is_empty() {
        return Err(MountError::InvalidMountpoint(
            "mountpoint cannot be empty".to_owned(),
        ));
    }
    let fuse_opts = build_mount_options(options);
    let fs = AmigaFuse::new(vol);
    let session = fuser::spawn_mount2(fs, mountpoint, &fuse_opts)?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amifs_core::EntryKind;
    use std::time::SystemTime;

    #[test]
    fn inode_table_assigns_and_forgets() {
        let mut table = InodeTable::new();
        assert_eq!(table.path(ROOT_INO).as_deref(), Some("/"));

        let a = table.assign("/A");
        let b = table.assign("/A/B");
        let hello = table.assign("/A/B/hello");
        assert_eq!(table.assign("/A"), a, "assignment is stable");
        assert!(a >= 2 && b > a && hello > b);

        table.forget("/A/B");
        assert_eq!(table.path(b), None);
        assert_eq!(table.path(hello), None);
        assert_eq!(table.path(a).as_deref(), Some("/A"));

        // Numbers are never reused.
        let b2 = table.assign("/A/B");
        assert!(b2 > hello);
    }

    #[test]
    fn join_child_handles_root() {
        assert_eq!(join_child("/", "A"), "/A");
        assert_eq!(join_child("/A", "B"), "/A/B");
    }

    #[test]
    fn file_attr_conversion() {
        let attr = Attr {
            kind: EntryKind::File,
            size: 1000,
            mtime: SystemTime::UNIX_EPOCH,
            mode: 0o644,
            header: BlockNumber(882),
        };
        let fattr = to_file_attr(7, &attr, 1000, 1000);
        assert_eq!(fattr.ino, 7);
        assert_eq!(fattr.size, 1000);
        assert_eq!(fattr.blocks, 2);
        assert_eq!(fattr.kind, FileType::RegularFile);
        assert_eq!(fattr.perm, 0o644);
        assert_eq!(fattr.nlink, 1);
        assert_eq!(fattr.blksize, 512);

        let dir = Attr {
            kind: EntryKind::Directory,
            size: 0,
            mtime: SystemTime::UNIX_EPOCH,
            mode: 0o755,
            header: BlockNumber(880),
        };
        let dattr = to_file_attr(1, &dir, 0, 0);
        assert_eq!(dattr.kind, FileType::Directory);
        assert_eq!(dattr.nlink, 2);
        assert_eq!(dattr.blocks, 0);
    }

    #[test]
    fn mount_options_default_is_read_write() {
        let opts = MountOptions::default();
        assert!(!opts.read_only);
        assert!(!opts.allow_other);
        assert!(opts.auto_unmount);

        let mount_opts = build_mount_options(&opts);
        assert!(!mount_opts.contains(&MountOption::RO));
        assert!(mount_opts.contains(&MountOption::AutoUnmount));

        let ro = MountOptions {
            read_only: true,
            ..MountOptions::default()
        };
        assert!(build_mount_options(&ro).contains(&MountOption::RO));
    }

    #[test]
    fn mount_rejects_empty_mountpoint() {
        use amifs_block::MemDevice;
        use amifs_core::format_volume;
        use amifs_types::{FsFlavor, FLOPPY_DD_BLOCKS};

        let mut dev = MemDevice::new(FLOPPY_DD_BLOCKS);
        format_volume(&mut dev, "Empty", FsFlavor::Ofs).expect("format");
        let vol = Volume::open(dev).expect("open");
        let err = mount(vol, "", &MountOptions::default()).unwrap_err();
        assert!(err.to_string().contains("empty"));
    }
}
