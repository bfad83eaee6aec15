//! Structural invariants checked after sequences of operations:
//! checksums, bitmap/reachability agreement, directory well-formedness.

use amifs_block::{BlockIo, MemDevice};
use amifs_core::{format_volume, hash_name, EntryKind, Volume};
use amifs_ondisk::{BitmapBlock, DataBlock, HashTableOwner, HeaderBlock, RootBlock};
use amifs_types::{
    verify_checksum, BlockNumber, FsFlavor, BITMAP_CHECKSUM_WORD, FLOPPY_DD_BLOCKS,
    HASH_TABLE_SIZE, HEADER_CHECKSUM_WORD, ROOT_BLOCK,
};
use std::collections::BTreeSet;

const BITMAP_PAGE: BlockNumber = BlockNumber(881);

fn fresh_volume() -> Volume<MemDevice> {
    let mut dev = MemDevice::new(FLOPPY_DD_BLOCKS);
    format_volume(&mut dev, "Empty", FsFlavor::Ofs).expect("format");
    Volume::open(dev).expect("open")
}

/// Recompute the used set by walking the tree from the root, independently
/// of the engine's allocator.
fn reachable_blocks(vol: &Volume<MemDevice>) -> BTreeSet<u32> {
    let dev = vol.device();
    let mut used: BTreeSet<u32> = [0, 1, ROOT_BLOCK.0, BITMAP_PAGE.0].into();
    let root = RootBlock::from_buf(dev.read_block(ROOT_BLOCK).expect("root"));
    let mut pending: Vec<BlockNumber> = (0..HASH_TABLE_SIZE)
        .map(|idx| root.bucket(idx))
        .filter(|block| !block.is_null())
        .collect();

    while let Some(block) = pending.pop() {
        if !used.insert(block.0) {
            continue;
        }
        let header = HeaderBlock::from_buf(dev.read_block(block).expect("header"));
        if header.is_directory() {
            for idx in 0..HASH_TABLE_SIZE {
                let child = header.bucket(idx);
                if !child.is_null() {
                    pending.push(child);
                }
            }
        } else {
            let mut data = header.first_data();
            while !data.is_null() && used.insert(data.0) {
                data = DataBlock::from_buf(dev.read_block(data).expect("data")).next_data();
            }
        }
        if !header.hash_chain().is_null() {
            pending.push(header.hash_chain());
        }
    }
    used
}

/// Assert every structural invariant at once.
fn assert_consistent(vol: &Volume<MemDevice>) {
    let dev = vol.device();
    let used = reachable_blocks(vol);

    // Invariant: the free set is exactly the complement of reachability.
    let free: BTreeSet<u32> = vol.free_block_set().iter().map(|b| b.0).collect();
    let expected_free: BTreeSet<u32> = (2..FLOPPY_DD_BLOCKS).filter(|b| !used.contains(b)).collect();
    assert_eq!(free, expected_free, "free set diverges from reachability");

    // Invariant: the persisted bitmap agrees bit-for-bit.
    let bitmap = BitmapBlock::from_buf(dev.read_block(BITMAP_PAGE).expect("bitmap"));
    assert!(bitmap.checksum_ok(), "bitmap checksum stale");
    for block in 2..FLOPPY_DD_BLOCKS {
        assert_eq!(
            bitmap.is_free(block),
            free.contains(&block),
            "bitmap bit for block {block} disagrees with the free set"
        );
    }

    // Invariant: every used metadata block carries a valid checksum.
    let root_buf = dev.read_block(ROOT_BLOCK).expect("root");
    assert!(verify_checksum(&root_buf, HEADER_CHECKSUM_WORD), "root checksum");
    for &block in used.iter() {
        if block < 2 || block == BITMAP_PAGE.0 {
            continue;
        }
        let buf = dev.read_block(BlockNumber(block)).expect("used block");
        assert!(
            verify_checksum(&buf, HEADER_CHECKSUM_WORD),
            "checksum of block {block}"
        );
    }
    let bitmap_buf = dev.read_block(BITMAP_PAGE).expect("bitmap");
    assert!(verify_checksum(&bitmap_buf, BITMAP_CHECKSUM_WORD));

    // Invariant: directory well-formedness — every child sits in the bucket
    // its name hashes to and points back at its container.
    let mut dirs = vec![ROOT_BLOCK];
    while let Some(dir_block) = dirs.pop() {
        let buckets: Vec<(usize, BlockNumber)> = if dir_block == ROOT_BLOCK {
            let root = RootBlock::from_buf(dev.read_block(dir_block).expect("root"));
            (0..HASH_TABLE_SIZE).map(|i| (i, root.bucket(i))).collect()
        } else {
            let dir = HeaderBlock::from_buf(dev.read_block(dir_block).expect("dir"));
            (0..HASH_TABLE_SIZE).map(|i| (i, dir.bucket(i))).collect()
        };
        for (bucket, head) in buckets {
            let mut current = head;
            while !current.is_null() {
                let child = HeaderBlock::from_buf(dev.read_block(current).expect("child"));
                assert_eq!(
                    hash_name(&child.name()),
                    bucket,
                    "entry {} in wrong bucket",
                    child.name()
                );
                assert_eq!(child.parent(), dir_block, "parent pointer of {}", child.name());
                assert_eq!(child.own_key(), current, "own key of {}", child.name());
                if child.is_directory() {
                    dirs.push(current);
                }
                current = child.hash_chain();
            }
        }
    }

    // Invariant: data chains carry ascending 1-based sequence numbers and
    // point back at their owning header.
    let mut dirs = vec![ROOT_BLOCK];
    while let Some(dir_block) = dirs.pop() {
        for entry in collect_entries(vol, dir_block) {
            let header = HeaderBlock::from_buf(dev.read_block(entry).expect("header"));
            if header.is_directory() {
                dirs.push(entry);
                continue;
            }
            let mut expected_seq = 1_u32;
            let mut total_payload = 0_u64;
            let mut data_block = header.first_data();
            while !data_block.is_null() {
                let data = DataBlock::from_buf(dev.read_block(data_block).expect("data"));
                assert_eq!(data.seq_num(), expected_seq, "sequence in {}", header.name());
                assert_eq!(data.header_key(), entry, "header key in {}", header.name());
                total_payload += data.data_size() as u64;
                expected_seq += 1;
                data_block = data.next_data();
            }
            assert!(
                total_payload <= u64::from(header.file_size()),
                "data sizes exceed file size in {}",
                header.name()
            );
        }
    }
}

fn collect_entries(vol: &Volume<MemDevice>, dir_block: BlockNumber) -> Vec<BlockNumber> {
    let dev = vol.device();
    let buckets: Vec<BlockNumber> = if dir_block == ROOT_BLOCK {
        let root = RootBlock::from_buf(dev.read_block(dir_block).expect("root"));
        (0..HASH_TABLE_SIZE).map(|i| root.bucket(i)).collect()
    } else {
        let dir = HeaderBlock::from_buf(dev.read_block(dir_block).expect("dir"));
        (0..HASH_TABLE_SIZE).map(|i| dir.bucket(i)).collect()
    };
    let mut entries = Vec::new();
    for head in buckets {
        let mut current = head;
        while !current.is_null() {
            entries.push(current);
            current = HeaderBlock::from_buf(dev.read_block(current).expect("child")).hash_chain();
        }
    }
    entries
}

#[test]
fn fresh_volume_is_consistent() {
    let vol = fresh_volume();
    assert_consistent(&vol);
}

#[test]
fn consistency_after_mixed_workload() {
    let mut vol = fresh_volume();

    vol.mkdir("/Devs", 0o755).expect("mkdir");
    vol.mkdir("/Devs/Printers", 0o755).expect("mkdir");
    for name in ["alpha", "beta", "gamma", "delta"] {
        let handle = vol.create(&format!("/Devs/{name}"), 0o644).expect("create");
        vol.write(handle, 0, name.as_bytes()).expect("write");
    }
    let big = vol.create("/Devs/big", 0o644).expect("create");
    vol.write(big, 0, &vec![0xA5; 3000]).expect("write");
    vol.truncate("/Devs/big", 700).expect("truncate");
    vol.unlink("/Devs/beta").expect("unlink");
    let sparse = vol.create("/hole", 0o644).expect("create");
    vol.write(sparse, 5000, b"end").expect("write");

    assert_consistent(&vol);
}

#[test]
fn read_write_round_trip_with_zero_prefix() {
    let mut vol = fresh_volume();
    let handle = vol.create("/f", 0o644).expect("create");
    let payload: Vec<u8> = (0..700_u32).map(|i| (i % 251) as u8).collect();
    let offset = 123_u64;

    assert_eq!(vol.write(handle, offset, &payload).expect("write"), 700);
    assert_eq!(vol.read(handle, offset, 700).expect("read"), payload);

    let size = vol.getattr("/f").expect("getattr").size;
    assert_eq!(size, offset + 700);
    let whole = vol.read(handle, 0, size as usize).expect("read");
    assert!(whole[..offset as usize].iter().all(|&b| b == 0));
    assert_eq!(&whole[offset as usize..], &payload[..]);

    assert_consistent(&vol);
}

#[test]
fn overwrite_preserves_surrounding_bytes() {
    let mut vol = fresh_volume();
    let handle = vol.create("/f", 0o644).expect("create");
    vol.write(handle, 0, &vec![b'a'; 1000]).expect("write");
    vol.write(handle, 490, b"MID").expect("overwrite");

    let body = vol.read(handle, 0, 1000).expect("read");
    assert_eq!(body.len(), 1000);
    assert!(body[..490].iter().all(|&b| b == b'a'));
    assert_eq!(&body[490..493], b"MID");
    assert!(body[493..].iter().all(|&b| b == b'a'));
    assert_eq!(vol.getattr("/f").expect("getattr").size, 1000);
    assert_consistent(&vol);
}

#[test]
fn truncate_is_idempotent() {
    let mut vol = fresh_volume();
    let handle = vol.create("/f", 0o644).expect("create");
    vol.write(handle, 0, &vec![b'q'; 2000]).expect("write");

    vol.truncate("/f", 900).expect("truncate");
    let after_first = vol.free_block_set();
    assert_eq!(vol.getattr("/f").expect("getattr").size, 900);

    vol.truncate("/f", 900).expect("truncate again");
    assert_eq!(vol.free_block_set(), after_first);
    assert_eq!(vol.getattr("/f").expect("getattr").size, 900);
    assert_consistent(&vol);
}

#[test]
fn truncate_to_zero_frees_whole_chain() {
    let mut vol = fresh_volume();
    let baseline = vol.free_block_set();
    let handle = vol.create("/f", 0o644).expect("create");
    vol.write(handle, 0, &vec![1; 1500]).expect("write");

    vol.truncate("/f", 0).expect("truncate");
    assert_eq!(vol.getattr("/f").expect("getattr").size, 0);
    assert!(vol.read(handle, 0, 10).expect("read").is_empty());
    assert_consistent(&vol);

    vol.unlink("/f").expect("unlink");
    assert_eq!(vol.free_block_set(), baseline);
}

#[test]
fn grow_truncate_leaves_readable_hole() {
    let mut vol = fresh_volume();
    let handle = vol.create("/f", 0o644).expect("create");
    vol.write(handle, 0, b"abc").expect("write");
    vol.truncate("/f", 1000).expect("grow");

    assert_eq!(vol.getattr("/f").expect("getattr").size, 1000);
    let body = vol.read(handle, 0, 1000).expect("read");
    assert_eq!(body.len(), 1000);
    assert_eq!(&body[..3], b"abc");
    assert!(body[3..].iter().all(|&b| b == 0));
    assert_consistent(&vol);
}

#[test]
fn create_delete_is_structurally_reversible() {
    let mut vol = fresh_volume();
    vol.mkdir("/parent", 0o755).expect("mkdir");

    let free_before = vol.free_block_set();
    let root_buckets_before = bucket_snapshot(&vol, vol.getattr("/parent").expect("attr").header);

    let handle = vol.create("/parent/child", 0o644).expect("create");
    vol.write(handle, 0, &vec![7; 900]).expect("write");
    vol.unlink("/parent/child").expect("unlink");

    assert_eq!(vol.free_block_set(), free_before);
    assert_eq!(
        bucket_snapshot(&vol, vol.getattr("/parent").expect("attr").header),
        root_buckets_before
    );
    assert_consistent(&vol);
}

fn bucket_snapshot(vol: &Volume<MemDevice>, dir_block: BlockNumber) -> Vec<u32> {
    let dev = vol.device();
    if dir_block == ROOT_BLOCK {
        let root = RootBlock::from_buf(dev.read_block(dir_block).expect("root"));
        (0..HASH_TABLE_SIZE).map(|i| root.bucket(i).0).collect()
    } else {
        let dir = HeaderBlock::from_buf(dev.read_block(dir_block).expect("dir"));
        (0..HASH_TABLE_SIZE).map(|i| dir.bucket(i).0).collect()
    }
}

#[test]
fn unrelated_delete_preserves_sibling_order() {
    let mut vol = fresh_volume();

    // Find four distinct names that collide into one bucket.
    let mut by_bucket: std::collections::HashMap<usize, Vec<String>> = Default::default();
    let mut colliding: Option<Vec<String>> = None;
    for i in 0.. {
        let name = format!("file{i}");
        let names = by_bucket.entry(hash_name(&name)).or_default();
        names.push(name);
        if names.len() == 4 {
            colliding = Some(names.clone());
            break;
        }
    }
    let names = colliding.expect("collisions exist");

    for name in &names {
        vol.create(&format!("/{name}"), 0o644).expect("create");
    }
    let order_before: Vec<String> = chain_names(&vol, hash_name(&names[0]));

    // Delete the second-from-head entry; the rest keep their relative order.
    let victim = order_before[1].clone();
    vol.unlink(&format!("/{victim}")).expect("unlink");

    let order_after: Vec<String> = chain_names(&vol, hash_name(&names[0]));
    let expected: Vec<String> = order_before
        .iter()
        .filter(|name| **name != victim)
        .cloned()
        .collect();
    assert_eq!(order_after, expected);
    assert_consistent(&vol);
}

fn chain_names(vol: &Volume<MemDevice>, bucket: usize) -> Vec<String> {
    let dev = vol.device();
    let root = RootBlock::from_buf(dev.read_block(ROOT_BLOCK).expect("root"));
    let mut names = Vec::new();
    let mut current = root.bucket(bucket);
    while !current.is_null() {
        let header = HeaderBlock::from_buf(dev.read_block(current).expect("header"));
        names.push(header.name());
        current = header.hash_chain();
    }
    names
}

#[test]
fn listing_cache_survives_reads_but_not_mutations() {
    let mut vol = fresh_volume();
    vol.create("/one", 0o644).expect("create");

    let first = vol.list("/").expect("list");
    let again = vol.list("/").expect("list cached");
    assert_eq!(first, again);

    vol.create("/two", 0o644).expect("create");
    let after = vol.list("/").expect("list refreshed");
    assert_eq!(after.len(), 2);

    // A size-changing write also refreshes listings.
    let handle = vol.open("/one", true).expect("open");
    vol.write(handle, 0, b"xyz").expect("write");
    let sized = vol.list("/").expect("list");
    let one = sized.iter().find(|e| e.name == "one").expect("entry");
    assert_eq!(one.size, 3);
    assert_eq!(one.kind, EntryKind::File);
}

#[test]
fn mtimes_update_on_mutation() {
    let mut vol = fresh_volume();
    vol.mkdir("/d", 0o755).expect("mkdir");
    let dir_mtime = vol.getattr("/d").expect("attr").mtime;

    vol.create("/d/f", 0o644).expect("create");
    let after_create = vol.getattr("/d").expect("attr").mtime;
    assert!(after_create >= dir_mtime);

    let file_mtime = vol.getattr("/d/f").expect("attr").mtime;
    assert!(file_mtime >= dir_mtime);
}
