// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The directory engine: `readdir` and two-level sorted `lookup`.
//!
//! A directory's dirents occupy a contiguous byte range starting at
//! the inode's meta address, one block at a time. Within a block,
//! `de[0].nameoff` doubles as the name area's start offset and, when
//! divided by the dirent record size, the block's dirent count.

use crate::inode::Inode;
use crate::io::{Device, KmapType, MetaBuf};
use crate::layout::{self, FileType, RawDirent};
use crate::result::{Error, Result};
use crate::super_block::SuperBlock;

fn round_up(value: u64, to: u64) -> u64 {
    (value + to - 1) / to * to
}

/// Walks the directory named by `inode`, starting at `pos` (an opaque
/// cursor in the same units as `ctx->pos` in the kernel original: a
/// byte offset into the logical dirent stream), and invokes `emit`
/// for every `(name, nid, file_type)` triple encountered.
///
/// `emit` returns `true` to continue, `false` to stop early (the host
/// buffer is full). Returns the cursor to resume from on the next
/// call.
pub fn readdir<F>(
    device: Device<'_>,
    sb: &SuperBlock,
    inode: &Inode,
    pos: u64,
    mut emit: F,
) -> Result<u64>
where
    F: FnMut(&[u8], u64, FileType) -> bool,
{
    let size = inode.size() as u64;
    let base = sb.nid_to_inode_meta_addr(inode.nid());
    let b = sb.blksize() as u64;
    let mut pos = pos;
    let mut ofs = sb.addr_to_blk_off(pos) as u64;
    let mut initial = true;
    let mut meta = MetaBuf::new(device);

    while pos < size {
        let dbstart = pos - ofs;
        let maxsize = core::cmp::min(size - dbstart, b) as usize;
        let page = meta.read(base + dbstart, KmapType::Kmap)?;
        if page.len() < maxsize {
            return Err(Error::Io);
        }
        let block = &page[..maxsize];
        if block.len() < layout::DIRENT_SIZE {
            return Err(Error::Corrupt);
        }
        let nameoff0 = RawDirent::decode(block).nameoff() as usize;
        if nameoff0 < layout::DIRENT_SIZE || nameoff0 > maxsize || (nameoff0 as u64) >= b {
            return Err(Error::Corrupt);
        }

        if initial {
            initial = false;
            ofs = round_up(ofs, layout::DIRENT_SIZE as u64);
            pos = dbstart + ofs;
        }

        let ndirents = nameoff0 / layout::DIRENT_SIZE;
        let mut i = (ofs as usize) / layout::DIRENT_SIZE;
        while i < ndirents {
            let rec = &block[i * layout::DIRENT_SIZE..(i + 1) * layout::DIRENT_SIZE];
            let de = RawDirent::decode(rec);
            let nameoff = de.nameoff() as usize;
            let namelen = if i + 1 < ndirents {
                let next_rec =
                    &block[(i + 1) * layout::DIRENT_SIZE..(i + 2) * layout::DIRENT_SIZE];
                RawDirent::decode(next_rec).nameoff() as usize - nameoff
            } else {
                let tail = block.get(nameoff..maxsize).ok_or(Error::Corrupt)?;
                tail.iter().position(|&c| c == 0).unwrap_or(tail.len())
            };
            if nameoff + namelen > maxsize || namelen > layout::NAME_LEN_MAX {
                return Err(Error::Corrupt);
            }
            let file_type = FileType::from_u8(de.file_type()).ok_or(Error::Corrupt)?;
            let name = &block[nameoff..nameoff + namelen];
            if !emit(name, de.nid(), file_type) {
                return Ok(pos);
            }
            pos += layout::DIRENT_SIZE as u64;
            i += 1;
        }
        pos = dbstart + maxsize as u64;
        ofs = 0;
    }
    Ok(pos)
}

/// Two-level sorted lookup of `name` within the directory named by
/// `inode`: a block-level binary search on each block's first (and
/// therefore smallest) name, followed by a within-block binary search
/// on the candidate block's dirents.
pub fn lookup(
    device: Device<'_>,
    sb: &SuperBlock,
    inode: &Inode,
    name: &[u8],
) -> Result<(u64, FileType)> {
    if name.len() > layout::NAME_LEN_MAX {
        return Err(Error::NameTooLong);
    }
    let size = inode.size() as u64;
    if size == 0 {
        return Err(Error::NotFound);
    }
    let base = sb.nid_to_inode_meta_addr(inode.nid());
    let b = sb.blksize() as u64;
    let iblks = size.div_ceil(b);

    let mut head: i64 = 0;
    let mut back: i64 = iblks as i64 - 1;
    let mut startprfx = 0usize;
    let mut endprfx = 0usize;
    let mut meta = MetaBuf::new(device);
    let mut candidate: Option<(u64, usize)> = None;

    while head <= back {
        let mid = head + (back - head) / 2;
        let mid_u = mid as u64;
        let dbstart = base + mid_u * b;
        let maxsize = core::cmp::min(size - mid_u * b, b) as usize;
        let page = meta.read(dbstart, KmapType::Kmap)?;
        if page.len() < maxsize {
            return Err(Error::Io);
        }
        let block = &page[..maxsize];
        if block.len() < layout::DIRENT_SIZE {
            return Err(Error::Corrupt);
        }
        let nameoff0 = RawDirent::decode(block).nameoff() as usize;
        if nameoff0 == 0 || nameoff0 % layout::DIRENT_SIZE != 0 || nameoff0 > maxsize {
            return Err(Error::Corrupt);
        }
        let ndirents = nameoff0 / layout::DIRENT_SIZE;
        if ndirents == 0 {
            return Err(Error::Corrupt);
        }

        let mut matched = core::cmp::min(startprfx, endprfx);
        let dname_end = if ndirents == 1 {
            maxsize
        } else {
            let second = RawDirent::decode(&block[layout::DIRENT_SIZE..layout::DIRENT_SIZE * 2]);
            second.nameoff() as usize
        };
        if dname_end > maxsize || nameoff0 > dname_end {
            return Err(Error::Corrupt);
        }
        let dname = &block[nameoff0..dname_end];
        let diff = dirnamecmp(name, dname, &mut matched);

        if diff < 0 {
            back = mid - 1;
            endprfx = matched;
            continue;
        }
        if diff == 0 {
            let de = RawDirent::decode(block);
            let file_type = FileType::from_u8(de.file_type()).ok_or(Error::Corrupt)?;
            return Ok((de.nid(), file_type));
        }
        head = mid + 1;
        startprfx = matched;
        candidate = Some((mid_u, ndirents));
    }

    let (blk, ndirents) = candidate.ok_or(Error::NotFound)?;
    let dbstart = base + blk * b;
    let maxsize = core::cmp::min(size - blk * b, b) as usize;
    let page = meta.read(dbstart, KmapType::Kmap)?;
    if page.len() < maxsize {
        return Err(Error::Io);
    }
    find_target_dirent(name, &page[..maxsize], ndirents)
}

fn find_target_dirent(name: &[u8], block: &[u8], ndirents: usize) -> Result<(u64, FileType)> {
    let mut head: i64 = 1;
    let mut back: i64 = ndirents as i64 - 1;
    let mut startprfx = 0usize;
    let mut endprfx = 0usize;

    while head <= back {
        let mid = (head + (back - head) / 2) as usize;
        let rec = &block[mid * layout::DIRENT_SIZE..(mid + 1) * layout::DIRENT_SIZE];
        let de = RawDirent::decode(rec);
        let nameoff = de.nameoff() as usize;
        let end = if mid + 1 >= ndirents {
            block.len()
        } else {
            let next_rec =
                &block[(mid + 1) * layout::DIRENT_SIZE..(mid + 2) * layout::DIRENT_SIZE];
            RawDirent::decode(next_rec).nameoff() as usize
        };
        if nameoff > end || end > block.len() {
            return Err(Error::Corrupt);
        }
        let mut matched = core::cmp::min(startprfx, endprfx);
        let dname = &block[nameoff..end];
        let diff = dirnamecmp(name, dname, &mut matched);

        if diff == 0 {
            let file_type = FileType::from_u8(de.file_type()).ok_or(Error::Corrupt)?;
            return Ok((de.nid(), file_type));
        } else if diff > 0 {
            head = mid as i64 + 1;
            startprfx = matched;
        } else {
            back = mid as i64 - 1;
            endprfx = matched;
        }
    }
    Err(Error::NotFound)
}

/// Compares `qn` (the search name) against `qd` (a dirent's name
/// bytes as they sit in the block, with no guaranteed trailing nul),
/// resuming from `matched` bytes already known equal and writing back
/// how many bytes matched before the first difference (or the end of
/// the shorter operand).
fn dirnamecmp(qn: &[u8], qd: &[u8], matched: &mut usize) -> i32 {
    let mut i = *matched;
    while i < qd.len() {
        let qn_byte = qn.get(i).copied().unwrap_or(0);
        if qn_byte != qd[i] {
            *matched = i;
            return if qn_byte > qd[i] { 1 } else { -1 };
        }
        i += 1;
    }
    *matched = i;
    if i >= qn.len() { 0 } else { 1 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr;
    use crate::testutil::Image;
    use alloc::vec;
    use alloc::vec::Vec;

    struct DirentSpec {
        name: &'static [u8],
        nid: u64,
        file_type: FileType,
    }

    /// Packs `entries` (already sorted by name) into one directory
    /// block starting at `block[0]`, matching the on-disk layout:
    /// fixed-size dirent records first, then the name area.
    fn pack_block(entries: &[DirentSpec]) -> Vec<u8> {
        let header_len = entries.len() * layout::DIRENT_SIZE;
        let names_len: usize = entries.iter().map(|e| e.name.len()).sum();
        let mut block = vec![0u8; header_len + names_len];
        let mut nameoff = header_len;
        for (i, e) in entries.iter().enumerate() {
            let rec = i * layout::DIRENT_SIZE;
            block[rec..rec + 8].copy_from_slice(&e.nid.to_le_bytes());
            block[rec + 8..rec + 10].copy_from_slice(&(nameoff as u16).to_le_bytes());
            block[rec + 10] = e.file_type as u8;
            block[nameoff..nameoff + e.name.len()].copy_from_slice(e.name);
            nameoff += e.name.len();
        }
        block
    }

    fn build_image(blocks: &[Vec<u8>], blksz_bits: u8) -> (Vec<u8>, SuperBlock, u64) {
        let sb_image = Image::new().with_blksz_bits(blksz_bits).build();
        let nid = Image::ROOT_NID;
        let islot_bits = 5;
        let inode_addr = addr::nid_to_inode_addr(nid, islot_bits) as usize;
        let meta_addr = addr::nid_to_inode_meta_addr(nid, islot_bits) as usize;
        let b = 1usize << blksz_bits;
        let size = (blocks.len() * b) as u32;
        let mut bytes = sb_image;
        bytes.resize(meta_addr + blocks.len() * b + b, 0);

        bytes[inode_addr..inode_addr + 2]
            .copy_from_slice(&(layout::S_IFDIR | 0o755).to_le_bytes());
        bytes[inode_addr + 2..inode_addr + 4].copy_from_slice(&2u16.to_le_bytes());
        bytes[inode_addr + 4..inode_addr + 8].copy_from_slice(&size.to_le_bytes());

        for (i, blk) in blocks.iter().enumerate() {
            let start = meta_addr + i * b;
            bytes[start..start + blk.len()].copy_from_slice(blk);
        }
        let device = Device::new(&bytes);
        let sb = SuperBlock::read(device).unwrap();
        (bytes, sb, nid)
    }

    #[test]
    fn lookup_finds_file_and_dir_entries_and_rejects_missing_name() {
        let entries = [
            DirentSpec { name: b"bbb", nid: 10, file_type: FileType::File },
            DirentSpec { name: b"mmm", nid: 11, file_type: FileType::Dir },
            DirentSpec { name: b"zzz", nid: 12, file_type: FileType::File },
        ];
        let block = pack_block(&entries);
        let (bytes, sb, nid) = build_image(&[block], 12);
        let device = Device::new(&bytes);
        let inode = Inode::read(device, &sb, nid, 4096).unwrap();

        assert_eq!(lookup(device, &sb, &inode, b"bbb").unwrap(), (10, FileType::File));
        assert_eq!(lookup(device, &sb, &inode, b"mmm").unwrap(), (11, FileType::Dir));
        assert_eq!(lookup(device, &sb, &inode, b"zzz").unwrap(), (12, FileType::File));
        assert_eq!(lookup(device, &sb, &inode, b"nope").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn lookup_spans_two_blocks() {
        let block0 = pack_block(&[
            DirentSpec { name: b"aaa", nid: 1, file_type: FileType::File },
            DirentSpec { name: b"ccc", nid: 2, file_type: FileType::File },
        ]);
        let block1 = pack_block(&[
            DirentSpec { name: b"eee", nid: 3, file_type: FileType::File },
            DirentSpec { name: b"ggg", nid: 4, file_type: FileType::File },
        ]);
        let (bytes, sb, nid) = build_image(&[block0, block1], 12);
        let device = Device::new(&bytes);
        let inode = Inode::read(device, &sb, nid, 4096).unwrap();
        assert_eq!(lookup(device, &sb, &inode, b"eee").unwrap(), (3, FileType::File));
        assert_eq!(lookup(device, &sb, &inode, b"aaa").unwrap(), (1, FileType::File));
        assert_eq!(lookup(device, &sb, &inode, b"ggg").unwrap(), (4, FileType::File));
    }

    #[test]
    fn readdir_emits_every_entry_once() {
        let entries = [
            DirentSpec { name: b"one", nid: 1, file_type: FileType::File },
            DirentSpec { name: b"two", nid: 2, file_type: FileType::Dir },
            DirentSpec { name: b"three", nid: 3, file_type: FileType::File },
        ];
        let block = pack_block(&entries);
        let (bytes, sb, nid) = build_image(&[block], 12);
        let device = Device::new(&bytes);
        let inode = Inode::read(device, &sb, nid, 4096).unwrap();
        let mut seen: Vec<(Vec<u8>, u64)> = Vec::new();
        let end = readdir(device, &sb, &inode, 0, |name, nid, _ft| {
            seen.push((name.to_vec(), nid));
            true
        })
        .unwrap();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0], (b"one".to_vec(), 1));
        assert_eq!(seen[2], (b"three".to_vec(), 3));
        assert!(end >= inode.size() as u64);
    }

    #[test]
    fn readdir_resumes_from_a_mid_stream_cursor() {
        let entries = [
            DirentSpec { name: b"one", nid: 1, file_type: FileType::File },
            DirentSpec { name: b"two", nid: 2, file_type: FileType::Dir },
        ];
        let block = pack_block(&entries);
        let (bytes, sb, nid) = build_image(&[block], 12);
        let device = Device::new(&bytes);
        let inode = Inode::read(device, &sb, nid, 4096).unwrap();
        let mut seen = Vec::new();
        readdir(device, &sb, &inode, layout::DIRENT_SIZE as u64, |name, nid, _| {
            seen.push((name.to_vec(), nid));
            true
        })
        .unwrap();
        assert_eq!(seen, vec![(b"two".to_vec(), 2)]);
    }

    #[test]
    fn readdir_stopping_early_resumes_at_the_rejected_entry() {
        let entries = [
            DirentSpec { name: b"one", nid: 1, file_type: FileType::File },
            DirentSpec { name: b"two", nid: 2, file_type: FileType::Dir },
            DirentSpec { name: b"three", nid: 3, file_type: FileType::File },
        ];
        let block = pack_block(&entries);
        let (bytes, sb, nid) = build_image(&[block], 12);
        let device = Device::new(&bytes);
        let inode = Inode::read(device, &sb, nid, 4096).unwrap();

        // Host buffer can only take one entry: stop emit after the first.
        let mut seen = Vec::new();
        let pos = readdir(device, &sb, &inode, 0, |name, nid, _| {
            seen.push((name.to_vec(), nid));
            false
        })
        .unwrap();
        assert_eq!(seen, vec![(b"one".to_vec(), 1)]);

        // Resuming from the returned cursor must re-deliver "two", not
        // skip past it.
        let mut rest = Vec::new();
        readdir(device, &sb, &inode, pos, |name, nid, _| {
            rest.push((name.to_vec(), nid));
            true
        })
        .unwrap();
        assert_eq!(
            rest,
            vec![(b"two".to_vec(), 2), (b"three".to_vec(), 3)]
        );
    }

    #[test]
    fn dirnamecmp_resumes_from_a_shared_prefix() {
        let mut matched = 2;
        assert_eq!(dirnamecmp(b"abcdef", b"abcxyz", &mut matched), 1);
        assert_eq!(matched, 3);
    }
}
