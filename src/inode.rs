// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The inode reader: decodes one 32-byte inode record into an
//! in-memory descriptor and dispatches by file type.

use crate::io::{Device, KmapType, MetaBuf};
use crate::layout::{self, FileType, InodeUnion, RawInode};
use crate::result::{Error, Result};
use crate::super_block::SuperBlock;
use alloc::vec::Vec;

/// Byte offset, in a `u32` device-number field, the format does not
/// carry. Special files always report it as zero (§4.4, item 6).
const RDEV_UNSET: u32 = 0;

/// The kind of object an inode names, with the data needed to serve
/// it without a second decode.
#[derive(Clone, Debug)]
pub enum Kind {
    File {
        /// True when the filesystem-wide `COMPRESSED` flag selects
        /// the compressed read path for this file.
        compressed: bool,
        /// `u.blk_off` for an uncompressed file, `u.blks` (extent
        /// count) for a compressed one.
        u: InodeUnion,
    },
    Dir,
    Symlink {
        /// The link target, cached here when it fits in a single
        /// page of the inode's meta region (the "fast symlink" path,
        /// §4.8).
        fast_target: Option<Vec<u8>>,
    },
    CharDev {
        rdev: u32,
    },
    BlockDev {
        rdev: u32,
    },
    Fifo,
    Socket,
}

/// A per-open inode descriptor, populated once on first fetch and
/// immutable thereafter.
#[derive(Clone, Debug)]
pub struct Inode {
    nid: u64,
    mode: u16,
    nlink: u16,
    size: u32,
    ino: u32,
    uid: u16,
    gid: u16,
    blk_id: u32,
    i_blocks: u32,
    kind: Kind,
}

impl Inode {
    /// Locates, decodes, and dispatches the inode named by `nid`.
    ///
    /// `page_size` bounds the "fits in a single page" test for the
    /// fast-symlink cache; a host typically passes its own page size
    /// here, independent of the filesystem's block size.
    pub fn read(
        device: Device<'_>,
        sb: &SuperBlock,
        nid: u64,
        page_size: usize,
    ) -> Result<Inode> {
        let addr = sb.nid_to_inode_addr(nid);
        let mut meta = MetaBuf::new(device);
        let bytes = meta.read(addr, KmapType::Kmap)?;
        if bytes.len() < layout::INODE_SIZE {
            return Err(Error::Io);
        }
        let raw = RawInode::decode(bytes);
        meta.release();

        let mode = raw.mode();
        let size = raw.size();
        // The format's `size` field is an unsigned u32; the C original
        // additionally rejects a size so large i_blocks would overflow
        // a sensible block count, which cannot happen here since both
        // are u32 and i_blocks is computed in wider arithmetic below.
        let blocks_512 = sb.blksize() / 512;
        let i_blocks = if blocks_512 == 0 {
            0
        } else {
            let blocks = (size as u64).div_ceil(sb.blksize() as u64);
            (blocks * blocks_512 as u64) as u32
        };

        let file_type_bits = mode & layout::S_IFMT;
        let kind = match file_type_bits {
            layout::S_IFREG => Kind::File {
                compressed: sb.flags().contains(layout::Flags::COMPRESSED),
                u: decode_union(sb, &raw),
            },
            layout::S_IFDIR => Kind::Dir,
            layout::S_IFLNK => {
                let meta_addr = sb.nid_to_inode_meta_addr(nid);
                let fast_target = if (size as usize) <= page_size {
                    let mut mb = MetaBuf::new(device);
                    Some(mb.read_data(meta_addr, size as usize)?)
                } else {
                    None
                };
                Kind::Symlink { fast_target }
            }
            layout::S_IFCHR => Kind::CharDev { rdev: RDEV_UNSET },
            layout::S_IFBLK => Kind::BlockDev { rdev: RDEV_UNSET },
            layout::S_IFIFO => Kind::Fifo,
            layout::S_IFSOCK => Kind::Socket,
            _ => return Err(Error::BadMode),
        };

        Ok(Inode {
            nid,
            mode,
            nlink: raw.nlink(),
            size,
            ino: raw.ino(),
            uid: raw.uid(),
            gid: raw.gid(),
            blk_id: raw.blk_id(),
            i_blocks,
            kind,
        })
    }

    pub fn nid(&self) -> u64 {
        self.nid
    }

    pub fn mode(&self) -> u16 {
        self.mode
    }

    pub fn nlink(&self) -> u16 {
        self.nlink
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn uid(&self) -> u16 {
        self.uid
    }

    pub fn gid(&self) -> u16 {
        self.gid
    }

    pub fn blk_id(&self) -> u32 {
        self.blk_id
    }

    pub fn i_blocks(&self) -> u32 {
        self.i_blocks
    }

    pub fn kind(&self) -> &Kind {
        &self.kind
    }

    pub fn file_type(&self) -> Option<FileType> {
        match self.kind {
            Kind::File { .. } => Some(FileType::File),
            Kind::Dir => Some(FileType::Dir),
            Kind::Symlink { .. } => Some(FileType::Symlink),
            Kind::CharDev { .. } => Some(FileType::CharDev),
            Kind::BlockDev { .. } => Some(FileType::BlockDev),
            Kind::Fifo => Some(FileType::Fifo),
            Kind::Socket => Some(FileType::Sock),
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.kind, Kind::Dir)
    }
}

fn decode_union(sb: &SuperBlock, raw: &RawInode) -> InodeUnion {
    let compressed = sb.flags().contains(layout::Flags::COMPRESSED)
        && (raw.mode() & layout::S_IFMT) == layout::S_IFREG;
    if compressed {
        InodeUnion::Blocks(raw.u_raw() as u16)
    } else {
        InodeUnion::BlockOffset(raw.u_raw())
    }
}
