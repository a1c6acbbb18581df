// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The on-disk binary layout: constants, packed record definitions,
//! and little-endian decoders. No I/O happens here — every type in
//! this module is a pure view over bytes already in memory.
//!
//! All multi-byte fields are little-endian on disk. Records are
//! tightly packed; none of the `repr(C, packed)` structs below may
//! gain implicit padding, which is why every accessor goes through an
//! explicit `from_le` rather than trusting the host's native
//! endianness.

use core::mem::size_of;
use core::ptr;
use static_assertions::const_assert_eq;

/// Filesystem magic number (decimal, per the format).
pub const MAGIC: u32 = 114514;

/// Byte offset of the superblock, absolute from the start of the
/// device.
pub const SUPERBLOCK_OFFSET: u64 = 0;

/// On-disk size of the superblock, in bytes.
pub const SUPERBLOCK_SIZE: usize = 128;

/// On-disk size of one inode record, in bytes.
pub const INODE_SIZE: usize = 32;

/// On-disk size of one directory entry, in bytes.
pub const DIRENT_SIZE: usize = 12;

/// On-disk size of one extent record, in bytes.
pub const EXTENT_SIZE: usize = 8;

/// Maximum length of a file name.
pub const NAME_LEN_MAX: usize = 255;

/// Maximum plaintext size produced by decompressing one compressed
/// block.
pub const DECOMPRESSED_WINDOW: usize = 64 * 1024;

/// LZMA dictionary size used by the compressed data reader.
pub const LZMA_DICT_SIZE: usize = 1024 * 1024;

bitflags::bitflags! {
    /// Filesystem-wide feature flags, from `super.flags`.
    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    pub struct Flags: u8 {
        /// Regular-file data is LZMA-compressed. Directories and
        /// symlinks are always stored uncompressed in the inode's
        /// meta region regardless of this bit.
        const COMPRESSED = 1 << 0;
    }
}

/// The file-type tag carried in a dirent and (derived) in an inode's
/// mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum FileType {
    File = 0,
    Dir = 1,
    CharDev = 2,
    BlockDev = 3,
    Fifo = 4,
    Sock = 5,
    Symlink = 6,
}

impl FileType {
    pub fn from_u8(v: u8) -> Option<FileType> {
        Some(match v {
            0 => FileType::File,
            1 => FileType::Dir,
            2 => FileType::CharDev,
            3 => FileType::BlockDev,
            4 => FileType::Fifo,
            5 => FileType::Sock,
            6 => FileType::Symlink,
            _ => return None,
        })
    }
}

/// POSIX format bits, the part of `mode` that selects a file type.
pub const S_IFMT: u16 = 0o170000;
pub const S_IFIFO: u16 = 0o010000;
pub const S_IFCHR: u16 = 0o020000;
pub const S_IFDIR: u16 = 0o040000;
pub const S_IFBLK: u16 = 0o060000;
pub const S_IFREG: u16 = 0o100000;
pub const S_IFLNK: u16 = 0o120000;
pub const S_IFSOCK: u16 = 0o140000;

/// The raw, on-disk superblock (128 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub(crate) struct RawSuperBlock {
    pub magic: u32,
    pub checksum: u32,
    pub blksz_bits: u8,
    pub root_nid: u64,
    pub inos: u32,
    pub islot_bits: u8,
    pub blocks: u32,
    pub flags: u8,
    pub reserved: [u8; 101],
}

const_assert_eq!(size_of::<RawSuperBlock>(), SUPERBLOCK_SIZE);

impl RawSuperBlock {
    /// Decodes a superblock from exactly `SUPERBLOCK_SIZE` bytes.
    ///
    /// # Panics
    /// Panics if `bytes` is shorter than `SUPERBLOCK_SIZE`; callers
    /// are expected to have sized their read accordingly.
    pub(crate) fn decode(bytes: &[u8]) -> RawSuperBlock {
        assert!(bytes.len() >= SUPERBLOCK_SIZE);
        // SAFETY: every field width is accounted for and the struct
        // is `packed`, so an unaligned read over `SUPERBLOCK_SIZE`
        // in-bounds bytes is well-defined.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub(crate) fn magic(&self) -> u32 {
        u32::from_le(self.magic)
    }

    pub(crate) fn checksum(&self) -> u32 {
        u32::from_le(self.checksum)
    }

    pub(crate) fn root_nid(&self) -> u64 {
        u64::from_le(self.root_nid)
    }

    pub(crate) fn inos(&self) -> u32 {
        u32::from_le(self.inos)
    }

    pub(crate) fn blocks(&self) -> u32 {
        u32::from_le(self.blocks)
    }
}

/// The data representation carried in an inode's `u` union field:
/// either the length (in records) of a compressed file's extent
/// table, or the byte offset within `blk_id`'s block where an
/// uncompressed file's data begins.
#[derive(Clone, Copy, Debug)]
pub enum InodeUnion {
    /// Number of extent-table records, for a compressed regular file.
    Blocks(u16),
    /// Byte offset of the data's start, for everything else.
    BlockOffset(u32),
}

/// The raw, on-disk inode record (32 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub(crate) struct RawInode {
    pub mode: u16,
    pub nlink: u16,
    pub size: u32,
    pub ino: u32,
    pub uid: u16,
    pub gid: u16,
    pub blk_id: u32,
    pub u: u32,
    pub reserved: [u8; 8],
}

const_assert_eq!(size_of::<RawInode>(), INODE_SIZE);

impl RawInode {
    pub(crate) fn decode(bytes: &[u8]) -> RawInode {
        assert!(bytes.len() >= INODE_SIZE);
        // SAFETY: see `RawSuperBlock::decode`.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub(crate) fn mode(&self) -> u16 {
        u16::from_le(self.mode)
    }

    pub(crate) fn nlink(&self) -> u16 {
        u16::from_le(self.nlink)
    }

    pub(crate) fn size(&self) -> u32 {
        u32::from_le(self.size)
    }

    pub(crate) fn ino(&self) -> u32 {
        u32::from_le(self.ino)
    }

    pub(crate) fn uid(&self) -> u16 {
        u16::from_le(self.uid)
    }

    pub(crate) fn gid(&self) -> u16 {
        u16::from_le(self.gid)
    }

    pub(crate) fn blk_id(&self) -> u32 {
        u32::from_le(self.blk_id)
    }

    pub(crate) fn u_raw(&self) -> u32 {
        u32::from_le(self.u)
    }
}

/// The raw, on-disk directory entry (12 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub(crate) struct RawDirent {
    pub nid: u64,
    pub nameoff: u16,
    pub file_type: u8,
    pub reserved: u8,
}

const_assert_eq!(size_of::<RawDirent>(), DIRENT_SIZE);

impl RawDirent {
    pub(crate) fn decode(bytes: &[u8]) -> RawDirent {
        assert!(bytes.len() >= DIRENT_SIZE);
        // SAFETY: see `RawSuperBlock::decode`.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub(crate) fn nid(&self) -> u64 {
        u64::from_le(self.nid)
    }

    pub(crate) fn nameoff(&self) -> u16 {
        u16::from_le(self.nameoff)
    }

    pub(crate) fn file_type(&self) -> u8 {
        self.file_type
    }
}

/// The raw, on-disk extent record (8 bytes).
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub(crate) struct RawExtent {
    pub off: u32,
    pub frag_off: u32,
}

const_assert_eq!(size_of::<RawExtent>(), EXTENT_SIZE);

impl RawExtent {
    pub(crate) fn decode(bytes: &[u8]) -> RawExtent {
        assert!(bytes.len() >= EXTENT_SIZE);
        // SAFETY: see `RawSuperBlock::decode`.
        unsafe { ptr::read_unaligned(bytes.as_ptr().cast()) }
    }

    pub(crate) fn off(&self) -> u32 {
        u32::from_le(self.off)
    }

    pub(crate) fn frag_off(&self) -> u32 {
        u32::from_le(self.frag_off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_match_the_format() {
        assert_eq!(size_of::<RawSuperBlock>(), 128);
        assert_eq!(size_of::<RawInode>(), 32);
        assert_eq!(size_of::<RawDirent>(), 12);
        assert_eq!(size_of::<RawExtent>(), 8);
    }

    #[test]
    fn superblock_roundtrip() {
        let mut bytes = [0u8; SUPERBLOCK_SIZE];
        bytes[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        bytes[8..16].copy_from_slice(&7u64.to_le_bytes());
        let sb = RawSuperBlock::decode(&bytes);
        assert_eq!(sb.magic(), MAGIC);
        assert_eq!(sb.root_nid(), 7);
    }

    #[test]
    fn dirent_fields_decode_little_endian() {
        let mut bytes = [0u8; DIRENT_SIZE];
        bytes[0..8].copy_from_slice(&42u64.to_le_bytes());
        bytes[8..10].copy_from_slice(&36u16.to_le_bytes());
        bytes[10] = FileType::Dir as u8;
        let de = RawDirent::decode(&bytes);
        assert_eq!(de.nid(), 42);
        assert_eq!(de.nameoff(), 36);
        assert_eq!(FileType::from_u8(de.file_type()), Some(FileType::Dir));
    }
}
