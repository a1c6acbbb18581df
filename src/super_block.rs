// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The superblock reader: parses and validates the 128-byte
//! superblock record and seeds the runtime descriptor that the rest
//! of the mount lives on top of.

use crate::io::{Device, KmapType, MetaBuf};
use crate::layout::{self, Flags, RawSuperBlock, SUPERBLOCK_OFFSET, SUPERBLOCK_SIZE};
use crate::result::{Error, Result};
use core::mem::size_of;

const CRC32C: crc::Crc<u32> = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);

/// The runtime superblock descriptor, seeded once at mount and
/// immutable for the lifetime of the mount.
#[derive(Clone, Copy, Debug)]
pub struct SuperBlock {
    blksz_bits: u8,
    islot_bits: u8,
    root_nid: u64,
    inos: u32,
    blocks: u32,
    flags: Flags,
    checksum: u32,
}

impl SuperBlock {
    /// Reads and validates the superblock at device offset 0.
    ///
    /// Fails with [`Error::BadSuperblock`] on magic mismatch or an
    /// out-of-range block size shift. The CRC32C checksum (computed
    /// with `checksum` itself taken as zero) is *not* verified here —
    /// see [`SuperBlock::verify_checksum`] — because whether to
    /// enforce it at mount is left open by the format (§9, Open
    /// Questions); this implementation defers it to an explicit
    /// verification step a host can opt into.
    pub fn read(device: Device<'_>) -> Result<SuperBlock> {
        let mut meta = MetaBuf::new(device);
        let bytes = meta.read(SUPERBLOCK_OFFSET, KmapType::Kmap)?;
        if bytes.len() < SUPERBLOCK_SIZE {
            return Err(Error::Io);
        }
        let raw = RawSuperBlock::decode(bytes);
        if raw.magic() != layout::MAGIC {
            return Err(Error::BadSuperblock);
        }
        let blksz_bits = raw.blksz_bits;
        let page_shift = device.page_shift();
        if !(9..=page_shift as u8).contains(&blksz_bits) {
            return Err(Error::BadSuperblock);
        }
        let islot_bits = size_of::<crate::layout::RawInode>().trailing_zeros() as u8;
        Ok(SuperBlock {
            blksz_bits,
            islot_bits,
            root_nid: raw.root_nid(),
            inos: raw.inos(),
            blocks: raw.blocks(),
            flags: Flags::from_bits_truncate(raw.flags),
            checksum: raw.checksum(),
        })
    }

    /// Recomputes the CRC32C over the on-disk superblock (with the
    /// `checksum` field itself zeroed) and compares it against the
    /// stored value. Separate from `read` so a host can choose
    /// whether to treat a mismatch as fatal.
    pub fn verify_checksum(&self, device: Device<'_>) -> Result<bool> {
        let mut meta = MetaBuf::new(device);
        let mut bytes = [0u8; SUPERBLOCK_SIZE];
        meta.read_into(SUPERBLOCK_OFFSET, &mut bytes)?;
        // checksum occupies bytes [4, 8)
        bytes[4..8].fill(0);
        let computed = CRC32C.checksum(&bytes);
        Ok(computed == self.checksum)
    }

    pub fn blksz_bits(&self) -> u32 {
        self.blksz_bits as u32
    }

    pub fn blksize(&self) -> usize {
        1usize << self.blksz_bits()
    }

    pub fn islot_bits(&self) -> u32 {
        self.islot_bits as u32
    }

    pub fn islotsize(&self) -> usize {
        1usize << self.islot_bits()
    }

    pub fn root_nid(&self) -> u64 {
        self.root_nid
    }

    pub fn inos(&self) -> u32 {
        self.inos
    }

    pub fn blocks(&self) -> u32 {
        self.blocks
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn checksum(&self) -> u32 {
        self.checksum
    }

    pub fn addr_to_blk_id(&self, addr: u64) -> u64 {
        crate::addr::addr_to_blk_id(addr, self.blksz_bits())
    }

    pub fn addr_to_blk_off(&self, addr: u64) -> u32 {
        crate::addr::addr_to_blk_off(addr, self.blksz_bits())
    }

    pub fn blk_id_to_addr(&self, blk_id: u64) -> u64 {
        crate::addr::blk_id_to_addr(blk_id, self.blksz_bits())
    }

    pub fn nid_to_inode_addr(&self, nid: u64) -> u64 {
        crate::addr::nid_to_inode_addr(nid, self.islot_bits())
    }

    pub fn nid_to_inode_meta_addr(&self, nid: u64) -> u64 {
        crate::addr::nid_to_inode_meta_addr(nid, self.islot_bits())
    }
}
