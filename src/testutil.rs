// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Minimal in-memory image builder shared by the module test suites.
//! Not part of the public API.

use crate::io::DEFAULT_PAGE_SHIFT;
use crate::layout::{self, SUPERBLOCK_SIZE};
use alloc::vec;
use alloc::vec::Vec;

/// Builds a single-page image containing nothing but a superblock,
/// enough for the superblock reader's own tests.
pub struct Image {
    blksz_bits: u8,
    checksum: bool,
}

impl Image {
    pub const ROOT_NID: u64 = 1;

    pub fn new() -> Image {
        Image {
            blksz_bits: 12,
            checksum: false,
        }
    }

    pub fn with_blksz_bits(mut self, bits: u8) -> Image {
        self.blksz_bits = bits;
        self
    }

    pub fn with_checksum(mut self) -> Image {
        self.checksum = true;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut bytes = vec![0u8; 1usize << DEFAULT_PAGE_SHIFT];
        bytes[0..4].copy_from_slice(&layout::MAGIC.to_le_bytes());
        bytes[8] = self.blksz_bits;
        bytes[9..17].copy_from_slice(&Self::ROOT_NID.to_le_bytes());
        bytes[17..21].copy_from_slice(&1u32.to_le_bytes()); // inos
        bytes[21] = 5; // islot_bits, unused by the reader but written for fidelity
        bytes[22..26].copy_from_slice(&1u32.to_le_bytes()); // blocks
        bytes[26] = 0; // flags
        if self.checksum {
            let crc = crc::Crc::<u32>::new(&crc::CRC_32_ISCSI);
            let mut scratch = [0u8; SUPERBLOCK_SIZE];
            scratch.copy_from_slice(&bytes[..SUPERBLOCK_SIZE]);
            scratch[4..8].fill(0);
            let checksum = crc.checksum(&scratch);
            bytes[4..8].copy_from_slice(&checksum.to_le_bytes());
        }
        bytes
    }
}
