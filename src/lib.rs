// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! A read-only, block-addressable filesystem reader, with optional
//! per-file LZMA compression.
//!
//! This crate implements the host-independent core of the format: on
//! -disk layout decoding, address arithmetic, the metadata buffer
//! cache, and the inode/directory/data/symlink read paths. A host
//! supplies a byte-addressable mapping of the backing device (see
//! [`io::Device`]) and drives [`FileSystem`] from there; this crate
//! does no I/O of its own beyond reading that mapping, and performs
//! no writes, since the format is read-only by design.
//!
//! ```no_run
//! # fn get_image() -> &'static [u8] { &[] }
//! use codexfs::FileSystem;
//!
//! let image = get_image();
//! let fs = FileSystem::mount(image)?;
//! let root = fs.root()?;
//! # Ok::<(), codexfs::Error>(())
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod addr;
mod data;
mod dir;
mod inode;
mod io;
mod layout;
mod lzma;
mod result;
mod super_block;
mod symlink;
#[cfg(test)]
mod testutil;
mod zdata;

pub use inode::{Inode, Kind};
pub use io::Device;
pub use layout::{FileType, Flags};
pub use result::{Error, Result};
pub use super_block::SuperBlock;

use alloc::vec::Vec;

/// An open mount: a backing [`Device`] plus the superblock descriptor
/// read from it. Immutable for its lifetime; every read is served
/// straight through to the device with no additional caching beyond
/// the single-slot [`io::MetaBuf`] each operation uses internally.
pub struct FileSystem<'a> {
    device: Device<'a>,
    sb: SuperBlock,
}

impl<'a> FileSystem<'a> {
    /// Mounts the image in `data`, using the default 4 KiB host page
    /// granularity. Fails with [`Error::BadSuperblock`] if the
    /// superblock doesn't validate.
    pub fn mount(data: &'a [u8]) -> Result<FileSystem<'a>> {
        Self::mount_with_page_shift(data, io::DEFAULT_PAGE_SHIFT)
    }

    /// Mounts the image in `data` using an explicit host page
    /// granularity, for hosts whose page size isn't 4 KiB.
    pub fn mount_with_page_shift(data: &'a [u8], page_shift: u32) -> Result<FileSystem<'a>> {
        let device = Device::with_page_shift(data, page_shift);
        let sb = SuperBlock::read(device)?;
        log_mounted(&sb);
        Ok(FileSystem { device, sb })
    }

    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    /// Verifies the superblock's CRC32C checksum. Not called
    /// automatically by `mount`; a host opts into this explicitly.
    pub fn verify_checksum(&self) -> Result<bool> {
        self.sb.verify_checksum(self.device)
    }

    /// Fetches the inode named by `nid`, decoding and dispatching it
    /// by file type.
    pub fn iget(&self, nid: u64) -> Result<Inode> {
        let page_size = 1usize << self.device.page_shift();
        Inode::read(self.device, &self.sb, nid, page_size)
    }

    /// Fetches the root directory's inode.
    pub fn root(&self) -> Result<Inode> {
        let root = self.iget(self.sb.root_nid())?;
        if !root.is_dir() {
            return Err(Error::BadSuperblock);
        }
        Ok(root)
    }

    /// Walks `dir`'s entries starting at cursor `pos`, invoking
    /// `emit(name, nid, file_type)` for each. `emit` returns `true` to
    /// continue, `false` to stop early. Returns the cursor to resume
    /// from.
    pub fn readdir<F>(&self, dir: &Inode, pos: u64, emit: F) -> Result<u64>
    where
        F: FnMut(&[u8], u64, FileType) -> bool,
    {
        if !dir.is_dir() {
            return Err(Error::BadMode);
        }
        dir::readdir(self.device, &self.sb, dir, pos, emit)
    }

    /// Looks up `name` within `dir`, returning the child's nid and
    /// file type, or [`Error::NotFound`].
    pub fn lookup(&self, dir: &Inode, name: &[u8]) -> Result<(u64, FileType)> {
        if !dir.is_dir() {
            return Err(Error::BadMode);
        }
        dir::lookup(self.device, &self.sb, dir, name)
    }

    /// Reads up to `dst.len()` bytes of `file`'s data starting at
    /// `pos`, dispatching to the compressed or uncompressed reader per
    /// the filesystem's `COMPRESSED` flag. Returns the number of bytes
    /// copied, which is less than `dst.len()` only at end of file.
    pub fn read_range(&self, file: &Inode, pos: u64, dst: &mut [u8]) -> Result<usize> {
        match file.kind() {
            Kind::File { compressed: true, .. } => {
                zdata::read_range(self.device, &self.sb, file, pos, dst)
            }
            Kind::File { compressed: false, .. } => {
                data::read_range(self.device, &self.sb, file, pos, dst)
            }
            _ => Err(Error::BadMode),
        }
    }

    /// Resolves a symlink's target.
    pub fn readlink(&self, link: &Inode) -> Result<Vec<u8>> {
        symlink::readlink(self.device, &self.sb, link)
    }
}

#[cfg(feature = "log")]
fn log_mounted(sb: &SuperBlock) {
    log::info!(
        "mounted codexfs: root nid {}, {} inodes, blksize {}",
        sb.root_nid(),
        sb.inos(),
        sb.blksize()
    );
}

#[cfg(not(feature = "log"))]
fn log_mounted(_sb: &SuperBlock) {}
