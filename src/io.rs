// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The host-provided backing device mapping, and the one-slot
//! metadata buffer cache (`MetaBuf`) built on top of it.
//!
//! The core asks its host for exactly one thing: a byte-addressable,
//! page-granular, read-only mapping of the backing device. A real
//! mount backs this with a page cache over a block device; tests and
//! tools back it directly with an in-memory image.

use crate::result::{Error, Result};
use alloc::vec::Vec;
use core::cmp;

/// Default host page shift (4 KiB), used when a caller doesn't care
/// to pick one. The page granularity only bounds how `MetaBuf`
/// batches reads; it is independent of the filesystem's own block
/// size (`blksz_bits`), which may be smaller.
pub const DEFAULT_PAGE_SHIFT: u32 = 12;

/// A byte-addressable, page-granular, read-only mapping of the
/// backing block device image.
#[derive(Clone, Copy)]
pub struct Device<'a> {
    data: &'a [u8],
    page_shift: u32,
}

impl<'a> Device<'a> {
    /// Wraps `data` as a device using the default 4 KiB page
    /// granularity.
    pub fn new(data: &'a [u8]) -> Device<'a> {
        Device::with_page_shift(data, DEFAULT_PAGE_SHIFT)
    }

    /// Wraps `data` as a device using the given page granularity.
    pub fn with_page_shift(data: &'a [u8], page_shift: u32) -> Device<'a> {
        Device { data, page_shift }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    fn page_size(&self) -> usize {
        1usize << self.page_shift
    }

    /// Returns the page containing `offset`, the host equivalent of
    /// `read_mapping_folio`. The last page of a device whose length
    /// isn't a page multiple is short.
    fn read_page(&self, index: usize) -> Result<&'a [u8]> {
        let page_size = self.page_size();
        let start = index.checked_mul(page_size).ok_or(Error::Io)?;
        if start >= self.data.len() {
            return Err(Error::Io);
        }
        let end = cmp::min(start + page_size, self.data.len());
        Ok(&self.data[start..end])
    }
}

/// Whether `MetaBuf::read` should return a pointer into the mapped
/// page, or merely ensure the page is resident without exposing it.
/// Mirrors the kernel's `CODEXFS_KMAP` / `CODEXFS_NO_KMAP`
/// distinction; every caller in this crate uses `Kmap`.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum KmapType {
    NoKmap,
    Kmap,
}

/// A one-slot page cache over a [`Device`].
///
/// Holds, at most, one mapped page of the backing device. A read
/// within that page is served without remapping; a read outside it
/// releases the held page and fetches the one covering the new
/// offset. Read-heavy metadata access — successive dirents in one
/// block, successive extents in one table — exhibits strong
/// locality, so this eliminates per-field remap cost without any
/// cache-coherency concerns.
///
/// `MetaBuf` is stack-scoped: never shared across operations, never
/// held past the call that created it. `Drop` guarantees the held
/// page is released on every exit path, including an early `?`
/// return — the common bug this abstraction exists to rule out.
pub struct MetaBuf<'a> {
    device: Device<'a>,
    page: Option<(usize, &'a [u8])>,
}

impl<'a> MetaBuf<'a> {
    pub fn new(device: Device<'a>) -> MetaBuf<'a> {
        MetaBuf { device, page: None }
    }

    /// Returns a slice starting at `offset` and running to the end of
    /// its containing page, fetching a new page only if the one
    /// currently held doesn't cover `offset`.
    pub fn read(&mut self, offset: u64, kmap: KmapType) -> Result<&[u8]> {
        let page_shift = self.device.page_shift();
        let index = (offset >> page_shift) as usize;
        if self.page.map(|(i, _)| i) != Some(index) {
            self.release();
            let page = self.device.read_page(index)?;
            self.page = Some((index, page));
        }
        if kmap == KmapType::NoKmap {
            return Ok(&[]);
        }
        let (_, page) = self.page.expect("page just populated above");
        let page_mask = (1u64 << page_shift) - 1;
        let in_page = (offset & page_mask) as usize;
        if in_page >= page.len() {
            return Err(Error::Io);
        }
        Ok(&page[in_page..])
    }

    /// Drops the held page and reference. Idempotent.
    pub fn release(&mut self) {
        self.page = None;
    }

    /// Copies `len` bytes starting at `addr` into a freshly allocated
    /// buffer, reading block by block through this `MetaBuf`. Used
    /// for whole-object reads: a full extent table, a small
    /// directory.
    pub fn read_data(&mut self, addr: u64, len: usize) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        out.try_reserve_exact(len).map_err(|_| Error::OutOfMemory)?;
        out.resize(len, 0);
        self.read_into(addr, &mut out)?;
        Ok(out)
    }

    /// Fills `dst` with bytes starting at `addr`, reading block by
    /// block through this `MetaBuf`.
    pub fn read_into(&mut self, addr: u64, dst: &mut [u8]) -> Result<()> {
        let mut pos = addr;
        let mut filled = 0;
        while filled < dst.len() {
            let page = self.read(pos, KmapType::Kmap)?;
            let n = cmp::min(page.len(), dst.len() - filled);
            if n == 0 {
                return Err(Error::Io);
            }
            dst[filled..filled + n].copy_from_slice(&page[..n]);
            filled += n;
            pos += n as u64;
        }
        Ok(())
    }
}

impl Drop for MetaBuf<'_> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn read_within_one_page_needs_no_remap() {
        let data = image(8192);
        let device = Device::with_page_shift(&data, 12);
        let mut mb = MetaBuf::new(device);
        let a = mb.read(10, KmapType::Kmap).unwrap().as_ptr();
        let b = mb.read(20, KmapType::Kmap).unwrap().as_ptr();
        assert_eq!(a, b, "same page should not be remapped");
    }

    #[test]
    fn read_crossing_page_remaps() {
        let data = image(8192);
        let device = Device::with_page_shift(&data, 12);
        let mut mb = MetaBuf::new(device);
        let _ = mb.read(10, KmapType::Kmap).unwrap();
        let page = mb.read(4096 + 10, KmapType::Kmap).unwrap();
        assert_eq!(page[0], data[4096 + 10]);
    }

    #[test]
    fn read_data_spans_pages() {
        let data = image(8192);
        let device = Device::with_page_shift(&data, 12);
        let mut mb = MetaBuf::new(device);
        let got = mb.read_data(4000, 200).unwrap();
        assert_eq!(got, &data[4000..4200]);
    }

    #[test]
    fn release_is_idempotent() {
        let data = image(4096);
        let device = Device::with_page_shift(&data, 12);
        let mut mb = MetaBuf::new(device);
        mb.release();
        mb.release();
        let _ = mb.read(0, KmapType::Kmap).unwrap();
        mb.release();
        mb.release();
    }

    #[test]
    fn out_of_range_is_io_error() {
        let data = image(4096);
        let device = Device::with_page_shift(&data, 12);
        let mut mb = MetaBuf::new(device);
        assert_eq!(mb.read(8192, KmapType::Kmap), Err(Error::Io));
    }
}
