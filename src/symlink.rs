// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The symlink handler: resolves a link target, preferring the
//! inode's cached fast-symlink bytes when present.

use crate::inode::{Inode, Kind};
use crate::io::{Device, MetaBuf};
use crate::result::{Error, Result};
use crate::super_block::SuperBlock;
use alloc::vec::Vec;

/// Returns the link target named by `inode`. When the target was
/// small enough to be cached at inode-read time, this is free;
/// otherwise it is read fresh from the inode's meta region.
pub fn readlink(device: Device<'_>, sb: &SuperBlock, inode: &Inode) -> Result<Vec<u8>> {
    match inode.kind() {
        Kind::Symlink { fast_target: Some(target) } => Ok(target.clone()),
        Kind::Symlink { fast_target: None } => {
            let addr = sb.nid_to_inode_meta_addr(inode.nid());
            let mut meta = MetaBuf::new(device);
            meta.read_data(addr, inode.size() as usize)
        }
        _ => Err(Error::BadMode),
    }
}
