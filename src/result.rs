// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use core::fmt;

/// The error taxonomy surfaced by the core read path.
///
/// Every fallible operation in this crate returns one of these kinds,
/// unchanged, to its caller; the core never retries and never masks
/// an error from one layer while propagating it to the next.
#[derive(Clone, Copy, Eq, Ord, PartialEq, PartialOrd)]
pub enum Error {
    /// The underlying page/block read failed.
    Io,
    /// The superblock's magic number didn't match, or a shift width
    /// was out of range.
    BadSuperblock,
    /// An on-disk invariant was violated: bad name length, nameoff out
    /// of range, non-ascending extents, malformed LZMA framing, and so
    /// on.
    Corrupt,
    /// The inode's mode encodes a type this implementation does not
    /// dispatch.
    BadMode,
    /// `lookup` found no dirent with the requested name.
    NotFound,
    /// A caller-provided name exceeded [`crate::layout::NAME_LEN_MAX`].
    NameTooLong,
    /// An allocation failed while building a scratch buffer.
    OutOfMemory,
}

impl Error {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Io => "I/O error reading backing device",
            Self::BadSuperblock => {
                "bad superblock (magic mismatch or invalid shift width)"
            }
            Self::Corrupt => "on-disk invariant violated",
            Self::BadMode => "unrecognized inode mode",
            Self::NotFound => "no such file or directory",
            Self::NameTooLong => "name exceeds maximum length",
            Self::OutOfMemory => "allocation failure",
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

pub type Result<T> = core::result::Result<T, Error>;
