/*
 * Copyright 2025 Luc Lenôtre
 *
 * This file is part of Maestro.
 *
 * Maestro is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * Maestro is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * Maestro. If not, see <https://www.gnu.org/licenses/>.
 */

//! Errors returned by the image operations.
//!
//! Consistency findings of `fsck` are deliberately NOT part of this enum:
//! they are plain data emitted in a stream (see [`crate::fsck::Finding`]).

use std::io;
use thiserror::Error;

/// An error occurring while operating on an ext4 image.
#[derive(Debug, Error)]
pub enum Ext4Error {
    /// Reading or writing the backing file failed.
    #[error("{0}")]
    Io(#[from] io::Error),
    /// The image requires a feature the implementation does not support.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),
    /// A path component could not be found.
    #[error("directory `{dir}` has no entry `{name}`")]
    NotFound {
        /// The directory that was searched.
        dir: String,
        /// The missing entry.
        name: String,
    },
    /// A directory operation was attempted on a non-directory inode.
    #[error("inode {0} is not a directory")]
    NotADirectory(u32),
    /// The inode number does not denote an existing inode.
    #[error("invalid inode number {0}")]
    InvalidInode(u32),
    /// The file type nibble of an inode's mode is not a known value.
    #[error("invalid file type in mode {0:#06x}")]
    InvalidMode(u16),
    /// The given path cannot be used for the requested operation.
    #[error("invalid path: {0}")]
    InvalidPath(String),
    /// A directory entry name exceeds the on-disk limit of 255 bytes.
    #[error("name too long ({0} bytes, max: 255)")]
    NameTooLong(usize),
    /// No directory slot with enough slack to splice a new entry into.
    #[error("not enough space in directory")]
    NotEnoughSpace,
    /// A mutation was attempted on an image opened read-only.
    #[error("image is opened read-only")]
    ReadOnly,
}

/// Result alias for image operations.
pub type Result<T> = std::result::Result<T, Ext4Error>;
