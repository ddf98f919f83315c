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

//! Toolkit for ext4 filesystem images stored in regular files.
//!
//! The crate parses the static metadata of an image (superblock and block
//! group descriptor table), locates and checks inodes, walks extent trees and
//! directories, streams file contents, performs in-place directory mutations
//! (`unlink`, `rm`, `mv`) and runs consistency passes over the metadata
//! checksums (`fsck`).
//!
//! Only filesystems with the `INCOMPAT_EXTENTS` and `INCOMPAT_FILETYPE`
//! features are supported. Writes are performed in place and are not
//! journaled.

pub mod bitmap;
pub mod crc32;
pub mod dirent;
pub mod error;
pub mod extent;
pub mod file;
pub mod fs;
pub mod fsck;
pub mod inode;
pub mod structs;
pub mod util;
pub mod write;

pub use error::{Ext4Error, Result};
pub use fs::Image;
