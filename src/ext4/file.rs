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

//! File content streaming.

use crate::error::Result;
use crate::extent::traverse_extent_tree;
use crate::fs::Image;
use crate::inode::FileType;
use crate::inode::get_inode;
use crate::inode::parse_inode_mode;
use crate::structs::Extent;
use std::vec;

/// Value of `i_flags` marking a symlink whose target is stored inline in
/// `i_block`.
pub const SYMLINK_INLINE_FLAGS: u32 = 0x10000000;

/// A lazy stream over the content of an inode, yielding one chunk per extent
/// leaf.
///
/// The stream stops after `i_size_lo` bytes: the last leaf is truncated to
/// the file's size.
pub struct FileContent<'i> {
    img: &'i mut Image,
    /// Inline content, emitted as a single chunk (inline symlinks).
    inline: Option<Vec<u8>>,
    /// The remaining extent leaves.
    extents: vec::IntoIter<Extent>,
    /// Bytes of the file not yet emitted.
    remaining: u64,
}

impl Iterator for FileContent<'_> {
    type Item = Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(chunk) = self.inline.take() {
            return Some(Ok(chunk));
        }
        while self.remaining > 0 {
            let leaf = self.extents.next()?;
            let block_size = self.img.get_block_size();
            let len = (leaf.ee_len as u64 * block_size).min(self.remaining);
            if len == 0 {
                continue;
            }
            let mut chunk = vec![0; len as usize];
            let res = self.img.read_at(leaf.get_start() * block_size, &mut chunk);
            return match res {
                Ok(()) => {
                    self.remaining -= len;
                    Some(Ok(chunk))
                }
                Err(e) => {
                    self.remaining = 0;
                    Some(Err(e))
                }
            };
        }
        None
    }
}

/// Opens a content stream over the given inode.
pub fn get_file_content(img: &mut Image, inode_no: u32) -> Result<FileContent<'_>> {
    let inode = get_inode(img, inode_no)?;
    let (_, file_type) = parse_inode_mode(inode.i_mode)?;
    let size = inode.i_size_lo as u64;
    if file_type == FileType::SymbolicLink && inode.i_flags == SYMLINK_INLINE_FLAGS {
        // The link's target is the first `i_size_lo` bytes of `i_block`
        let len = size.min(inode.i_block.len() as u64) as usize;
        let target = inode.i_block[..len].to_vec();
        return Ok(FileContent {
            img,
            inline: Some(target),
            extents: Vec::new().into_iter(),
            remaining: 0,
        });
    }
    let extents = traverse_extent_tree(img, &inode.i_block)?;
    Ok(FileContent {
        img,
        inline: None,
        extents: extents.into_iter(),
        remaining: size,
    })
}

/// Reads the whole content of the given inode.
pub fn read_file(img: &mut Image, inode_no: u32) -> Result<Vec<u8>> {
    let mut content = Vec::new();
    for chunk in get_file_content(img, inode_no)? {
        content.extend_from_slice(&chunk?);
    }
    Ok(content)
}
