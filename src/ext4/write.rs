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

//! In-place mutations: content overwrite, `unlink`, `rm` and `mv`.
//!
//! None of these operations allocates blocks or extents, and none of them
//! repairs metadata checksums. A removed inode keeps its content blocks
//! marked used in the block bitmap; releasing them would require rewriting
//! the bitmap and descriptor checksums.

use crate::bitmap::set_bit;
use crate::dirent::DIRENT_HEADER_SIZE;
use crate::dirent::Dirent;
use crate::dirent::iter_dir;
use crate::dirent::read_dir;
use crate::dirent::resolve_path;
use crate::error::Ext4Error;
use crate::error::Result;
use crate::extent::traverse_extent_tree;
use crate::fs::Image;
use crate::inode::FileType;
use crate::inode::get_inode;
use crate::inode::locate_inode;
use crate::inode::parse_inode_mode;
use crate::structs::DirEntry2;
use crate::util::as_bytes;
use std::path::Path;

/// Overwrites the file `inode_no` with `data`, starting at byte `offset` of
/// its content.
///
/// The write is split across the file's blocks, following the extent stream
/// in reading order. The target range must already be allocated: this
/// function never grows a file, and fails with
/// [`Ext4Error::NotEnoughSpace`] when the range extends past the last
/// allocated block.
pub fn update_file(img: &mut Image, inode_no: u32, offset: u64, data: &[u8]) -> Result<()> {
    img.require_writable()?;
    if data.is_empty() {
        return Ok(());
    }
    let inode = get_inode(img, inode_no)?;
    let extents = traverse_extent_tree(img, &inode.i_block)?;
    let block_size = img.get_block_size();
    let end = offset + data.len() as u64;
    // Logical byte position of the current block
    let mut pos = 0;
    let mut written = 0;
    'leaves: for leaf in &extents {
        let start_block = leaf.get_start();
        for i in 0..leaf.ee_len as u64 {
            let block_start = pos;
            let block_end = pos + block_size;
            pos = block_end;
            if block_end <= offset {
                continue;
            }
            if block_start >= end {
                break 'leaves;
            }
            let from = offset.max(block_start);
            let to = end.min(block_end);
            let phys = (start_block + i) * block_size + (from - block_start);
            let chunk = &data[(from - offset) as usize..(to - offset) as usize];
            img.write_at(phys, chunk)?;
            written += chunk.len();
        }
    }
    if written < data.len() {
        return Err(Ext4Error::NotEnoughSpace);
    }
    Ok(())
}

/// Removes the entry for `path` from its parent directory.
///
/// Only the name is removed: the inode and its bitmap bits are left
/// untouched. When the entry has a predecessor in its directory block, the
/// predecessor's `rec_len` is extended over the removed record; otherwise the
/// record is tombstoned in place by zeroing its inode field.
pub fn unlink(img: &mut Image, path: &Path) -> Result<()> {
    img.require_writable()?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Ext4Error::InvalidPath("cannot unlink the root directory".into()))?;
    let parent = path.parent().unwrap_or(Path::new("/"));
    let dir_inode = resolve_path(img, parent)?;

    let block_size = img.get_block_size();
    let mut prev: Option<Dirent> = None;
    let mut target: Option<Dirent> = None;
    for ent in iter_dir(img, dir_inode)? {
        let ent = ent?;
        if ent.name == name {
            target = Some(ent);
            break;
        }
        prev = Some(ent);
    }
    let Some(target) = target else {
        return Err(Ext4Error::NotFound {
            dir: parent.display().to_string(),
            name: name.to_owned(),
        });
    };

    // Records never cross block boundaries, so splicing requires the
    // predecessor to live in the same block as the victim
    let same_block =
        |prev: &Dirent| prev.offset / block_size == target.offset / block_size;
    let (offset, data) = match prev {
        Some(prev) if same_block(&prev) => {
            // Extend the predecessor's record over the removed one. The
            // distance also covers deleted slots sitting between the two.
            let overall =
                (target.offset - prev.offset) as u16 + target.header.rec_len;
            let mut header = prev.header;
            header.rec_len = overall;
            let mut data = as_bytes(&header).to_vec();
            data.extend_from_slice(prev.name.as_bytes());
            data.resize(overall as usize, 0);
            (prev.offset, data)
        }
        _ => {
            // First entry of its block: tombstone in place
            let mut header = target.header;
            header.inode = 0;
            let mut data = as_bytes(&header).to_vec();
            data.resize(target.header.rec_len as usize, 0);
            (target.offset, data)
        }
    };
    update_file(img, dir_inode, offset, &data)
}

/// Clears the inode's bit in its group's inode bitmap.
///
/// The operation is idempotent. The inode's content blocks stay marked used
/// in the block bitmap, and the bitmap's stored checksum is not recomputed.
// TODO recompute the inode bitmap and descriptor checksums after freeing
pub fn free_inode(img: &mut Image, inode_no: u32) -> Result<()> {
    img.require_writable()?;
    let (bg_num, idx) = locate_inode(&img.sb, inode_no)?;
    let bg = *img.get_bg_descriptor(bg_num)?;
    let bitmap_off = bg.get_inode_bitmap() * img.get_block_size();
    set_bit(img, bitmap_off, idx as usize, false)
}

/// Removes the file at `path`, recursing into directories.
///
/// The inode's bit is freed in the inode bitmap and the name is removed from
/// the parent directory.
pub fn rm(img: &mut Image, path: &Path) -> Result<()> {
    img.require_writable()?;
    let inode_no = resolve_path(img, path)?;
    free_inode(img, inode_no)?;
    let inode = get_inode(img, inode_no)?;
    let (_, file_type) = parse_inode_mode(inode.i_mode)?;
    if file_type == FileType::Directory {
        let entries = read_dir(img, inode_no)?;
        for ent in entries {
            if ent.name == "." || ent.name == ".." {
                continue;
            }
            rm(img, &path.join(&ent.name))?;
        }
    }
    // Idempotent: the inode may already be free
    free_inode(img, inode_no)?;
    unlink(img, path)
}

/// Moves the file at `source` to `dest`.
///
/// When `dest` is an existing directory, the file keeps its name and moves
/// into it. When `dest` is an existing regular file, it is removed first.
/// Otherwise `dest`'s parent must exist and the file is renamed to `dest`'s
/// last component. The entry is spliced into slack space of the destination
/// directory; no block is ever allocated, so a directory without enough
/// slack fails with [`Ext4Error::NotEnoughSpace`].
pub fn mv(img: &mut Image, source: &Path, dest: &Path) -> Result<()> {
    img.require_writable()?;
    let source_inode_no = resolve_path(img, source)?;
    let source_inode = get_inode(img, source_inode_no)?;
    let (_, source_type) = parse_inode_mode(source_inode.i_mode)?;

    let (dest_dir_inode, dest_name) = match resolve_path(img, dest) {
        Ok(dest_inode_no) => {
            let dest_inode = get_inode(img, dest_inode_no)?;
            let (_, dest_type) = parse_inode_mode(dest_inode.i_mode)?;
            match dest_type {
                FileType::Directory => (dest_inode_no, file_name(source)?),
                FileType::Regular => {
                    rm(img, dest)?;
                    let parent = dest.parent().unwrap_or(Path::new("/"));
                    (resolve_path(img, parent)?, file_name(dest)?)
                }
                other => {
                    return Err(Ext4Error::InvalidPath(format!(
                        "cannot move over a {other}"
                    )));
                }
            }
        }
        Err(Ext4Error::NotFound { .. }) => {
            let parent = dest.parent().unwrap_or(Path::new("/"));
            (resolve_path(img, parent)?, file_name(dest)?)
        }
        Err(e) => return Err(e),
    };

    let name_raw = dest_name.as_bytes();
    if name_raw.len() > 255 {
        return Err(Ext4Error::NameTooLong(name_raw.len()));
    }

    unlink(img, source)?;

    let header = DirEntry2 {
        inode: source_inode_no,
        rec_len: (DIRENT_HEADER_SIZE + name_raw.len()) as u16,
        name_len: name_raw.len() as u8,
        file_type: source_type.to_dir_entry_code(),
    };
    let mut entry = as_bytes(&header).to_vec();
    entry.extend_from_slice(name_raw);
    if !try_insert_into_space(img, &entry, dest_dir_inode)? {
        return Err(Ext4Error::NotEnoughSpace);
    }
    Ok(())
}

/// Returns the last component of `path`.
fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_owned)
        .ok_or_else(|| Ext4Error::InvalidPath(path.display().to_string()))
}

/// Splices the raw entry into the directory by shrinking the first existing
/// record whose trailing slack can hold it.
///
/// Returns `false` when no record has enough slack.
fn try_insert_into_space(img: &mut Image, entry: &[u8], dir_inode: u32) -> Result<bool> {
    for ent in read_dir(img, dir_inode)? {
        let rec_len = ent.header.rec_len as usize;
        let used = DIRENT_HEADER_SIZE + ent.header.name_len as usize;
        let slack = rec_len - used;
        if slack > entry.len() {
            // Shrink the host record to its minimal size and hand its slack
            // to the new entry
            let mut host = ent.header;
            host.rec_len = used as u16;
            let mut data = as_bytes(&host).to_vec();
            data.extend_from_slice(ent.name.as_bytes());
            let mut new_entry = entry.to_vec();
            new_entry[4..6].copy_from_slice(&(slack as u16).to_le_bytes());
            data.extend_from_slice(&new_entry);
            update_file(img, dir_inode, ent.offset, &data)?;
            return Ok(true);
        }
    }
    Ok(false)
}
