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

//! Directory iteration and path resolution.
//!
//! A directory's content is a sequence of `ext4_dir_entry_2` records tiling
//! its logical file. `rec_len` may include trailing slack, used for alignment
//! and reused when new entries are spliced in.

use crate::error::Ext4Error;
use crate::error::Result;
use crate::file::read_file;
use crate::fs::Image;
use crate::inode::FileType;
use crate::inode::ROOT_INODE;
use crate::inode::get_inode;
use crate::inode::parse_inode_mode;
use crate::structs::DirEntry2;
use crate::util::parse_record;
use std::mem::size_of;
use std::path::Component;
use std::path::Path;

/// Size of the fixed part of a directory entry.
pub const DIRENT_HEADER_SIZE: usize = size_of::<DirEntry2>();

/// A parsed directory entry.
#[derive(Clone, Debug)]
pub struct Dirent {
    /// Byte offset of the record inside the directory's content.
    pub offset: u64,
    /// The fixed on-disk header.
    pub header: DirEntry2,
    /// The entry's name.
    pub name: String,
}

impl Dirent {
    /// Tells whether the entry points to a directory.
    pub fn is_directory(&self) -> bool {
        self.header.file_type == FileType::Directory.to_dir_entry_code()
    }
}

/// An iterator over the entries of a directory.
///
/// Deleted slots (`inode == 0`) are skipped, but their `rec_len` still
/// advances the offset so every yielded entry carries its true position in
/// the directory's logical file.
pub struct DirIter {
    /// The directory's content.
    data: Vec<u8>,
    /// Offset of the next record.
    offset: usize,
}

impl Iterator for DirIter {
    type Item = Result<Dirent>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + DIRENT_HEADER_SIZE <= self.data.len() {
            let offset = self.offset;
            let header: DirEntry2 =
                parse_record(&self.data[offset..offset + DIRENT_HEADER_SIZE]);
            let rec_len = header.rec_len as usize;
            let name_end = offset + DIRENT_HEADER_SIZE + header.name_len as usize;
            if rec_len < DIRENT_HEADER_SIZE || offset + rec_len > self.data.len() || name_end > offset + rec_len {
                // A malformed record would make the walk diverge
                self.offset = self.data.len();
                return Some(Err(Ext4Error::UnsupportedFeature(format!(
                    "malformed directory entry at offset {offset}"
                ))));
            }
            self.offset += rec_len;
            if header.inode == 0 {
                // Deleted slot
                continue;
            }
            let name =
                String::from_utf8_lossy(&self.data[offset + DIRENT_HEADER_SIZE..name_end])
                    .into_owned();
            return Some(Ok(Dirent {
                offset: offset as u64,
                header,
                name,
            }));
        }
        None
    }
}

/// Returns an iterator over the entries of the directory `inode_no`.
///
/// Fails with [`Ext4Error::NotADirectory`] when the inode is not a directory.
pub fn iter_dir(img: &mut Image, inode_no: u32) -> Result<DirIter> {
    let inode = get_inode(img, inode_no)?;
    let (_, file_type) = parse_inode_mode(inode.i_mode)?;
    if file_type != FileType::Directory {
        return Err(Ext4Error::NotADirectory(inode_no));
    }
    let data = read_file(img, inode_no)?;
    Ok(DirIter { data, offset: 0 })
}

/// Reads all entries of the directory `inode_no`.
pub fn read_dir(img: &mut Image, inode_no: u32) -> Result<Vec<Dirent>> {
    iter_dir(img, inode_no)?.collect()
}

/// Resolves a POSIX path to an inode number.
///
/// Both absolute and relative paths resolve from the root directory. `..`
/// components are looked up like any other name, using the directories' own
/// `..` entries.
pub fn resolve_path(img: &mut Image, path: &Path) -> Result<u32> {
    let mut cur = ROOT_INODE;
    let mut cur_name = String::from("/");
    for comp in path.components() {
        let part = match comp {
            Component::RootDir | Component::CurDir => continue,
            Component::ParentDir => "..".into(),
            Component::Normal(name) => name.to_string_lossy(),
            Component::Prefix(_) => {
                return Err(Ext4Error::InvalidPath(path.display().to_string()));
            }
        };
        let mut next = None;
        for ent in iter_dir(img, cur)? {
            let ent = ent?;
            if ent.name == part.as_ref() {
                next = Some(ent.header.inode);
                break;
            }
        }
        match next {
            Some(inode) => {
                cur = inode;
                cur_name = part.into_owned();
            }
            None => {
                return Err(Ext4Error::NotFound {
                    dir: cur_name,
                    name: part.into_owned(),
                });
            }
        }
    }
    Ok(cur)
}
