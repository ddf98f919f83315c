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

//! Inode location, retrieval and checksum verification.

use crate::crc32::crc32c;
use crate::error::Ext4Error;
use crate::error::Result;
use crate::fs::Image;
use crate::structs::INODE_CHECKSUM_HI_OFFSET;
use crate::structs::INODE_CHECKSUM_LO_OFFSET;
use crate::structs::Inode;
use crate::structs::InodeExtra;
use crate::structs::Superblock;
use crate::util::merge_csum;
use crate::util::parse_record;
use crate::util::zero_range;
use std::fmt;
use std::mem::size_of;

/// The inode of the root directory.
pub const ROOT_INODE: u32 = 2;

/// A file type, stored in the high nibble of an inode's mode.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileType {
    /// Named pipe.
    Fifo = 0x1,
    /// Character device.
    CharacterDevice = 0x2,
    /// Directory.
    Directory = 0x4,
    /// Block device.
    BlockDevice = 0x6,
    /// Regular file.
    Regular = 0x8,
    /// Symbolic link.
    SymbolicLink = 0xa,
    /// Unix socket.
    Socket = 0xc,
}

impl FileType {
    /// Returns the 3-bit code used for this type in directory entries.
    pub fn to_dir_entry_code(self) -> u8 {
        match self {
            Self::Regular => 0x1,
            Self::Directory => 0x2,
            Self::CharacterDevice => 0x3,
            Self::BlockDevice => 0x4,
            Self::Fifo => 0x5,
            Self::Socket => 0x6,
            Self::SymbolicLink => 0x7,
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fifo => "fifo",
            Self::CharacterDevice => "character device",
            Self::Directory => "directory",
            Self::BlockDevice => "block device",
            Self::Regular => "regular",
            Self::SymbolicLink => "symbolic link",
            Self::Socket => "socket",
        };
        write!(fmt, "{s}")
    }
}

/// Splits an inode's mode into its permission bits and its file type.
pub fn parse_inode_mode(mode: u16) -> Result<(u16, FileType)> {
    let file_type = match mode >> 12 {
        0x1 => FileType::Fifo,
        0x2 => FileType::CharacterDevice,
        0x4 => FileType::Directory,
        0x6 => FileType::BlockDevice,
        0x8 => FileType::Regular,
        0xa => FileType::SymbolicLink,
        0xc => FileType::Socket,
        _ => return Err(Ext4Error::InvalidMode(mode)),
    };
    Ok((mode & 0xfff, file_type))
}

/// Returns the block group and the index in the group's inode table of the
/// given inode.
pub fn locate_inode(sb: &Superblock, inode_no: u32) -> Result<(u32, u32)> {
    // Inode numbering starts at 1
    if inode_no == 0 {
        return Err(Ext4Error::InvalidInode(0));
    }
    let inodes_per_group = sb.s_inodes_per_group;
    let bg_num = (inode_no - 1) / inodes_per_group;
    let idx = (inode_no - 1) % inodes_per_group;
    Ok((bg_num, idx))
}

/// Returns the byte offset of the given inode's record in the image.
pub fn get_inode_offset(img: &Image, inode_no: u32) -> Result<u64> {
    let (bg_num, idx) = locate_inode(&img.sb, inode_no)?;
    if bg_num as usize >= img.bg_descriptors.len() {
        return Err(Ext4Error::InvalidInode(inode_no));
    }
    let bg = &img.bg_descriptors[bg_num as usize];
    let table_off = bg.get_inode_table() * img.get_block_size();
    Ok(table_off + idx as u64 * img.sb.s_inode_size as u64)
}

/// An inode record read from the inode table.
///
/// The raw bytes are kept because the checksum covers the whole record,
/// including areas the parsed structures do not name.
pub struct InodeRecord {
    /// The inode number.
    pub inode_no: u32,
    /// The parsed base record.
    pub inode: Inode,
    /// The parsed extra record, present when `s_inode_size > 128`.
    pub extra: Option<InodeExtra>,
    /// The raw bytes of the whole record (`s_inode_size` bytes).
    pub raw: Vec<u8>,
}

impl InodeRecord {
    /// Parses an inode record out of `raw`, which holds the full
    /// `s_inode_size` bytes of the table entry.
    pub fn parse(inode_no: u32, raw: Vec<u8>) -> Self {
        let inode: Inode = parse_record(&raw[..size_of::<Inode>()]);
        let extra = (raw.len() >= 0xa0)
            .then(|| parse_record::<InodeExtra>(&raw[size_of::<Inode>()..0xa0]));
        Self {
            inode_no,
            inode,
            extra,
            raw,
        }
    }

    /// Tells whether the record carries the wide (32-bit) checksum.
    pub fn has_wide_checksum(&self) -> bool {
        self.extra.map(|extra| extra.i_extra_isize != 0).unwrap_or(false)
    }

    /// Returns the checksum stored in the record.
    pub fn get_stored_checksum(&self) -> u32 {
        let lo = self.inode.i_checksum_lo;
        match self.extra {
            Some(extra) if self.has_wide_checksum() => merge_csum(extra.i_checksum_hi, lo),
            _ => lo as u32,
        }
    }

    /// Computes the checksum the record should carry.
    ///
    /// The input is the filesystem UUID, the inode number, the generation and
    /// the raw record with its checksum fields zeroed; the result is
    /// complemented and truncated to the record's checksum width.
    pub fn compute_checksum(&self, uuid: &[u8; 16]) -> u32 {
        let generation = self.inode.i_generation;
        let mut data = Vec::with_capacity(24 + self.raw.len());
        data.extend_from_slice(uuid);
        data.extend_from_slice(&self.inode_no.to_le_bytes());
        data.extend_from_slice(&generation.to_le_bytes());
        let mut zeroed = zero_range(&self.raw, INODE_CHECKSUM_LO_OFFSET, 2);
        if self.has_wide_checksum() {
            zeroed = zero_range(&zeroed, INODE_CHECKSUM_HI_OFFSET, 2);
        }
        data.extend_from_slice(&zeroed);
        let csum = !crc32c(&data);
        if self.has_wide_checksum() {
            csum
        } else {
            csum & 0xffff
        }
    }
}

/// Reads the full record of the given inode.
pub fn get_inode_record(img: &mut Image, inode_no: u32) -> Result<InodeRecord> {
    let off = get_inode_offset(img, inode_no)?;
    let mut raw = vec![0; img.sb.s_inode_size as usize];
    img.read_at(off, &mut raw)?;
    Ok(InodeRecord::parse(inode_no, raw))
}

/// Reads the base record of the given inode.
pub fn get_inode(img: &mut Image, inode_no: u32) -> Result<Inode> {
    Ok(get_inode_record(img, inode_no)?.inode)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn inode_mode_valid() {
        let (perms, file_type) = parse_inode_mode(0x81ff).unwrap();
        assert_eq!(perms, 0o777);
        assert_eq!(file_type, FileType::Regular);

        let (perms, file_type) = parse_inode_mode(0xa1ed).unwrap();
        assert_eq!(perms, 0o755);
        assert_eq!(file_type, FileType::SymbolicLink);

        let (perms, file_type) = parse_inode_mode(0x41c0).unwrap();
        assert_eq!(perms, 0o700);
        assert_eq!(file_type, FileType::Directory);
    }

    #[test]
    fn inode_mode_invalid() {
        assert!(matches!(
            parse_inode_mode(0x91ff),
            Err(Ext4Error::InvalidMode(0x91ff))
        ));
    }

    #[test]
    fn dir_entry_codes() {
        assert_eq!(FileType::Regular.to_dir_entry_code(), 1);
        assert_eq!(FileType::Directory.to_dir_entry_code(), 2);
        assert_eq!(FileType::SymbolicLink.to_dir_entry_code(), 7);
    }

    #[test]
    fn checksum_width() {
        // 16-bit checksum when the extra area is unused
        let mut raw = vec![0u8; 256];
        raw[INODE_CHECKSUM_LO_OFFSET] = 0xcd;
        raw[INODE_CHECKSUM_LO_OFFSET + 1] = 0xab;
        let record = InodeRecord::parse(7, raw);
        assert!(!record.has_wide_checksum());
        assert_eq!(record.get_stored_checksum(), 0xabcd);
        assert_eq!(record.compute_checksum(&[0; 16]) >> 16, 0);

        // 32-bit checksum when `i_extra_isize` is set
        let mut raw = vec![0u8; 256];
        raw[0x80] = 32;
        raw[INODE_CHECKSUM_LO_OFFSET] = 0xcd;
        raw[INODE_CHECKSUM_LO_OFFSET + 1] = 0xab;
        raw[INODE_CHECKSUM_HI_OFFSET] = 0x34;
        raw[INODE_CHECKSUM_HI_OFFSET + 1] = 0x12;
        let record = InodeRecord::parse(7, raw);
        assert!(record.has_wide_checksum());
        assert_eq!(record.get_stored_checksum(), 0x1234_abcd);
    }

    #[test]
    fn checksum_detects_mutation() {
        let mut raw = vec![0u8; 256];
        raw[0x80] = 32;
        let record = InodeRecord::parse(12, raw.clone());
        let uuid = [0x42; 16];
        let csum = record.compute_checksum(&uuid);

        // A single flipped byte in the base record changes the checksum;
        // restoring it restores the checksum.
        raw[0x04] ^= 0xff;
        let mutated = InodeRecord::parse(12, raw.clone());
        assert_ne!(mutated.compute_checksum(&uuid), csum);
        raw[0x04] ^= 0xff;
        let restored = InodeRecord::parse(12, raw);
        assert_eq!(restored.compute_checksum(&uuid), csum);
    }
}
