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

//! The image session: opens the backing file and parses the static metadata
//! (superblock and block group descriptor table).

use crate::error::Ext4Error;
use crate::error::Result;
use crate::structs::BlockGroupDescriptor;
use crate::structs::Superblock;
use crate::util::parse_record;
use libc::ioctl;
use std::ffi::c_long;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Error;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem::size_of;
use std::os::fd::AsRawFd;
use std::os::unix::fs::FileTypeExt;
use std::path::Path;

/// The offset of the superblock from the beginning of the image.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// The filesystem's signature.
pub const EXT4_SIGNATURE: u16 = 0xef53;

/// `s_feature_incompat`: directory entries carry a file type field.
pub const INCOMPAT_FILETYPE: u32 = 0x2;
/// `s_feature_incompat`: inodes map their content with extent trees.
pub const INCOMPAT_EXTENTS: u32 = 0x40;
/// `s_feature_incompat`: the filesystem uses 64-bit block numbers.
pub const INCOMPAT_64BIT: u32 = 0x80;
/// `s_feature_incompat`: block groups are allocated in flexible groups.
pub const INCOMPAT_FLEX_BG: u32 = 0x200;
/// `s_feature_incompat`: block groups may carry uninitialized bitmaps.
pub const INCOMPAT_UNINIT_BG: u32 = 0x2000;

/// Incompat features that do not change anything for parsing and are accepted
/// silently (`UNINIT_BG` additionally disables descriptor checksum checks).
const INCOMPAT_TOLERATED: u32 =
    INCOMPAT_FILETYPE | INCOMPAT_EXTENTS | INCOMPAT_64BIT | INCOMPAT_FLEX_BG | INCOMPAT_UNINIT_BG;

/// ioctl macro: Command.
macro_rules! ioc {
    ($a:expr, $b:expr, $c:expr, $d:expr) => {
        (($a) << 30) | (($b) << 8) | ($c) | (($d) << 16)
    };
}

/// ioctl macro: Read command.
macro_rules! ior {
    ($a:expr, $b:expr, $c:ty) => {
        ioc!(2, $a, $b, std::mem::size_of::<$c>() as c_long)
    };
}

/// ioctl command: Get size of disk in number of sectors.
const BLKGETSIZE64: c_long = ior!(0x12, 114, u64);

/// Returns the number of 512-byte sectors available on the backing file,
/// which may be a regular file or a block device.
fn get_disk_size(dev: &File) -> io::Result<u64> {
    let metadata = dev.metadata()?;
    let file_type = metadata.file_type();
    if file_type.is_block_device() || file_type.is_char_device() {
        let mut size = 0;
        let ret = unsafe { ioctl(dev.as_raw_fd(), BLKGETSIZE64 as _, &mut size) };
        if ret < 0 {
            return Err(Error::last_os_error());
        }
        Ok(size / 512)
    } else if file_type.is_file() {
        Ok(metadata.len() / 512)
    } else {
        Ok(0)
    }
}

/// An opened filesystem image.
///
/// The session owns the file handle and the parsed static metadata for its
/// whole lifetime. Inodes, extents and directory entries are parsed on demand
/// from the backing file.
pub struct Image {
    /// The backing file.
    file: File,
    /// Tells whether the image accepts mutations.
    write: bool,

    /// The parsed superblock.
    pub sb: Superblock,
    /// The parsed block group descriptor table.
    pub bg_descriptors: Vec<BlockGroupDescriptor>,
}

impl Image {
    /// Opens the image at `path` and parses its static metadata.
    ///
    /// If `write` is `true`, the backing file is opened read-write and
    /// mutations are accepted.
    pub fn open(path: &Path, write: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(write).open(path)?;

        file.seek(SeekFrom::Start(SUPERBLOCK_OFFSET))?;
        let mut sb_raw = [0; size_of::<Superblock>()];
        file.read_exact(&mut sb_raw)?;
        let sb: Superblock = parse_record(&sb_raw);

        validate_superblock(&sb)?;

        // The filesystem must fit in the backing file
        let available = get_disk_size(&file)? * 512;
        let fs_size = sb.get_blocks_count().saturating_mul(sb.get_block_size());
        if available < fs_size {
            return Err(Error::new(
                io::ErrorKind::InvalidData,
                "the filesystem is larger than its backing file",
            )
            .into());
        }

        let mut img = Self {
            file,
            write,
            sb,
            bg_descriptors: Vec::new(),
        };

        // With 1024-byte blocks, block 1 holds the superblock and the
        // descriptor table starts at block 2. With larger blocks it starts at
        // block 1.
        let block_size = img.sb.get_block_size();
        let bgdt_off = if block_size == 1024 {
            2 * SUPERBLOCK_OFFSET
        } else {
            block_size
        };
        let desc_size = img.sb.s_desc_size as u64;
        let groups_count = img.sb.get_groups_count();
        let mut descriptors = Vec::with_capacity(groups_count as usize);
        let mut desc_raw = [0; size_of::<BlockGroupDescriptor>()];
        for i in 0..groups_count {
            img.read_at(bgdt_off + i * desc_size, &mut desc_raw)?;
            descriptors.push(parse_record::<BlockGroupDescriptor>(&desc_raw));
        }
        img.bg_descriptors = descriptors;

        Ok(img)
    }

    /// Returns the size of a block in bytes.
    pub fn get_block_size(&self) -> u64 {
        self.sb.get_block_size()
    }

    /// Fails with [`Ext4Error::ReadOnly`] unless the image was opened
    /// read-write.
    pub fn require_writable(&self) -> Result<()> {
        if self.write {
            Ok(())
        } else {
            Err(Ext4Error::ReadOnly)
        }
    }

    /// Reads exactly `buf.len()` bytes at the absolute offset `off`.
    pub fn read_at(&mut self, off: u64, buf: &mut [u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(off))?;
        self.file.read_exact(buf)?;
        Ok(())
    }

    /// Writes `data` at the absolute offset `off`.
    ///
    /// Fails with [`Ext4Error::ReadOnly`] on a read-only session.
    pub fn write_at(&mut self, off: u64, data: &[u8]) -> Result<()> {
        self.require_writable()?;
        self.file.seek(SeekFrom::Start(off))?;
        self.file.write_all(data)?;
        Ok(())
    }

    /// Reads the block with the given number.
    pub fn read_block(&mut self, block_no: u64) -> Result<Vec<u8>> {
        let block_size = self.get_block_size();
        let mut buf = vec![0; block_size as usize];
        self.read_at(block_no * block_size, &mut buf)?;
        Ok(buf)
    }

    /// Returns the descriptor of the block group `group`.
    pub fn get_bg_descriptor(&self, group: u32) -> Result<&BlockGroupDescriptor> {
        self.bg_descriptors
            .get(group as usize)
            .ok_or_else(|| Ext4Error::UnsupportedFeature(format!("no such block group: {group}")))
    }
}

/// Checks the given superblock describes a filesystem the implementation can
/// handle.
fn validate_superblock(sb: &Superblock) -> Result<()> {
    let magic = sb.s_magic;
    if magic != EXT4_SIGNATURE {
        return Err(Ext4Error::UnsupportedFeature(format!(
            "not an ext4 image (signature: {magic:#06x})"
        )));
    }
    let incompat = sb.s_feature_incompat;
    if incompat & INCOMPAT_EXTENTS == 0 {
        return Err(Ext4Error::UnsupportedFeature(
            "missing INCOMPAT_EXTENTS (only extent-mapped filesystems are supported)".into(),
        ));
    }
    if incompat & INCOMPAT_FILETYPE == 0 {
        return Err(Ext4Error::UnsupportedFeature(
            "missing INCOMPAT_FILETYPE (only ext4_dir_entry_2 directories are supported)".into(),
        ));
    }
    let unknown = incompat & !INCOMPAT_TOLERATED;
    if unknown != 0 {
        return Err(Ext4Error::UnsupportedFeature(format!(
            "unknown incompat features: {unknown:#x}"
        )));
    }
    let log_block_size = sb.s_log_block_size;
    if log_block_size > 6 {
        return Err(Ext4Error::UnsupportedFeature(format!(
            "unsupported block size: 2^{}",
            log_block_size + 10
        )));
    }
    let desc_size = sb.s_desc_size;
    if desc_size as usize != size_of::<BlockGroupDescriptor>() {
        return Err(Ext4Error::UnsupportedFeature(format!(
            "unsupported group descriptor size: {desc_size}"
        )));
    }
    let inode_size = sb.s_inode_size;
    if inode_size < 128 {
        return Err(Ext4Error::UnsupportedFeature(format!(
            "unsupported inode size: {inode_size}"
        )));
    }
    let blocks_per_group = sb.s_blocks_per_group;
    let inodes_per_group = sb.s_inodes_per_group;
    if blocks_per_group == 0 || inodes_per_group == 0 {
        return Err(Ext4Error::UnsupportedFeature(
            "empty block group geometry".into(),
        ));
    }
    Ok(())
}
