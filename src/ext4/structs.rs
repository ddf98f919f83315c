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

//! On-disk record layouts.
//!
//! Every structure matches the ext4 disk format byte for byte: all fields are
//! little-endian and reserved runs are kept as explicit byte arrays, so
//! reading a record with [`crate::util::parse_record`] and writing it back
//! with [`crate::util::as_bytes`] reproduces the original bytes exactly.
//! Checksum recomputation relies on this round-trip.

use crate::util::merge_csum;
use crate::util::merge_hi_lo;

/// Offset of the `bg_checksum` field inside a group descriptor.
pub const BG_CHECKSUM_OFFSET: usize = 0x1e;
/// Offset of the `i_checksum_lo` field inside the base inode record.
pub const INODE_CHECKSUM_LO_OFFSET: usize = 0x7c;
/// Offset of the `i_checksum_hi` field inside the full inode record.
pub const INODE_CHECKSUM_HI_OFFSET: usize = 0x82;

/// The ext4 superblock, located at offset `0x400` of the image.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct Superblock {
    /// Total number of inodes in the filesystem.
    pub s_inodes_count: u32,
    /// Total number of blocks (low 32 bits).
    pub s_blocks_count_lo: u32,
    /// Number of blocks reserved for the superuser (low 32 bits).
    pub s_r_blocks_count_lo: u32,
    /// Number of unallocated blocks (low 32 bits).
    pub s_free_blocks_count_lo: u32,
    /// Number of unallocated inodes.
    pub s_free_inodes_count: u32,
    /// The number of the block containing the superblock.
    pub s_first_data_block: u32,
    /// log2(block size) - 10.
    pub s_log_block_size: u32,
    /// log2(cluster size) - 10.
    pub s_log_cluster_size: u32,
    /// The number of blocks per group.
    pub s_blocks_per_group: u32,
    /// The number of clusters per group.
    pub s_clusters_per_group: u32,
    /// The number of inodes per group.
    pub s_inodes_per_group: u32,
    /// Timestamp of the last mount.
    pub s_mtime: u32,
    /// Timestamp of the last write.
    pub s_wtime: u32,
    /// Number of mounts since the last consistency check.
    pub s_mnt_count: u16,
    /// Number of mounts allowed before a consistency check is required.
    pub s_max_mnt_count: u16,
    /// The ext4 signature.
    pub s_magic: u16,
    /// The filesystem's state.
    pub s_state: u16,
    /// The action to take when an error is detected.
    pub s_errors: u16,
    /// The minor revision level.
    pub s_minor_rev_level: u16,
    /// Timestamp of the last consistency check.
    pub s_lastcheck: u32,
    /// Interval between mandatory consistency checks.
    pub s_checkinterval: u32,
    /// The id of the operating system which created the filesystem.
    pub s_creator_os: u32,
    /// The revision level.
    pub s_rev_level: u32,
    /// The UID of the user that can use reserved blocks.
    pub s_def_resuid: u16,
    /// The GID of the group that can use reserved blocks.
    pub s_def_resgid: u16,
    /// The first non-reserved inode.
    pub s_first_ino: u32,
    /// The size of an inode record in bytes.
    pub s_inode_size: u16,
    /// The group this superblock copy belongs to.
    pub s_block_group_nr: u16,
    /// Compatible feature set.
    pub s_feature_compat: u32,
    /// Incompatible feature set.
    pub s_feature_incompat: u32,
    /// Read-only compatible feature set.
    pub s_feature_ro_compat: u32,
    /// The filesystem's UUID, which also seeds every metadata checksum.
    pub s_uuid: [u8; 16],
    /// The volume name.
    pub s_volume_name: [u8; 16],
    /// The path the filesystem was last mounted to.
    pub s_last_mounted: [u8; 64],
    /// Compression usage bitmap.
    pub s_algorithm_usage_bitmap: u32,
    /// The number of blocks to preallocate for files.
    pub s_prealloc_blocks: u8,
    /// The number of blocks to preallocate for directories.
    pub s_prealloc_dir_blocks: u8,
    /// The number of GDT entries reserved for future growth.
    pub s_reserved_gdt_blocks: u16,
    /// The journal superblock's UUID.
    pub s_journal_uuid: [u8; 16],
    /// The journal's inode.
    pub s_journal_inum: u32,
    /// The journal's device.
    pub s_journal_dev: u32,
    /// The head of the orphan inodes list.
    pub s_last_orphan: u32,
    /// HTREE hash seed.
    pub s_hash_seed: [u8; 16],
    /// The default hash version.
    pub s_def_hash_version: u8,
    /// The journal backup type.
    pub s_jnl_backup_type: u8,
    /// The size of a group descriptor record in bytes.
    pub s_desc_size: u16,
    /// Default mount options.
    pub s_default_mount_opts: u32,
    /// The first metablock block group.
    pub s_first_meta_bg: u32,
    /// Timestamp of the filesystem's creation.
    pub s_mkfs_time: u32,
    /// Backup of the journal inode's block array.
    pub s_jnl_blocks: [u8; 68],
    /// Total number of blocks (high 32 bits).
    pub s_blocks_count_hi: u32,
    /// Number of blocks reserved for the superuser (high 32 bits).
    pub s_r_blocks_count_hi: u32,
    /// Number of unallocated blocks (high 32 bits).
    pub s_free_blocks_count_hi: u32,
    /// Minimum extra inode size.
    pub s_min_extra_isize: u16,
    /// Extra inode size to reserve on new inodes.
    pub s_want_extra_isize: u16,
    /// Miscellaneous flags.
    pub s_flags: u32,
    /// Structure padding.
    pub _padding: [u8; 664],
    /// Checksum of the whole superblock, complemented.
    pub s_checksum: u32,
}

impl Superblock {
    /// Returns the size of a block in bytes.
    pub fn get_block_size(&self) -> u64 {
        1024 << self.s_log_block_size
    }

    /// Returns the total number of blocks.
    pub fn get_blocks_count(&self) -> u64 {
        merge_hi_lo(self.s_blocks_count_hi, self.s_blocks_count_lo)
    }

    /// Returns the number of block groups.
    pub fn get_groups_count(&self) -> u64 {
        self.get_blocks_count() / self.s_blocks_per_group as u64
    }
}

/// A block group descriptor, stored in the table following the superblock's
/// block.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct BlockGroupDescriptor {
    /// The block containing the block bitmap (low 32 bits).
    pub bg_block_bitmap_lo: u32,
    /// The block containing the inode bitmap (low 32 bits).
    pub bg_inode_bitmap_lo: u32,
    /// The first block of the inode table (low 32 bits).
    pub bg_inode_table_lo: u32,
    /// Number of unallocated blocks in the group (low 16 bits).
    pub bg_free_blocks_count_lo: u16,
    /// Number of unallocated inodes in the group (low 16 bits).
    pub bg_free_inodes_count_lo: u16,
    /// Number of directories in the group (low 16 bits).
    pub bg_used_dirs_count_lo: u16,
    /// Group flags. Bit `0x2` marks the block bitmap uninitialized; bits
    /// within `0xf1` mark the inode bitmap or table uninitialized.
    pub bg_flags: u16,
    /// The block of the snapshot exclusion bitmap (low 32 bits).
    pub bg_exclude_bitmap_lo: u32,
    /// Checksum of the block bitmap (low 16 bits).
    pub bg_block_bitmap_csum_lo: u16,
    /// Checksum of the inode bitmap (low 16 bits).
    pub bg_inode_bitmap_csum_lo: u16,
    /// Number of unused entries in the inode table (low 16 bits).
    pub bg_itable_unused_lo: u16,
    /// Checksum of the descriptor itself.
    pub bg_checksum: u16,
    /// The block containing the block bitmap (high 32 bits).
    pub bg_block_bitmap_hi: u32,
    /// The block containing the inode bitmap (high 32 bits).
    pub bg_inode_bitmap_hi: u32,
    /// The first block of the inode table (high 32 bits).
    pub bg_inode_table_hi: u32,
    /// Number of unallocated blocks in the group (high 16 bits).
    pub bg_free_blocks_count_hi: u16,
    /// Number of unallocated inodes in the group (high 16 bits).
    pub bg_free_inodes_count_hi: u16,
    /// Number of directories in the group (high 16 bits).
    pub bg_used_dirs_count_hi: u16,
    /// Number of unused entries in the inode table (high 16 bits).
    pub bg_itable_unused_hi: u16,
    /// The block of the snapshot exclusion bitmap (high 32 bits).
    pub bg_exclude_bitmap_hi: u32,
    /// Checksum of the block bitmap (high 16 bits).
    pub bg_block_bitmap_csum_hi: u16,
    /// Checksum of the inode bitmap (high 16 bits).
    pub bg_inode_bitmap_csum_hi: u16,
    /// Structure padding.
    pub _padding: [u8; 4],
}

impl BlockGroupDescriptor {
    /// Returns the block containing the block bitmap.
    pub fn get_block_bitmap(&self) -> u64 {
        merge_hi_lo(self.bg_block_bitmap_hi, self.bg_block_bitmap_lo)
    }

    /// Returns the block containing the inode bitmap.
    pub fn get_inode_bitmap(&self) -> u64 {
        merge_hi_lo(self.bg_inode_bitmap_hi, self.bg_inode_bitmap_lo)
    }

    /// Returns the first block of the inode table.
    pub fn get_inode_table(&self) -> u64 {
        merge_hi_lo(self.bg_inode_table_hi, self.bg_inode_table_lo)
    }

    /// Returns the stored checksum of the block bitmap.
    pub fn get_block_bitmap_csum(&self) -> u32 {
        merge_csum(self.bg_block_bitmap_csum_hi, self.bg_block_bitmap_csum_lo)
    }

    /// Returns the stored checksum of the inode bitmap.
    pub fn get_inode_bitmap_csum(&self) -> u32 {
        merge_csum(self.bg_inode_bitmap_csum_hi, self.bg_inode_bitmap_csum_lo)
    }
}

/// The base inode record, making up the first 128 bytes of an inode table
/// entry.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct Inode {
    /// Type and permissions. The low 12 bits are the permission bits, the
    /// high 4 bits the file type.
    pub i_mode: u16,
    /// User ID.
    pub i_uid: u16,
    /// Size in bytes (low 32 bits).
    pub i_size_lo: u32,
    /// Timestamp of the last access.
    pub i_atime: u32,
    /// Timestamp of the last metadata change.
    pub i_ctime: u32,
    /// Timestamp of the last content modification.
    pub i_mtime: u32,
    /// Timestamp of the deletion.
    pub i_dtime: u32,
    /// Group ID.
    pub i_gid: u16,
    /// The number of hard links to this inode.
    pub i_links_count: u16,
    /// The number of 512-byte sectors used by this inode (low 32 bits).
    pub i_blocks_lo: u32,
    /// Inode flags.
    pub i_flags: u32,
    /// OS-specific value.
    pub _osd1: [u8; 4],
    /// Block map. Holds the root of the extent tree, or the literal target
    /// path for inline symlinks.
    pub i_block: [u8; 60],
    /// Generation number, mixed into the inode checksum.
    pub i_generation: u32,
    /// Extended attribute block (low 32 bits).
    pub i_file_acl_lo: u32,
    /// Size in bytes (high 32 bits).
    pub i_size_high: u32,
    /// Obsolete fragment address.
    pub i_obso_faddr: u32,
    /// OS-specific value.
    pub _osd2: [u8; 8],
    /// Checksum of the inode (low 16 bits).
    pub i_checksum_lo: u16,
    /// Structure padding.
    pub _padding: u16,
}

/// The extra inode record, at bytes `0x80..0xa0` of an inode table entry when
/// `s_inode_size > 128`.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct InodeExtra {
    /// The number of extra bytes the inode uses past the base record. `0`
    /// means the extra area is unused and the checksum is 16 bits wide.
    pub i_extra_isize: u16,
    /// Checksum of the inode (high 16 bits).
    pub i_checksum_hi: u16,
    /// Extra change-time bits.
    pub i_ctime_extra: u32,
    /// Extra modification-time bits.
    pub i_mtime_extra: u32,
    /// Extra access-time bits.
    pub i_atime_extra: u32,
    /// Creation time.
    pub i_crtime: u32,
    /// Extra creation-time bits.
    pub i_crtime_extra: u32,
    /// Version number (high 32 bits).
    pub i_version_hi: u32,
    /// Project ID.
    pub i_projid: u32,
}

/// The header of an extent tree node.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct ExtentHeader {
    /// Magic number identifying an extent node.
    pub eh_magic: u16,
    /// The number of valid entries following the header.
    pub eh_entries: u16,
    /// The maximum number of entries the node can hold.
    pub eh_max: u16,
    /// Depth of this node. `0` means the entries are leaves.
    pub eh_depth: u16,
    /// Generation of the tree.
    pub eh_generation: u32,
}

/// An internal extent tree entry, pointing to a child node.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug)]
pub struct ExtentIdx {
    /// The first logical block covered by the child node.
    pub ei_block: u32,
    /// The physical block of the child node (low 32 bits).
    pub ei_leaf_lo: u32,
    /// The physical block of the child node (high 16 bits).
    pub ei_leaf_hi: u16,
    /// Structure padding.
    pub _padding: u16,
}

impl ExtentIdx {
    /// Returns the physical block containing the child node.
    pub fn get_leaf(&self) -> u64 {
        merge_hi_lo(self.ei_leaf_hi as u32, self.ei_leaf_lo)
    }
}

/// A leaf extent tree entry, mapping a run of logical blocks to physical
/// blocks.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Extent {
    /// The first logical block covered by the extent.
    pub ee_block: u32,
    /// The number of blocks covered. A value above `32768` marks the extent
    /// uninitialized.
    pub ee_len: u16,
    /// The first physical block (high 16 bits).
    pub ee_start_hi: u16,
    /// The first physical block (low 32 bits).
    pub ee_start_lo: u32,
}

impl Extent {
    /// Returns the first physical block covered by the extent.
    pub fn get_start(&self) -> u64 {
        merge_hi_lo(self.ee_start_hi as u32, self.ee_start_lo)
    }
}

/// The fixed header of a directory entry (`ext4_dir_entry_2`). The entry's
/// name follows the header; `rec_len` covers header, name and any trailing
/// slack.
#[repr(C, packed)]
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct DirEntry2 {
    /// The inode the entry points to. `0` marks a deleted slot.
    pub inode: u32,
    /// Total length of the record.
    pub rec_len: u16,
    /// Length of the name in bytes.
    pub name_len: u8,
    /// File type code of the target inode.
    pub file_type: u8,
}
