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

//! The `info` command: prints the filesystem's geometry.

use ext4::Image;
use ext4::Result;
use uuid::Uuid;

pub fn run(img: &mut Image) -> Result<()> {
    let uuid = Uuid::from_bytes(img.sb.s_uuid);
    let volume_name = img.sb.s_volume_name;
    let volume_name = volume_name
        .split(|byte| *byte == 0)
        .next()
        .map(String::from_utf8_lossy)
        .unwrap_or_default();
    let blocks_count = img.sb.get_blocks_count();
    let block_size = img.sb.get_block_size();
    let groups_count = img.sb.get_groups_count();
    let blocks_per_group = img.sb.s_blocks_per_group;
    let inodes_count = img.sb.s_inodes_count;
    let inodes_per_group = img.sb.s_inodes_per_group;
    let inode_size = img.sb.s_inode_size;
    let feature_compat = img.sb.s_feature_compat;
    let feature_incompat = img.sb.s_feature_incompat;
    let feature_ro_compat = img.sb.s_feature_ro_compat;

    println!("Filesystem UUID:  {uuid}");
    if !volume_name.is_empty() {
        println!("Volume name:      {volume_name}");
    }
    println!("Block size:       {block_size}");
    println!("Blocks count:     {blocks_count}");
    println!("Blocks per group: {blocks_per_group}");
    println!("Groups count:     {groups_count}");
    println!("Inodes count:     {inodes_count}");
    println!("Inodes per group: {inodes_per_group}");
    println!("Inode size:       {inode_size}");
    println!("Features:         compat 0x{feature_compat:x} incompat 0x{feature_incompat:x} ro_compat 0x{feature_ro_compat:x}");
    Ok(())
}
