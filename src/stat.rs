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

//! The `stat` command: prints an inode's metadata.

use ext4::Image;
use ext4::Result;
use ext4::dirent::resolve_path;
use ext4::extent::traverse_extent_tree;
use ext4::inode::get_inode;
use ext4::inode::parse_inode_mode;
use ext4::structs::Extent;
use ext4::structs::Inode;
use std::mem;
use std::path::Path;

pub fn run(img: &mut Image, path: &Path) -> Result<()> {
    let inode_no = resolve_path(img, path)?;
    let inode = get_inode(img, inode_no)?;
    let extents = traverse_extent_tree(img, &inode.i_block)?;
    print!("{}", format_inode_stat(&inode, inode_no, &extents)?);
    Ok(())
}

/// Formats a Unix timestamp as local time.
fn format_local_time(timestamp: u32) -> String {
    let timestamp = timestamp as libc::time_t;
    let mut tm: libc::tm = unsafe { mem::zeroed() };
    unsafe {
        libc::localtime_r(&timestamp, &mut tm);
    }
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}

/// Renders the `stat` text block for the given inode.
fn format_inode_stat(inode: &Inode, inode_no: u32, extents: &[Extent]) -> Result<String> {
    let (perms, file_type) = parse_inode_mode(inode.i_mode)?;
    let flags = inode.i_flags;
    let uid = inode.i_uid;
    let gid = inode.i_gid;
    let size = inode.i_size_lo;
    let ctime = inode.i_ctime;
    let atime = inode.i_atime;
    let mtime = inode.i_mtime;
    let checksum = inode.i_checksum_lo;

    let mut res = format!(
        "Inode: {inode_no}   Type: {file_type}    Mode:  {perms:04o}   Flags: 0x{flags:x}\n"
    );
    res += &format!("User:  {uid}   Group:  {gid}   Size: {size}\n");
    res += &format!("ctime: 0x{ctime:08x} -- {}\n", format_local_time(ctime));
    res += &format!("atime: 0x{atime:08x} -- {}\n", format_local_time(atime));
    res += &format!("mtime: 0x{mtime:08x} -- {}\n", format_local_time(mtime));
    res += &format!("Inode checksum: 0x0000{checksum:x}\n");
    if !extents.is_empty() {
        res += &format!("{:<20}  {}\n", "Logical block", "Physical blocks");
        for extent in extents {
            let logical = extent.ee_block as u64;
            let len = extent.ee_len as u64;
            let start = extent.get_start();
            let logical_range = format!("{}-{}", logical, logical + len);
            res += &format!("{logical_range:<20}: {}-{}\n", start, start + len);
        }
    }
    Ok(res)
}

#[cfg(test)]
mod test {
    use super::*;
    use ext4::util::parse_record;
    use std::mem::size_of;

    fn sample_inode(mode: u16, size: u32, checksum: u16) -> Inode {
        let mut raw = vec![0u8; size_of::<Inode>()];
        raw[0..2].copy_from_slice(&mode.to_le_bytes());
        raw[4..8].copy_from_slice(&size.to_le_bytes());
        raw[0x7c..0x7e].copy_from_slice(&checksum.to_le_bytes());
        parse_record(&raw)
    }

    #[test]
    fn stat_block() {
        let inode = sample_inode(0x81a4, 1337, 0xbeef);
        let extents = [Extent {
            ee_block: 0,
            ee_len: 2,
            ee_start_hi: 0,
            ee_start_lo: 23,
        }];
        let res = format_inode_stat(&inode, 12, &extents).unwrap();
        let lines = res.lines().collect::<Vec<_>>();
        assert_eq!(
            lines[0],
            "Inode: 12   Type: regular    Mode:  0644   Flags: 0x0"
        );
        assert_eq!(lines[1], "User:  0   Group:  0   Size: 1337");
        assert!(lines[2].starts_with("ctime: 0x00000000 -- "));
        assert_eq!(lines[5], "Inode checksum: 0x0000beef");
        assert_eq!(lines[6], "Logical block         Physical blocks");
        assert_eq!(lines[7], "0-2                 : 23-25");
    }

    #[test]
    fn stat_without_extents() {
        let inode = sample_inode(0x41ed, 1024, 0x1);
        let res = format_inode_stat(&inode, 2, &[]).unwrap();
        assert_eq!(res.lines().count(), 6);
        assert!(res.starts_with("Inode: 2   Type: directory    Mode:  0755"));
        assert!(res.ends_with("Inode checksum: 0x00001\n"));
    }
}
