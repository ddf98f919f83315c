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

//! The `dump` command: copies a file's content out of the image into a host
//! file.

use ext4::Image;
use ext4::Result;
use ext4::dirent::resolve_path;
use ext4::file::get_file_content;
use std::fs::File;
use std::io::Write;
use std::path::Path;

pub fn run(img: &mut Image, path: &Path, dest: &Path) -> Result<()> {
    let inode_no = resolve_path(img, path)?;
    let mut dest_file = File::create(dest)?;
    for chunk in get_file_content(img, inode_no)? {
        dest_file.write_all(&chunk?)?;
    }
    Ok(())
}
