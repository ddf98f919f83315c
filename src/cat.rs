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

//! The `cat` command: writes a file's content to the standard output.

use ext4::Image;
use ext4::Result;
use ext4::dirent::resolve_path;
use ext4::file::get_file_content;
use std::io::Write;
use std::io;
use std::path::Path;

pub fn run(img: &mut Image, path: &Path) -> Result<()> {
    let inode_no = resolve_path(img, path)?;
    let mut stdout = io::stdout().lock();
    for chunk in get_file_content(img, inode_no)? {
        stdout.write_all(&chunk?)?;
    }
    Ok(())
}
