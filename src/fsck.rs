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

//! The `fsck` command: runs the consistency passes and prints the findings.

use ext4::Image;
use ext4::Result;

pub fn run(img: &mut Image) -> Result<()> {
    // Findings are ordinary output, not errors: the exit code stays 0
    for finding in ext4::fsck::fsck(img) {
        println!("{}", finding?);
    }
    Ok(())
}
