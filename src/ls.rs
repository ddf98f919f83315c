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

//! The `ls` command: renders a directory as a tree with box-drawing
//! characters.

use ext4::Image;
use ext4::Result;
use ext4::dirent::read_dir;
use ext4::dirent::resolve_path;
use std::path::Path;

/// A directory entry with its children.
struct TreeNode {
    /// The entry's name.
    name: String,
    /// Entries of the subdirectory, when listing recursively.
    children: Vec<TreeNode>,
}

pub fn run(img: &mut Image, path: &Path, recursive: bool) -> Result<()> {
    let inode_no = resolve_path(img, path)?;
    let nodes = build_tree(img, inode_no, recursive)?;
    let mut out = String::new();
    render_tree(&nodes, &mut Vec::new(), &mut out);
    print!("{out}");
    Ok(())
}

/// Collects the entries of the directory `inode_no`.
///
/// When `recursive`, subdirectories are descended into, excluding `.` and
/// `..`.
fn build_tree(img: &mut Image, inode_no: u32, recursive: bool) -> Result<Vec<TreeNode>> {
    let mut nodes = Vec::new();
    for ent in read_dir(img, inode_no)? {
        if recursive && ent.is_directory() {
            if ent.name == "." || ent.name == ".." {
                continue;
            }
            let children = build_tree(img, ent.header.inode, true)?;
            nodes.push(TreeNode {
                name: ent.name,
                children,
            });
        } else {
            nodes.push(TreeNode {
                name: ent.name,
                children: Vec::new(),
            });
        }
    }
    Ok(nodes)
}

/// Renders the tree, one line per entry.
///
/// `ancestors_last` tells, for each ancestor, whether it was the last entry
/// of its directory: its column then draws spaces instead of `│`.
fn render_tree(nodes: &[TreeNode], ancestors_last: &mut Vec<bool>, out: &mut String) {
    let count = nodes.len();
    for (i, node) in nodes.iter().enumerate() {
        let last = i + 1 == count;
        for ancestor_last in ancestors_last.iter() {
            out.push_str(if *ancestor_last { "    " } else { "│   " });
        }
        out.push_str(if last { "└── " } else { "├── " });
        out.push_str(&node.name);
        out.push('\n');
        if !node.children.is_empty() {
            ancestors_last.push(last);
            render_tree(&node.children, ancestors_last, out);
            ancestors_last.pop();
        }
    }
}
