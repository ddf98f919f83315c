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

//! Filesystem consistency checking.
//!
//! The checker runs three passes:
//! - pass 0 validates the superblock and group descriptor checksums;
//! - pass 1 validates the bitmap and inode checksums of every group and
//!   records block ownership to detect multiply-claimed blocks;
//! - pass 3 walks the directory tree from the root and reports allocated
//!   inodes that are not connected to it.
//!
//! Findings are data, not errors: they are emitted through a lazy iterator
//! and never raised. Pass 2 of the original numbering does not exist.

use crate::bitmap::calc_bitmap_checksum;
use crate::bitmap::iter_set_bits;
use crate::bitmap::read_block_bitmap;
use crate::bitmap::read_inode_bitmap;
use crate::crc32::crc32c;
use crate::dirent::read_dir;
use crate::error::Ext4Error;
use crate::error::Result;
use crate::extent::get_leaf_blocks;
use crate::extent::traverse_extent_tree;
use crate::fs::INCOMPAT_UNINIT_BG;
use crate::fs::Image;
use crate::inode::InodeRecord;
use crate::inode::ROOT_INODE;
use crate::structs::BG_CHECKSUM_OFFSET;
use crate::util::as_bytes;
use crate::util::zero_range;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::collections::hash_map::Entry;
use std::fmt;
use std::mem;

/// Inodes at or below this number are reserved by the filesystem and are
/// exempt from the connectivity check.
const LAST_RESERVED_INODE: u32 = 12;

/// `bg_flags`: the group's block bitmap is uninitialized.
const BG_BLOCK_UNINIT: u16 = 0x2;
/// `bg_flags`: mask of the flags marking the group's inode bitmap or table
/// uninitialized.
const BG_INODE_UNINIT_MASK: u16 = 0xf1;

/// A consistency finding.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum Finding {
    /// The superblock's stored checksum does not match its content.
    WrongSuperBlockChecksum,
    /// A group descriptor's stored checksum does not match its content.
    WrongBlockGroupDescriptorChecksum {
        /// The group number.
        group: u32,
        /// The computed checksum.
        expected: u16,
        /// The stored checksum.
        actual: u16,
    },
    /// A group's block bitmap does not match its stored checksum.
    WrongBlockBitmapChecksum {
        /// The group number.
        group: u32,
        /// The computed checksum.
        expected: u32,
        /// The stored checksum.
        actual: u32,
    },
    /// A group's inode bitmap does not match its stored checksum.
    WrongInodeBitmapChecksum {
        /// The group number.
        group: u32,
        /// The computed checksum.
        expected: u32,
        /// The stored checksum.
        actual: u32,
    },
    /// An inode's record does not match its stored checksum.
    WrongInodeChecksum {
        /// The inode number.
        inode: u32,
        /// The computed checksum.
        expected: u32,
        /// The stored checksum.
        actual: u32,
        /// `true` when the inode carries the 32-bit checksum.
        wide: bool,
    },
    /// The inode claims blocks that other inodes also claim.
    SharedBlock {
        /// The inode number.
        inode: u32,
        /// The multiply-claimed blocks.
        blocks: BTreeSet<u64>,
        /// The other claiming inodes.
        inodes: BTreeSet<u32>,
    },
    /// An allocated inode is not reachable from the root directory.
    UnconnectedInode {
        /// The inode number.
        inode: u32,
    },
}

/// Formats a set on one line, comma separated.
fn fmt_set<T: fmt::Display>(set: &BTreeSet<T>) -> String {
    let mut res = String::new();
    for (i, val) in set.iter().enumerate() {
        if i > 0 {
            res.push_str(", ");
        }
        res += &val.to_string();
    }
    res
}

impl fmt::Display for Finding {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongSuperBlockChecksum => write!(fmt, "wrong superblock checksum"),
            Self::WrongBlockGroupDescriptorChecksum {
                group,
                expected,
                actual,
            } => write!(
                fmt,
                "[Group {group}] wrong descriptor checksum: expected {expected:#06x}, found {actual:#06x}"
            ),
            Self::WrongBlockBitmapChecksum {
                group,
                expected,
                actual,
            } => write!(
                fmt,
                "[Group {group}] wrong block bitmap checksum: expected {expected:#010x}, found {actual:#010x}"
            ),
            Self::WrongInodeBitmapChecksum {
                group,
                expected,
                actual,
            } => write!(
                fmt,
                "[Group {group}] wrong inode bitmap checksum: expected {expected:#010x}, found {actual:#010x}"
            ),
            Self::WrongInodeChecksum {
                inode,
                expected,
                actual,
                wide,
            } => {
                if *wide {
                    write!(
                        fmt,
                        "[Inode {inode}] wrong checksum: expected {expected:#010x}, found {actual:#010x}"
                    )
                } else {
                    write!(
                        fmt,
                        "[Inode {inode}] wrong checksum: expected {expected:#06x}, found {actual:#06x}"
                    )
                }
            }
            Self::SharedBlock {
                inode,
                blocks,
                inodes,
            } => write!(
                fmt,
                "[Inode {inode}] blocks {} are also claimed by inodes {}",
                fmt_set(blocks),
                fmt_set(inodes)
            ),
            Self::UnconnectedInode { inode } => {
                write!(fmt, "[Inode {inode}] not connected to the directory tree")
            }
        }
    }
}

/// Accumulates block ownership across pass 1 to detect multiply-claimed
/// blocks.
#[derive(Default)]
struct SharedBlockTracker {
    /// For each claimed block, the inode that claimed it first.
    owners: HashMap<u64, u32>,
    /// For each conflicting inode, the contested blocks and the peer inodes.
    coincidences: BTreeMap<u32, (BTreeSet<u64>, BTreeSet<u32>)>,
}

impl SharedBlockTracker {
    /// Records the blocks claimed by the given inode.
    fn record_inode(&mut self, inode: u32, blocks: impl IntoIterator<Item = u64>) {
        for block in blocks {
            match self.owners.entry(block) {
                Entry::Vacant(entry) => {
                    entry.insert(inode);
                }
                Entry::Occupied(entry) => {
                    let owner = *entry.get();
                    if owner == inode {
                        continue;
                    }
                    let (blocks, inodes) = self.coincidences.entry(inode).or_default();
                    blocks.insert(block);
                    inodes.insert(owner);
                    let (blocks, inodes) = self.coincidences.entry(owner).or_default();
                    blocks.insert(block);
                    inodes.insert(inode);
                }
            }
        }
    }

    /// Consumes the tracker, yielding one finding per conflicting inode.
    fn into_findings(self) -> impl Iterator<Item = Finding> {
        self.coincidences
            .into_iter()
            .map(|(inode, (blocks, inodes))| Finding::SharedBlock {
                inode,
                blocks,
                inodes,
            })
    }
}

/// The checker's progress.
enum State {
    Pass0,
    Pass1 {
        group: u32,
    },
    SharedBlocks,
    Pass3,
    Done,
}

/// A streaming consistency check over an image.
///
/// The iterator advances the passes lazily (one group of pass 1 per step) and
/// yields findings in pass order. Dropping it aborts the remaining passes.
pub struct Fsck<'i> {
    img: &'i mut Image,
    state: State,
    /// Findings produced but not yet yielded.
    pending: VecDeque<Finding>,
    /// Block ownership accumulated by pass 1.
    shared: SharedBlockTracker,
    /// Inodes marked used in the inode bitmaps, pruned by pass 3.
    used_inodes: BTreeSet<u32>,
}

/// Starts a consistency check over the image.
///
/// Each call constructs a fresh checker; no state leaks between runs.
pub fn fsck(img: &mut Image) -> Fsck<'_> {
    Fsck {
        img,
        state: State::Pass0,
        pending: VecDeque::new(),
        shared: SharedBlockTracker::default(),
        used_inodes: BTreeSet::new(),
    }
}

impl Iterator for Fsck<'_> {
    type Item = Result<Finding>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(finding) = self.pending.pop_front() {
                return Some(Ok(finding));
            }
            let step = match self.state {
                State::Pass0 => self.pass0(),
                State::Pass1 { group } => self.pass1_group(group),
                State::SharedBlocks => {
                    let shared = mem::take(&mut self.shared);
                    self.pending.extend(shared.into_findings());
                    self.state = State::Pass3;
                    Ok(())
                }
                State::Pass3 => self.pass3(),
                State::Done => return None,
            };
            if let Err(e) = step {
                self.state = State::Done;
                return Some(Err(e));
            }
        }
    }
}

impl Fsck<'_> {
    /// Pass 0: superblock and group descriptor checksums.
    fn pass0(&mut self) -> Result<()> {
        // The superblock embeds its checksum in its last field, so hashing
        // the whole record must produce the self-check constant
        if crc32c(as_bytes(&self.img.sb)) != 0xffffffff {
            self.pending.push_back(Finding::WrongSuperBlockChecksum);
        }
        let incompat = self.img.sb.s_feature_incompat;
        if incompat & INCOMPAT_UNINIT_BG == 0 {
            let uuid = self.img.sb.s_uuid;
            for (group, bg) in self.img.bg_descriptors.iter().enumerate() {
                let actual = bg.bg_checksum;
                let mut data = Vec::new();
                data.extend_from_slice(&uuid);
                data.extend_from_slice(&(group as u32).to_le_bytes());
                data.extend_from_slice(&zero_range(as_bytes(bg), BG_CHECKSUM_OFFSET, 2));
                let expected = (!crc32c(&data) & 0xffff) as u16;
                if actual != expected {
                    self.pending
                        .push_back(Finding::WrongBlockGroupDescriptorChecksum {
                            group: group as u32,
                            expected,
                            actual,
                        });
                }
            }
        } else {
            eprintln!("warning: descriptor checksum validation skipped (uninit_bg)");
        }
        self.state = State::Pass1 { group: 0 };
        Ok(())
    }

    /// Pass 1, one group: bitmap checksums, inode checksums, block
    /// ownership.
    fn pass1_group(&mut self, group: u32) -> Result<()> {
        if group as u64 >= self.img.sb.get_groups_count() {
            self.state = State::SharedBlocks;
            return Ok(());
        }
        self.state = State::Pass1 { group: group + 1 };

        let bg = *self.img.get_bg_descriptor(group)?;
        let uuid = self.img.sb.s_uuid;
        let flags = bg.bg_flags;

        if flags & BG_BLOCK_UNINIT == 0 {
            let bitmap = read_block_bitmap(self.img, &bg)?;
            let expected = calc_bitmap_checksum(&uuid, &bitmap);
            let actual = bg.get_block_bitmap_csum();
            if actual != expected {
                self.pending.push_back(Finding::WrongBlockBitmapChecksum {
                    group,
                    expected,
                    actual,
                });
            }
        }

        if flags & BG_INODE_UNINIT_MASK != 0 {
            return Ok(());
        }
        let bitmap = read_inode_bitmap(self.img, &bg)?;
        let expected = calc_bitmap_checksum(&uuid, &bitmap);
        let actual = bg.get_inode_bitmap_csum();
        if actual != expected {
            self.pending.push_back(Finding::WrongInodeBitmapChecksum {
                group,
                expected,
                actual,
            });
        }

        let inode_size = self.img.sb.s_inode_size as u64;
        let inodes_per_group = self.img.sb.s_inodes_per_group;
        let table_off = bg.get_inode_table() * self.img.get_block_size();
        for idx in iter_set_bits(&bitmap) {
            let inode_no = inodes_per_group * group + idx as u32 + 1;
            let mut raw = vec![0; inode_size as usize];
            self.img.read_at(table_off + idx as u64 * inode_size, &mut raw)?;
            let record = InodeRecord::parse(inode_no, raw);

            let expected = record.compute_checksum(&uuid);
            let actual = record.get_stored_checksum();
            if actual != expected {
                self.pending.push_back(Finding::WrongInodeChecksum {
                    inode: inode_no,
                    expected,
                    actual,
                    wide: record.has_wide_checksum(),
                });
            }

            match traverse_extent_tree(self.img, &record.inode.i_block) {
                Ok(extents) => {
                    self.shared
                        .record_inode(inode_no, extents.iter().flat_map(get_leaf_blocks));
                }
                // An extent tree in an unknown form makes the inode's blocks
                // unknowable; the inode is skipped, not fatal
                Err(Ext4Error::UnsupportedFeature(_)) => {}
                Err(e) => return Err(e),
            }
            self.used_inodes.insert(inode_no);
        }
        Ok(())
    }

    /// Pass 3: connectivity of allocated inodes to the root directory.
    fn pass3(&mut self) -> Result<()> {
        let mut visited = BTreeSet::new();
        self.walk_connected(ROOT_INODE, &mut visited)?;
        let used = mem::take(&mut self.used_inodes);
        self.pending.extend(
            used.into_iter()
                .filter(|inode| *inode > LAST_RESERVED_INODE)
                .map(|inode| Finding::UnconnectedInode { inode }),
        );
        self.state = State::Done;
        Ok(())
    }

    /// Marks every inode reachable from `dir_inode` as connected by removing
    /// it from the used set.
    fn walk_connected(&mut self, dir_inode: u32, visited: &mut BTreeSet<u32>) -> Result<()> {
        // A corrupted tree may contain cycles
        if !visited.insert(dir_inode) {
            return Ok(());
        }
        let entries = match read_dir(self.img, dir_inode) {
            Ok(entries) => entries,
            Err(Ext4Error::Io(e)) => return Err(e.into()),
            // A structurally broken directory cannot be descended into; its
            // entries stay unreached
            Err(_) => return Ok(()),
        };
        for ent in entries {
            if ent.name == "." || ent.name == ".." {
                continue;
            }
            let inode = ent.header.inode;
            self.used_inodes.remove(&inode);
            if ent.is_directory() {
                self.walk_connected(inode, visited)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn shared_block_tracker() {
        let mut tracker = SharedBlockTracker::default();
        tracker.record_inode(12, [100, 101]);
        tracker.record_inode(13, [101, 102]);
        tracker.record_inode(14, [101]);

        let findings = tracker.into_findings().collect::<Vec<_>>();
        assert_eq!(findings.len(), 3);
        assert_eq!(
            findings[0],
            Finding::SharedBlock {
                inode: 12,
                blocks: BTreeSet::from([101]),
                inodes: BTreeSet::from([13, 14]),
            }
        );
        assert_eq!(
            findings[1],
            Finding::SharedBlock {
                inode: 13,
                blocks: BTreeSet::from([101]),
                inodes: BTreeSet::from([12]),
            }
        );
        assert_eq!(
            findings[2],
            Finding::SharedBlock {
                inode: 14,
                blocks: BTreeSet::from([101]),
                inodes: BTreeSet::from([12]),
            }
        );
    }

    #[test]
    fn no_conflicts_no_findings() {
        let mut tracker = SharedBlockTracker::default();
        tracker.record_inode(12, [1, 2, 3]);
        tracker.record_inode(13, [4, 5]);
        assert_eq!(tracker.into_findings().count(), 0);
    }
}
