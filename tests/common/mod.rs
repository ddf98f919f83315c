//! Synthetic ext4 image fixtures for the integration tests.
//!
//! The builder produces a fully consistent 2 MiB filesystem: 1024-byte
//! blocks, a single group, 64 inodes of 256 bytes, valid metadata checksums,
//! extent-mapped files, an inline symlink and one subdirectory. Tests corrupt
//! it through byte patches to produce the various fsck findings.

use ext4::crc32::crc32c;
use ext4::extent::EXTENT_MAGIC;
use ext4::structs::BlockGroupDescriptor;
use ext4::structs::DirEntry2;
use ext4::structs::Extent;
use ext4::structs::ExtentHeader;
use ext4::structs::Inode;
use ext4::structs::InodeExtra;
use ext4::structs::Superblock;
use ext4::util::as_bytes;
use ext4::util::zero_range;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::io::Write;
use std::mem;
use std::path::Path;
use tempfile::NamedTempFile;

pub const BLOCK_SIZE: u64 = 1024;
pub const BLOCKS_COUNT: u64 = 2048;
pub const INODES_PER_GROUP: u32 = 64;
pub const INODE_SIZE: usize = 256;
pub const FS_UUID: [u8; 16] = [
    0x51, 0xbe, 0x5b, 0x3e, 0x0a, 0x11, 0x4b, 0x96, 0x8f, 0x2d, 0x4c, 0x23, 0x7a, 0x10, 0xd8,
    0x6f,
];

pub const SUPERBLOCK_OFFSET: u64 = 1024;
pub const BGDT_OFFSET: u64 = 2048;
pub const BLOCK_BITMAP_BLOCK: u64 = 3;
pub const INODE_BITMAP_BLOCK: u64 = 4;
pub const INODE_TABLE_BLOCK: u64 = 5;
pub const ROOT_DIR_BLOCK: u64 = 21;
pub const SUBDIR_BLOCK: u64 = 22;
pub const TEST1_BLOCK: u64 = 23;
pub const TEST2_BLOCK: u64 = 24;
pub const TEST1_1_BLOCK: u64 = 25;

pub const ROOT_INO: u32 = 2;
pub const TEST1_INO: u32 = 12;
pub const TEST2_INO: u32 = 13;
pub const LINK_INO: u32 = 14;
pub const TESTDIR1_INO: u32 = 15;
pub const TEST1_1_INO: u32 = 17;

pub const TEST1_CONTENT: &[u8] = b"This is Test1.txt\n";
pub const TEST2_CONTENT: &[u8] = b"This is Test2.txt\n";
pub const TEST1_1_CONTENT: &[u8] = b"Nested file content\n";
pub const LINK_TARGET: &[u8] = b"Test1.txt";

const TIMESTAMP: u32 = 0x6170_0000;

/// A scratch image in a temporary file.
pub struct TestImage {
    file: NamedTempFile,
}

impl TestImage {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn open(&self, write: bool) -> ext4::Image {
        ext4::Image::open(self.path(), write).expect("open test image")
    }

    /// Overwrites raw bytes of the image.
    pub fn patch(&mut self, offset: u64, data: &[u8]) {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset)).unwrap();
        file.write_all(data).unwrap();
        file.flush().unwrap();
    }

    /// Reads raw bytes of the image.
    pub fn read(&mut self, offset: u64, len: usize) -> Vec<u8> {
        let file = self.file.as_file_mut();
        file.seek(SeekFrom::Start(offset)).unwrap();
        let mut buf = vec![0; len];
        file.read_exact(&mut buf).unwrap();
        buf
    }

    /// Applies `f` to the raw record of the given inode, recomputes its
    /// checksum and writes it back.
    pub fn rewrite_inode(&mut self, inode_no: u32, f: impl FnOnce(&mut Vec<u8>)) {
        let off = inode_offset(inode_no);
        let mut raw = self.read(off, INODE_SIZE);
        f(&mut raw);
        store_inode_checksum(inode_no, &mut raw);
        self.patch(off, &raw);
    }
}

/// Returns the byte offset of the given inode's record.
pub fn inode_offset(inode_no: u32) -> u64 {
    INODE_TABLE_BLOCK * BLOCK_SIZE + (inode_no as u64 - 1) * INODE_SIZE as u64
}

/// Computes the checksum an inode record should carry. The width follows the
/// record's `i_extra_isize`.
pub fn inode_checksum(inode_no: u32, raw: &[u8]) -> u32 {
    let wide = u16::from_le_bytes([raw[0x80], raw[0x81]]) != 0;
    let mut data = FS_UUID.to_vec();
    data.extend_from_slice(&inode_no.to_le_bytes());
    data.extend_from_slice(&raw[0x64..0x68]); // generation
    let mut zeroed = zero_range(raw, 0x7c, 2);
    if wide {
        zeroed = zero_range(&zeroed, 0x82, 2);
    }
    data.extend_from_slice(&zeroed);
    let csum = !crc32c(&data);
    if wide { csum } else { csum & 0xffff }
}

/// Recomputes and stores the checksum of the raw inode record.
fn store_inode_checksum(inode_no: u32, raw: &mut Vec<u8>) {
    let csum = inode_checksum(inode_no, raw);
    raw[0x7c..0x7e].copy_from_slice(&(csum as u16).to_le_bytes());
    if u16::from_le_bytes([raw[0x80], raw[0x81]]) != 0 {
        raw[0x82..0x84].copy_from_slice(&((csum >> 16) as u16).to_le_bytes());
    }
}

/// The block bitmap of the pristine fixture.
pub fn block_bitmap() -> Vec<u8> {
    let mut bitmap = vec![0u8; (BLOCKS_COUNT / 8) as usize];
    // Blocks 1..=25 hold metadata and data; bit 0 is block 1
    // (`s_first_data_block`)
    for block in 1..=TEST1_1_BLOCK {
        let idx = (block - 1) as usize;
        bitmap[idx / 8] |= 1 << (idx % 8);
    }
    bitmap
}

/// The inode bitmap of the pristine fixture.
pub fn inode_bitmap() -> Vec<u8> {
    let mut bitmap = vec![0u8; (INODES_PER_GROUP / 8) as usize];
    for ino in (1..=11).chain([TEST1_INO, TEST2_INO, LINK_INO, TESTDIR1_INO, TEST1_1_INO]) {
        let idx = (ino - 1) as usize;
        bitmap[idx / 8] |= 1 << (idx % 8);
    }
    bitmap
}

fn dir_block(entries: &[(u32, &str, u8)]) -> Vec<u8> {
    let mut data = Vec::with_capacity(BLOCK_SIZE as usize);
    for (i, (inode, name, file_type)) in entries.iter().enumerate() {
        let min_len = (8 + name.len() + 3) & !3;
        let rec_len = if i + 1 == entries.len() {
            BLOCK_SIZE as usize - data.len()
        } else {
            min_len
        };
        let header = DirEntry2 {
            inode: *inode,
            rec_len: rec_len as u16,
            name_len: name.len() as u8,
            file_type: *file_type,
        };
        let start = data.len();
        data.extend_from_slice(as_bytes(&header));
        data.extend_from_slice(name.as_bytes());
        data.resize(start + rec_len, 0);
    }
    assert_eq!(data.len(), BLOCK_SIZE as usize);
    data
}

/// Builds an extent tree root mapping logical block 0 onto `len` blocks
/// starting at `block`.
fn extent_root(block: u64, len: u16) -> [u8; 60] {
    let mut node = [0u8; 60];
    let header = ExtentHeader {
        eh_magic: EXTENT_MAGIC,
        eh_entries: 1,
        eh_max: 4,
        eh_depth: 0,
        eh_generation: 0,
    };
    node[..12].copy_from_slice(as_bytes(&header));
    let leaf = Extent {
        ee_block: 0,
        ee_len: len,
        ee_start_hi: (block >> 32) as u16,
        ee_start_lo: block as u32,
    };
    node[12..24].copy_from_slice(as_bytes(&leaf));
    node
}

/// Builds a full inode record with a valid wide checksum.
fn inode_record(ino: u32, mode: u16, size: u32, flags: u32, i_block: [u8; 60], links: u16) -> Vec<u8> {
    let mut base: Inode = unsafe { mem::zeroed() };
    base.i_mode = mode;
    base.i_size_lo = size;
    base.i_atime = TIMESTAMP;
    base.i_ctime = TIMESTAMP;
    base.i_mtime = TIMESTAMP;
    base.i_links_count = links;
    base.i_blocks_lo = 2;
    base.i_flags = flags;
    base.i_block = i_block;
    let mut extra: InodeExtra = unsafe { mem::zeroed() };
    extra.i_extra_isize = 32;

    let mut raw = vec![0u8; INODE_SIZE];
    raw[..128].copy_from_slice(as_bytes(&base));
    raw[128..160].copy_from_slice(as_bytes(&extra));
    store_inode_checksum(ino, &mut raw);
    raw
}

/// Builds a zeroed reserved inode record with a valid 16-bit checksum.
fn reserved_inode_record(ino: u32) -> Vec<u8> {
    let mut raw = vec![0u8; INODE_SIZE];
    store_inode_checksum(ino, &mut raw);
    raw
}

fn build_bg_descriptor(block_bitmap: &[u8], inode_bitmap: &[u8]) -> BlockGroupDescriptor {
    let mut bg: BlockGroupDescriptor = unsafe { mem::zeroed() };
    bg.bg_block_bitmap_lo = BLOCK_BITMAP_BLOCK as u32;
    bg.bg_inode_bitmap_lo = INODE_BITMAP_BLOCK as u32;
    bg.bg_inode_table_lo = INODE_TABLE_BLOCK as u32;
    bg.bg_free_blocks_count_lo = (BLOCKS_COUNT - 25) as u16;
    bg.bg_free_inodes_count_lo = 48;
    bg.bg_used_dirs_count_lo = 2;

    let block_csum = !crc32c(&[&FS_UUID[..], block_bitmap].concat());
    bg.bg_block_bitmap_csum_lo = block_csum as u16;
    bg.bg_block_bitmap_csum_hi = (block_csum >> 16) as u16;
    let inode_csum = !crc32c(&[&FS_UUID[..], inode_bitmap].concat());
    bg.bg_inode_bitmap_csum_lo = inode_csum as u16;
    bg.bg_inode_bitmap_csum_hi = (inode_csum >> 16) as u16;

    let mut data = FS_UUID.to_vec();
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&zero_range(as_bytes(&bg), 0x1e, 2));
    bg.bg_checksum = (!crc32c(&data) & 0xffff) as u16;
    bg
}

fn build_superblock() -> Superblock {
    let mut sb: Superblock = unsafe { mem::zeroed() };
    sb.s_inodes_count = INODES_PER_GROUP;
    sb.s_blocks_count_lo = BLOCKS_COUNT as u32;
    sb.s_free_blocks_count_lo = (BLOCKS_COUNT - 25) as u32;
    sb.s_free_inodes_count = 48;
    sb.s_first_data_block = 1;
    sb.s_log_block_size = 0;
    sb.s_log_cluster_size = 0;
    sb.s_blocks_per_group = BLOCKS_COUNT as u32;
    sb.s_clusters_per_group = BLOCKS_COUNT as u32;
    sb.s_inodes_per_group = INODES_PER_GROUP;
    sb.s_magic = 0xef53;
    sb.s_state = 1;
    sb.s_errors = 1;
    sb.s_lastcheck = TIMESTAMP;
    sb.s_rev_level = 1;
    sb.s_first_ino = 11;
    sb.s_inode_size = INODE_SIZE as u16;
    // INCOMPAT_FILETYPE | INCOMPAT_EXTENTS | INCOMPAT_64BIT
    sb.s_feature_incompat = 0xc2;
    // RO_COMPAT_METADATA_CSUM
    sb.s_feature_ro_compat = 0x400;
    sb.s_uuid = FS_UUID;
    sb.s_volume_name[..6].copy_from_slice(b"e4test");
    sb.s_desc_size = 64;
    sb.s_mkfs_time = TIMESTAMP;
    sb.s_min_extra_isize = 32;
    sb.s_want_extra_isize = 32;

    let csum = {
        let raw = as_bytes(&sb);
        !crc32c(&raw[..raw.len() - 4])
    };
    sb.s_checksum = csum;
    sb
}

fn write_block(img: &mut [u8], block: u64, data: &[u8]) {
    let off = (block * BLOCK_SIZE) as usize;
    img[off..off + data.len()].copy_from_slice(data);
}

fn build_image() -> Vec<u8> {
    let mut img = vec![0u8; (BLOCKS_COUNT * BLOCK_SIZE) as usize];

    // Directories and file contents
    let root_dir = dir_block(&[
        (ROOT_INO, ".", 2),
        (ROOT_INO, "..", 2),
        (TEST1_INO, "Test1.txt", 1),
        (TEST2_INO, "Test2.txt", 1),
        (LINK_INO, "link.txt", 7),
        (TESTDIR1_INO, "TestDir1", 2),
    ]);
    write_block(&mut img, ROOT_DIR_BLOCK, &root_dir);
    let subdir = dir_block(&[
        (TESTDIR1_INO, ".", 2),
        (ROOT_INO, "..", 2),
        (TEST1_1_INO, "Test1_1.txt", 1),
    ]);
    write_block(&mut img, SUBDIR_BLOCK, &subdir);
    write_block(&mut img, TEST1_BLOCK, TEST1_CONTENT);
    write_block(&mut img, TEST2_BLOCK, TEST2_CONTENT);
    write_block(&mut img, TEST1_1_BLOCK, TEST1_1_CONTENT);

    // Inode table
    let table_off = (INODE_TABLE_BLOCK * BLOCK_SIZE) as usize;
    let mut store = |ino: u32, record: Vec<u8>| {
        let off = table_off + (ino as usize - 1) * INODE_SIZE;
        img[off..off + INODE_SIZE].copy_from_slice(&record);
    };
    for ino in (1..=11).filter(|ino| *ino != ROOT_INO) {
        store(ino, reserved_inode_record(ino));
    }
    store(
        ROOT_INO,
        inode_record(
            ROOT_INO,
            0x41ed,
            BLOCK_SIZE as u32,
            0x80000,
            extent_root(ROOT_DIR_BLOCK, 1),
            3,
        ),
    );
    store(
        TEST1_INO,
        inode_record(
            TEST1_INO,
            0x81a4,
            TEST1_CONTENT.len() as u32,
            0x80000,
            extent_root(TEST1_BLOCK, 1),
            1,
        ),
    );
    store(
        TEST2_INO,
        inode_record(
            TEST2_INO,
            0x81a4,
            TEST2_CONTENT.len() as u32,
            0x80000,
            extent_root(TEST2_BLOCK, 1),
            1,
        ),
    );
    let mut link_block = [0u8; 60];
    link_block[..LINK_TARGET.len()].copy_from_slice(LINK_TARGET);
    store(
        LINK_INO,
        inode_record(
            LINK_INO,
            0xa1ff,
            LINK_TARGET.len() as u32,
            0x10000000,
            link_block,
            1,
        ),
    );
    store(
        TESTDIR1_INO,
        inode_record(
            TESTDIR1_INO,
            0x41ed,
            BLOCK_SIZE as u32,
            0x80000,
            extent_root(SUBDIR_BLOCK, 1),
            2,
        ),
    );
    store(
        TEST1_1_INO,
        inode_record(
            TEST1_1_INO,
            0x81a4,
            TEST1_1_CONTENT.len() as u32,
            0x80000,
            extent_root(TEST1_1_BLOCK, 1),
            1,
        ),
    );

    // Bitmaps and group descriptor
    let block_bitmap = block_bitmap();
    let inode_bitmap = inode_bitmap();
    write_block(&mut img, BLOCK_BITMAP_BLOCK, &block_bitmap);
    write_block(&mut img, INODE_BITMAP_BLOCK, &inode_bitmap);
    let bg = build_bg_descriptor(&block_bitmap, &inode_bitmap);
    let bg_raw = as_bytes(&bg).to_vec();
    img[BGDT_OFFSET as usize..BGDT_OFFSET as usize + bg_raw.len()].copy_from_slice(&bg_raw);

    // Superblock
    let sb = build_superblock();
    let sb_raw = as_bytes(&sb).to_vec();
    img[SUPERBLOCK_OFFSET as usize..SUPERBLOCK_OFFSET as usize + sb_raw.len()]
        .copy_from_slice(&sb_raw);

    img
}

/// Builds the standard small fixture image, written to a temporary file.
pub fn small_image() -> TestImage {
    let data = build_image();
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&data).unwrap();
    file.flush().unwrap();
    TestImage { file }
}
