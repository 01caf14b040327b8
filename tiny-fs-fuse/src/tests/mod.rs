
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::Arc;

use tiny_fs::{
    DiskInode, FileSystem, StatKind, BLOCKS_PER_SECTOR, DIRECT_BLOCKS, DOUBLY_INDIRECT_SLOT,
    INDIRECT_SLOT, MAX_FILE_SIZE, SECTOR_SIZE,
};

use crate::BlockFile;

const IMAGE_SECTORS: usize = 4096;

/// 测试用镜像文件，析构时从宿主机上删除
struct TempImage {
    path: PathBuf,
}

impl TempImage {
    fn new(name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "tiny-fs-{name}-{}-{:?}.img",
            std::process::id(),
            std::thread::current().id(),
        ));
        Self { path }
    }

    fn format(&self) -> FileSystem {
        let device = Arc::new(BlockFile::create(&self.path, IMAGE_SECTORS).unwrap());
        FileSystem::format(device, IMAGE_SECTORS)
    }

    fn mount(&self) -> FileSystem {
        let device = Arc::new(BlockFile::open(&self.path).unwrap());
        FileSystem::mount(device)
    }

    /// 绕过文件系统直接读出一个扇区
    fn raw_sector(&self, sector: u64) -> Vec<u8> {
        let mut file = fs::File::open(&self.path).unwrap();
        file.seek(SeekFrom::Start(sector * SECTOR_SIZE as u64))
            .unwrap();
        let mut buf = vec![0; SECTOR_SIZE];
        file.read_exact(&mut buf).unwrap();
        buf
    }

    fn raw_inode(&self, sector: u64) -> DiskInode {
        let bytes = self.raw_sector(sector);
        let mut record = DiskInode::default();
        record.as_bytes_mut().copy_from_slice(&bytes);
        record
    }
}

impl Drop for TempImage {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn sector_ptr(raw: &[u8], slot: usize) -> u32 {
    u32::from_le_bytes(raw[slot * 4..slot * 4 + 4].try_into().unwrap())
}

#[test]
fn direct_block_write() {
    let image = TempImage::new("direct");
    let fs = image.format();

    assert!(fs.create("/a", 0));
    let file = fs.open("/a").unwrap();
    assert_eq!(file.write_at(0, b"hello"), 5);
    assert_eq!(file.len(), 5);

    let other = fs.open("/a").unwrap();
    let mut buf = [0; 5];
    assert_eq!(other.read_at(0, &mut buf), 5);
    assert_eq!(&buf, b"hello");
}

#[test]
fn cross_sector_boundary() {
    let image = TempImage::new("cross");
    let fs = image.format();

    fs.create("/a", 0);
    let file = fs.open("/a").unwrap();
    let payload: Vec<u8> = (0..600u32).map(|i| (i * 7) as u8).collect();
    assert_eq!(file.write_at(0, &payload), 600);

    let mut buf = vec![0; 600];
    assert_eq!(file.read_at(0, &mut buf), 600);
    assert_eq!(buf, payload);
}

#[test]
fn single_indirect_reach() {
    let image = TempImage::new("indirect");
    let fs = image.format();

    fs.create("/a", 0);
    let file = fs.open("/a").unwrap();
    let offset = DIRECT_BLOCKS * SECTOR_SIZE;
    assert_eq!(file.write_at(offset, b"x"), 1);
    assert_eq!(file.len(), offset + 1);

    let inode_sector = file.stat().inode;
    drop(file);
    fs.shutdown();

    let record = image.raw_inode(inode_sector);
    assert!((0..DIRECT_BLOCKS).all(|slot| record.sector(slot) == 0));
    let indirect = record.sector(INDIRECT_SLOT);
    assert_ne!(indirect, 0);
    let table = image.raw_sector(indirect as u64);
    assert_ne!(sector_ptr(&table, 0), 0);
}

#[test]
fn double_indirect_reach() {
    let image = TempImage::new("doubly");
    let fs = image.format();

    fs.create("/a", 0);
    let file = fs.open("/a").unwrap();
    let offset = (DIRECT_BLOCKS + BLOCKS_PER_SECTOR) * SECTOR_SIZE;
    assert_eq!(file.write_at(offset, b"y"), 1);

    let inode_sector = file.stat().inode;
    drop(file);
    fs.shutdown();

    let record = image.raw_inode(inode_sector);
    let doubly = record.sector(DOUBLY_INDIRECT_SLOT);
    assert_ne!(doubly, 0);
    let outer = sector_ptr(&image.raw_sector(doubly as u64), 0);
    assert_ne!(outer, 0);
    let inner = sector_ptr(&image.raw_sector(outer as u64), 0);
    assert_ne!(inner, 0);
}

#[test]
fn size_ceiling() {
    let image = TempImage::new("ceiling");
    let fs = image.format();

    fs.create("/a", 0);
    let file = fs.open("/a").unwrap();
    let payload = [9u8; 100];
    assert_eq!(file.write_at(MAX_FILE_SIZE - 50, &payload), 50);
    assert_eq!(file.len(), MAX_FILE_SIZE);
    assert_eq!(file.write_at(MAX_FILE_SIZE, &payload[..1]), 0);
}

#[test]
fn directory_lifecycle() {
    let image = TempImage::new("dirlife");
    let fs = image.format();

    assert!(fs.create_dir("/d"));
    assert!(fs.create("/d/x", 0));
    assert!(!fs.remove("/d"));
    assert!(fs.remove("/d/x"));
    assert!(fs.remove("/d"));
    assert!(fs.open("/d").is_none());
}

#[test]
fn remove_returns_sectors_to_free_map() {
    let image = TempImage::new("roundtrip");
    let fs = image.format();
    let before = fs.free_sectors();

    assert!(fs.create("/a", 0));
    {
        let file = fs.open("/a").unwrap();
        file.write_at(0, &[1; 3 * SECTOR_SIZE]);
        assert!(fs.free_sectors() < before);
        assert!(fs.remove("/a"));
        // 还有打开的句柄，扇区尚未释放
        assert_ne!(fs.free_sectors(), before);
    }
    assert_eq!(fs.free_sectors(), before);
}

#[test]
fn write_read_law_over_offsets() {
    let image = TempImage::new("law");
    let fs = image.format();
    fs.create("/a", 0);
    let file = fs.open("/a").unwrap();

    for &offset in &[0usize, 511, 512, 1000, 63_488, 127_488] {
        let payload: Vec<u8> = (0..777u32).map(|i| (i ^ offset as u32) as u8).collect();
        assert_eq!(file.write_at(offset, &payload), payload.len());
        let mut buf = vec![0; payload.len()];
        assert_eq!(file.read_at(offset, &mut buf), payload.len());
        assert_eq!(buf, payload);
    }
}

#[test]
fn contents_survive_remount() {
    let image = TempImage::new("remount");
    {
        let fs = image.format();
        fs.create("/keep", 0);
        let file = fs.open("/keep").unwrap();
        // 超过缓存容量，确保经历过淘汰的数据也完好
        let payload: Vec<u8> = (0..(80 * SECTOR_SIZE) as u32).map(|i| i as u8).collect();
        assert_eq!(file.write_at(0, &payload), payload.len());
        drop(file);
        fs.shutdown();
    }

    let fs = image.mount();
    let free_before = fs.free_sectors();
    let file = fs.open("/keep").unwrap();
    assert_eq!(file.len(), 80 * SECTOR_SIZE);
    let mut buf = vec![0; 80 * SECTOR_SIZE];
    assert_eq!(file.read_at(0, &mut buf), buf.len());
    assert!(buf.iter().enumerate().all(|(i, &b)| b == i as u8));
    drop(file);

    // 挂载后的新分配不会与旧数据冲突
    fs.create("/new", 0);
    let file = fs.open("/new").unwrap();
    file.write_at(0, &[0xee; SECTOR_SIZE]);
    drop(file);
    assert!(fs.free_sectors() < free_before);

    let file = fs.open("/keep").unwrap();
    let mut buf = [0; 4];
    file.read_at(0, &mut buf);
    assert_eq!(buf, [0, 1, 2, 3]);
}

#[test]
fn readdir_skips_reserved_entries() {
    let image = TempImage::new("readdir");
    let fs = image.format();
    fs.create("/a", 0);
    fs.create("/b", 0);
    fs.create_dir("/d");

    let mut root = fs.open("/").unwrap();
    let mut names = Vec::new();
    while let Some(name) = root.readdir() {
        names.push(name);
    }
    names.sort();
    assert_eq!(names, ["a", "b", "d"]);
}

#[test]
fn relative_paths_follow_cwd() {
    let image = TempImage::new("cwd");
    let fs = image.format();

    assert!(fs.create_dir("/d"));
    assert!(fs.change_dir("/d"));
    assert!(fs.create("x", 0));
    assert!(fs.open("/d/x").is_some());
    assert!(fs.open("../d/x").is_some());

    assert!(fs.change_dir(".."));
    assert!(fs.open("d/x").is_some());
    // 普通文件不能作为当前目录
    assert!(!fs.change_dir("d/x"));
}

#[test]
fn trailing_slash_requires_directory() {
    let image = TempImage::new("slash");
    let fs = image.format();
    fs.create("/a", 0);
    fs.create_dir("/d");

    assert!(fs.open("/a").is_some());
    assert!(fs.open("/a/").is_none());
    assert!(fs.open("/d/").is_some());
    assert!(fs.open("/").is_some());
}

#[test]
fn create_rejects_bad_paths() {
    let image = TempImage::new("badpath");
    let fs = image.format();

    assert!(fs.create("/a", 0));
    assert!(!fs.create("/a", 0));
    assert!(!fs.create("/name-way-too-long", 0));
    assert!(!fs.create("", 0));
    assert!(!fs.create("/missing/x", 0));
    assert!(!fs.remove("/missing"));
}

#[test]
fn created_length_is_sparse() {
    let image = TempImage::new("sparse");
    let fs = image.format();
    let before = fs.free_sectors();

    assert!(fs.create("/a", 10 * SECTOR_SIZE));
    let file = fs.open("/a").unwrap();
    assert_eq!(file.len(), 10 * SECTOR_SIZE);
    // 长度有了，数据扇区还一个都没有
    assert_eq!(fs.free_sectors(), before - 1);
    let mut buf = [0; 16];
    assert_eq!(file.read_at(0, &mut buf), 0);
}

#[test]
fn cursor_advances_on_read_and_write() {
    let image = TempImage::new("cursor");
    let fs = image.format();
    fs.create("/a", 0);

    let mut file = fs.open("/a").unwrap();
    assert_eq!(file.write(b"hello "), 6);
    assert_eq!(file.write(b"world"), 5);
    assert_eq!(file.tell(), 11);

    file.seek(0);
    let mut buf = [0; 11];
    assert_eq!(file.read(&mut buf), 11);
    assert_eq!(&buf, b"hello world");
    assert_eq!(file.read(&mut buf), 0);
}

#[test]
fn stat_reports_kind_and_size() {
    let image = TempImage::new("stat");
    let fs = image.format();
    fs.create("/a", 0);
    fs.create_dir("/d");

    let file = fs.open("/a").unwrap();
    file.write_at(0, b"xyz");
    let stat = file.stat();
    assert_eq!(stat.kind, StatKind::FILE);
    assert_eq!(stat.size, 3);

    let dir = fs.open("/d").unwrap();
    assert_eq!(dir.stat().kind, StatKind::DIR);
}

#[test]
fn deny_write_via_handle() {
    let image = TempImage::new("deny");
    let fs = image.format();
    fs.create("/a", 0);

    let mut guard_handle = fs.open("/a").unwrap();
    guard_handle.deny_write();
    let writer = fs.open("/a").unwrap();
    assert_eq!(writer.write_at(0, b"no"), 0);

    guard_handle.allow_write();
    assert_eq!(writer.write_at(0, b"ok"), 2);
}
