//! # tiny-fs
//!
//! 教学用磁盘文件系统，整体架构自上而下：
//!
//! 文件系统入口层 → 文件句柄层 → 目录层 → 索引节点层 → 块缓存层 → 块设备接口层
//!
//! 所有扇区读写都经过块缓存；索引节点采用直接块、一级间接块与
//! 二级间接块的多级索引；目录是一种数据为目录项数组的索引节点。

// 文件系统入口层：格式化、挂载、按路径增删文件
mod fs;
pub use fs::FileSystem;

// 文件句柄层：带读写游标的打开文件对象
mod file;
pub use file::File;

// 目录层：目录项的增删查与路径解析
mod dir;
pub use dir::Dir;

// 索引节点层：打开节点表与多级索引的读写
mod inode;
pub use inode::{Inode, InodeTable, Stat, StatKind};

// 空闲扇区分配器
mod free_map;
pub use free_map::FreeMap;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;
pub use layout::{DirEntry, DiskInode, DOUBLY_INDIRECT_SLOT, INDIRECT_SLOT};

// 块缓存层：内存上的磁盘扇区数据缓存
mod block_cache;
pub use block_cache::{BufferCache, SectorGuard};

// 块设备接口层：读写块设备的接口
mod block_dev;
pub use block_dev::BlockDevice;

use std::time::Duration;

/// 扇区字节数
pub const SECTOR_SIZE: usize = 512;
/// 块缓存槽位数
pub const CACHE_SIZE: usize = 64;
/// 后台写回线程的写回周期
pub const WRITE_INTERVAL: Duration = Duration::from_millis(100);
/// 文件名最大字节数（不含结尾 \0）
pub const NAME_MAX: usize = 14;
/// 索引节点内的直接块数
pub const DIRECT_BLOCKS: usize = 124;
/// 一个间接块容纳的扇区指针数
pub const BLOCKS_PER_SECTOR: usize = 125;
/// 文件大小上限：直接块 + 一级间接 + 二级间接所能索引的全部字节
pub const MAX_FILE_SIZE: usize =
    (DIRECT_BLOCKS + BLOCKS_PER_SECTOR + BLOCKS_PER_SECTOR * BLOCKS_PER_SECTOR) * SECTOR_SIZE;

/// 空闲扇区位图文件的索引节点所在扇区
pub const FREE_MAP_SECTOR: SectorId = 0;
/// 根目录的索引节点所在扇区
pub const ROOT_DIR_SECTOR: SectorId = 1;

/// 扇区号。磁盘上 0 号扇区保留给空闲位图，
/// 因此扇区指针取值 0 表示“未分配”。
pub type SectorId = u32;

type SectorData = [u8; SECTOR_SIZE];
