//! # 空闲扇区分配器
//!
//! 一张位图记录每个扇区是否被占用，常驻内存并由自己的锁保护。
//! 位图本身作为一个普通文件持久化，其索引节点固定在
//! [`FREE_MAP_SECTOR`](crate::FREE_MAP_SECTOR)；
//! 读出与写回由文件系统入口层在挂载与关闭时完成。

use std::sync::Mutex;

use crate::layout::Bitmap;
use crate::SectorId;
use crate::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

pub struct FreeMap {
    inner: Mutex<Bitmap>,
}

impl FreeMap {
    /// 全新的空闲位图：位图文件与根目录的索引节点扇区预先占用
    pub fn new(sector_count: usize) -> Self {
        let mut bitmap = Bitmap::new(sector_count);
        bitmap.set(FREE_MAP_SECTOR as usize);
        bitmap.set(ROOT_DIR_SECTOR as usize);
        Self {
            inner: Mutex::new(bitmap),
        }
    }

    /// 挂载前的占位状态，随后用 [`FreeMap::load`] 填入磁盘上的位图
    pub fn empty() -> Self {
        Self {
            inner: Mutex::new(Bitmap::new(0)),
        }
    }

    pub fn load(&self, bytes: &[u8]) {
        // 位图按 u64 分组持久化，位数由字节数决定；
        // 组尾多出的位在创建时即被置 1，不会影响分配
        let len = bytes.len() * 8;
        *self.inner.lock().unwrap() = Bitmap::from_bytes(bytes, len);
    }

    /// 分配连续 `count` 个扇区，返回首扇区号；空间不足返回 `None`
    pub fn allocate(&self, count: usize) -> Option<SectorId> {
        let mut bitmap = self.inner.lock().unwrap();
        bitmap.scan_and_set(count).map(|start| start as SectorId)
    }

    pub fn release(&self, sector: SectorId, count: usize) {
        let mut bitmap = self.inner.lock().unwrap();
        for freed in sector as usize..sector as usize + count {
            bitmap.reset(freed);
        }
    }

    pub fn is_used(&self, sector: SectorId) -> bool {
        self.inner.lock().unwrap().get(sector as usize)
    }

    pub fn free_sectors(&self) -> usize {
        self.inner.lock().unwrap().count_zeros()
    }

    /// 持久化用的字节形式
    pub fn to_bytes(&self) -> Vec<u8> {
        self.inner.lock().unwrap().to_bytes()
    }
}
