//! # 索引节点层
//!
//! 每个磁盘上的索引节点记录在内存中至多有一个 [`Inode`] 实例，
//! 由进程全局的打开节点表 [`InodeTable`] 保证；重复打开只会
//! 增加引用计数。
//!
//! 字节偏移到数据扇区的翻译通过多级索引完成：前
//! [`DIRECT_BLOCKS`] 个扇区由直接指针索引，其后依次经过一级
//! 间接块与二级间接块。写入路径按需分配缺失的扇区，读取路径
//! 遇到空洞即停。

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use enumflags2::bitflags;

use crate::layout::{DiskInode, DOUBLY_INDIRECT_SLOT, INDIRECT_SLOT};
use crate::BufferCache;
use crate::FreeMap;
use crate::SectorId;
use crate::{BLOCKS_PER_SECTOR, DIRECT_BLOCKS, MAX_FILE_SIZE, SECTOR_SIZE};

/// 偏移翻译的结果
enum Located {
    /// 落在这个数据扇区
    Sector(SectorId),
    /// 途经的指针为 0，即未分配
    Hole,
    /// 需要分配但空闲扇区耗尽
    NoSpace,
}

/// 内存中的索引节点
pub struct Inode {
    sector: SectorId,
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    table: Weak<InodeTable>,
    /// 入口层用它串行化同一目录上的多步操作
    lock: Mutex<()>,
    state: Mutex<InodeState>,
}

struct InodeState {
    /// 磁盘记录的内存副本，修改后写回
    record: DiskInode,
    open_count: usize,
    removed: bool,
    deny_write_count: usize,
}

/// 文件元信息
#[repr(C)]
#[derive(Debug, Default)]
pub struct Stat {
    pub inode: u64,
    pub size: u64,
    pub kind: StatKind,
}

#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StatKind {
    DIR = 0o040000,
    #[default]
    FILE = 0o100000,
}

impl Inode {
    /// 所在扇区号，也充当节点编号
    #[inline]
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().record.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_dir(&self) -> bool {
        self.state.lock().unwrap().record.is_dir()
    }

    pub fn open_count(&self) -> usize {
        self.state.lock().unwrap().open_count
    }

    pub fn stat(&self) -> Stat {
        let state = self.state.lock().unwrap();
        Stat {
            inode: self.sector as u64,
            size: state.record.len() as u64,
            kind: if state.record.is_dir() {
                StatKind::DIR
            } else {
                StatKind::FILE
            },
        }
    }

    /// 标记删除；真正的扇区释放发生在最后一个引用关闭时
    pub fn remove(&self) {
        self.state.lock().unwrap().removed = true;
    }

    pub(crate) fn removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().unwrap()
    }

    pub(crate) fn table(&self) -> Option<Arc<InodeTable>> {
        self.table.upgrade()
    }

    /// 从 `offset` 起读出至多 `buf.len()` 字节，返回实际读出的字节数。
    ///
    /// 到达文件末尾或读到空洞时提前返回。读取不会分配扇区。
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        let length = state.record.len();
        if offset >= length {
            return 0;
        }

        let mut pos = offset;
        let mut read = 0;
        let mut unused = false;
        while read < buf.len() {
            let sector = match self.walk(&mut state.record, pos, false, &mut unused) {
                Located::Sector(sector) => sector,
                _ => break,
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - read)
                .min(length - pos)
                .min(SECTOR_SIZE - sector_ofs);
            if chunk == 0 {
                break;
            }

            let guard = self.cache.acquire(sector);
            guard.read(sector_ofs, &mut buf[read..read + chunk]);
            drop(guard);

            pos += chunk;
            read += chunk;
        }

        // 顺序读还有整扇区可读时，提名下一个扇区预读
        if pos + SECTOR_SIZE - 1 < length {
            if let Located::Sector(next) =
                self.walk(&mut state.record, pos + SECTOR_SIZE - 1, false, &mut unused)
            {
                self.cache.read_ahead(next);
            }
        }
        read
    }

    /// 从 `offset` 起写入 `buf`，返回实际写入的字节数。
    ///
    /// 途经的扇区按需分配；空闲扇区耗尽或触及
    /// [`MAX_FILE_SIZE`] 时提前返回。末尾偏移超过原长度时更新长度。
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        let mut state = self.state.lock().unwrap();
        if state.deny_write_count > 0 {
            return 0;
        }

        let mut pos = offset;
        let mut written = 0;
        let mut dirtied = false;
        while written < buf.len() && pos < MAX_FILE_SIZE {
            let sector = match self.walk(&mut state.record, pos, true, &mut dirtied) {
                Located::Sector(sector) => sector,
                _ => break,
            };
            let sector_ofs = pos % SECTOR_SIZE;
            let chunk = (buf.len() - written)
                .min(MAX_FILE_SIZE - pos)
                .min(SECTOR_SIZE - sector_ofs);

            let mut guard = self.cache.acquire(sector);
            guard.write(sector_ofs, &buf[written..written + chunk]);
            drop(guard);

            pos += chunk;
            written += chunk;
        }

        if pos > state.record.len() {
            state.record.set_len(pos);
            dirtied = true;
        }
        if dirtied {
            self.write_record(&state.record);
        }
        written
    }

    /// 禁止写入。每个打开者至多调用一次。
    pub fn deny_write(&self) {
        let mut state = self.state.lock().unwrap();
        state.deny_write_count += 1;
        assert!(state.deny_write_count <= state.open_count);
    }

    /// 恢复写入。调用过 [`Inode::deny_write`] 的打开者必须在关闭前调用。
    pub fn allow_write(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.deny_write_count > 0);
        assert!(state.deny_write_count <= state.open_count);
        state.deny_write_count -= 1;
    }

    /// 关闭一个引用。最后一个引用关闭时将节点移出打开表；
    /// 若已标记删除，则释放其占有的全部扇区。
    pub(crate) fn close(self: &Arc<Self>) {
        let Some(table) = self.table.upgrade() else {
            return;
        };
        let mut open = table.open.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        state.open_count -= 1;
        if state.open_count > 0 {
            return;
        }
        open.retain(|inode| !Arc::ptr_eq(inode, self));
        let removed = state.removed;
        drop(state);
        drop(open);

        if removed {
            self.release_sectors();
        }
    }

    /// 释放数据扇区、间接扇区以及索引节点记录本身的扇区
    fn release_sectors(&self) {
        let state = self.state.lock().unwrap();
        let record = &state.record;

        for slot in 0..DIRECT_BLOCKS {
            let sector = record.sector(slot);
            if sector != 0 {
                self.free_map.release(sector, 1);
            }
        }

        let indirect = record.sector(INDIRECT_SLOT);
        if indirect != 0 {
            self.release_table(indirect, false);
        }

        let doubly = record.sector(DOUBLY_INDIRECT_SLOT);
        if doubly != 0 {
            self.release_table(doubly, true);
        }

        self.free_map.release(self.sector, 1);
    }

    /// 释放一个间接指针扇区及其引用的全部扇区
    fn release_table(&self, table: SectorId, nested: bool) {
        let guard = self.cache.acquire(table);
        for slot in 0..BLOCKS_PER_SECTOR {
            let mut word = [0; 4];
            guard.read(slot * 4, &mut word);
            let sector = SectorId::from_le_bytes(word);
            if sector == 0 {
                continue;
            }
            if nested {
                self.release_table(sector, false);
            } else {
                self.free_map.release(sector, 1);
            }
        }
        drop(guard);
        self.free_map.release(table, 1);
    }

    /// 把字节偏移翻译为数据扇区；`alloc` 决定缺失的扇区是否按需分配。
    ///
    /// 二级间接的外层与内层查找是两次独立的指针扇区访问，
    /// 每次都在钉住对应缓存槽位的情况下读写指针。
    fn walk(
        &self,
        record: &mut DiskInode,
        pos: usize,
        alloc: bool,
        dirtied: &mut bool,
    ) -> Located {
        if pos >= MAX_FILE_SIZE {
            return Located::Hole;
        }

        let idx = pos / SECTOR_SIZE;
        if idx < DIRECT_BLOCKS {
            return self.record_slot(record, idx, alloc, dirtied);
        }

        let idx = idx - DIRECT_BLOCKS;
        if idx < BLOCKS_PER_SECTOR {
            let table = match self.record_slot(record, INDIRECT_SLOT, alloc, dirtied) {
                Located::Sector(sector) => sector,
                missing => return missing,
            };
            return self.indirect_entry(table, idx, alloc);
        }

        let idx = idx - BLOCKS_PER_SECTOR;
        let table = match self.record_slot(record, DOUBLY_INDIRECT_SLOT, alloc, dirtied) {
            Located::Sector(sector) => sector,
            missing => return missing,
        };
        let outer = match self.indirect_entry(table, idx / BLOCKS_PER_SECTOR, alloc) {
            Located::Sector(sector) => sector,
            missing => return missing,
        };
        self.indirect_entry(outer, idx % BLOCKS_PER_SECTOR, alloc)
    }

    /// 记录内某个指针槽位的取值，按需分配
    fn record_slot(
        &self,
        record: &mut DiskInode,
        slot: usize,
        alloc: bool,
        dirtied: &mut bool,
    ) -> Located {
        let sector = record.sector(slot);
        if sector != 0 {
            return Located::Sector(sector);
        }
        if !alloc {
            return Located::Hole;
        }
        match self.alloc_zeroed() {
            Some(sector) => {
                record.set_sector(slot, sector);
                *dirtied = true;
                Located::Sector(sector)
            }
            None => Located::NoSpace,
        }
    }

    /// 间接指针扇区内某个槽位的取值，按需分配
    fn indirect_entry(&self, table: SectorId, slot: usize, alloc: bool) -> Located {
        let mut guard = self.cache.acquire(table);
        let mut word = [0; 4];
        guard.read(slot * 4, &mut word);
        let sector = SectorId::from_le_bytes(word);
        if sector != 0 {
            return Located::Sector(sector);
        }
        if !alloc {
            return Located::Hole;
        }
        match self.alloc_zeroed() {
            Some(sector) => {
                guard.write(slot * 4, &sector.to_le_bytes());
                Located::Sector(sector)
            }
            None => Located::NoSpace,
        }
    }

    /// 新分配一个扇区并经缓存清零
    fn alloc_zeroed(&self) -> Option<SectorId> {
        let sector = self.free_map.allocate(1)?;
        let mut guard = self.cache.acquire(sector);
        guard.fill_zero();
        Some(sector)
    }

    fn write_record(&self, record: &DiskInode) {
        let mut guard = self.cache.acquire(self.sector);
        guard.write(0, record.as_bytes());
    }
}

/// 打开节点表：扇区号到存活 [`Inode`] 的进程级映射
pub struct InodeTable {
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    open: Mutex<Vec<Arc<Inode>>>,
}

impl InodeTable {
    pub fn new(cache: Arc<BufferCache>, free_map: Arc<FreeMap>) -> Arc<Self> {
        Arc::new(Self {
            cache,
            free_map,
            open: Mutex::new(Vec::new()),
        })
    }

    /// 在 `sector` 上写出一个全新的索引节点记录。
    /// 所有扇区指针为 0，数据扇区等到写入时再分配。
    pub fn create(&self, sector: SectorId, length: usize, is_dir: bool) {
        let record = DiskInode::new(length, is_dir);
        let mut guard = self.cache.acquire(sector);
        guard.write(0, record.as_bytes());
    }

    /// 打开 `sector` 上的索引节点。
    /// 已经打开时直接增加引用计数并返回同一实例。
    pub fn open(self: &Arc<Self>, sector: SectorId) -> Arc<Inode> {
        let mut open = self.open.lock().unwrap();
        if let Some(inode) = open.iter().find(|inode| inode.sector == sector) {
            inode.state.lock().unwrap().open_count += 1;
            return Arc::clone(inode);
        }

        let mut record = DiskInode::default();
        let guard = self.cache.acquire(sector);
        guard.read(0, record.as_bytes_mut());
        drop(guard);

        let inode = Arc::new(Inode {
            sector,
            cache: Arc::clone(&self.cache),
            free_map: Arc::clone(&self.free_map),
            table: Arc::downgrade(self),
            lock: Mutex::new(()),
            state: Mutex::new(InodeState {
                record,
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
        });
        open.push(Arc::clone(&inode));
        inode
    }

    /// 再次引用一个已打开的节点
    pub fn reopen(&self, inode: &Arc<Inode>) -> Arc<Inode> {
        inode.state.lock().unwrap().open_count += 1;
        Arc::clone(inode)
    }

    #[cfg(test)]
    fn live_inodes(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}
