//! # 块缓存层
//!
//! 块设备读写速度一般慢于内存读写速度，因此在内存中开辟
//! [`CACHE_SIZE`] 个缓存槽位，所有扇区访问都经过缓存层。
//!
//! 槽位按"最近使用"程度排成一个队列，并带有访问位，淘汰时按
//! 时钟法近似 LRU：被钉住（正被读写）的槽位不可淘汰；脏槽位
//! 在被换出前一定先写回磁盘。
//!
//! 缓存层还带两个后台任务：
//! - **预读**：顺序读文件时提名下一个扇区，由专门线程提前读入缓存；
//! - **写回**：每隔 [`WRITE_INTERVAL`] 把所有脏槽位写回磁盘。

use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use log::trace;

use crate::BlockDevice;
use crate::SectorData;
use crate::SectorId;
use crate::{CACHE_SIZE, SECTOR_SIZE, WRITE_INTERVAL};

/// 一个缓存槽位
struct Slot {
    /// 当前持有的扇区；启动时为空
    sector: Option<SectorId>,
    data: Box<SectorData>,
    /// 时钟法访问位
    accessed: bool,
    /// 钉住的槽位正被某个调用者读写，不可淘汰
    pinned: bool,
    /// 数据与磁盘不一致，换出前必须写回
    dirty: bool,
}

struct CacheState {
    slots: Vec<Slot>,
    /// 槽位下标队列，队首最久未用，释放时移到队尾
    order: Vec<usize>,
    /// 预读线程待读的扇区，新的提名覆盖旧的
    next_read_ahead: Option<SectorId>,
    shutdown: bool,
}

/// 块缓存。全部槽位元数据由一把监视器锁保护，
/// 同一个条件变量既通知"有槽位可用"也通知"有预读提名"。
pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    state: Mutex<CacheState>,
    available: Condvar,
}

impl BufferCache {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slots = (0..CACHE_SIZE)
            .map(|_| Slot {
                sector: None,
                data: Box::new([0; SECTOR_SIZE]),
                accessed: false,
                pinned: false,
                dirty: false,
            })
            .collect();

        Self {
            device,
            state: Mutex::new(CacheState {
                slots,
                order: (0..CACHE_SIZE).collect(),
                next_read_ahead: None,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// 取得一个钉住的槽位，其内容为 `sector` 的当前数据。
    ///
    /// 命中时钉住已有槽位返回；未命中时按时钟法挑选牺牲槽位，
    /// 先写回其脏数据再从设备读入新扇区。一轮扫描既没有命中
    /// 也没有候选时，在条件变量上等待后重扫。
    pub fn acquire(&self, sector: SectorId) -> SectorGuard<'_> {
        let mut state = self.state.lock().unwrap();

        loop {
            let mut victim = None;
            let mut hit = None;
            let mut cleared = false;

            for pos in 0..state.order.len() {
                let idx = state.order[pos];
                let slot = &mut state.slots[idx];
                if slot.sector == Some(sector) {
                    hit = Some(idx);
                    break;
                }
                if slot.pinned {
                    continue;
                }
                if slot.accessed {
                    slot.accessed = false;
                    cleared = true;
                } else if victim.is_none() {
                    victim = Some(idx);
                }
            }

            if let Some(idx) = hit {
                if state.slots[idx].pinned {
                    state = self.available.wait(state).unwrap();
                    continue;
                }
                let slot = &mut state.slots[idx];
                slot.pinned = true;
                slot.accessed = true;
                return SectorGuard {
                    cache: self,
                    idx,
                    dirty: false,
                };
            }

            if let Some(idx) = victim {
                let slot = &mut state.slots[idx];
                slot.pinned = true;
                if slot.dirty {
                    let old = slot.sector.unwrap();
                    trace!("evict dirty sector {old}");
                    self.device.write_sector(old, &slot.data[..]);
                    slot.dirty = false;
                }
                slot.sector = Some(sector);
                self.device.read_sector(sector, &mut slot.data[..]);
                slot.accessed = true;
                return SectorGuard {
                    cache: self,
                    idx,
                    dirty: false,
                };
            }

            // 本轮清掉了访问位就立刻重扫，否则等别人释放
            if !cleared {
                state = self.available.wait(state).unwrap();
            }
        }
    }

    /// 提名顺序读的下一个扇区，唤醒预读线程
    pub fn read_ahead(&self, sector: SectorId) {
        let mut state = self.state.lock().unwrap();
        state.next_read_ahead = Some(sector);
        self.available.notify_all();
    }

    /// 把所有脏槽位写回磁盘。
    ///
    /// 遇到被钉住的脏槽位时等待并从头重扫，保证不漏写。
    pub fn flush_all(&self) {
        let state = self.state.lock().unwrap();
        drop(self.flush_dirty(state));
    }

    fn flush_dirty<'a>(&self, mut state: MutexGuard<'a, CacheState>) -> MutexGuard<'a, CacheState> {
        'rescan: loop {
            for pos in 0..state.order.len() {
                let idx = state.order[pos];
                let slot = &mut state.slots[idx];
                if !slot.dirty {
                    continue;
                }
                if slot.pinned {
                    state = self.available.wait(state).unwrap();
                    continue 'rescan;
                }
                let sector = slot.sector.unwrap();
                self.device.write_sector(sector, &slot.data[..]);
                slot.dirty = false;
            }
            return state;
        }
    }

    /// 预读线程主体：等待提名，把提名的扇区读进缓存
    pub fn read_ahead_loop(&self) {
        loop {
            let sector;
            {
                let mut state = self.state.lock().unwrap();
                loop {
                    if state.shutdown {
                        return;
                    }
                    if let Some(next) = state.next_read_ahead.take() {
                        sector = next;
                        break;
                    }
                    state = self.available.wait(state).unwrap();
                }
            }
            // 取到即放，只为填充缓存
            drop(self.acquire(sector));
        }
    }

    /// 写回线程主体：周期性写回全部脏槽位
    pub fn write_back_loop(&self) {
        loop {
            thread::sleep(WRITE_INTERVAL);
            let state = self.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            drop(self.flush_dirty(state));
        }
    }

    /// 通知两个后台线程退出
    pub fn shutdown(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutdown = true;
        self.available.notify_all();
    }

    #[cfg(test)]
    fn cached_sectors(&self) -> Vec<SectorId> {
        let state = self.state.lock().unwrap();
        state.slots.iter().filter_map(|slot| slot.sector).collect()
    }
}

/// 一个钉住的缓存槽位。
///
/// 只有持有守卫时才能读写槽位数据；析构时解除钉住、
/// 按需标脏、把槽位移到队尾并唤醒等待者。
pub struct SectorGuard<'a> {
    cache: &'a BufferCache,
    idx: usize,
    dirty: bool,
}

impl SectorGuard<'_> {
    pub fn sector(&self) -> SectorId {
        let state = self.cache.state.lock().unwrap();
        state.slots[self.idx].sector.unwrap()
    }

    /// 从槽位内 `offset` 处拷出 `buf.len()` 字节
    pub fn read(&self, offset: usize, buf: &mut [u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        let state = self.cache.state.lock().unwrap();
        buf.copy_from_slice(&state.slots[self.idx].data[offset..offset + buf.len()]);
    }

    /// 把 `buf` 拷入槽位内 `offset` 处，释放时标脏
    pub fn write(&mut self, offset: usize, buf: &[u8]) {
        assert!(offset + buf.len() <= SECTOR_SIZE);
        let mut state = self.cache.state.lock().unwrap();
        state.slots[self.idx].data[offset..offset + buf.len()].copy_from_slice(buf);
        self.dirty = true;
    }

    /// 整个槽位清零，释放时标脏
    pub fn fill_zero(&mut self) {
        let mut state = self.cache.state.lock().unwrap();
        state.slots[self.idx].data.fill(0);
        self.dirty = true;
    }
}

impl Drop for SectorGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.cache.state.lock().unwrap();
        let slot = &mut state.slots[self.idx];
        slot.pinned = false;
        if self.dirty {
            slot.dirty = true;
        }
        // 移到最近使用端
        let pos = state.order.iter().position(|&i| i == self.idx).unwrap();
        state.order.remove(pos);
        state.order.push(self.idx);
        self.cache.available.notify_all();
    }
}
