//! # 文件系统入口层
//!
//! 组合下层各组件：格式化与挂载、按路径的增删改查、
//! 后台线程的启停与关闭时的落盘。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, info};

use crate::dir::{dir_is_empty, resolve_parent, resolve_path, set_current_dir};
use crate::layout::DirEntry;
use crate::BlockDevice;
use crate::BufferCache;
use crate::Dir;
use crate::File;
use crate::FreeMap;
use crate::InodeTable;
use crate::{FREE_MAP_SECTOR, ROOT_DIR_SECTOR};

/// 新建目录预留的目录项个数
const DIR_ENTRY_COUNT: usize = 16;

pub struct FileSystem {
    cache: Arc<BufferCache>,
    free_map: Arc<FreeMap>,
    inodes: Arc<InodeTable>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    down: AtomicBool,
}

impl FileSystem {
    /// 在空白设备上建立文件系统：写出空闲位图文件与根目录
    pub fn format(device: Arc<dyn BlockDevice>, total_sectors: usize) -> Self {
        let fs = Self::start(device, Arc::new(FreeMap::new(total_sectors)));
        info!("formatting file system, {total_sectors} sectors");

        let map_len = fs.free_map.to_bytes().len();
        fs.inodes.create(FREE_MAP_SECTOR, map_len, false);
        fs.inodes.create(ROOT_DIR_SECTOR, DIR_ENTRY_COUNT * DirEntry::SIZE, true);
        fs.init_root();
        fs.write_free_map();
        fs
    }

    /// 挂载已格式化的设备：读入空闲位图
    pub fn mount(device: Arc<dyn BlockDevice>) -> Self {
        let fs = Self::start(device, Arc::new(FreeMap::empty()));

        let map_file = fs.inodes.open(FREE_MAP_SECTOR);
        let mut bytes = vec![0; map_file.len()];
        map_file.read_at(0, &mut bytes);
        map_file.close();
        fs.free_map.load(&bytes);

        fs.init_root();
        info!(
            "mounted file system, {} sectors free",
            fs.free_map.free_sectors()
        );
        fs
    }

    fn start(device: Arc<dyn BlockDevice>, free_map: Arc<FreeMap>) -> Self {
        let cache = Arc::new(BufferCache::new(device));
        let inodes = InodeTable::new(Arc::clone(&cache), Arc::clone(&free_map));

        let worker = Arc::clone(&cache);
        let read_ahead = thread::Builder::new()
            .name("read-ahead".into())
            .spawn(move || worker.read_ahead_loop())
            .unwrap();
        let worker = Arc::clone(&cache);
        let write_back = thread::Builder::new()
            .name("write-back".into())
            .spawn(move || worker.write_back_loop())
            .unwrap();

        Self {
            cache,
            free_map,
            inodes,
            workers: Mutex::new(vec![read_ahead, write_back]),
            down: AtomicBool::new(false),
        }
    }

    /// 根目录的保留项 `.` 与 `..` 都指向根自身；重复添加会被去重
    fn init_root(&self) {
        let root = Dir::open(self.inodes.open(ROOT_DIR_SECTOR));
        let _guard = root.inode().lock();
        root.add(".", ROOT_DIR_SECTOR);
        root.add("..", ROOT_DIR_SECTOR);
    }

    /// 新建一个长度为 `initial_len` 的文件。
    /// 数据扇区不预先分配，写入时才会占用空间。
    pub fn create(&self, path: &str, initial_len: usize) -> bool {
        let Some((parent, name)) = resolve_parent(&self.inodes, path) else {
            return false;
        };
        let _guard = parent.inode().lock();
        let Some(sector) = self.free_map.allocate(1) else {
            return false;
        };
        self.inodes.create(sector, initial_len, false);

        if parent.add(&name, sector) {
            debug!("create {path}");
            true
        } else {
            self.discard(sector);
            false
        }
    }

    /// 新建目录，并写入指向自身与父目录的保留项
    pub fn create_dir(&self, path: &str) -> bool {
        let Some((parent, name)) = resolve_parent(&self.inodes, path) else {
            return false;
        };
        let Some(sector) = self.free_map.allocate(1) else {
            return false;
        };
        self.inodes
            .create(sector, DIR_ENTRY_COUNT * DirEntry::SIZE, true);
        {
            let child = Dir::open(self.inodes.open(sector));
            let _guard = child.inode().lock();
            child.add(".", sector);
            child.add("..", parent.inode().sector());
        }

        let _guard = parent.inode().lock();
        if parent.add(&name, sector) {
            debug!("mkdir {path}");
            true
        } else {
            self.discard(sector);
            false
        }
    }

    /// 打开文件或目录。路径以 `/` 结尾时要求目标是目录。
    pub fn open(&self, path: &str) -> Option<File> {
        let inode = resolve_path(&self.inodes, path)?;
        if path.ends_with('/') && !inode.is_dir() {
            inode.close();
            return None;
        }
        Some(File::new(inode))
    }

    /// 删除文件或空目录。目标占有的扇区在最后一个打开者关闭时释放。
    pub fn remove(&self, path: &str) -> bool {
        let Some((parent, name)) = resolve_parent(&self.inodes, path) else {
            return false;
        };
        let _guard = parent.inode().lock();
        let Some(target) = parent.lookup(&name) else {
            return false;
        };

        let ok = if target.is_dir() && !dir_is_empty(&target) {
            false
        } else {
            parent.remove(&name)
        };
        target.close();
        if ok {
            debug!("remove {path}");
        }
        ok
    }

    /// 切换调用线程的当前目录
    pub fn change_dir(&self, path: &str) -> bool {
        let Some(inode) = resolve_path(&self.inodes, path) else {
            return false;
        };
        let ok = inode.is_dir();
        if ok {
            set_current_dir(inode.sector());
        }
        inode.close();
        ok
    }

    pub fn free_sectors(&self) -> usize {
        self.free_map.free_sectors()
    }

    /// 落盘并停止后台线程。之后的再次调用是空操作。
    pub fn shutdown(&self) {
        if self.down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.write_free_map();
        self.cache.flush_all();
        self.cache.shutdown();
        for worker in self.workers.lock().unwrap().drain(..) {
            worker.join().unwrap();
        }
        info!("file system shut down");
    }

    /// 回收一个没能链接进目录的索引节点
    fn discard(&self, sector: crate::SectorId) {
        let inode = self.inodes.open(sector);
        inode.remove();
        inode.close();
    }

    fn write_free_map(&self) {
        let map_file = self.inodes.open(FREE_MAP_SECTOR);
        // 写位图文件本身可能分配新扇区，写到位图不再变化为止
        loop {
            let bytes = self.free_map.to_bytes();
            map_file.write_at(0, &bytes);
            if self.free_map.to_bytes() == bytes {
                break;
            }
        }
        map_file.close();
    }
}

impl Drop for FileSystem {
    fn drop(&mut self) {
        self.shutdown();
    }
}
