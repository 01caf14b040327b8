//! # 目录层
//!
//! 目录是 `is_dir` 为真的索引节点，文件数据为目录项数组。
//! 路径解析逐个分量推进，`/` 开头从根目录出发，否则从调用
//! 线程的当前目录出发；任意时刻只持有一个目录的引用。

use std::cell::Cell;
use std::sync::Arc;

use crate::layout::DirEntry;
use crate::{Inode, InodeTable};
use crate::{SectorId, NAME_MAX, ROOT_DIR_SECTOR};

thread_local! {
    /// 调用线程的当前目录，相对路径从这里出发
    static CURRENT_DIR: Cell<SectorId> = const { Cell::new(ROOT_DIR_SECTOR) };
}

pub(crate) fn current_dir() -> SectorId {
    CURRENT_DIR.get()
}

pub(crate) fn set_current_dir(sector: SectorId) {
    CURRENT_DIR.set(sector);
}

/// 一个打开的目录，持有其索引节点的一个引用，析构时关闭
pub struct Dir {
    inode: Arc<Inode>,
}

impl Dir {
    pub fn open(inode: Arc<Inode>) -> Self {
        Self { inode }
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    /// 按名字查找目录项并打开对应的索引节点
    pub fn lookup(&self, name: &str) -> Option<Arc<Inode>> {
        lookup_in(&self.inode, name)
    }

    /// 加入一个名为 `name`、指向 `inode_sector` 的目录项。
    ///
    /// 名字为空、超长或重名时失败；优先复用空槽位，
    /// 没有空槽位则追加到目录文件末尾。整个目录项一次写出。
    pub fn add(&self, name: &str, inode_sector: SectorId) -> bool {
        if name.is_empty() || name.len() > NAME_MAX {
            return false;
        }
        if self.find(name).is_some() {
            return false;
        }

        let mut entry = DirEntry::default();
        let mut offset = 0;
        while self.inode.read_at(offset, entry.as_bytes_mut()) == DirEntry::SIZE {
            if !entry.in_use() {
                break;
            }
            offset += DirEntry::SIZE;
        }

        let entry = DirEntry::new(name, inode_sector);
        self.inode.write_at(offset, entry.as_bytes()) == DirEntry::SIZE
    }

    /// 作废名为 `name` 的目录项，并把目标节点标记为删除。
    /// 目标占有的扇区在它最后一次被关闭时释放。
    pub fn remove(&self, name: &str) -> bool {
        let Some((mut entry, offset)) = self.find(name) else {
            return false;
        };
        let Some(table) = self.inode.table() else {
            return false;
        };
        let target = table.open(entry.inode_sector());

        entry.clear();
        if self.inode.write_at(offset, entry.as_bytes()) != DirEntry::SIZE {
            target.close();
            return false;
        }
        target.remove();
        target.close();
        true
    }

    /// 除保留的 `.` 与 `..` 外没有任何在用目录项
    pub fn is_empty(&self) -> bool {
        dir_is_empty(&self.inode)
    }

    fn find(&self, name: &str) -> Option<(DirEntry, usize)> {
        let mut entry = DirEntry::default();
        let mut offset = 0;
        while self.inode.read_at(offset, entry.as_bytes_mut()) == DirEntry::SIZE {
            if entry.in_use() && entry.name() == name {
                return Some((entry, offset));
            }
            offset += DirEntry::SIZE;
        }
        None
    }
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.inode.close();
    }
}

pub(crate) fn dir_is_empty(inode: &Arc<Inode>) -> bool {
    let mut entry = DirEntry::default();
    let mut offset = 2 * DirEntry::SIZE;
    while inode.read_at(offset, entry.as_bytes_mut()) == DirEntry::SIZE {
        if entry.in_use() {
            return false;
        }
        offset += DirEntry::SIZE;
    }
    true
}

fn lookup_in(dir: &Arc<Inode>, name: &str) -> Option<Arc<Inode>> {
    if !dir.is_dir() {
        return None;
    }
    let table = dir.table()?;
    let mut entry = DirEntry::default();
    let mut offset = 0;
    while dir.read_at(offset, entry.as_bytes_mut()) == DirEntry::SIZE {
        if entry.in_use() && entry.name() == name {
            return Some(table.open(entry.inode_sector()));
        }
        offset += DirEntry::SIZE;
    }
    None
}

/// 解析 `path` 的父目录，返回父目录与最后一个分量的名字
pub(crate) fn resolve_parent(table: &Arc<InodeTable>, path: &str) -> Option<(Dir, String)> {
    let (inode, leaf) = walk_path(table, path, true)?;
    Some((Dir::open(inode), leaf))
}

/// 解析 `path` 指向的索引节点
pub(crate) fn resolve_path(table: &Arc<InodeTable>, path: &str) -> Option<Arc<Inode>> {
    walk_path(table, path, false).map(|(inode, _)| inode)
}

/// 逐分量推进的路径解析。
///
/// `want_parent` 为真时在最后一个分量之前停下，返回其所在目录；
/// 分量超长、途中目录缺失或已删除都导致失败。
/// 每前进一步就关闭上一个目录的引用，任意时刻只持有一个。
fn walk_path(
    table: &Arc<InodeTable>,
    path: &str,
    want_parent: bool,
) -> Option<(Arc<Inode>, String)> {
    if path.is_empty() {
        return None;
    }

    let start = if path.starts_with('/') {
        ROOT_DIR_SECTOR
    } else {
        current_dir()
    };
    let mut current = table.open(start);
    let mut components = path.split('/').filter(|c| !c.is_empty()).peekable();
    let mut leaf = String::new();

    while let Some(component) = components.next() {
        if component.len() > NAME_MAX {
            current.close();
            return None;
        }
        leaf = component.to_owned();

        if current.removed() {
            current.close();
            return None;
        }
        if want_parent && components.peek().is_none() {
            if !current.is_dir() {
                current.close();
                return None;
            }
            return Some((current, leaf));
        }

        let next = lookup_in(&current, component);
        current.close();
        current = next?;
    }

    if want_parent {
        // 路径里没有任何分量，无父目录可言
        current.close();
        return None;
    }
    Some((current, leaf))
}
