//! # 文件句柄层
//!
//! 打开文件对象：一个索引节点引用加一个字节游标。

use std::sync::Arc;

use crate::layout::DirEntry;
use crate::{Inode, Stat};

pub struct File {
    inode: Arc<Inode>,
    pos: usize,
    deny_write: bool,
}

impl File {
    /// 接管 `inode` 的一个打开引用
    pub(crate) fn new(inode: Arc<Inode>) -> Self {
        Self {
            inode,
            pos: 0,
            deny_write: false,
        }
    }

    #[inline]
    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn len(&self) -> usize {
        self.inode.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inode.is_empty()
    }

    pub fn is_dir(&self) -> bool {
        self.inode.is_dir()
    }

    pub fn stat(&self) -> Stat {
        self.inode.stat()
    }

    /// 从游标处读出并推进游标
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = self.inode.read_at(self.pos, buf);
        self.pos += n;
        n
    }

    /// 在游标处写入并推进游标
    pub fn write(&mut self, buf: &[u8]) -> usize {
        let n = self.inode.write_at(self.pos, buf);
        self.pos += n;
        n
    }

    /// 不动游标的定点读
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        self.inode.read_at(offset, buf)
    }

    /// 不动游标的定点写
    pub fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        self.inode.write_at(offset, buf)
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    #[inline]
    pub fn tell(&self) -> usize {
        self.pos
    }

    /// 禁止经由任何句柄写入底层节点。每个句柄至多生效一次。
    pub fn deny_write(&mut self) {
        if !self.deny_write {
            self.deny_write = true;
            self.inode.deny_write();
        }
    }

    pub fn allow_write(&mut self) {
        if self.deny_write {
            self.deny_write = false;
            self.inode.allow_write();
        }
    }

    /// 迭代读出目录项的名字，跳过保留的 `.` 与 `..`。
    /// 游标记录迭代进度；没有更多在用目录项时返回 `None`。
    pub fn readdir(&mut self) -> Option<String> {
        if !self.inode.is_dir() {
            return None;
        }
        if self.pos == 0 {
            self.pos = 2 * DirEntry::SIZE;
        }

        let mut entry = DirEntry::default();
        while self.inode.read_at(self.pos, entry.as_bytes_mut()) == DirEntry::SIZE {
            self.pos += DirEntry::SIZE;
            if entry.in_use() {
                return Some(entry.name().to_owned());
            }
        }
        None
    }
}

impl Drop for File {
    fn drop(&mut self) {
        if self.deny_write {
            self.inode.allow_write();
        }
        self.inode.close();
    }
}
