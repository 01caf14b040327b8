//! # 磁盘数据结构层
//!
//! tiny-fs 的磁盘布局：
//! 0 号扇区为空闲位图文件的索引节点，1 号扇区为根目录的索引节点；
//! 其余扇区或者空闲，或者是索引节点记录、间接指针扇区、数据扇区，
//! 类型完全由索引节点树的引用方式决定。

mod inode;
pub use inode::{DiskInode, DOUBLY_INDIRECT_SLOT, INDIRECT_SLOT, INODE_SLOTS};

mod dir_entry;
pub use dir_entry::DirEntry;

mod bitmap;
pub use bitmap::Bitmap;
