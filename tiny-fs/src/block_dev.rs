//! # 块设备接口层
//!
//! [`BlockDevice`] 是对按扇区编址的存储设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。
//! tiny-fs 只通过块缓存层访问块设备。

use crate::SectorId;

/// 块设备驱动特质。
///
/// 读写以整个扇区为单位，缓冲区长度恒为 [`SECTOR_SIZE`](crate::SECTOR_SIZE)；
/// 设备故障直接 panic。
pub trait BlockDevice: Send + Sync {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8]);
    fn write_sector(&self, sector: SectorId, buf: &[u8]);
}
