#[cfg(test)]
mod tests;

use std::fs::{File, OpenOptions};
use std::io;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use tiny_fs::BlockDevice;
use tiny_fs::SectorId;
use tiny_fs::SECTOR_SIZE;

/// 以宿主机上的一个普通文件充当块设备
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    /// 新建（或清空）一个 `sectors` 个扇区大小的镜像文件
    pub fn create(path: &Path, sectors: usize) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len((sectors * SECTOR_SIZE) as u64)?;
        Ok(Self(Mutex::new(file)))
    }

    /// 打开既有的镜像文件
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Mutex::new(file)))
    }
}

impl BlockDevice for BlockFile {
    fn read_sector(&self, sector: SectorId, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete sector!");
    }

    fn write_sector(&self, sector: SectorId, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete sector!");
    }
}
