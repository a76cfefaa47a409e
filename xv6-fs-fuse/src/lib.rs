#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::fs::File;
use std::io;
use std::io::{Read, Write};
use std::io::{Seek, SeekFrom};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};

use block_dev::BlockDevice;
use xv6_fs::config::DIR_SIZ;
use xv6_fs::{BLOCK_SIZE, FileSystem, OpenFlag, Scheduler};

/// 以宿主机上的镜像文件作块设备
pub struct BlockFile(pub Mutex<File>);

impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.read_exact(buf).expect("not a complete block!");
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut file = self.0.lock().unwrap();
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))
            .expect("seeking error");
        file.write_all(buf).expect("not a complete block!");
    }
}

/// 内存盘，记录读写的块数
pub struct RamDisk {
    image: Mutex<Vec<u8>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl RamDisk {
    pub fn new(total_blocks: u32) -> Self {
        Self::from_image(vec![0; total_blocks as usize * BLOCK_SIZE])
    }

    pub fn from_image(image: Vec<u8>) -> Self {
        assert_eq!(image.len() % BLOCK_SIZE, 0, "image is not block aligned");
        Self {
            image: Mutex::new(image),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// 整个盘的副本
    pub fn snapshot(&self) -> Vec<u8> {
        self.image.lock().unwrap().clone()
    }

    pub fn block(&self, block_id: u32) -> Vec<u8> {
        let start = block_id as usize * BLOCK_SIZE;
        self.image.lock().unwrap()[start..start + BLOCK_SIZE].to_vec()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let image = self.image.lock().unwrap();
        buf.copy_from_slice(&image[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        let mut image = self.image.lock().unwrap();
        image[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }
}

/// 用宿主机线程实现的睡眠与唤醒。
///
/// 每个通道有一个唤醒计数，睡眠者记下计数后等它变化。
#[derive(Default)]
pub struct ThreadScheduler {
    wakeups: Mutex<HashMap<usize, u64>>,
    cond: Condvar,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scheduler for ThreadScheduler {
    fn sleep(&self, chan: usize, release: &mut dyn FnMut()) {
        let wakeups = self.wakeups.lock().unwrap();
        let seen = wakeups.get(&chan).copied().unwrap_or(0);
        // 登记之后才释放调用者的短锁
        release();
        let _wakeups = self
            .cond
            .wait_while(wakeups, |wakeups| {
                wakeups.get(&chan).copied().unwrap_or(0) == seen
            })
            .unwrap();
    }

    fn wakeup(&self, chan: usize) {
        let mut wakeups = self.wakeups.lock().unwrap();
        *wakeups.entry(chan).or_default() += 1;
        self.cond.notify_all();
    }
}

/// 把一个宿主机文件写到卷的根目录下，同名文件被覆盖。
///
/// 目录项只存 [`DIR_SIZ`] 字节的名字，更长的名字截断后会和别的文件撞名，直接拒绝。
pub fn pack_file(volume: &FileSystem, name: &str, data: &[u8]) -> io::Result<()> {
    if name.is_empty() || name.len() > DIR_SIZ || name.contains('/') {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{name:?}: names must be 1 to {DIR_SIZ} bytes without '/'"),
        ));
    }

    let mut file = volume
        .open(
            &format!("/{name}"),
            OpenFlag::CREATE | OpenFlag::WRONLY | OpenFlag::TRUNC,
            None,
        )
        .map_err(io::Error::other)?;
    let written = file.write(data).map_err(io::Error::other)?;
    if written < data.len() {
        return Err(io::Error::other(format!(
            "{name}: only {written} of {} bytes fit on the volume",
            data.len()
        )));
    }
    Ok(())
}
