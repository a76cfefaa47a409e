//! 单元测试用的内存盘与调度器

extern crate std;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::vec;
use std::vec::Vec;

use block_dev::BlockDevice;

use crate::config::BLOCK_SIZE;
use crate::sync::Scheduler;
use crate::{FileSystem, FormatOptions};

pub struct MemDisk {
    blocks: Mutex<Vec<u8>>,
    reads: AtomicU64,
}

impl MemDisk {
    pub fn new(total_blocks: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![0; total_blocks * BLOCK_SIZE]),
            reads: AtomicU64::new(0),
        }
    }

    pub fn fill_block(&self, block_id: usize, byte: u8) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].fill(byte);
    }

    pub fn block(&self, block_id: usize) -> Vec<u8> {
        let blocks = self.blocks.lock().unwrap();
        blocks[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].to_vec()
    }

    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let blocks = self.blocks.lock().unwrap();
        buf.copy_from_slice(&blocks[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        let mut blocks = self.blocks.lock().unwrap();
        blocks[block_id * BLOCK_SIZE..(block_id + 1) * BLOCK_SIZE].copy_from_slice(buf);
    }
}

/// 睡眠即让出处理器，唤醒什么也不做
pub struct YieldScheduler;

impl Scheduler for YieldScheduler {
    fn sleep(&self, _chan: usize, release: &mut dyn FnMut()) {
        release();
        thread::yield_now();
    }

    fn wakeup(&self, _chan: usize) {}
}

/// 格式化一块小内存盘
pub fn fresh_fs(total_blocks: u32, ninodes: u32) -> (Arc<MemDisk>, FileSystem) {
    let disk = Arc::new(MemDisk::new(total_blocks as usize));
    let opts = FormatOptions {
        total_blocks,
        ninodes,
        ..FormatOptions::default()
    };
    let fs = FileSystem::format(disk.clone(), Arc::new(YieldScheduler), &opts).unwrap();
    (disk, fs)
}
