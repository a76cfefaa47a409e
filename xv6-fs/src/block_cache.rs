//! # 块缓存层
//!
//! 固定 [`NBUF`] 个槽位，每个槽位缓存一个磁盘块。
//!
//! - 槽位的绑定关系与引用计数由一把短锁保护，只在查找、绑定时短暂持有；
//! - 槽位的内容由各自的睡眠锁保护，持有者可以跨越设备 I/O。
//!
//! 引用计数归零的槽位移到最近使用端，淘汰时从最久未使用端找起。

use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::mem::ManuallyDrop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use block_dev::BlockDevice;
use spin::Mutex;

use crate::DataBlock;
use crate::config::{BLOCK_SIZE, NBUF};
use crate::sync::{Scheduler, SleepLock, SleepLockGuard};

pub struct BufferCache {
    dev: u32,
    block_device: Arc<dyn BlockDevice>,
    sched: Arc<dyn Scheduler>,
    lru: Mutex<Lru>,
    slots: Vec<SleepLock<DataBlock>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// 槽位的元数据与使用顺序
struct Lru {
    meta: [BufMeta; NBUF],
    /// 队首最近使用，队尾最久未使用
    order: VecDeque<usize>,
}

#[derive(Debug, Clone, Copy, Default)]
struct BufMeta {
    /// 绑定的 (设备号, 块编号)
    key: Option<(u32, u32)>,
    refcnt: u32,
    /// 内容已从磁盘读入
    valid: bool,
}

/// 块缓存的统计信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// 引用计数非零的槽位数
    pub in_use: usize,
}

/// 持有内容锁的缓存块，析构时释放
pub struct Buf<'a> {
    cache: &'a BufferCache,
    slot: usize,
    dev: u32,
    block_id: u32,
    data: ManuallyDrop<SleepLockGuard<'a, DataBlock>>,
}

impl BufferCache {
    pub fn new(dev: u32, block_device: Arc<dyn BlockDevice>, sched: Arc<dyn Scheduler>) -> Self {
        Self {
            dev,
            block_device,
            sched,
            lru: Mutex::new(Lru {
                meta: [BufMeta::default(); NBUF],
                order: (0..NBUF).collect(),
            }),
            slots: (0..NBUF).map(|_| SleepLock::new([0; BLOCK_SIZE])).collect(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 取得绑定到 `(dev, block_id)` 的缓存块并上锁，不读盘
    pub fn get(&self, dev: u32, block_id: u32) -> Buf<'_> {
        let slot = {
            let mut lru = self.lru.lock();
            match lru.find(dev, block_id) {
                Some(slot) => {
                    lru.meta[slot].refcnt += 1;
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    log::trace!("bcache: hit block {block_id} in slot {slot}");
                    slot
                }
                None => {
                    let Some(slot) = lru.victim() else {
                        log::error!("bcache: every slot is referenced, wanted block {block_id}");
                        panic!("bget: no buffers");
                    };
                    if let Some((_, old)) = lru.meta[slot].key {
                        log::trace!("bcache: evict block {old} from slot {slot}");
                    }
                    lru.meta[slot] = BufMeta {
                        key: Some((dev, block_id)),
                        refcnt: 1,
                        valid: false,
                    };
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    log::trace!("bcache: miss block {block_id}, bound to slot {slot}");
                    slot
                }
            }
        };

        let data = self.slots[slot].lock(&*self.sched);
        Buf {
            cache: self,
            slot,
            dev,
            block_id,
            data: ManuallyDrop::new(data),
        }
    }

    /// 取得内容有效的缓存块
    pub fn read(&self, dev: u32, block_id: u32) -> Buf<'_> {
        assert_eq!(dev, self.dev, "bread: unknown device");

        let mut buf = self.get(dev, block_id);
        if !self.lru.lock().meta[buf.slot].valid {
            self.block_device
                .read_block(block_id as usize, buf.data_mut());
            self.lru.lock().meta[buf.slot].valid = true;
        }

        buf
    }

    pub fn stats(&self) -> CacheStats {
        let in_use = self
            .lru
            .lock()
            .meta
            .iter()
            .filter(|meta| meta.refcnt > 0)
            .count();

        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            in_use,
        }
    }

    /// `(dev, block_id)` 当前所在槽位的引用计数，未缓存时返回空
    pub fn refcnt(&self, dev: u32, block_id: u32) -> Option<u32> {
        let lru = self.lru.lock();
        lru.find(dev, block_id).map(|slot| lru.meta[slot].refcnt)
    }

    /// 引用计数减一，归零时移到最近使用端
    fn release(&self, slot: usize) {
        let mut lru = self.lru.lock();
        let meta = &mut lru.meta[slot];
        meta.refcnt -= 1;
        if meta.refcnt == 0 {
            lru.touch(slot);
        }
    }
}

impl Lru {
    fn find(&self, dev: u32, block_id: u32) -> Option<usize> {
        self.meta
            .iter()
            .position(|meta| meta.key == Some((dev, block_id)))
    }

    /// 最久未使用且无人引用的槽位
    fn victim(&self) -> Option<usize> {
        self.order
            .iter()
            .rev()
            .copied()
            .find(|&slot| self.meta[slot].refcnt == 0)
    }

    fn touch(&mut self, slot: usize) {
        if let Some(pos) = self.order.iter().position(|&s| s == slot) {
            self.order.remove(pos);
        }
        self.order.push_front(slot);
    }
}

impl Buf<'_> {
    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn block_id(&self) -> u32 {
        self.block_id
    }

    #[inline]
    pub fn data(&self) -> &DataBlock {
        &self.data
    }

    #[inline]
    pub fn data_mut(&mut self) -> &mut DataBlock {
        &mut self.data
    }

    /// 立即写回磁盘
    pub fn write(&self) {
        self.cache
            .block_device
            .write_block(self.block_id as usize, self.data());
    }

    /// 增加引用计数，使块在释放后也不被淘汰
    pub fn pin(&self) {
        self.cache.lru.lock().meta[self.slot].refcnt += 1;
    }

    pub fn unpin(&self) {
        self.cache.lru.lock().meta[self.slot].refcnt -= 1;
    }
}

impl Deref for Buf<'_> {
    type Target = DataBlock;

    fn deref(&self) -> &Self::Target {
        self.data()
    }
}

impl DerefMut for Buf<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data_mut()
    }
}

impl Drop for Buf<'_> {
    fn drop(&mut self) {
        // 先放内容锁，再放引用
        // SAFETY: 守卫只在此处析构一次
        unsafe { ManuallyDrop::drop(&mut self.data) };
        self.cache.release(self.slot);
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    use super::*;
    use crate::mock::{MemDisk, YieldScheduler};

    fn cache() -> (Arc<MemDisk>, BufferCache) {
        let disk = Arc::new(MemDisk::new(128));
        let cache = BufferCache::new(1, disk.clone(), Arc::new(YieldScheduler));
        (disk, cache)
    }

    #[test]
    fn read_hits_after_first_miss() {
        let (disk, cache) = cache();
        disk.fill_block(7, 0xab);

        let buf = cache.read(1, 7);
        assert!(buf.iter().all(|&b| b == 0xab));
        drop(buf);
        let buf = cache.read(1, 7);
        assert_eq!(buf[0], 0xab);
        drop(buf);

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.in_use), (1, 1, 0));
        assert_eq!(disk.reads(), 1);
    }

    #[test]
    fn write_goes_to_device() {
        let (disk, cache) = cache();

        let mut buf = cache.read(1, 3);
        buf[10] = 42;
        buf.write();
        drop(buf);

        assert_eq!(disk.block(3)[10], 42);
    }

    #[test]
    fn evicts_least_recently_released() {
        let (disk, cache) = cache();

        for block_id in 0..NBUF as u32 {
            drop(cache.read(1, block_id));
        }
        // 0 号块最早释放，最先被淘汰
        drop(cache.read(1, 0));
        drop(cache.read(1, 100));
        assert_eq!(cache.refcnt(1, 1), None);
        assert_eq!(cache.refcnt(1, 0), Some(0));
        assert_eq!(disk.reads(), NBUF as u64 + 1);
    }

    #[test]
    fn pinned_blocks_stay_resident() {
        let (_disk, cache) = cache();

        let buf = cache.read(1, 0);
        buf.pin();
        drop(buf);
        for block_id in 1..=NBUF as u32 {
            drop(cache.read(1, block_id));
        }
        assert_eq!(cache.refcnt(1, 0), Some(1));

        let buf = cache.get(1, 0);
        buf.unpin();
        drop(buf);
        assert_eq!(cache.refcnt(1, 0), Some(0));
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn exhausted_pool_is_fatal() {
        let (_disk, cache) = cache();

        let held: Vec<_> = (0..NBUF as u32).map(|b| cache.read(1, b)).collect();
        let _ = cache.read(1, NBUF as u32);
        drop(held);
    }

    #[test]
    fn concurrent_gets_share_one_slot() {
        let (disk, cache) = cache();

        thread::scope(|s| {
            for i in 0..4u8 {
                let cache = &cache;
                s.spawn(move || {
                    for _ in 0..100 {
                        let mut buf = cache.read(1, 9);
                        buf[i as usize] = buf[i as usize].wrapping_add(1);
                    }
                });
            }
        });

        // 内容只存在于缓存中，没有重复的副本
        let buf = cache.read(1, 9);
        assert_eq!(buf[..4], [100, 100, 100, 100]);
        assert_eq!(disk.reads(), 1);
        drop(buf);
        assert_eq!(cache.stats().in_use, 0);
    }
}
