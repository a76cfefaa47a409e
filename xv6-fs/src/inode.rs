//! # 索引节点层
//!
//! 内存中固定 [`NINODE`] 个 inode 槽位，槽位的绑定与引用计数由短锁保护，
//! 内容（磁盘 inode 的副本）由各自的睡眠锁保护。
//!
//! - [`Inode`] 是引用计数句柄：克隆即 `idup`，析构即 `iput`；
//! - [`Inode::lock`] 得到 [`InodeGuard`]，首次上锁时从磁盘载入内容，
//!   守卫析构即解锁。
//!
//! 最后一个引用被放下时若链接数为 0，就截断并回收磁盘 inode，
//! 因此 `iput` 可能写盘，必须在事务中析构句柄。

use alloc::vec::Vec;
use core::fmt;
use core::ops::{Deref, DerefMut};

use spin::Mutex;
use vfs::{Error, FileType, Stat};

use crate::FileSystem;
use crate::config::{BLOCK_SIZE, MAX_FILE_BLOCKS, NDIRECT, NINDIRECT, NINODE};
use crate::fs::InodeUsage;
use crate::layout::{DiskInode, get_u32, indirect_offset, put_u32};
use crate::sync::{SleepLock, SleepLockGuard};

pub struct InodeCache {
    meta: Mutex<[InodeMeta; NINODE]>,
    slots: Vec<SleepLock<DiskInode>>,
}

#[derive(Debug, Clone, Copy, Default)]
struct InodeMeta {
    dev: u32,
    inum: u32,
    /// 为 0 时槽位空闲
    refcnt: u32,
    /// 内容已从磁盘载入
    valid: bool,
}

/// 内存 inode 的句柄
pub struct Inode<'fs> {
    fs: &'fs FileSystem,
    slot: usize,
    dev: u32,
    inum: u32,
}

/// 持有内容锁的 inode
pub struct InodeGuard<'a, 'fs> {
    inode: &'a Inode<'fs>,
    data: SleepLockGuard<'fs, DiskInode>,
}

impl InodeCache {
    pub fn new() -> Self {
        Self {
            meta: Mutex::new([InodeMeta::default(); NINODE]),
            slots: (0..NINODE)
                .map(|_| SleepLock::new(DiskInode::default()))
                .collect(),
        }
    }

    /// 找到或绑定 `(dev, inum)` 的槽位，引用计数加一
    fn get(&self, dev: u32, inum: u32) -> usize {
        let mut meta = self.meta.lock();

        if let Some(slot) = meta
            .iter()
            .position(|m| m.refcnt > 0 && m.dev == dev && m.inum == inum)
        {
            meta[slot].refcnt += 1;
            return slot;
        }

        let Some(slot) = meta.iter().position(|m| m.refcnt == 0) else {
            log::error!("icache: every slot is referenced, wanted inode {inum}");
            panic!("iget: no inodes");
        };
        meta[slot] = InodeMeta {
            dev,
            inum,
            refcnt: 1,
            valid: false,
        };
        slot
    }

    #[inline]
    fn is_valid(&self, slot: usize) -> bool {
        self.meta.lock()[slot].valid
    }

    #[inline]
    fn set_valid(&self, slot: usize, valid: bool) {
        self.meta.lock()[slot].valid = valid;
    }

    pub fn usage(&self) -> Vec<InodeUsage> {
        self.meta
            .lock()
            .iter()
            .filter(|m| m.refcnt > 0)
            .map(|m| InodeUsage {
                inum: m.inum,
                refcnt: m.refcnt,
            })
            .collect()
    }
}

impl Default for InodeCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem {
    /// 取得 `inum` 号 inode 的句柄，不读盘
    pub fn iget(&self, inum: u32) -> Inode<'_> {
        let slot = self.icache.get(self.dev, inum);
        Inode {
            fs: self,
            slot,
            dev: self.dev,
            inum,
        }
    }

    /// 在磁盘上分配一个 `ty` 类型的 inode，需在事务中调用
    pub fn ialloc(&self, ty: FileType) -> Result<Inode<'_>, Error> {
        for inum in 1..self.sb.ninodes {
            let mut buf = self.bcache.read(self.dev, self.sb.inode_block(inum));
            let offset = DiskInode::offset_in_block(inum);
            let raw = &mut buf[offset..offset + DiskInode::SIZE];

            if DiskInode::decode(raw).is_free() {
                DiskInode::new(ty).encode(raw);
                self.log.write(&buf);
                drop(buf);
                log::debug!("ialloc: inode {inum} as {ty:?}");
                return Ok(self.iget(inum));
            }
        }

        log::warn!("ialloc: no free inodes");
        Err(Error::NoInodes)
    }
}

impl<'fs> Inode<'fs> {
    #[inline]
    pub fn inum(&self) -> u32 {
        self.inum
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn fs(&self) -> &'fs FileSystem {
        self.fs
    }

    /// 上锁，首次上锁时从磁盘载入
    pub fn lock(&self) -> InodeGuard<'_, 'fs> {
        let fs = self.fs;
        let mut data = fs.icache.slots[self.slot].lock(&*fs.sched);

        if !fs.icache.is_valid(self.slot) {
            let buf = fs.bcache.read(self.dev, fs.sb.inode_block(self.inum));
            let offset = DiskInode::offset_in_block(self.inum);
            *data = DiskInode::decode(&buf[offset..offset + DiskInode::SIZE]);
            drop(buf);

            if data.is_free() {
                log::error!("ilock: inode {} has no type", self.inum);
                panic!("ilock: no type");
            }
            fs.icache.set_valid(self.slot, true);
        }

        InodeGuard { inode: self, data }
    }
}

impl Clone for Inode<'_> {
    fn clone(&self) -> Self {
        self.fs.icache.meta.lock()[self.slot].refcnt += 1;
        Self {
            fs: self.fs,
            slot: self.slot,
            dev: self.dev,
            inum: self.inum,
        }
    }
}

impl Drop for Inode<'_> {
    fn drop(&mut self) {
        let fs = self.fs;
        let mut meta = fs.icache.meta.lock();

        if meta[self.slot].refcnt == 1 && meta[self.slot].valid {
            // 只剩本句柄，不会有人持有内容锁
            let Some(data) = fs.icache.slots[self.slot].try_lock(&*fs.sched) else {
                panic!("iput: inode {} is locked", self.inum);
            };
            let mut guard = InodeGuard { inode: &*self, data };

            if guard.nlink == 0 {
                // 没有目录项指向它，也没有别的引用，回收
                drop(meta);
                log::debug!("iput: freeing inode {}", self.inum);
                guard.truncate();
                guard.ty = 0;
                guard.update();
                fs.icache.set_valid(self.slot, false);
                drop(guard);
                meta = fs.icache.meta.lock();
            }
        }

        meta[self.slot].refcnt -= 1;
    }
}

impl fmt::Debug for Inode<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inode")
            .field("dev", &self.dev)
            .field("inum", &self.inum)
            .finish()
    }
}

impl<'fs> InodeGuard<'_, 'fs> {
    #[inline]
    pub fn inode(&self) -> &Inode<'fs> {
        self.inode
    }

    #[inline]
    pub(crate) fn fs(&self) -> &'fs FileSystem {
        self.inode.fs
    }

    /// 上锁后类型必然有效
    #[inline]
    pub fn kind(&self) -> FileType {
        self.data.kind().unwrap_or_default()
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.kind() == FileType::Directory
    }

    pub fn stat(&self) -> Stat {
        Stat {
            dev: self.inode.dev,
            ino: self.inode.inum,
            ty: self.kind(),
            nlink: self.data.nlink as u16,
            size: self.data.size as u64,
        }
    }

    /// 把内存副本写回磁盘，需在事务中调用
    pub fn update(&self) {
        let fs = self.fs();
        let mut buf = fs.bcache.read(self.inode.dev, fs.sb.inode_block(self.inode.inum));
        let offset = DiskInode::offset_in_block(self.inode.inum);
        self.data
            .encode(&mut buf[offset..offset + DiskInode::SIZE]);
        fs.log.write(&buf);
    }

    /// 文件第 `index` 块的块编号，未分配时为 0
    fn block_at(&self, index: usize) -> u32 {
        if index < NDIRECT {
            return self.data.addrs[index];
        }

        let index = index - NDIRECT;
        assert!(index < NINDIRECT, "bmap: out of range");
        let indirect = self.data.indirect();
        if indirect == 0 {
            return 0;
        }
        let fs = self.fs();
        get_u32(&fs.bcache.read(self.inode.dev, indirect)[..], indirect_offset(index))
    }

    /// 文件第 `index` 块的块编号，未分配时分配，块用尽时返回空
    fn bmap(&mut self, index: usize) -> Option<u32> {
        let fs = self.fs();

        if index < NDIRECT {
            if self.data.addrs[index] == 0 {
                self.data.addrs[index] = fs.balloc().ok()?;
            }
            return Some(self.data.addrs[index]);
        }

        let index = index - NDIRECT;
        assert!(index < NINDIRECT, "bmap: out of range");
        if self.data.addrs[NDIRECT] == 0 {
            self.data.addrs[NDIRECT] = fs.balloc().ok()?;
        }

        let mut buf = fs.bcache.read(self.inode.dev, self.data.addrs[NDIRECT]);
        let mut block_id = get_u32(&buf[..], indirect_offset(index));
        if block_id == 0 {
            block_id = fs.balloc().ok()?;
            put_u32(&mut buf[..], indirect_offset(index), block_id);
            fs.log.write(&buf);
        }

        Some(block_id)
    }

    /// 从 `offset` 读入 `buf`，返回读到的字节数，越过文件末尾的部分不读
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidOffset)?;
        let size = self.data.size as usize;
        if offset > size {
            return Ok(0);
        }
        let end = end.min(size);

        let fs = self.fs();
        let mut pos = offset;
        while pos < end {
            let inblock = pos % BLOCK_SIZE;
            let n = (end - pos).min(BLOCK_SIZE - inblock);
            let dst = &mut buf[pos - offset..pos - offset + n];

            match self.block_at(pos / BLOCK_SIZE) {
                0 => dst.fill(0),
                block_id => {
                    let block = fs.bcache.read(self.inode.dev, block_id);
                    dst.copy_from_slice(&block[inblock..inblock + n]);
                }
            }
            pos += n;
        }

        Ok(end - offset)
    }

    /// 把 `buf` 写到 `offset` 处，返回写入的字节数，需在事务中调用。
    ///
    /// 写入可以延长文件，但不能从文件末尾之后开始；
    /// 数据块用尽时返回已写入的部分。
    pub fn write_at(&mut self, offset: usize, buf: &[u8]) -> Result<usize, Error> {
        let end = offset.checked_add(buf.len()).ok_or(Error::InvalidOffset)?;
        if offset > self.data.size as usize {
            return Err(Error::InvalidOffset);
        }
        if end > MAX_FILE_BLOCKS * BLOCK_SIZE {
            log::warn!(
                "writei: inode {} would grow to {end} bytes, past the maximum file size",
                self.inode.inum
            );
            return Err(Error::FileTooLarge);
        }

        let fs = self.fs();
        let mut pos = offset;
        while pos < end {
            let Some(block_id) = self.bmap(pos / BLOCK_SIZE) else {
                break;
            };
            let inblock = pos % BLOCK_SIZE;
            let n = (end - pos).min(BLOCK_SIZE - inblock);

            let mut block = fs.bcache.read(self.inode.dev, block_id);
            block[inblock..inblock + n].copy_from_slice(&buf[pos - offset..pos - offset + n]);
            fs.log.write(&block);
            pos += n;
        }

        if pos > self.data.size as usize {
            self.data.size = pos as u32;
        }
        // bmap 可能改动了索引，无论如何都写回
        self.update();

        if pos == offset && !buf.is_empty() {
            return Err(Error::NoSpace);
        }
        Ok(pos - offset)
    }

    /// 释放所有数据块与间接索引块，长度归零，需在事务中调用
    pub fn truncate(&mut self) {
        let fs = self.fs();

        for index in 0..NDIRECT {
            let block_id = self.data.addrs[index];
            if block_id != 0 {
                fs.bfree(block_id);
                self.data.addrs[index] = 0;
            }
        }

        let indirect = self.data.addrs[NDIRECT];
        if indirect != 0 {
            let buf = fs.bcache.read(self.inode.dev, indirect);
            for index in 0..NINDIRECT {
                let block_id = get_u32(&buf[..], indirect_offset(index));
                if block_id != 0 {
                    fs.bfree(block_id);
                }
            }
            drop(buf);
            fs.bfree(indirect);
            self.data.addrs[NDIRECT] = 0;
        }

        self.data.size = 0;
        self.update();
    }
}

impl Deref for InodeGuard<'_, '_> {
    type Target = DiskInode;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for InodeGuard<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}
