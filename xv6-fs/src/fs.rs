//! # 文件系统层
//!
//! 构建出磁盘的布局并挂载使用。一个 [`FileSystem`] 对应一个卷，
//! 持有该卷的块缓存、日志与 inode 缓存。

use alloc::sync::Arc;
use alloc::vec::Vec;

use block_dev::BlockDevice;
use vfs::{Error, FileType};

use crate::block_cache::{Buf, BufferCache, CacheStats};
use crate::config::{
    DEFAULT_NINODES, FS_SIZE, LOG_SIZE, MAX_INODES, MAX_OP_BLOCKS, ROOT_DEV, ROOT_INUM,
};
use crate::inode::{Inode, InodeCache};
use crate::journal::Log;
use crate::layout::{Bitmap, DirEntry, DiskInode, SuperBlock};
use crate::sync::Scheduler;

pub struct FileSystem {
    pub(crate) dev: u32,
    pub(crate) sb: SuperBlock,
    pub(crate) sched: Arc<dyn Scheduler>,
    pub(crate) bcache: BufferCache,
    pub(crate) log: Log,
    pub(crate) icache: InodeCache,
    bitmap: Bitmap,
}

/// 格式化参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions {
    /// 卷的总块数
    pub total_blocks: u32,
    /// 磁盘 inode 个数
    pub ninodes: u32,
    /// 日志区块数，含日志头
    pub nlog: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            total_blocks: FS_SIZE,
            ninodes: DEFAULT_NINODES,
            nlog: LOG_SIZE as u32 + 1,
        }
    }
}

/// 进行中的事务，析构时结束
#[must_use = "the transaction ends as soon as the guard is dropped"]
pub struct Transaction<'a> {
    fs: &'a FileSystem,
}

/// 日志的使用情况
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogStats {
    pub capacity: usize,
    /// 单次提交记录过的最多块数
    pub peak: usize,
}

/// 被引用的内存 inode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InodeUsage {
    pub inum: u32,
    pub refcnt: u32,
}

impl FileSystem {
    /// 挂载已格式化的卷，并重放日志中已提交的事务
    pub fn mount(
        block_device: Arc<dyn BlockDevice>,
        sched: Arc<dyn Scheduler>,
    ) -> Result<Self, Error> {
        let dev = ROOT_DEV;
        let bcache = BufferCache::new(dev, block_device, sched.clone());
        let sb = SuperBlock::decode(bcache.read(dev, 1).data());
        if !sb.is_valid() {
            log::warn!("fs: bad magic {:#x}, volume is not formatted", sb.magic);
            return Err(Error::NotFormatted);
        }
        if sb.nlog as usize <= MAX_OP_BLOCKS
            || sb.ninodes > MAX_INODES
            || sb.data_start() > sb.size
        {
            log::warn!(
                "fs: superblock geometry is inconsistent (nlog {}, ninodes {}, size {})",
                sb.nlog,
                sb.ninodes,
                sb.size
            );
            return Err(Error::Corrupted);
        }

        log::info!(
            "fs: size {} nblocks {} ninodes {} nlog {} logstart {} inodestart {} bmapstart {}",
            sb.size,
            sb.nblocks,
            sb.ninodes,
            sb.nlog,
            sb.logstart,
            sb.inodestart,
            sb.bmapstart
        );

        let log = Log::new(dev, &sb);
        log.recover(&bcache)?;

        Ok(Self {
            dev,
            sb,
            sched,
            bcache,
            log,
            icache: InodeCache::new(),
            bitmap: Bitmap::new(&sb),
        })
    }

    /// 格式化整个卷后挂载
    pub fn format(
        block_device: Arc<dyn BlockDevice>,
        sched: Arc<dyn Scheduler>,
        opts: &FormatOptions,
    ) -> Result<Self, Error> {
        assert!(
            opts.nlog as usize > MAX_OP_BLOCKS,
            "format: log region must hold at least one operation"
        );
        assert!(opts.ninodes > ROOT_INUM, "format: no room for the root inode");
        if opts.ninodes > MAX_INODES {
            log::warn!(
                "format: {} inodes, directory entries address at most {MAX_INODES}",
                opts.ninodes
            );
            return Err(Error::Unsupported);
        }

        let sb = SuperBlock::new(opts.total_blocks, opts.ninodes, opts.nlog);
        // 至少要放得下根目录的数据块
        if sb.data_start() >= sb.size {
            log::warn!(
                "format: {} blocks cannot hold the metadata ({} blocks)",
                sb.size,
                sb.data_start()
            );
            return Err(Error::NoSpace);
        }

        log::info!(
            "format: {} blocks, {} inodes, {} log blocks, data starts at {}",
            sb.size,
            sb.ninodes,
            sb.nlog,
            sb.data_start()
        );

        {
            let dev = ROOT_DEV;
            let bcache = BufferCache::new(dev, block_device.clone(), sched.clone());
            let root_block = sb.data_start();

            for block_id in 0..sb.size {
                let mut buf = bcache.get(dev, block_id);
                buf.fill(0);
                buf.write();
            }

            let mut buf = bcache.get(dev, 1);
            sb.encode(buf.data_mut());
            buf.write();
            drop(buf);

            // 元数据块与根目录的数据块
            for block_id in 0..=root_block {
                let (block_index, byte_index, inbyte_index) = Bitmap::position(block_id);
                let mut buf = bcache.read(dev, sb.bmapstart + block_index);
                buf[byte_index] |= 1 << inbyte_index;
                buf.write();
            }

            let mut root = DiskInode::new(FileType::Directory);
            root.nlink = 1;
            root.size = 2 * DirEntry::SIZE as u32;
            root.addrs[0] = root_block;
            let mut buf = bcache.read(dev, sb.inode_block(ROOT_INUM));
            let offset = DiskInode::offset_in_block(ROOT_INUM);
            root.encode(&mut buf[offset..offset + DiskInode::SIZE]);
            buf.write();
            drop(buf);

            let mut buf = bcache.read(dev, root_block);
            let root = ROOT_INUM as u16;
            DirEntry::new(".", root).encode(&mut buf[..DirEntry::SIZE]);
            DirEntry::new("..", root).encode(&mut buf[DirEntry::SIZE..2 * DirEntry::SIZE]);
            buf.write();
        }

        Self::mount(block_device, sched)
    }

    /// 卷未格式化时先格式化
    pub fn open_or_format(
        block_device: Arc<dyn BlockDevice>,
        sched: Arc<dyn Scheduler>,
        opts: &FormatOptions,
    ) -> Result<Self, Error> {
        match Self::mount(block_device.clone(), sched.clone()) {
            Err(Error::NotFormatted) => Self::format(block_device, sched, opts),
            mounted => mounted,
        }
    }

    #[inline]
    pub fn dev(&self) -> u32 {
        self.dev
    }

    #[inline]
    pub fn superblock(&self) -> &SuperBlock {
        &self.sb
    }

    #[inline]
    pub fn bcache(&self) -> &BufferCache {
        &self.bcache
    }

    /// 开始一个事务
    pub fn begin_op(&self) -> Transaction<'_> {
        self.log.begin_op(&*self.sched);
        Transaction { fs: self }
    }

    /// 在当前事务中记录对 `buf` 的修改
    #[inline]
    pub fn log_write(&self, buf: &Buf) {
        self.log.write(buf);
    }

    pub fn root(&self) -> Inode<'_> {
        self.iget(ROOT_INUM)
    }

    /// 分配一个清零的数据块，需在事务中调用
    pub fn balloc(&self) -> Result<u32, Error> {
        let Some(block_id) = self.bitmap.alloc(self) else {
            log::warn!("balloc: out of blocks");
            return Err(Error::NoSpace);
        };

        let mut buf = self.bcache.read(self.dev, block_id);
        buf.fill(0);
        self.log.write(&buf);

        Ok(block_id)
    }

    /// 释放数据块，需在事务中调用
    pub fn bfree(&self, block_id: u32) {
        self.bitmap.dealloc(self, block_id);
    }

    pub fn count_free_blocks(&self) -> u32 {
        self.bitmap.count_free(self)
    }

    pub fn count_free_inodes(&self) -> u32 {
        (1..self.sb.ninodes)
            .filter(|&inum| {
                let buf = self.bcache.read(self.dev, self.sb.inode_block(inum));
                let offset = DiskInode::offset_in_block(inum);
                DiskInode::decode(&buf[offset..offset + DiskInode::SIZE]).is_free()
            })
            .count() as u32
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.bcache.stats()
    }

    pub fn log_stats(&self) -> LogStats {
        LogStats {
            capacity: self.log.capacity(),
            peak: self.log.peak(),
        }
    }

    /// 引用计数非零的内存 inode
    pub fn inode_usage(&self) -> Vec<InodeUsage> {
        self.icache.usage()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        self.fs.log.end_op(&self.fs.bcache, &*self.fs.sched);
    }
}
