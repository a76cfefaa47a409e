use super::{DiskInode, get_u32, put_u32};
use crate::config::{BLOCK_BITS, FS_MAGIC};

/// 超级块，位于 1 号块，记录卷的布局
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuperBlock {
    /// 魔数，用于校验卷是否已格式化
    pub magic: u32,
    /// 卷的总块数
    pub size: u32,
    /// 数据块数
    pub nblocks: u32,
    /// 磁盘 inode 数
    pub ninodes: u32,
    /// 日志区块数（含日志头）
    pub nlog: u32,
    pub logstart: u32,
    pub inodestart: u32,
    pub bmapstart: u32,
}

impl SuperBlock {
    /// 编码后的字节数
    pub const SIZE: usize = 32;

    /// 根据卷大小、inode 数与日志块数计算布局
    pub fn new(size: u32, ninodes: u32, nlog: u32) -> Self {
        let logstart = 2;
        let inodestart = logstart + nlog;
        let bmapstart = inodestart + ninodes.div_ceil(DiskInode::PER_BLOCK as u32);
        let data_start = bmapstart + size.div_ceil(BLOCK_BITS as u32);

        Self {
            magic: FS_MAGIC,
            size,
            nblocks: size.saturating_sub(data_start),
            ninodes,
            nlog,
            logstart,
            inodestart,
            bmapstart,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.magic == FS_MAGIC
    }

    /// 位图占用的块数，每块指示 [`BLOCK_BITS`] 个块
    #[inline]
    pub fn bitmap_blocks(&self) -> u32 {
        self.size.div_ceil(BLOCK_BITS as u32)
    }

    /// 第一个数据块
    #[inline]
    pub fn data_start(&self) -> u32 {
        self.bmapstart + self.bitmap_blocks()
    }

    /// 存放 `inum` 号 inode 的块
    #[inline]
    pub fn inode_block(&self, inum: u32) -> u32 {
        self.inodestart + inum / DiskInode::PER_BLOCK as u32
    }

    /// 存放块 `block_id` 对应位的位图块
    #[inline]
    pub fn bitmap_block(&self, block_id: u32) -> u32 {
        self.bmapstart + block_id / BLOCK_BITS as u32
    }

    pub fn decode(raw: &[u8]) -> Self {
        Self {
            magic: get_u32(raw, 0),
            size: get_u32(raw, 4),
            nblocks: get_u32(raw, 8),
            ninodes: get_u32(raw, 12),
            nlog: get_u32(raw, 16),
            logstart: get_u32(raw, 20),
            inodestart: get_u32(raw, 24),
            bmapstart: get_u32(raw, 28),
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u32(raw, 0, self.magic);
        put_u32(raw, 4, self.size);
        put_u32(raw, 8, self.nblocks);
        put_u32(raw, 12, self.ninodes);
        put_u32(raw, 16, self.nlog);
        put_u32(raw, 20, self.logstart);
        put_u32(raw, 24, self.inodestart);
        put_u32(raw, 28, self.bmapstart);
    }
}
