//! 磁盘 inode
//!
//! 前 [`NDIRECT`] 个数据块由直接索引指向，其余最多 [`NINDIRECT`] 块
//! 由一个间接索引块指向，间接索引块整块连续存放块编号。

use vfs::FileType;

use super::{get_i16, get_u32, put_i16, put_u32};
use crate::config::{BLOCK_SIZE, NDIRECT, NINDIRECT};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskInode {
    /// 类型，0 表示空闲
    pub ty: i16,
    /// 主设备号，仅设备文件使用
    pub major: i16,
    /// 次设备号，仅设备文件使用
    pub minor: i16,
    /// 硬链接个数
    pub nlink: i16,
    pub size: u32,
    /// [`NDIRECT`] 个直接索引，最后一个是间接索引块
    pub addrs: [u32; NDIRECT + 1],
}

impl DiskInode {
    /// 编码后的字节数
    pub const SIZE: usize = 64;
    /// 每块容纳的 inode 数
    pub const PER_BLOCK: usize = BLOCK_SIZE / Self::SIZE;

    pub fn new(ty: FileType) -> Self {
        Self {
            ty: ty.raw(),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.ty == 0
    }

    #[inline]
    pub fn kind(&self) -> Option<FileType> {
        FileType::from_raw(self.ty)
    }

    /// `inum` 号 inode 在其块内的偏移
    #[inline]
    pub fn offset_in_block(inum: u32) -> usize {
        inum as usize % Self::PER_BLOCK * Self::SIZE
    }

    /// 间接索引块所在的槽
    #[inline]
    pub fn indirect(&self) -> u32 {
        self.addrs[NDIRECT]
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut addrs = [0; NDIRECT + 1];
        for (i, addr) in addrs.iter_mut().enumerate() {
            *addr = get_u32(raw, 12 + i * 4);
        }

        Self {
            ty: get_i16(raw, 0),
            major: get_i16(raw, 2),
            minor: get_i16(raw, 4),
            nlink: get_i16(raw, 6),
            size: get_u32(raw, 8),
            addrs,
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_i16(raw, 0, self.ty);
        put_i16(raw, 2, self.major);
        put_i16(raw, 4, self.minor);
        put_i16(raw, 6, self.nlink);
        put_u32(raw, 8, self.size);
        for (i, &addr) in self.addrs.iter().enumerate() {
            put_u32(raw, 12 + i * 4, addr);
        }
    }
}

/// 间接索引块中第 `index` 个块编号的偏移
#[inline]
pub(crate) const fn indirect_offset(index: usize) -> usize {
    assert!(index < NINDIRECT);
    index * 4
}
