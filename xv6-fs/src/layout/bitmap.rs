use crate::FileSystem;
use crate::config::BLOCK_BITS;
use crate::layout::SuperBlock;

/// 位图区域，每一位对应卷上的一个块，置位表示已占用
///
/// 元数据块在格式化时已被置位，所以从头扫描也只会分到数据块。
#[derive(Debug, Clone, Copy)]
pub struct Bitmap {
    /// 位图的起始块
    start_block_id: u32,
    /// 位图占用块数
    blocks: u32,
    /// 卷的总块数，超出部分的位永不分配
    total_blocks: u32,
    /// 第一个数据块
    data_start: u32,
}

/// 块编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BlockID(u32);

impl Bitmap {
    pub fn new(sb: &SuperBlock) -> Self {
        Self {
            start_block_id: sb.bmapstart,
            blocks: sb.bitmap_blocks(),
            total_blocks: sb.size,
            data_start: sb.data_start(),
        }
    }

    /// 分配一个空闲块并在日志中记录位图的修改，返回其编号。
    /// 若位图的空间用尽，则返回空。
    ///
    /// 需在事务中调用。
    pub fn alloc(&self, fs: &FileSystem) -> Option<u32> {
        for block_index in 0..self.blocks {
            let mut buf = fs.bcache().read(fs.dev(), self.start_block_id + block_index);

            let Some((byte_index, inbyte_index)) = buf
                .iter()
                .enumerate()
                .find_map(|(byte_index, &bits)| {
                    (bits != u8::MAX).then_some((byte_index, bits.trailing_ones()))
                })
            else {
                continue;
            };

            let block_id = BlockID::encode(block_index, byte_index, inbyte_index);
            // 首个空位已越过卷尾，其后也不会再有
            if block_id.0 >= self.total_blocks {
                break;
            }

            buf[byte_index] |= 1 << inbyte_index;
            fs.log_write(&buf);
            return Some(block_id.0);
        }

        None
    }

    /// 释放块 `block_id`，释放空闲块或元数据块都是致命错误。
    ///
    /// 需在事务中调用。
    pub fn dealloc(&self, fs: &FileSystem, block_id: u32) {
        if block_id < self.data_start || block_id >= self.total_blocks {
            log::error!(
                "bfree: block {block_id} outside data region [{}, {})",
                self.data_start,
                self.total_blocks
            );
            panic!("bfree: block out of range");
        }

        let (block_index, byte_index, inbyte_index) = BlockID(block_id).decode();
        let mut buf = fs.bcache().read(fs.dev(), self.start_block_id + block_index);

        if buf[byte_index] & (1 << inbyte_index) == 0 {
            log::error!("bfree: block {block_id} is not allocated");
            panic!("bfree: freeing free block");
        }

        buf[byte_index] &= !(1 << inbyte_index);
        fs.log_write(&buf);
    }

    /// 统计数据区的空闲块数
    pub fn count_free(&self, fs: &FileSystem) -> u32 {
        let mut free = 0;
        for block_index in 0..self.blocks {
            let buf = fs.bcache().read(fs.dev(), self.start_block_id + block_index);
            let first = (block_index * BLOCK_BITS as u32).max(self.data_start);
            let last = ((block_index + 1) * BLOCK_BITS as u32).min(self.total_blocks);

            free += (first..last)
                .filter(|&block_id| {
                    let (_, byte_index, inbyte_index) = BlockID(block_id).decode();
                    buf[byte_index] & (1 << inbyte_index) == 0
                })
                .count() as u32;
        }

        free
    }

    /// 位图中 `block_id` 所在的块内字节与位
    pub(crate) fn position(block_id: u32) -> (u32, usize, u32) {
        BlockID(block_id).decode()
    }
}

impl BlockID {
    /// 线性映射编码得到块编号
    #[inline]
    fn encode(block_index: u32, byte_index: usize, inbyte_index: u32) -> Self {
        Self(block_index * BLOCK_BITS as u32 + byte_index as u32 * 8 + inbyte_index)
    }

    fn decode(self) -> (u32, usize, u32) {
        let block_index = self.0 / BLOCK_BITS as u32;
        let in_block = self.0 % BLOCK_BITS as u32;
        (block_index, (in_block / 8) as usize, in_block % 8)
    }
}
