use super::{get_u32, put_u32};
use crate::config::{BLOCK_SIZE, LOG_SIZE};

/// 日志头，位于日志区首块
///
/// `blocks[i]` 是第 `i` 个日志槽中副本的归宿块。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogHeader {
    len: u32,
    blocks: [u32; LOG_SIZE],
}

const _: () = assert!(LogHeader::SIZE <= BLOCK_SIZE);

impl LogHeader {
    /// 编码后的字节数
    pub const SIZE: usize = 4 + 4 * LOG_SIZE;

    pub const fn new() -> Self {
        Self {
            len: 0,
            blocks: [0; LOG_SIZE],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 已记录的块编号
    #[inline]
    pub fn blocks(&self) -> &[u32] {
        &self.blocks[..self.len()]
    }

    #[inline]
    pub fn contains(&self, block_id: u32) -> bool {
        self.blocks().contains(&block_id)
    }

    pub fn push(&mut self, block_id: u32) {
        self.blocks[self.len()] = block_id;
        self.len += 1;
    }

    #[inline]
    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// 计数超过容量的日志头视为损坏
    pub fn decode(raw: &[u8]) -> Option<Self> {
        let len = get_u32(raw, 0);
        if len as usize > LOG_SIZE {
            return None;
        }

        let mut blocks = [0; LOG_SIZE];
        for (i, block) in blocks.iter_mut().enumerate().take(len as usize) {
            *block = get_u32(raw, 4 + i * 4);
        }

        Some(Self { len, blocks })
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u32(raw, 0, self.len);
        for (i, &block) in self.blocks.iter().enumerate() {
            put_u32(raw, 4 + i * 4, block);
        }
    }
}

impl Default for LogHeader {
    fn default() -> Self {
        Self::new()
    }
}
