use super::{get_u16, put_u16};
use crate::config::DIR_SIZ;

/// 目录项：inode 编号加定长名字，编号为 0 表示空槽
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirEntry {
    inum: u16,
    /// 不足 [`DIR_SIZ`] 字节时以 0 填充，满长时没有结束符
    name: [u8; DIR_SIZ],
}

impl DirEntry {
    /// 编码后的字节数
    pub const SIZE: usize = 2 + DIR_SIZ;

    /// 超过 [`DIR_SIZ`] 字节的名字被截断
    pub fn new(name: &str, inum: u16) -> Self {
        let name = truncate(name.as_bytes());
        let mut bytes = [0; DIR_SIZ];
        bytes[..name.len()].copy_from_slice(name);

        Self {
            inum,
            name: bytes,
        }
    }

    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inum(&self) -> u32 {
        u32::from(self.inum)
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.inum == 0
    }

    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(DIR_SIZ);
        &self.name[..len]
    }

    /// 只比较前 [`DIR_SIZ`] 字节
    pub fn matches(&self, name: &str) -> bool {
        self.name() == truncate(name.as_bytes())
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0; DIR_SIZ];
        name.copy_from_slice(&raw[2..Self::SIZE]);

        Self {
            inum: get_u16(raw, 0),
            name,
        }
    }

    pub fn encode(&self, raw: &mut [u8]) {
        put_u16(raw, 0, self.inum);
        raw[2..Self::SIZE].copy_from_slice(&self.name);
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut raw = [0; Self::SIZE];
        self.encode(&mut raw);
        raw
    }
}

#[inline]
fn truncate(name: &[u8]) -> &[u8] {
    &name[..name.len().min(DIR_SIZ)]
}
