//! # 磁盘数据结构层
//!
//! 卷的布局（以块为单位）：
//!
//! ```text
//! [ 引导块 | 超级块 | 日志头 日志槽... | inode 区 | 位图区 | 数据区 ]
//!     0        1      logstart          inodestart bmapstart
//! ```
//!
//! 所有结构都以小端序显式编解码，不依赖内存布局。

mod bitmap;
mod dir_entry;
mod inode;
mod log_header;
mod super_block;

pub use self::{
    bitmap::Bitmap, dir_entry::DirEntry, inode::DiskInode, log_header::LogHeader,
    super_block::SuperBlock,
};

pub(crate) use self::inode::indirect_offset;

#[inline]
fn get_u16(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

#[inline]
fn put_u16(raw: &mut [u8], offset: usize, value: u16) {
    raw[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
fn get_i16(raw: &[u8], offset: usize) -> i16 {
    get_u16(raw, offset) as i16
}

#[inline]
fn put_i16(raw: &mut [u8], offset: usize, value: i16) {
    put_u16(raw, offset, value as u16);
}

#[inline]
pub(crate) fn get_u32(raw: &[u8], offset: usize) -> u32 {
    let mut bytes = [0; 4];
    bytes.copy_from_slice(&raw[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

#[inline]
pub(crate) fn put_u32(raw: &mut [u8], offset: usize, value: u32) {
    raw[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
