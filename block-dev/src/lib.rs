//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、内存盘、镜像文件；
//! [`BlockDevice`] 就是对读写块设备的抽象，实现了此特质的类型称为**块设备驱动**。
//!
//! 文件系统只通过块缓存调用驱动，每次读写恰好一整块。

#![no_std]

use core::any::Any;

/// 块设备驱动特质
pub trait BlockDevice: Send + Sync + Any {
    /// 将第 `block_id` 块读入 `buf`，`buf` 的长度即块大小
    fn read_block(&self, block_id: usize, buf: &mut [u8]);

    /// 将 `buf` 写入第 `block_id` 块
    fn write_block(&self, block_id: usize, buf: &[u8]);
}
