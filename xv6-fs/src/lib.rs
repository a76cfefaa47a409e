#![no_std]

extern crate alloc;

/* xv6-fs 的整体架构，自上而下 */

// 文件描述符层：打开文件与系统调用级操作
mod file;

// 目录层：目录项查找、链接以及路径解析
mod dir;
mod path;

// 索引节点层：inode 的分配、加载、读写与回收
mod inode;

// 文件系统层：挂载、格式化、块分配
mod fs;

// 日志层：事务、组提交与崩溃恢复
mod journal;

// 磁盘数据结构层：磁盘上各结构的编解码
pub mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

mod sync;

pub mod config;

#[cfg(test)]
mod mock;

pub use block_dev::BlockDevice;
pub use vfs::{DirEntry, Error, FileType, Stat};

pub use self::{
    block_cache::{Buf, BufferCache, CacheStats},
    config::{BLOCK_SIZE, FS_MAGIC, ROOT_DEV, ROOT_INUM},
    file::{File, OpenFlag},
    fs::{FileSystem, FormatOptions, InodeUsage, LogStats, Transaction},
    inode::{Inode, InodeGuard},
    path::Path,
    sync::{Scheduler, SleepLock, SleepLockGuard},
};

type DataBlock = [u8; BLOCK_SIZE];
