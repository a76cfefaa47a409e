//! # 文件描述符层
//!
//! [`File`] 表示一次打开，带有读写属性与偏移；[`FileSystem`] 上的
//! `open`、`mkdir`、`link`、`unlink` 等是系统调用层直接使用的操作，
//! 每个操作自成一个事务。

use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;
use core::mem::ManuallyDrop;

use enumflags2::{BitFlags, bitflags};
use spin::Mutex;
use vfs::{DirEntry, Error, FileType, Stat};

use crate::FileSystem;
use crate::config::{BLOCK_SIZE, MAX_OP_BLOCKS};
use crate::inode::{Inode, InodeGuard};

/// 一个事务最多写入的字节数。
///
/// inode 块、间接索引块、位图块各占一块，再为不对齐的写留两块，
/// 剩下的一半给数据块（分配时清零也要写一次）。
const MAX_WRITE: usize = (MAX_OP_BLOCKS - 1 - 1 - 2) / 2 * BLOCK_SIZE;

#[rustfmt::skip]
#[allow(clippy::upper_case_acronyms)]
#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFlag {
    /// 只写
    WRONLY = 0b0000_0000_0001,
    /// 读写兼备
    RDWR   = 0b0000_0000_0010,
    /// 文件不存在时创建
    CREATE = 0b0010_0000_0000,
    /// 先清空文件，再交给用户
    TRUNC  = 0b0100_0000_0000,
}

impl OpenFlag {
    // enumflags2拒绝值为0的标志
    /// 只读
    pub const RDONLY: u32 = 0b0000_0000_0000;

    #[inline]
    pub fn read_only() -> BitFlags<OpenFlag> {
        BitFlags::from_bits_truncate(Self::RDONLY)
    }
}

/// 进程打开的文件、目录或设备。
///
/// [`File::dup`] 得到的句柄共享同一次打开，包括偏移量；
/// 最后一个句柄放下时关闭。
pub struct File<'fs> {
    file: Arc<OpenFile<'fs>>,
}

struct OpenFile<'fs> {
    readable: bool,
    writable: bool,
    kind: FileType,
    major: i16,
    /// **文件**内的偏移量，只在持有 inode 锁时读改
    offset: Mutex<usize>,
    inode: ManuallyDrop<Inode<'fs>>,
}

impl<'fs> File<'fs> {
    /// 再得到一个共享本次打开的句柄
    pub fn dup(&self) -> File<'fs> {
        File {
            file: Arc::clone(&self.file),
        }
    }

    #[inline]
    pub fn readable(&self) -> bool {
        self.file.readable
    }

    #[inline]
    pub fn writable(&self) -> bool {
        self.file.writable
    }

    #[inline]
    pub fn offset(&self) -> usize {
        *self.file.offset.lock()
    }

    #[inline]
    pub fn kind(&self) -> FileType {
        self.file.kind
    }

    /// 设备文件的主设备号
    #[inline]
    pub fn major(&self) -> Option<i16> {
        (self.file.kind == FileType::Device).then_some(self.file.major)
    }

    #[inline]
    pub fn inode(&self) -> &Inode<'fs> {
        &self.file.inode
    }

    pub fn stat(&self) -> Stat {
        self.file.inode.lock().stat()
    }

    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        if !self.file.readable {
            return Err(Error::PermissionDenied);
        }
        if self.file.kind == FileType::Device {
            return Err(Error::Unsupported);
        }

        let guard = self.file.inode.lock();
        let offset = self.offset();
        let n = guard.read_at(offset, buf)?;
        *self.file.offset.lock() = offset + n;
        Ok(n)
    }

    /// 分成若干事务写入，避免单个事务超出日志容量
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, Error> {
        if !self.file.writable {
            return Err(Error::PermissionDenied);
        }
        if self.file.kind == FileType::Device {
            return Err(Error::Unsupported);
        }

        let fs = self.file.inode.fs();
        let mut written = 0;
        for chunk in buf.chunks(MAX_WRITE) {
            let op = fs.begin_op();
            let mut guard = self.file.inode.lock();
            let offset = self.offset();
            let res = guard.write_at(offset, chunk);
            if let Ok(n) = res {
                *self.file.offset.lock() = offset + n;
            }
            drop(guard);
            drop(op);

            match res {
                Ok(n) => {
                    written += n;
                    if n < chunk.len() {
                        break;
                    }
                }
                Err(e) if written == 0 => return Err(e),
                Err(_) => break,
            }
        }

        Ok(written)
    }

    /// 从当前偏移读到文件末尾
    pub fn read_all(&mut self) -> Result<Vec<u8>, Error> {
        let mut buffer = [0u8; BLOCK_SIZE];

        let mut bytes = Vec::new();
        loop {
            let len = self.read(&mut buffer)?;
            if len == 0 {
                break;
            }
            bytes.extend_from_slice(&buffer[..len]);
        }
        Ok(bytes)
    }
}

impl fmt::Debug for File<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("File")
            .field("inode", &*self.file.inode)
            .field("kind", &self.file.kind)
            .field("offset", &self.offset())
            .finish()
    }
}

impl Drop for OpenFile<'_> {
    fn drop(&mut self) {
        // 放下 inode 可能回收它，要在事务中进行
        let _op = self.inode.fs().begin_op();
        // SAFETY: inode 只在此处析构一次
        unsafe { ManuallyDrop::drop(&mut self.inode) };
    }
}

impl FileSystem {
    /// 在 `path` 处创建 `ty` 类型的 inode，需在事务中调用。
    ///
    /// 创建普通文件时，若同名普通文件已存在则直接返回它。
    fn create(
        &self,
        path: &str,
        ty: FileType,
        major: i16,
        minor: i16,
        cwd: Option<&Inode<'_>>,
    ) -> Result<Inode<'_>, Error> {
        let (parent, name) = self.nameiparent(path, cwd)?;
        let mut dir = parent.lock();

        if let Some((inode, _)) = dir.lookup(name) {
            drop(dir);
            let reuse = ty == FileType::Regular && inode.lock().kind() == FileType::Regular;
            return if reuse {
                Ok(inode)
            } else {
                Err(Error::AlreadyExists)
            };
        }

        let inode = self.ialloc(ty)?;
        let mut guard = inode.lock();
        guard.major = major;
        guard.minor = minor;
        guard.nlink = 1;
        guard.update();

        if let Err(e) = wire(&mut dir, &mut guard, name) {
            // 链接数归零，放下句柄时回收
            guard.nlink = 0;
            guard.update();
            return Err(e);
        }

        drop(guard);
        drop(dir);
        Ok(inode)
    }

    /// 打开 `path` 处的文件，相对路径从 `cwd` 出发
    pub fn open(
        &self,
        path: &str,
        flags: BitFlags<OpenFlag>,
        cwd: Option<&Inode<'_>>,
    ) -> Result<File<'_>, Error> {
        let [readable, writable] = if flags.contains(OpenFlag::WRONLY) {
            [false, true]
        } else if flags.contains(OpenFlag::RDWR) {
            [true, true]
        } else {
            [true, false]
        };

        let _op = self.begin_op();
        let inode = if flags.contains(OpenFlag::CREATE) {
            self.create(path, FileType::Regular, 0, 0, cwd)?
        } else {
            self.namei(path, cwd)?
        };

        let mut guard = inode.lock();
        if guard.is_dir() && !flags.is_empty() {
            return Err(Error::IsADirectory);
        }
        if flags.contains(OpenFlag::TRUNC) && guard.kind() == FileType::Regular {
            guard.truncate();
        }
        let kind = guard.kind();
        let major = guard.major;
        drop(guard);

        Ok(File {
            file: Arc::new(OpenFile {
                readable,
                writable,
                kind,
                major,
                offset: Mutex::new(0),
                inode: ManuallyDrop::new(inode),
            }),
        })
    }

    pub fn mkdir(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<(), Error> {
        let _op = self.begin_op();
        self.create(path, FileType::Directory, 0, 0, cwd)?;
        Ok(())
    }

    pub fn mknod(
        &self,
        path: &str,
        major: i16,
        minor: i16,
        cwd: Option<&Inode<'_>>,
    ) -> Result<(), Error> {
        let _op = self.begin_op();
        self.create(path, FileType::Device, major, minor, cwd)?;
        Ok(())
    }

    /// 为 `old` 处的文件建立新名字 `new`，不能链接目录
    pub fn link(&self, old: &str, new: &str, cwd: Option<&Inode<'_>>) -> Result<(), Error> {
        let _op = self.begin_op();
        let inode = self.namei(old, cwd)?;

        {
            let mut guard = inode.lock();
            if guard.is_dir() {
                return Err(Error::IsADirectory);
            }
            guard.nlink += 1;
            guard.update();
        }

        if let Err(e) = self.link_into(&inode, new, cwd) {
            let mut guard = inode.lock();
            guard.nlink -= 1;
            guard.update();
            return Err(e);
        }

        Ok(())
    }

    fn link_into(&self, inode: &Inode<'_>, new: &str, cwd: Option<&Inode<'_>>) -> Result<(), Error> {
        let (parent, name) = self.nameiparent(new, cwd)?;
        let mut dir = parent.lock();
        if parent.dev() != inode.dev() {
            return Err(Error::CrossDevice);
        }
        dir.link(name, inode.inum())
    }

    /// 删除目录项 `path`。
    ///
    /// inode 的链接数减一，归零后待最后一个引用放下时回收；
    /// 目录只有为空时才能删除。
    pub fn unlink(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<(), Error> {
        let _op = self.begin_op();
        let (parent, name) = self.nameiparent(path, cwd)?;
        if name == "." || name == ".." {
            return Err(Error::InvalidPath);
        }

        let mut dir = parent.lock();
        let Some((inode, offset)) = dir.lookup(name) else {
            return Err(Error::NotFound);
        };
        let mut guard = inode.lock();
        assert!(guard.nlink >= 1, "unlink: nlink < 1");

        let is_dir = guard.is_dir();
        if is_dir && !guard.is_dir_empty() {
            return Err(Error::DirectoryNotEmpty);
        }

        dir.unlink_at(offset);
        if is_dir {
            // 子目录的 `..` 不再指向父目录
            dir.nlink -= 1;
            dir.update();
        }
        drop(dir);

        guard.nlink -= 1;
        guard.update();
        Ok(())
    }

    /// 解析出一个目录，供切换工作目录使用
    pub fn open_dir(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<Inode<'_>, Error> {
        let _op = self.begin_op();
        let inode = self.namei(path, cwd)?;
        if !inode.lock().is_dir() {
            return Err(Error::NotADirectory);
        }
        Ok(inode)
    }

    /// 在事务中放下一个 inode 句柄，例如切换工作目录时旧的目录
    pub fn put(&self, inode: Inode<'_>) {
        let _op = self.begin_op();
        drop(inode);
    }

    pub fn stat(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<Stat, Error> {
        let _op = self.begin_op();
        let inode = self.namei(path, cwd)?;
        let stat = inode.lock().stat();
        Ok(stat)
    }

    /// 列出目录中的所有目录项
    pub fn read_dir(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<Vec<DirEntry>, Error> {
        let _op = self.begin_op();
        let dir = self.namei(path, cwd)?;
        let entries = {
            let guard = dir.lock();
            if !guard.is_dir() {
                return Err(Error::NotADirectory);
            }
            guard.entries()
        };

        // 不持有目录锁时再逐个查看类型
        let dirents = entries
            .into_iter()
            .map(|(inum, name)| {
                let ty = self.iget(inum).lock().kind();
                DirEntry {
                    inode: inum,
                    ty,
                    name,
                }
            })
            .collect();
        Ok(dirents)
    }
}

/// 把新 inode 挂进目录，新目录还要写入 `.` 与 `..`
fn wire(dir: &mut InodeGuard<'_, '_>, guard: &mut InodeGuard<'_, '_>, name: &str) -> Result<(), Error> {
    let inum = guard.inode().inum();

    if guard.is_dir() {
        // `.` 不计入自己的链接数，避免循环引用
        guard.link(".", inum)?;
        guard.link("..", dir.inode().inum())?;
    }
    dir.link(name, inum)?;

    if guard.is_dir() {
        dir.nlink += 1;
        dir.update();
    }
    Ok(())
}
