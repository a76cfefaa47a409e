//! # 目录层
//!
//! 目录的内容就是一串 [`DirEntry`]，通过 inode 的读写接口存取。
//!
//! 路径解析自左向右逐项进行：锁住当前目录，查找下一项，解锁后再下行，
//! 任何时刻只持有一把目录锁。

use alloc::string::String;
use alloc::vec::Vec;

use vfs::Error;

use crate::FileSystem;
use crate::config::{MAX_PATH, ROOT_INUM};
use crate::inode::{Inode, InodeGuard};
use crate::layout::DirEntry;
use crate::path::Path;

impl<'fs> InodeGuard<'_, 'fs> {
    fn entry_at(&self, offset: usize) -> DirEntry {
        let mut raw = [0; DirEntry::SIZE];
        // 目录长度总是目录项大小的整数倍
        assert_eq!(
            self.read_at(offset, &mut raw),
            Ok(DirEntry::SIZE),
            "dirlookup: read"
        );
        DirEntry::decode(&raw)
    }

    fn entry_offsets(&self) -> impl Iterator<Item = usize> + use<> {
        (0..self.size as usize).step_by(DirEntry::SIZE)
    }

    /// 在目录中查找 `name`，返回其 inode 与目录项的偏移
    pub fn lookup(&self, name: &str) -> Option<(Inode<'fs>, usize)> {
        assert!(self.is_dir(), "dirlookup: not DIR");

        self.entry_offsets().find_map(|offset| {
            let entry = self.entry_at(offset);
            (!entry.is_free() && entry.matches(name))
                .then(|| (self.fs().iget(entry.inum()), offset))
        })
    }

    /// 在目录中加入 `name -> inum`，优先复用空槽，需在事务中调用
    pub fn link(&mut self, name: &str, inum: u32) -> Result<(), Error> {
        let Ok(short) = u16::try_from(inum) else {
            log::error!("dirlink: inode {inum} does not fit a directory entry");
            return Err(Error::Corrupted);
        };
        if self.lookup(name).is_some() {
            return Err(Error::AlreadyExists);
        }

        let offset = self
            .entry_offsets()
            .find(|&offset| self.entry_at(offset).is_free())
            .unwrap_or(self.size as usize);

        match self.write_at(offset, &DirEntry::new(name, short).to_bytes())? {
            DirEntry::SIZE => Ok(()),
            // 目录项跨块时只写了一部分，块大小是目录项的整数倍，不会发生
            _ => Err(Error::NoSpace),
        }
    }

    /// 清空 `offset` 处的目录项，需在事务中调用
    pub fn unlink_at(&mut self, offset: usize) {
        let written = self.write_at(offset, &DirEntry::empty().to_bytes());
        assert_eq!(written, Ok(DirEntry::SIZE), "unlink: writei");
    }

    /// 除 `.` 与 `..` 外没有别的目录项
    pub fn is_dir_empty(&self) -> bool {
        self.entry_offsets()
            .skip(2)
            .all(|offset| self.entry_at(offset).is_free())
    }

    /// 目录中所有在用的 `(inode 编号, 名字)`
    pub fn entries(&self) -> Vec<(u32, String)> {
        assert!(self.is_dir(), "dirlookup: not DIR");

        self.entry_offsets()
            .map(|offset| self.entry_at(offset))
            .filter(|entry| !entry.is_free())
            .map(|entry| {
                (
                    entry.inum(),
                    String::from_utf8_lossy(entry.name()).into_owned(),
                )
            })
            .collect()
    }
}

impl FileSystem {
    /// 解析路径得到 inode。
    ///
    /// 相对路径从 `cwd` 出发，未给出时从根目录出发。
    pub fn namei(&self, path: &str, cwd: Option<&Inode<'_>>) -> Result<Inode<'_>, Error> {
        self.namex(path, false, cwd).map(|(inode, _)| inode)
    }

    /// 解析路径的父目录，返回父目录与最后一项的名字
    pub fn nameiparent<'p>(
        &self,
        path: &'p str,
        cwd: Option<&Inode<'_>>,
    ) -> Result<(Inode<'_>, &'p str), Error> {
        self.namex(path, true, cwd)
    }

    fn namex<'p>(
        &self,
        path: &'p str,
        parent: bool,
        cwd: Option<&Inode<'_>>,
    ) -> Result<(Inode<'_>, &'p str), Error> {
        if path.is_empty() || path.len() > MAX_PATH {
            return Err(Error::InvalidPath);
        }

        let mut inode = match cwd {
            Some(cwd) if path.is_relative() => self.iget(cwd.inum()),
            _ => self.iget(ROOT_INUM),
        };

        let mut cmps = path.components().peekable();
        while let Some(name) = cmps.next() {
            let guard = inode.lock();
            if !guard.is_dir() {
                return Err(Error::NotADirectory);
            }
            if parent && cmps.peek().is_none() {
                // 提前一项停下
                drop(guard);
                return Ok((inode, name));
            }

            let Some((next, _)) = guard.lookup(name) else {
                return Err(Error::NotFound);
            };
            drop(guard);
            inode = next;
        }

        if parent {
            // 路径只有根目录
            return Err(Error::InvalidPath);
        }
        Ok((inode, ""))
    }
}
