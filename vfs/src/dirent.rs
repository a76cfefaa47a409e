use alloc::string::String;

/// 目录列举时交换的目录项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Inode number
    pub inode: u32,
    pub ty: FileType,
    pub name: String,
}

/// 磁盘 inode 的类型，数值即磁盘上的 `type` 字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i16)]
pub enum FileType {
    Directory = 1,
    #[default]
    Regular = 2,
    Device = 3,
}

impl FileType {
    /// 磁盘上 `type == 0` 表示空闲槽位，不对应任何类型
    pub const fn from_raw(raw: i16) -> Option<Self> {
        match raw {
            1 => Some(Self::Directory),
            2 => Some(Self::Regular),
            3 => Some(Self::Device),
            _ => None,
        }
    }

    #[inline]
    pub const fn raw(self) -> i16 {
        self as i16
    }
}
