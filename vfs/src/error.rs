use core::fmt;

/// 可恢复的文件系统错误，最终在系统调用边界变为负返回值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    NotFound,
    AlreadyExists,
    NotADirectory,
    IsADirectory,
    DirectoryNotEmpty,
    /// 数据块用尽
    NoSpace,
    /// 磁盘 inode 用尽
    NoInodes,
    /// 超出单文件最大容量
    FileTooLarge,
    /// 偏移越过文件末尾，或偏移加长度溢出
    InvalidOffset,
    InvalidPath,
    PermissionDenied,
    /// 超级块魔数不匹配
    NotFormatted,
    /// 超级块或日志头的内容与卷的布局不符
    Corrupted,
    CrossDevice,
    Unsupported,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            Self::NotFound => "no such file or directory",
            Self::AlreadyExists => "file exists",
            Self::NotADirectory => "not a directory",
            Self::IsADirectory => "is a directory",
            Self::DirectoryNotEmpty => "directory not empty",
            Self::NoSpace => "no space left on device",
            Self::NoInodes => "no free inodes",
            Self::FileTooLarge => "file too large",
            Self::InvalidOffset => "invalid offset",
            Self::InvalidPath => "invalid path",
            Self::PermissionDenied => "permission denied",
            Self::NotFormatted => "bad superblock magic",
            Self::Corrupted => "corrupted filesystem metadata",
            Self::CrossDevice => "cross-device link",
            Self::Unsupported => "operation not supported",
        };
        f.write_str(msg)
    }
}

impl core::error::Error for Error {}
