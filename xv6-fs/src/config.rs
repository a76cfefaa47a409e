//! 文件系统的编译期参数

/// 块大小（字节）
pub const BLOCK_SIZE: usize = 1024;
/// 每个位图块能指示的块数
pub const BLOCK_BITS: usize = BLOCK_SIZE * 8;
/// 超级块魔数
pub const FS_MAGIC: u32 = 0x10203040;

/// 根卷的设备号
pub const ROOT_DEV: u32 = 1;
/// 根目录的 inode 编号
pub const ROOT_INUM: u32 = 1;
/// 磁盘 inode 个数的上限，目录项里的编号只有 16 位
pub const MAX_INODES: u32 = u16::MAX as u32 + 1;

/// 直接索引个数
pub const NDIRECT: usize = 12;
/// 一个间接索引块容纳的块编号个数
pub const NINDIRECT: usize = BLOCK_SIZE / 4;
/// 文件最多占用的数据块数
pub const MAX_FILE_BLOCKS: usize = NDIRECT + NINDIRECT;

/// 目录项名字的字节数
pub const DIR_SIZ: usize = 14;

/// 单个操作最多写入的不同块数
pub const MAX_OP_BLOCKS: usize = 10;
/// 日志最多容纳的块数
pub const LOG_SIZE: usize = MAX_OP_BLOCKS * 3;
/// 块缓存槽位数
pub const NBUF: usize = MAX_OP_BLOCKS * 3;
/// 内存 inode 槽位数
pub const NINODE: usize = 50;

/// 路径的最大长度
pub const MAX_PATH: usize = 128;

/// 默认卷大小（块）
pub const FS_SIZE: u32 = 4096;
/// 默认磁盘 inode 个数
pub const DEFAULT_NINODES: u32 = 200;
