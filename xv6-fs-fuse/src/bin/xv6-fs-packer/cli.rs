use clap::Parser;
use std::path::PathBuf;

use xv6_fs::config::{DEFAULT_NINODES, FS_SIZE, MAX_INODES};

#[derive(Parser)]
pub struct Cli {
    /// Image file to build or inspect
    #[arg(long, short)]
    pub image: PathBuf,

    /// Directory whose regular files are copied into the root directory
    #[arg(long, short)]
    pub source: Option<PathBuf>,

    /// Volume size in blocks
    #[arg(long, short, default_value_t = FS_SIZE)]
    pub blocks: u32,

    /// Number of on-disk inodes
    #[arg(
        long,
        short = 'n',
        default_value_t = DEFAULT_NINODES,
        value_parser = clap::value_parser!(u32).range(2..=MAX_INODES as i64),
    )]
    pub inodes: u32,

    /// Mount an existing image and list its root directory instead of building one
    #[arg(long, short)]
    pub check: bool,
}
