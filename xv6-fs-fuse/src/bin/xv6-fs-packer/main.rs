mod cli;

use std::fs;
use std::fs::OpenOptions;
use std::io;
use std::sync::Arc;
use std::sync::Mutex;

use clap::Parser;
use cli::Cli;
use xv6_fs::{BLOCK_SIZE, FileSystem, FormatOptions};
use xv6_fs_fuse::{BlockFile, ThreadScheduler, pack_file};

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    if cli.check {
        check(&cli)
    } else {
        pack(&cli)
    }
}

fn pack(cli: &Cli) -> io::Result<()> {
    println!("image={:?}\nsource={:?}", cli.image, cli.source);

    let block_file = Arc::new(BlockFile(Mutex::new({
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&cli.image)?;
        fd.set_len(cli.blocks as u64 * BLOCK_SIZE as u64)?;

        fd
    })));

    let opts = FormatOptions {
        total_blocks: cli.blocks,
        ninodes: cli.inodes,
        ..FormatOptions::default()
    };
    let volume = FileSystem::format(block_file, Arc::new(ThreadScheduler::new()), &opts)
        .map_err(io::Error::other)?;

    let Some(source) = &cli.source else {
        return Ok(());
    };

    for entry in fs::read_dir(source)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_owned) else {
            log::warn!("skipping non UTF-8 file name {:?}", entry.file_name());
            continue;
        };

        let data = fs::read(entry.path())?;
        println!("file: {name:?} ({} bytes)", data.len());
        pack_file(&volume, &name, &data)?;
    }

    println!(
        "free blocks: {}, free inodes: {}",
        volume.count_free_blocks(),
        volume.count_free_inodes()
    );
    Ok(())
}

fn check(cli: &Cli) -> io::Result<()> {
    let fd = OpenOptions::new().read(true).write(true).open(&cli.image)?;
    let block_file = Arc::new(BlockFile(Mutex::new(fd)));
    // 挂载时会重放日志
    let volume = FileSystem::mount(block_file, Arc::new(ThreadScheduler::new()))
        .map_err(io::Error::other)?;

    let sb = volume.superblock();
    println!(
        "size {} nblocks {} ninodes {} nlog {}",
        sb.size, sb.nblocks, sb.ninodes, sb.nlog
    );

    for dirent in volume.read_dir("/", None).map_err(io::Error::other)? {
        let stat = volume.stat(&format!("/{}", dirent.name), None);
        match stat {
            Ok(stat) => println!(
                "{:>4} {:?} {:>8} {}",
                dirent.inode, dirent.ty, stat.size, dirent.name
            ),
            Err(e) => println!("{:>4} {:?} {}: {e}", dirent.inode, dirent.ty, dirent.name),
        }
    }

    println!(
        "free blocks: {}, free inodes: {}",
        volume.count_free_blocks(),
        volume.count_free_inodes()
    );
    Ok(())
}
