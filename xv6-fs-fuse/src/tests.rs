use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use xv6_fs::{BLOCK_SIZE, BlockDevice, Error, FileSystem, FileType, FormatOptions, OpenFlag};

use super::*;

fn format(total_blocks: u32, ninodes: u32) -> (Arc<RamDisk>, FileSystem) {
    let disk = Arc::new(RamDisk::new(total_blocks));
    let opts = FormatOptions {
        total_blocks,
        ninodes,
        ..FormatOptions::default()
    };
    let fs = FileSystem::format(disk.clone(), Arc::new(ThreadScheduler::new()), &opts).unwrap();
    (disk, fs)
}

/// 重启：丢掉所有缓存，重新挂载
fn remount(disk: &Arc<RamDisk>) -> FileSystem {
    FileSystem::mount(disk.clone(), Arc::new(ThreadScheduler::new())).unwrap()
}

#[derive(Debug, Clone, Copy)]
enum Crash {
    BeforeWrite(u32),
    AfterWrite(u32),
}

/// 在某次写盘前后断电的盘，断电后的写全部丢失
struct CrashDisk {
    inner: Arc<RamDisk>,
    armed: Mutex<Option<Crash>>,
    crashed: AtomicBool,
}

impl CrashDisk {
    fn new(inner: Arc<RamDisk>) -> Self {
        Self {
            inner,
            armed: Mutex::new(None),
            crashed: AtomicBool::new(false),
        }
    }

    fn arm(&self, crash: Crash) {
        *self.armed.lock().unwrap() = Some(crash);
    }

    fn crashed(&self) -> bool {
        self.crashed.load(Ordering::SeqCst)
    }
}

impl BlockDevice for CrashDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        self.inner.read_block(block_id, buf);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        if self.crashed() {
            return;
        }

        let mut armed = self.armed.lock().unwrap();
        match *armed {
            Some(Crash::BeforeWrite(at)) if at as usize == block_id => {
                armed.take();
                self.crashed.store(true, Ordering::SeqCst);
            }
            Some(Crash::AfterWrite(at)) if at as usize == block_id => {
                armed.take();
                self.inner.write_block(block_id, buf);
                self.crashed.store(true, Ordering::SeqCst);
            }
            _ => self.inner.write_block(block_id, buf),
        }
    }
}

/// 格式化后挂到一块会断电的盘上
fn crashable(total_blocks: u32) -> (Arc<RamDisk>, Arc<CrashDisk>, FileSystem) {
    let (disk, fs) = format(total_blocks, 64);
    drop(fs);
    let crash = Arc::new(CrashDisk::new(disk.clone()));
    let fs = FileSystem::mount(crash.clone(), Arc::new(ThreadScheduler::new())).unwrap();
    (disk, crash, fs)
}

fn assert_quiescent(fs: &FileSystem) {
    assert!(fs.inode_usage().is_empty(), "{:?}", fs.inode_usage());
    assert_eq!(fs.cache_stats().in_use, 0);
}

#[test]
fn hello_round_trip() {
    let (disk, fs) = format(1024, 64);

    {
        let mut file = fs.open("/hello", OpenFlag::CREATE | OpenFlag::RDWR, None).unwrap();
        assert_eq!(file.write(b"hello, xv6"), Ok(10));
    }
    assert_eq!(fs.stat("/hello", None).unwrap().size, 10);
    drop(fs);

    // 重新挂载后仍然可读
    let fs = remount(&disk);
    {
        let mut file = fs.open("/hello", OpenFlag::read_only(), None).unwrap();
        assert_eq!(file.read_all().unwrap(), b"hello, xv6");
    }

    let names: Vec<_> = fs
        .read_dir("/", None)
        .unwrap()
        .into_iter()
        .map(|dirent| dirent.name)
        .collect();
    assert_eq!(names, [".", "..", "hello"]);

    fs.unlink("/hello", None).unwrap();
    assert_eq!(
        fs.open("/hello", OpenFlag::read_only(), None).err(),
        Some(Error::NotFound)
    );
    assert_quiescent(&fs);
}

#[test]
fn crash_before_commit_point_loses_the_write() {
    let (disk, crash, fs) = crashable(1024);
    let logstart = fs.superblock().logstart;

    {
        let mut file = fs.open("/f", OpenFlag::CREATE | OpenFlag::WRONLY, None).unwrap();
        crash.arm(Crash::BeforeWrite(logstart));
        assert_eq!(file.write(b"lost"), Ok(4));
    }
    assert!(crash.crashed());
    drop(fs);

    let fs = remount(&disk);
    let mut file = fs.open("/f", OpenFlag::read_only(), None).unwrap();
    assert_eq!(file.stat().size, 0);
    assert!(file.read_all().unwrap().is_empty());
}

#[test]
fn crash_after_commit_point_is_replayed() {
    let (disk, crash, fs) = crashable(1024);
    let logstart = fs.superblock().logstart;

    {
        let mut file = fs.open("/f", OpenFlag::CREATE | OpenFlag::WRONLY, None).unwrap();
        crash.arm(Crash::AfterWrite(logstart));
        assert_eq!(file.write(b"kept"), Ok(4));
    }
    assert!(crash.crashed());
    drop(fs);

    // 日志头已落盘，归宿位置还是旧的
    assert_ne!(disk.block(logstart)[..4], [0, 0, 0, 0]);

    let fs = remount(&disk);
    {
        let mut file = fs.open("/f", OpenFlag::read_only(), None).unwrap();
        assert_eq!(file.read_all().unwrap(), b"kept");
    }
    drop(fs);
    // 重放后日志头被清空
    assert_eq!(disk.block(logstart)[..4], [0, 0, 0, 0]);
}

#[test]
fn multi_block_transaction_is_atomic() {
    for case in 0..3 {
        let (disk, crash, fs) = crashable(512);
        let logstart = fs.superblock().logstart;

        let blocks: Vec<u32> = (0..3)
            .map(|_| {
                let _op = fs.begin_op();
                fs.balloc().unwrap()
            })
            .collect();

        // 提交点之前、刚过提交点、装好第一块归宿之后
        let (at, expected) = match case {
            0 => (Crash::BeforeWrite(logstart), 0),
            1 => (Crash::AfterWrite(logstart), 0xab),
            _ => (Crash::AfterWrite(blocks[0]), 0xab),
        };
        crash.arm(at);
        {
            let _op = fs.begin_op();
            for &block_id in &blocks {
                let mut buf = fs.bcache().read(fs.dev(), block_id);
                buf.fill(0xab);
                fs.log_write(&buf);
            }
        }
        assert!(crash.crashed());
        drop(fs);

        if case == 2 {
            // 只有第一块归宿写到了
            assert!(disk.block(blocks[0]).iter().all(|&byte| byte == 0xab));
            assert!(disk.block(blocks[1]).iter().all(|&byte| byte == 0));
        }

        // 同一镜像的两份各自恢复，结果一致
        let copy = Arc::new(RamDisk::from_image(disk.snapshot()));
        for image in [&copy, &disk] {
            let fs = remount(image);
            for &block_id in &blocks {
                let buf = fs.bcache().read(fs.dev(), block_id);
                assert!(buf.iter().all(|&byte| byte == expected));
            }
        }
        assert_eq!(copy.snapshot(), disk.snapshot());
    }
}

#[test]
fn full_block_write_through_file_survives_crash() {
    for survives in [false, true] {
        let (disk, crash, fs) = crashable(1024);
        let logstart = fs.superblock().logstart;
        let data = [0x5c; BLOCK_SIZE];

        {
            let mut file = fs.open("/blk", OpenFlag::CREATE | OpenFlag::WRONLY, None).unwrap();
            crash.arm(if survives {
                Crash::AfterWrite(logstart)
            } else {
                Crash::BeforeWrite(logstart)
            });
            assert_eq!(file.write(&data), Ok(BLOCK_SIZE));
        }
        assert!(crash.crashed());
        drop(fs);

        let fs = remount(&disk);
        let mut file = fs.open("/blk", OpenFlag::read_only(), None).unwrap();
        if survives {
            assert_eq!(file.stat().size, BLOCK_SIZE as u64);
            assert_eq!(file.read_all().unwrap(), data);
        } else {
            assert_eq!(file.stat().size, 0);
        }
    }
}

#[test]
fn balloc_exhausts_the_bitmap() {
    let (_disk, fs) = format(128, 32);
    let free = fs.count_free_blocks();
    assert!(free > 0);

    let mut allocated = Vec::new();
    loop {
        let _op = fs.begin_op();
        match fs.balloc() {
            Ok(block_id) => allocated.push(block_id),
            Err(e) => {
                assert_eq!(e, Error::NoSpace);
                break;
            }
        }
    }
    assert_eq!(allocated.len() as u32, free);
    assert_eq!(fs.count_free_blocks(), 0);
    assert!(
        allocated
            .iter()
            .all(|&block_id| block_id >= fs.superblock().data_start())
    );

    {
        let _op = fs.begin_op();
        fs.bfree(allocated[0]);
    }
    assert_eq!(fs.count_free_blocks(), 1);
}

#[test]
fn file_write_stops_at_full_volume() {
    let (_disk, fs) = format(128, 32);

    let mut file = fs.open("/big", OpenFlag::CREATE | OpenFlag::RDWR, None).unwrap();
    let free = fs.count_free_blocks() as usize;
    // 数据块之外还要一个间接索引块
    let payload = vec![7; (free + 8) * BLOCK_SIZE];
    assert_eq!(file.write(&payload), Ok((free - 1) * BLOCK_SIZE));
    assert_eq!(fs.count_free_blocks(), 0);
    assert_eq!(file.write(b"more"), Err(Error::NoSpace));

    let stat = file.stat();
    assert_eq!(stat.size as usize, (free - 1) * BLOCK_SIZE);
    drop(file);

    fs.unlink("/big", None).unwrap();
    assert_eq!(fs.count_free_blocks() as usize, free);
    assert_quiescent(&fs);
}

#[test]
fn concurrent_writers() {
    let (_disk, fs) = format(2048, 64);
    let fs = &fs;

    thread::scope(|s| {
        for name in ["/a", "/b"] {
            s.spawn(move || {
                let byte = name.as_bytes()[1];
                let mut file = fs.open(name, OpenFlag::CREATE | OpenFlag::WRONLY, None).unwrap();
                let payload = vec![byte; 20 * BLOCK_SIZE + 17];
                assert_eq!(file.write(&payload), Ok(payload.len()));
            });
        }
    });

    for name in ["/a", "/b"] {
        let byte = name.as_bytes()[1];
        let mut file = fs.open(name, OpenFlag::read_only(), None).unwrap();
        let data = file.read_all().unwrap();
        assert_eq!(data.len(), 20 * BLOCK_SIZE + 17);
        assert!(data.iter().all(|&b| b == byte));
    }

    let stats = fs.log_stats();
    assert!(stats.peak <= stats.capacity);
}

#[test]
fn concurrent_create_write_unlink() {
    let (_disk, fs) = format(2048, 64);
    let fs = &fs;
    let free_blocks = fs.count_free_blocks();
    let free_inodes = fs.count_free_inodes();

    thread::scope(|s| {
        for worker in 0..4 {
            s.spawn(move || {
                for round in 0..8 {
                    let path = format!("/w{worker}-{round}");
                    let payload = vec![worker as u8; (round + 1) * 700];
                    {
                        let mut file = fs.open(&path, OpenFlag::CREATE | OpenFlag::RDWR, None).unwrap();
                        assert_eq!(file.write(&payload), Ok(payload.len()));
                    }
                    {
                        let mut file = fs.open(&path, OpenFlag::read_only(), None).unwrap();
                        assert_eq!(file.read_all().unwrap(), payload);
                    }
                    fs.unlink(&path, None).unwrap();
                }
            });
        }
    });

    assert_eq!(fs.count_free_blocks(), free_blocks);
    assert_eq!(fs.count_free_inodes(), free_inodes);
    let stats = fs.log_stats();
    assert!(stats.peak <= stats.capacity);
    assert_quiescent(&fs);
}

#[test]
fn unlinked_file_lives_until_closed() {
    let (_disk, fs) = format(1024, 64);
    let free_blocks = fs.count_free_blocks();
    let free_inodes = fs.count_free_inodes();

    let mut file = fs.open("/tmp", OpenFlag::CREATE | OpenFlag::RDWR, None).unwrap();
    file.write(&[1; 3 * BLOCK_SIZE]).unwrap();
    fs.unlink("/tmp", None).unwrap();

    // 名字没了，数据还在
    assert_eq!(fs.stat("/tmp", None).unwrap_err(), Error::NotFound);
    assert_eq!(fs.count_free_blocks(), free_blocks - 3);
    assert_eq!(file.stat().nlink, 0);
    let reader = fs.open("/", OpenFlag::read_only(), None).unwrap();
    assert_eq!(reader.kind(), FileType::Directory);
    drop(reader);

    drop(file);
    assert_eq!(fs.count_free_blocks(), free_blocks);
    assert_eq!(fs.count_free_inodes(), free_inodes);
    assert_quiescent(&fs);
}

#[test]
fn references_are_balanced() {
    let (_disk, fs) = format(1024, 64);

    fs.mkdir("/d", None).unwrap();
    fs.mkdir("/d/e", None).unwrap();
    {
        let d = fs.open_dir("/d", None).unwrap();
        let mut file = fs.open("e/f", OpenFlag::CREATE | OpenFlag::WRONLY, Some(&d)).unwrap();
        file.write(b"x").unwrap();
        assert_eq!(fs.stat("e/f", Some(&d)).unwrap().size, 1);
        drop(file);
        fs.put(d);
    }
    assert_eq!(fs.unlink("/d/e", None), Err(Error::DirectoryNotEmpty));
    fs.unlink("/d/e/f", None).unwrap();
    fs.unlink("/d/e", None).unwrap();
    fs.unlink("/d", None).unwrap();

    assert_quiescent(&fs);
    assert_eq!(fs.stat("/", None).unwrap().nlink, 1);
}

#[test]
fn cache_serves_repeated_reads() {
    let (disk, fs) = format(1024, 64);

    {
        let mut file = fs.open("/c", OpenFlag::CREATE | OpenFlag::RDWR, None).unwrap();
        file.write(b"coherent").unwrap();
    }

    let (reads, writes) = (disk.reads(), disk.writes());
    let mut a = fs.open("/c", OpenFlag::read_only(), None).unwrap();
    let mut b = fs.open("/c", OpenFlag::RDWR.into(), None).unwrap();
    assert_eq!(a.read_all().unwrap(), b"coherent");
    drop(a);
    // 文件刚写过，块都在缓存里；只读的打开和关闭不写盘
    assert_eq!((disk.reads(), disk.writes()), (reads, writes));

    // 另一个打开看到的是同一份缓存
    let mut writer = fs.open("/c", OpenFlag::WRONLY.into(), None).unwrap();
    writer.write(b"C").unwrap();
    assert_eq!(b.read_all().unwrap(), b"Coherent");
}

#[test]
fn packing_rejects_long_names_and_truncates() {
    let (_disk, fs) = format(1024, 64);

    let err = pack_file(&fs, "fifteen-bytes-x", b"data").unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidInput);
    assert_eq!(
        fs.open("/fifteen-bytes-", OpenFlag::read_only(), None).err(),
        Some(Error::NotFound)
    );

    pack_file(&fs, "fourteen-bytes", b"a longer body").unwrap();
    pack_file(&fs, "fourteen-bytes", b"short").unwrap();
    let mut file = fs.open("/fourteen-bytes", OpenFlag::read_only(), None).unwrap();
    assert_eq!(file.read_all().unwrap(), b"short");
}
