//! # 日志层
//!
//! 文件系统调用把对磁盘的修改包在事务里：
//!
//! ```text
//! begin_op();
//! let buf = bread(..);
//! 修改 buf;
//! log_write(&buf);
//! end_op();
//! ```
//!
//! `log_write` 只在内存日志头里记下块编号并钉住缓存块，不写盘。
//! 最后一个进行中的操作结束时提交：
//!
//! 1. 把脏块复制到日志区的槽位；
//! 2. 写日志头，这是提交点；
//! 3. 把日志区的块安装到归宿位置；
//! 4. 清空磁盘上的日志头。
//!
//! 在 2 之前崩溃，整个事务如同从未发生；在 2 与 4 之间崩溃，
//! 挂载时重放日志即可补全。

use spin::Mutex;
use vfs::Error;

use crate::block_cache::{Buf, BufferCache};
use crate::config::{LOG_SIZE, MAX_OP_BLOCKS};
use crate::layout::{LogHeader, SuperBlock};
use crate::sync::{self, Scheduler, chan_of};

pub struct Log {
    dev: u32,
    /// 日志头所在块
    start: u32,
    /// 一次提交最多记录的块数
    capacity: usize,
    /// 日志区之后的第一块
    end: u32,
    /// 卷的总块数
    size: u32,
    state: Mutex<LogState>,
}

struct LogState {
    /// 进行中的操作数
    outstanding: usize,
    /// 正在提交
    committing: bool,
    header: LogHeader,
    /// 日志头记录过的最多块数
    peak: usize,
}

impl Log {
    pub fn new(dev: u32, sb: &SuperBlock) -> Self {
        Self {
            dev,
            start: sb.logstart,
            capacity: LOG_SIZE.min(sb.nlog.saturating_sub(1) as usize),
            end: sb.logstart + sb.nlog,
            size: sb.size,
            state: Mutex::new(LogState {
                outstanding: 0,
                committing: false,
                header: LogHeader::new(),
                peak: 0,
            }),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn peak(&self) -> usize {
        self.state.lock().peak
    }

    /// 重放磁盘上已提交的事务，挂载时调用一次。
    ///
    /// 日志头的块数超过容量，或记录的块落在日志区及其之前、卷尾之后时，
    /// 不做任何写入，返回 [`Error::Corrupted`]。
    pub fn recover(&self, bcache: &BufferCache) -> Result<(), Error> {
        let header = self.read_head(bcache)?;
        if !header.is_empty() {
            log::info!("log: replaying {} committed blocks", header.len());
        }
        self.install_trans(bcache, &header, true);
        self.write_head(bcache, &LogHeader::new());
        Ok(())
    }

    /// 开始一个操作。正在提交或日志可能放不下时睡眠。
    pub fn begin_op(&self, sched: &dyn Scheduler) {
        let mut state = self.state.lock();
        loop {
            if state.committing {
                state = sync::sleep(sched, chan_of(self), &self.state, state);
            } else if state.header.len() + (state.outstanding + 1) * MAX_OP_BLOCKS > self.capacity
            {
                // 本操作可能耗尽日志空间，等别的操作提交
                state = sync::sleep(sched, chan_of(self), &self.state, state);
            } else {
                state.outstanding += 1;
                break;
            }
        }
    }

    /// 结束一个操作，最后一个结束的操作负责提交
    pub fn end_op(&self, bcache: &BufferCache, sched: &dyn Scheduler) {
        let header = {
            let mut state = self.state.lock();
            assert!(state.outstanding > 0, "end_op: no outstanding operation");
            assert!(!state.committing, "log.committing");
            state.outstanding -= 1;
            if state.outstanding == 0 {
                state.committing = true;
                Some(state.header)
            } else {
                // begin_op 可能在等日志空间，本操作预留的空间已经还回去了
                sched.wakeup(chan_of(self));
                None
            }
        };

        if let Some(header) = header {
            // 提交期间不持有短锁，committing 标志挡住了新操作
            self.commit(bcache, &header);
            let mut state = self.state.lock();
            state.header.clear();
            state.committing = false;
            sched.wakeup(chan_of(self));
        }
    }

    /// 在日志头中记录 `buf` 所在的块并钉住它，不写盘
    pub fn write(&self, buf: &Buf) {
        let mut state = self.state.lock();
        assert!(state.outstanding > 0, "log_write outside of trans");

        let block_id = buf.block_id();
        // 同一事务中多次写同一块只记录一次
        if state.header.contains(block_id) {
            return;
        }
        if state.header.len() >= self.capacity {
            log::error!(
                "log: block {block_id} would exceed the log capacity of {}",
                self.capacity
            );
            panic!("log_write: too big");
        }

        state.header.push(block_id);
        state.peak = state.peak.max(state.header.len());
        buf.pin();
        log::trace!("log: recorded block {block_id} ({} pending)", state.header.len());
    }

    fn commit(&self, bcache: &BufferCache, header: &LogHeader) {
        if header.is_empty() {
            return;
        }

        log::debug!("log: committing {} blocks", header.len());
        self.write_log(bcache, header);
        self.write_head(bcache, header);
        self.install_trans(bcache, header, false);
        self.write_head(bcache, &LogHeader::new());
    }

    /// 把缓存中的脏块复制到日志区
    fn write_log(&self, bcache: &BufferCache, header: &LogHeader) {
        for (tail, &block_id) in header.blocks().iter().enumerate() {
            let mut to = bcache.read(self.dev, self.start + tail as u32 + 1);
            let from = bcache.read(self.dev, block_id);
            to.copy_from_slice(from.data());
            to.write();
        }
    }

    /// 把日志区的块复制到归宿位置
    fn install_trans(&self, bcache: &BufferCache, header: &LogHeader, recovering: bool) {
        for (tail, &block_id) in header.blocks().iter().enumerate() {
            let from = bcache.read(self.dev, self.start + tail as u32 + 1);
            let mut to = bcache.read(self.dev, block_id);
            to.copy_from_slice(from.data());
            to.write();
            if !recovering {
                to.unpin();
            }
        }
    }

    fn read_head(&self, bcache: &BufferCache) -> Result<LogHeader, Error> {
        let buf = bcache.read(self.dev, self.start);
        let header = LogHeader::decode(buf.data())
            .filter(|header| header.len() <= self.capacity)
            .filter(|header| {
                header
                    .blocks()
                    .iter()
                    .all(|&block_id| (self.end..self.size).contains(&block_id))
            });

        header.ok_or_else(|| {
            log::error!("log: header at block {} is corrupt", self.start);
            Error::Corrupted
        })
    }

    fn write_head(&self, bcache: &BufferCache, header: &LogHeader) {
        let mut buf = bcache.read(self.dev, self.start);
        header.encode(buf.data_mut());
        buf.write();
    }
}
