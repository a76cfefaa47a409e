//! # 同步原语
//!
//! 文件系统使用两类锁：
//!
//! - **短锁**：[`spin::Mutex`]，只保护元数据，临界区内不做 I/O、不睡眠；
//! - **长锁**：[`SleepLock`]，保护块与 inode 的内容，持有者可以跨越磁盘 I/O，
//!   争用者在锁的地址上睡眠，由调度器唤醒。

use core::cell::UnsafeCell;
use core::ops::{Deref, DerefMut};
use core::ptr;

use spin::{Mutex, MutexGuard};

/// 调度器提供的睡眠与唤醒机制
pub trait Scheduler: Send + Sync {
    /// 让当前执行流在 `chan` 上睡眠。
    ///
    /// 实现必须**先**把调用者登记为 `chan` 的等待者，**再**调用 `release`
    /// 释放调用者持有的短锁，最后才让出处理器。
    /// 这样，短锁释放之后到来的 [`wakeup`](Self::wakeup) 不会丢失。
    ///
    /// 允许无故返回，调用者总会在循环中重新检查条件。
    fn sleep(&self, chan: usize, release: &mut dyn FnMut());

    /// 唤醒所有在 `chan` 上睡眠的执行流
    fn wakeup(&self, chan: usize);
}

/// 持有短锁 `guard` 时在 `chan` 上睡眠，返回时重新持有 `lock`
pub fn sleep<'a, T>(
    sched: &dyn Scheduler,
    chan: usize,
    lock: &'a Mutex<T>,
    guard: MutexGuard<'a, T>,
) -> MutexGuard<'a, T> {
    let mut guard = Some(guard);
    sched.sleep(chan, &mut || drop(guard.take()));
    // 调度器若没有调用 release，就在这里释放
    drop(guard);
    lock.lock()
}

/// 以对象地址作为睡眠通道
#[inline]
pub fn chan_of<T>(object: &T) -> usize {
    ptr::from_ref(object) as usize
}

/// 睡眠锁
pub struct SleepLock<T> {
    locked: Mutex<bool>,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SleepLock<T> {}
unsafe impl<T: Send> Sync for SleepLock<T> {}

pub struct SleepLockGuard<'a, T> {
    lock: &'a SleepLock<T>,
    sched: &'a dyn Scheduler,
}

impl<T> SleepLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            locked: Mutex::new(false),
            data: UnsafeCell::new(data),
        }
    }

    pub fn lock<'a>(&'a self, sched: &'a dyn Scheduler) -> SleepLockGuard<'a, T> {
        let mut locked = self.locked.lock();
        while *locked {
            locked = sleep(sched, chan_of(self), &self.locked, locked);
        }
        *locked = true;

        SleepLockGuard { lock: self, sched }
    }

    /// 锁被占用时立即返回空
    pub fn try_lock<'a>(&'a self, sched: &'a dyn Scheduler) -> Option<SleepLockGuard<'a, T>> {
        let mut locked = self.locked.lock();
        if *locked {
            return None;
        }
        *locked = true;

        Some(SleepLockGuard { lock: self, sched })
    }

    pub fn is_locked(&self) -> bool {
        *self.locked.lock()
    }
}

impl<T> Drop for SleepLockGuard<'_, T> {
    fn drop(&mut self) {
        let mut locked = self.lock.locked.lock();
        *locked = false;
        self.sched.wakeup(chan_of(self.lock));
    }
}

impl<T> Deref for SleepLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // 持有守卫即独占内容
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SleepLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.data.get() }
    }
}
