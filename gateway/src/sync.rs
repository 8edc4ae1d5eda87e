//! 同步工具

use std::sync::{Mutex, MutexGuard};

/// 加锁，锁中毒时仍取回数据
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
