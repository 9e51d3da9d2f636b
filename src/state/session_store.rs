//! 会话状态存储
//!
//! 所有会话字段的唯一读写入口：`snapshot` 拷贝、`mutate` 原子读改写。
//! 锁只在闭包内持有，任何 I/O 都在锁外进行。

use std::sync::{Mutex, MutexGuard};

use crate::domain::session::{LogEntry, SessionSnapshot, SessionState};

/// 会话状态存储
pub struct SessionStore {
    inner: Mutex<SessionState>,
}

impl SessionStore {
    /// 创建新的状态存储
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SessionState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        // 闭包内不会 panic 出半写状态，毒化后继续使用
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 获取状态快照（不含日志）
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().snapshot()
    }

    /// 原子读改写
    pub fn mutate<R>(&self, f: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    /// 追加日志
    pub fn append_log(&self, entry: LogEntry) {
        tracing::debug!(level = entry.severity.as_str(), message = %entry.message, "session log");
        self.lock().logs.push(entry);
    }

    /// 完整日志拷贝
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock().logs.to_vec()
    }

    /// 同一时刻的状态快照与最近 `tail` 条日志
    pub fn status(&self, tail: usize) -> (SessionSnapshot, Vec<LogEntry>) {
        let guard = self.lock();
        (guard.snapshot(), guard.logs.tail(tail))
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::Lifecycle;
    use std::sync::Arc;

    #[test]
    fn test_mutate_and_snapshot() {
        let store = SessionStore::new();
        let id = store.mutate(|s| s.begin_connecting("/tmp/a.ovpn", Some(10)));
        let snap = store.snapshot();
        assert_eq!(snap.session_id, id);
        assert_eq!(snap.lifecycle, Lifecycle::Connecting);
        assert_eq!(snap.pid, Some(10));
    }

    #[test]
    fn test_log_capacity_enforced() {
        let store = SessionStore::new();
        for i in 0..1100 {
            store.append_log(LogEntry::info(format!("m{}", i)));
        }
        let logs = store.logs();
        assert_eq!(logs.len(), 1024);
        assert_eq!(logs[0].message, "m76");
        assert_eq!(logs[1023].message, "m1099");
    }

    #[test]
    fn test_status_tail() {
        let store = SessionStore::new();
        for i in 0..300 {
            store.append_log(LogEntry::info(format!("m{}", i)));
        }
        let (snap, logs) = store.status(200);
        assert_eq!(snap.lifecycle, Lifecycle::Disconnected);
        assert_eq!(logs.len(), 200);
        assert_eq!(logs[0].message, "m100");
    }

    #[test]
    fn test_concurrent_mutation_is_consistent() {
        let store = Arc::new(SessionStore::new());
        let mut handles = Vec::new();
        for t in 0..8u32 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..200u32 {
                    store.mutate(|s| {
                        if s.lifecycle == Lifecycle::Disconnected {
                            s.begin_connecting("/tmp/a.ovpn", Some(t * 1000 + i));
                        } else {
                            s.reset_to_disconnected();
                        }
                    });
                    let snap = store.snapshot();
                    // pid 与生命周期始终一致
                    assert_eq!(snap.pid.is_some(), snap.lifecycle.is_active());
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
