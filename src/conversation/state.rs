//! 活跃会话表（进程级全局状态）
//!
//! 会话只活在内存里，end 时才落库。对同一个会话 id 的并发 Reply 必须
//! 串行化（否则转录会交错/重复），跨会话的调用完全并行——因此表本身用
//! 无锁哈希表，每个会话各配一把异步互斥锁。
//!
//! 闲置回收是对"表无限增长"这一已知缺口的刻意补强：超过最大闲置时长的
//! 会话按"放弃"处理直接丢弃，不落库。扫描永远不会打断进行中的一轮——
//! 锁被占用的会话直接跳过，等下一轮扫描。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::conversation::types::ActiveSession;
use crate::models::Scenario;

pub struct SessionTable {
    sessions: DashMap<String, Arc<Mutex<ActiveSession>>>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// 为场景开启新会话，返回不透明的会话 id
    pub fn start(&self, scenario: Scenario) -> String {
        let session_id = Uuid::new_v4().to_string();
        let session = Arc::new(Mutex::new(ActiveSession::new(scenario)));
        self.sessions.insert(session_id.clone(), session);
        tracing::info!("[SessionTable] Session started: {}", session_id);
        session_id
    }

    /// 取会话句柄；调用方 lock 后必须复查 `ended` 标记
    /// （end/回收与等锁的调用之间存在窗口）
    pub fn get(&self, session_id: &str) -> Option<Arc<Mutex<ActiveSession>>> {
        self.sessions.get(session_id).map(|e| Arc::clone(e.value()))
    }

    /// 从表中移除（end 或回收后调用）
    pub fn remove(&self, session_id: &str) {
        self.sessions.remove(session_id);
        tracing::debug!("[SessionTable] Session removed: {}", session_id);
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// 回收闲置会话，返回回收数量
    ///
    /// 只处理当前能立即拿到锁的会话；正在进行一轮的会话被跳过。
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        let max_idle_secs = max_idle.as_secs() as i64;
        let now = Utc::now();
        let mut stale: Vec<String> = Vec::new();

        for entry in self.sessions.iter() {
            if let Ok(mut guard) = entry.value().try_lock() {
                let idle_secs = (now - guard.touched_at).num_seconds();
                if idle_secs > max_idle_secs {
                    guard.ended = true;
                    stale.push(entry.key().clone());
                }
            }
        }

        for session_id in &stale {
            self.sessions.remove(session_id);
            tracing::info!(
                "[SessionTable] Evicted idle session: {} (idle > {}s)",
                session_id,
                max_idle_secs
            );
        }
        stale.len()
    }

    /// 启动周期性回收任务
    pub fn spawn_sweeper(
        table: Arc<SessionTable>,
        sweep_interval: Duration,
        max_idle: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = table.evict_idle(max_idle);
                if evicted > 0 {
                    tracing::info!(
                        "[SessionTable] Sweep evicted {} sessions ({} still active)",
                        evicted,
                        table.active_count()
                    );
                }
            }
        })
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn scenario() -> Scenario {
        Scenario {
            id: "s1".to_string(),
            title: "テスト".to_string(),
            description: String::new(),
            difficulty: "easy".to_string(),
            category: "classroom".to_string(),
            initial_message: "先生…".to_string(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_start_get_remove() {
        let table = SessionTable::new();
        assert_eq!(table.active_count(), 0);

        let id = table.start(scenario());
        assert_eq!(table.active_count(), 1);
        assert!(table.get(&id).is_some());
        assert!(table.get("no-such-session").is_none());

        table.remove(&id);
        assert_eq!(table.active_count(), 0);
        assert!(table.get(&id).is_none());
    }

    #[tokio::test]
    async fn test_evict_idle_only_touches_stale_sessions() {
        let table = SessionTable::new();
        let fresh = table.start(scenario());
        let stale = table.start(scenario());

        // stale 会話の touched_at を 2 時間前に巻き戻す
        {
            let handle = table.get(&stale).unwrap();
            let mut guard = handle.lock().await;
            guard.touched_at = Utc::now() - ChronoDuration::hours(2);
        }

        let evicted = table.evict_idle(Duration::from_secs(3600));
        assert_eq!(evicted, 1);
        assert!(table.get(&fresh).is_some());
        assert!(table.get(&stale).is_none());
    }

    #[tokio::test]
    async fn test_evict_skips_locked_sessions() {
        let table = SessionTable::new();
        let id = table.start(scenario());

        let handle = table.get(&id).unwrap();
        let mut guard = handle.lock().await;
        guard.touched_at = Utc::now() - ChronoDuration::hours(2);

        // ロック保持中は進行中の一轮と見なされ、回収されない
        let evicted = table.evict_idle(Duration::from_secs(3600));
        assert_eq!(evicted, 0);
        assert!(!guard.ended);
        drop(guard);

        assert_eq!(table.evict_idle(Duration::from_secs(3600)), 1);
    }

    #[tokio::test]
    async fn test_evicted_session_is_marked_ended_for_waiters() {
        let table = SessionTable::new();
        let id = table.start(scenario());
        let handle = table.get(&id).unwrap();

        {
            let mut guard = handle.lock().await;
            guard.touched_at = Utc::now() - ChronoDuration::hours(2);
        }
        table.evict_idle(Duration::from_secs(3600));

        // 句柄仍然在手的调用者必须能看到 ended 标记
        let guard = handle.lock().await;
        assert!(guard.ended);
    }
}
