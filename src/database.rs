use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

const CURRENT_DB_VERSION: u32 = 2;

/// 统一时间戳格式：UTC RFC 3339、固定微秒精度
/// 固定宽度保证 TEXT 列按字典序比较与按时间比较一致
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_ts() -> String {
    format_ts(Utc::now())
}

pub fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("解析时间戳失败: {}", s))
}

pub struct Database {
    conn: Mutex<Connection>,
    #[allow(dead_code)]
    db_path: PathBuf,
}

impl Database {
    /// 创建新的数据库连接并初始化/迁移数据库
    pub fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("创建数据库目录失败: {:?}", parent))?;
            }
        }

        let conn = Connection::open(db_path)
            .with_context(|| format!("打开数据库连接失败: {:?}", db_path))?;

        let db = Database {
            conn: Mutex::new(conn),
            db_path: db_path.to_path_buf(),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// 内存数据库（测试用）
    pub fn new_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("打开内存数据库失败")?;
        let db = Database {
            conn: Mutex::new(conn),
            db_path: PathBuf::from(":memory:"),
        };
        db.initialize_schema()?;
        Ok(db)
    }

    /// 安全获取数据库连接的辅助方法
    /// 如果 Mutex 被中毒（由于 panic），会恢复并返回连接
    pub fn get_conn_safe(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        match self.conn.lock() {
            Ok(guard) => Ok(guard),
            Err(poisoned) => {
                log::error!("[Database] Mutex poisoned! Attempting recovery with transaction rollback");
                let guard = poisoned.into_inner();
                // Attempt to rollback any partial transaction left by the panicking thread
                let _ = guard.execute("ROLLBACK", []);
                Ok(guard)
            }
        }
    }

    fn initialize_schema(&self) -> Result<()> {
        let conn = self.get_conn_safe()?;
        conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY NOT NULL
            );
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                username TEXT NOT NULL UNIQUE,
                full_name TEXT,
                role TEXT NOT NULL DEFAULT 'teacher' CHECK(role IN ('teacher', 'admin')),
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS posts (
                id TEXT PRIMARY KEY,
                author_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                excerpt TEXT NOT NULL,
                tags TEXT NOT NULL, -- JSON数组，已小写化
                upvotes INTEGER NOT NULL DEFAULT 0,
                views INTEGER NOT NULL DEFAULT 0,
                comment_count INTEGER NOT NULL DEFAULT 0,
                is_pinned INTEGER NOT NULL DEFAULT 0,
                last_activity TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS comments (
                id TEXT PRIMARY KEY,
                post_id TEXT NOT NULL,
                author_id TEXT NOT NULL,
                content TEXT NOT NULL,
                upvotes INTEGER NOT NULL DEFAULT 0,
                parent_comment_id TEXT,
                depth INTEGER NOT NULL DEFAULT 0 CHECK(depth IN (0, 1)),
                is_deleted INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS upvotes (
                user_id TEXT NOT NULL,
                target_type TEXT NOT NULL CHECK(target_type IN ('post', 'comment')),
                target_id TEXT NOT NULL,
                created_at TEXT NOT NULL,
                PRIMARY KEY (user_id, target_type, target_id)
            );
            CREATE TABLE IF NOT EXISTS scenarios (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                difficulty TEXT NOT NULL CHECK(difficulty IN ('easy', 'medium', 'hard')),
                category TEXT NOT NULL,
                initial_message TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS simulations (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                scenario_id TEXT NOT NULL,
                messages TEXT NOT NULL, -- JSON数组（含教师轮三维评分）
                overall_score INTEGER,
                feedback TEXT,
                started_at TEXT NOT NULL,
                completed_at TEXT,
                duration INTEGER NOT NULL DEFAULT 0
            );
            CREATE INDEX IF NOT EXISTS idx_posts_created_at ON posts(created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_is_pinned ON posts(is_pinned);
            CREATE INDEX IF NOT EXISTS idx_comments_post_id ON comments(post_id);
            CREATE INDEX IF NOT EXISTS idx_comments_parent ON comments(parent_comment_id);
            CREATE INDEX IF NOT EXISTS idx_upvotes_target ON upvotes(target_type, target_id);
            CREATE INDEX IF NOT EXISTS idx_simulations_completed_at ON simulations(completed_at);
            COMMIT;",
        )?;

        let current_version: u32 = conn
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .optional()?
            .unwrap_or(0);

        if current_version < CURRENT_DB_VERSION {
            if current_version < 2 {
                self.migrate_v1_to_v2(&conn)?;
            }
            conn.execute(
                "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
                params![CURRENT_DB_VERSION],
            )?;
        }

        Ok(())
    }

    /// v1 -> v2: 评论表增加 deleted_by_admin 列（区分管理员删除与作者自删）
    fn migrate_v1_to_v2(&self, conn: &rusqlite::Connection) -> anyhow::Result<()> {
        let mut stmt = conn.prepare("PRAGMA table_info(comments);")?;
        let column_exists = stmt
            .query_map([], |row| row.get::<_, String>(1))?
            .filter_map(Result::ok)
            .any(|name| name == "deleted_by_admin");

        if !column_exists {
            conn.execute(
                "ALTER TABLE comments ADD COLUMN deleted_by_admin INTEGER NOT NULL DEFAULT 0;",
                [],
            )?;
            log::info!("[Database] v1 -> v2: deleted_by_admin 列已添加");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initializes() {
        let db = Database::new_in_memory().unwrap();
        let conn = db.get_conn_safe().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name IN \
                 ('users','posts','comments','upvotes','scenarios','simulations')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 6);

        let version: u32 = conn
            .query_row(
                "SELECT version FROM schema_version ORDER BY version DESC LIMIT 1",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(version, CURRENT_DB_VERSION);
    }

    #[test]
    fn test_vote_uniqueness_enforced_by_storage() {
        // 存储层必须兜底 (user, target_type, target_id) 的唯一性
        let db = Database::new_in_memory().unwrap();
        let conn = db.get_conn_safe().unwrap();
        conn.execute(
            "INSERT INTO upvotes (user_id, target_type, target_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params!["u1", "post", "p1", now_ts()],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO upvotes (user_id, target_type, target_id, created_at) VALUES (?1, ?2, ?3, ?4)",
            params!["u1", "post", "p1", now_ts()],
        );
        assert!(dup.is_err());
    }

    #[test]
    fn test_timestamp_format_is_sortable() {
        let early = format_ts(parse_ts("2026-01-02T03:04:05Z").unwrap());
        let later = format_ts(parse_ts("2026-01-02T03:04:06.5Z").unwrap());
        assert_eq!(early.len(), later.len());
        assert!(early < later);
        assert!(parse_ts(&early).is_ok());
    }
}
