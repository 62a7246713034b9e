//! 点赞台账
//!
//! 每个 (用户, 目标类型, 目标) 三元组至多一行；行存在即"已点赞"。
//! 点赞行本身没有可变状态——只有插入和删除，不做更新。
//! 三元组唯一性由存储层主键兜底（并发 toggle 竞态的最后防线）。

use std::collections::HashSet;
use std::sync::Arc;

use rusqlite::params;

use crate::database::{now_ts, Database};
use crate::error::AppResult;
use crate::models::TargetType;

#[derive(Clone)]
pub struct VoteLedger {
    db: Arc<Database>,
}

impl VoteLedger {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 调用者对单个目标是否已点赞
    pub fn has_voted(&self, user_id: &str, target: TargetType, target_id: &str) -> AppResult<bool> {
        let conn = self.db.get_conn_safe()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM upvotes WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
            params![user_id, target.as_str(), target_id],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// 批量查询一页目标中调用者已点赞的子集（单条查询，不逐行）
    pub fn voted_set(
        &self,
        user_id: &str,
        target: TargetType,
        target_ids: &[String],
    ) -> AppResult<HashSet<String>> {
        if target_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let placeholders = vec!["?"; target_ids.len()].join(", ");
        let sql = format!(
            "SELECT target_id FROM upvotes WHERE user_id = ?1 AND target_type = ?2 AND target_id IN ({})",
            placeholders
        );
        let conn = self.db.get_conn_safe()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut bound: Vec<&dyn rusqlite::ToSql> = vec![&user_id];
        let type_str = target.as_str();
        bound.push(&type_str);
        for id in target_ids {
            bound.push(id);
        }
        let rows = stmt.query_map(bound.as_slice(), |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for row in rows {
            set.insert(row?);
        }
        Ok(set)
    }

    /// 记录一票。若三元组已存在返回 false（未插入）
    pub fn insert(&self, user_id: &str, target: TargetType, target_id: &str) -> AppResult<bool> {
        let conn = self.db.get_conn_safe()?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO upvotes (user_id, target_type, target_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![user_id, target.as_str(), target_id, now_ts()],
        )?;
        Ok(inserted > 0)
    }

    /// 撤销一票。不存在时返回 false
    pub fn remove(&self, user_id: &str, target: TargetType, target_id: &str) -> AppResult<bool> {
        let conn = self.db.get_conn_safe()?;
        let removed = conn.execute(
            "DELETE FROM upvotes WHERE user_id = ?1 AND target_type = ?2 AND target_id = ?3",
            params![user_id, target.as_str(), target_id],
        )?;
        Ok(removed > 0)
    }

    /// 删除一个目标上的所有点赞（帖子删除级联用）
    pub fn remove_all_for_target(&self, target: TargetType, target_id: &str) -> AppResult<usize> {
        let conn = self.db.get_conn_safe()?;
        let removed = conn.execute(
            "DELETE FROM upvotes WHERE target_type = ?1 AND target_id = ?2",
            params![target.as_str(), target_id],
        )?;
        Ok(removed)
    }
}
