//! 身份存储（外部协作者的本地投影）
//!
//! 核心只用它做两件事：把作者 id 解析为公开展示身份，以及查询角色。
//! 作者引用不是硬外键——解析失败时回退为 Unknown 占位身份。

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};

use crate::database::{now_ts, Database};
use crate::error::AppResult;
use crate::models::{AuthorInfo, UserRole};

pub struct IdentityStore {
    db: Arc<Database>,
}

impl IdentityStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 解析作者公开身份；不存在时回退为 Unknown
    pub fn resolve(&self, author_id: &str) -> AuthorInfo {
        let row = self.db.get_conn_safe().ok().and_then(|conn| {
            conn.query_row(
                "SELECT id, username, full_name FROM users WHERE id = ?1",
                params![author_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, Option<String>>(2)?,
                    ))
                },
            )
            .optional()
            .ok()
            .flatten()
        });

        match row {
            Some((id, username, full_name)) => AuthorInfo {
                id,
                full_name: full_name.unwrap_or_else(|| username.clone()),
                username,
            },
            None => AuthorInfo::unknown(author_id),
        }
    }

    /// 查询调用者角色；未知用户按普通教师处理
    pub fn role_of(&self, user_id: &str) -> UserRole {
        let role: Option<String> = self.db.get_conn_safe().ok().and_then(|conn| {
            conn.query_row(
                "SELECT role FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
            .ok()
            .flatten()
        });

        match role.as_deref() {
            Some("admin") => UserRole::Admin,
            _ => UserRole::Teacher,
        }
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.role_of(user_id) == UserRole::Admin
    }

    /// 写入/更新用户（种子脚本与测试使用）
    pub fn upsert_user(
        &self,
        id: &str,
        username: &str,
        full_name: Option<&str>,
        role: UserRole,
    ) -> AppResult<()> {
        let role_str = match role {
            UserRole::Teacher => "teacher",
            UserRole::Admin => "admin",
        };
        let conn = self.db.get_conn_safe()?;
        conn.execute(
            "INSERT INTO users (id, username, full_name, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET username = ?2, full_name = ?3, role = ?4",
            params![id, username, full_name, role_str, now_ts()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(Database::new_in_memory().unwrap()))
    }

    #[test]
    fn test_resolve_known_user() {
        let identity = store();
        identity
            .upsert_user("u1", "tanaka", Some("田中先生"), UserRole::Teacher)
            .unwrap();

        let author = identity.resolve("u1");
        assert_eq!(author.username, "tanaka");
        assert_eq!(author.full_name, "田中先生");
    }

    #[test]
    fn test_resolve_unknown_falls_back() {
        let identity = store();
        let author = identity.resolve("no-such-user");
        assert_eq!(author.id, "no-such-user");
        assert_eq!(author.username, "Unknown");
        assert_eq!(author.full_name, "Unknown User");
    }

    #[test]
    fn test_full_name_falls_back_to_username() {
        let identity = store();
        identity
            .upsert_user("u2", "suzuki", None, UserRole::Teacher)
            .unwrap();
        assert_eq!(identity.resolve("u2").full_name, "suzuki");
    }

    #[test]
    fn test_role_of() {
        let identity = store();
        identity
            .upsert_user("a1", "admin", None, UserRole::Admin)
            .unwrap();
        assert_eq!(identity.role_of("a1"), UserRole::Admin);
        assert!(identity.is_admin("a1"));
        // 未知用户默认普通教师
        assert_eq!(identity.role_of("ghost"), UserRole::Teacher);
    }
}
