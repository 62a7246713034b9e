//! 评论树引擎
//!
//! 两层嵌套（根评论 depth=0，回复 depth=1），不允许更深。
//! 删除是打墓碑而非物理删除：线程结构保留，内容不再暴露。
//! 根评论的软删除会级联到其下所有未删除的回复。

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use crate::community::votes::VoteLedger;
use crate::database::{now_ts, Database};
use crate::error::{AppError, AppResult};
use crate::identity::IdentityStore;
use crate::models::{
    AuthorInfo, Comment, CommentCreateRequest, CommentListResponse, CommentResponse,
    CommentState, CommentUpdateRequest, TargetType, UpvoteResponse,
};

const COMMENT_COLUMNS: &str = "id, post_id, author_id, content, upvotes, parent_comment_id, \
     depth, is_deleted, deleted_by_admin, created_at, updated_at";

pub struct CommentService {
    db: Arc<Database>,
    identity: Arc<IdentityStore>,
    votes: VoteLedger,
}

impl CommentService {
    pub fn new(db: Arc<Database>, identity: Arc<IdentityStore>) -> Self {
        let votes = VoteLedger::new(Arc::clone(&db));
        Self { db, identity, votes }
    }

    fn comment_from_row(row: &Row<'_>) -> rusqlite::Result<Comment> {
        let parse = |idx: usize, name: &str, s: &str| -> rusqlite::Result<DateTime<Utc>> {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|_| {
                    rusqlite::Error::InvalidColumnType(
                        idx,
                        name.to_string(),
                        rusqlite::types::Type::Text,
                    )
                })
        };
        let created_at_str: String = row.get(9)?;
        let updated_at_str: String = row.get(10)?;

        Ok(Comment {
            id: row.get(0)?,
            post_id: row.get(1)?,
            author_id: row.get(2)?,
            content: row.get(3)?,
            upvotes: row.get(4)?,
            parent_comment_id: row.get(5)?,
            depth: row.get(6)?,
            state: CommentState::from_columns(
                row.get::<_, i64>(7)? != 0,
                row.get::<_, i64>(8)? != 0,
            ),
            created_at: parse(9, "created_at", &created_at_str)?,
            updated_at: parse(10, "updated_at", &updated_at_str)?,
        })
    }

    fn fetch(&self, comment_id: &str) -> AppResult<Comment> {
        let conn = self.db.get_conn_safe()?;
        let sql = format!("SELECT {} FROM comments WHERE id = ?1", COMMENT_COLUMNS);
        let comment = conn
            .query_row(&sql, params![comment_id], Self::comment_from_row)
            .optional()?;
        comment.ok_or_else(|| AppError::CommentNotFound(comment_id.to_string()))
    }

    fn post_exists(&self, post_id: &str) -> AppResult<bool> {
        let conn = self.db.get_conn_safe()?;
        let found: Option<String> = conn
            .query_row(
                "SELECT id FROM posts WHERE id = ?1",
                params![post_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn reply_count(&self, comment_id: &str) -> AppResult<i64> {
        let conn = self.db.get_conn_safe()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM comments WHERE parent_comment_id = ?1",
            params![comment_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn to_response(
        &self,
        comment: Comment,
        author: AuthorInfo,
        user_has_upvoted: bool,
        reply_count: i64,
    ) -> CommentResponse {
        CommentResponse {
            id: comment.id,
            post_id: comment.post_id,
            author,
            // 墓碑化的评论不暴露内容，线程结构保留
            content: if comment.state.is_deleted() {
                String::new()
            } else {
                comment.content
            },
            upvotes: comment.upvotes,
            parent_comment_id: comment.parent_comment_id,
            depth: comment.depth,
            user_has_upvoted,
            reply_count,
            is_deleted: comment.state.is_deleted(),
            deleted_by_admin: comment.state.deleted_by_admin(),
            created_at: comment.created_at,
            updated_at: comment.updated_at,
        }
    }

    fn build_single(&self, comment: Comment, user_id: &str) -> AppResult<CommentResponse> {
        let author = self.identity.resolve(&comment.author_id);
        let user_has_upvoted = self
            .votes
            .has_voted(user_id, TargetType::Comment, &comment.id)?;
        let reply_count = self.reply_count(&comment.id)?;
        Ok(self.to_response(comment, author, user_has_upvoted, reply_count))
    }

    /// 创建评论
    ///
    /// 无 parent 则为根评论（depth=0）；有 parent 时 parent 的 depth 必须为 0，
    /// 否则验证失败（最多两层）。评论插入与帖子 comment_count/last_activity
    /// 的更新对调用者而言是原子的（同一事务）。
    pub fn create(
        &self,
        post_id: &str,
        author_id: &str,
        req: &CommentCreateRequest,
    ) -> AppResult<CommentResponse> {
        if !self.post_exists(post_id)? {
            return Err(AppError::PostNotFound(post_id.to_string()));
        }

        // 验证全部在任何写入之前完成
        let (depth, parent_comment_id) = match req.parent_comment_id.as_deref() {
            None => (0i64, None),
            Some(parent_id) => {
                let parent = self.fetch(parent_id)?;
                if parent.depth >= 1 {
                    return Err(AppError::Validation(
                        "Cannot reply to a reply. Max depth is 2 levels.".to_string(),
                    ));
                }
                (1i64, Some(parent.id))
            }
        };

        let id = Uuid::new_v4().to_string();
        let now = now_ts();
        {
            let mut conn = self.db.get_conn_safe()?;
            let tx = conn.transaction().map_err(AppError::from)?;
            tx.execute(
                "INSERT INTO comments (id, post_id, author_id, content, upvotes, \
                 parent_comment_id, depth, is_deleted, deleted_by_admin, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5, ?6, 0, 0, ?7, ?7)",
                params![id, post_id, author_id, req.content, parent_comment_id, depth, now],
            )?;
            tx.execute(
                "UPDATE posts SET comment_count = comment_count + 1, last_activity = ?1 \
                 WHERE id = ?2",
                params![now, post_id],
            )?;
            tx.commit().map_err(AppError::from)?;
        }
        info!(
            "[CommentService] Comment created: {} on post {} (depth {})",
            id, post_id, depth
        );

        self.build_single(self.fetch(&id)?, author_id)
    }

    /// 帖子的根评论列表（depth=0，最旧在前）
    ///
    /// 回复不预加载；每条根评论带实时统计的回复数与调用者点赞状态。
    pub fn list_roots(&self, post_id: &str, user_id: &str) -> AppResult<CommentListResponse> {
        if !self.post_exists(post_id)? {
            return Err(AppError::PostNotFound(post_id.to_string()));
        }

        let roots = {
            let conn = self.db.get_conn_safe()?;
            let sql = format!(
                "SELECT {} FROM comments WHERE post_id = ?1 AND parent_comment_id IS NULL \
                 ORDER BY created_at ASC",
                COMMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![post_id], Self::comment_from_row)?;
            let mut roots = Vec::new();
            for row in rows {
                roots.push(row?);
            }
            roots
        };

        let ids: Vec<String> = roots.iter().map(|c| c.id.clone()).collect();
        let upvoted = self.votes.voted_set(user_id, TargetType::Comment, &ids)?;
        let reply_counts = self.reply_counts_for(&ids)?;

        let mut author_cache: HashMap<String, AuthorInfo> = HashMap::new();
        let total = roots.len() as i64;
        let comments = roots
            .into_iter()
            .map(|comment| {
                let author = author_cache
                    .entry(comment.author_id.clone())
                    .or_insert_with(|| self.identity.resolve(&comment.author_id))
                    .clone();
                let user_has_upvoted = upvoted.contains(&comment.id);
                let reply_count = reply_counts.get(&comment.id).copied().unwrap_or(0);
                self.to_response(comment, author, user_has_upvoted, reply_count)
            })
            .collect();

        Ok(CommentListResponse { comments, total })
    }

    /// 一条批量查询统计一组根评论的回复数
    fn reply_counts_for(&self, ids: &[String]) -> AppResult<HashMap<String, i64>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT parent_comment_id, COUNT(*) FROM comments \
             WHERE parent_comment_id IN ({}) GROUP BY parent_comment_id",
            placeholders
        );
        let conn = self.db.get_conn_safe()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(ids.iter()),
            |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let mut counts = HashMap::new();
        for row in rows {
            let (id, count) = row?;
            counts.insert(id, count);
        }
        Ok(counts)
    }

    /// 某条根评论下的全部回复（扁平列表，最旧在前）
    pub fn list_replies(&self, comment_id: &str, user_id: &str) -> AppResult<CommentListResponse> {
        // 父评论必须存在
        self.fetch(comment_id)?;

        let replies = {
            let conn = self.db.get_conn_safe()?;
            let sql = format!(
                "SELECT {} FROM comments WHERE parent_comment_id = ?1 ORDER BY created_at ASC",
                COMMENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![comment_id], Self::comment_from_row)?;
            let mut replies = Vec::new();
            for row in rows {
                replies.push(row?);
            }
            replies
        };

        let ids: Vec<String> = replies.iter().map(|c| c.id.clone()).collect();
        let upvoted: HashSet<String> = self.votes.voted_set(user_id, TargetType::Comment, &ids)?;

        let mut author_cache: HashMap<String, AuthorInfo> = HashMap::new();
        let total = replies.len() as i64;
        let comments = replies
            .into_iter()
            .map(|comment| {
                let author = author_cache
                    .entry(comment.author_id.clone())
                    .or_insert_with(|| self.identity.resolve(&comment.author_id))
                    .clone();
                let user_has_upvoted = upvoted.contains(&comment.id);
                // depth 上限为 1，回复不可能再有回复
                self.to_response(comment, author, user_has_upvoted, 0)
            })
            .collect();

        Ok(CommentListResponse { comments, total })
    }

    /// 更新评论内容（仅作者）
    pub fn update(
        &self,
        comment_id: &str,
        user_id: &str,
        req: &CommentUpdateRequest,
    ) -> AppResult<CommentResponse> {
        let comment = self.fetch(comment_id)?;
        if comment.author_id != user_id {
            return Err(AppError::Forbidden(
                "You can only edit your own comments".to_string(),
            ));
        }
        {
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE comments SET content = ?1, updated_at = ?2 WHERE id = ?3",
                params![req.content, now_ts(), comment_id],
            )?;
        }
        self.build_single(self.fetch(comment_id)?, user_id)
    }

    /// 软删除
    ///
    /// 作者可删自己的评论，管理员可删任何评论；重复删除报冲突。
    /// 根评论的删除会先级联到其下所有未删除的回复（子先于父），
    /// 回复继承本次操作的 deleted_by_admin 标记；已删除的回复不受影响。
    /// 帖子的 comment_count 有意不回退——墓碑仍占据线程里的可见位置。
    pub fn soft_delete(&self, comment_id: &str, user_id: &str) -> AppResult<()> {
        let comment = self.fetch(comment_id)?;
        let is_admin = self.identity.is_admin(user_id);

        if !is_admin && comment.author_id != user_id {
            return Err(AppError::Forbidden(
                "You can only delete your own comments".to_string(),
            ));
        }
        if comment.state.is_deleted() {
            return Err(AppError::Validation(
                "Comment is already deleted".to_string(),
            ));
        }

        let now = now_ts();
        let is_root = comment.parent_comment_id.is_none();
        let conn = self.db.get_conn_safe()?;

        let cascaded = if is_root {
            conn.execute(
                "UPDATE comments SET is_deleted = 1, deleted_by_admin = ?1, updated_at = ?2 \
                 WHERE parent_comment_id = ?3 AND is_deleted = 0",
                params![is_admin as i64, now, comment_id],
            )?
        } else {
            0
        };

        conn.execute(
            "UPDATE comments SET is_deleted = 1, deleted_by_admin = ?1, updated_at = ?2 \
             WHERE id = ?3",
            params![is_admin as i64, now, comment_id],
        )?;

        info!(
            "[CommentService] Comment soft-deleted: {} (admin: {}, cascaded replies: {})",
            comment_id, is_admin, cascaded
        );
        Ok(())
    }

    /// 点赞开关（与帖子相同的语义，目标类型为 comment）
    pub fn toggle_upvote(&self, comment_id: &str, user_id: &str) -> AppResult<UpvoteResponse> {
        self.fetch(comment_id)?;

        let user_has_upvoted = if self
            .votes
            .has_voted(user_id, TargetType::Comment, comment_id)?
        {
            self.votes.remove(user_id, TargetType::Comment, comment_id)?;
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE comments SET upvotes = MAX(upvotes - 1, 0) WHERE id = ?1",
                params![comment_id],
            )?;
            false
        } else {
            self.votes.insert(user_id, TargetType::Comment, comment_id)?;
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE comments SET upvotes = upvotes + 1 WHERE id = ?1",
                params![comment_id],
            )?;
            true
        };

        let conn = self.db.get_conn_safe()?;
        let upvotes: i64 = conn.query_row(
            "SELECT upvotes FROM comments WHERE id = ?1",
            params![comment_id],
            |row| row.get(0),
        )?;
        Ok(UpvoteResponse {
            success: true,
            upvotes,
            user_has_upvoted,
        })
    }
}
