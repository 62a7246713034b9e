//! 帖子引擎
//!
//! CRUD + 搜索/过滤/排序/分页 + 置顶/浏览量/点赞计数 + 热门标签。
//! 置顶帖永远排在非置顶帖之前，请求的排序模式只在组内生效。

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::community::votes::VoteLedger;
use crate::database::{now_ts, Database};
use crate::error::{AppError, AppResult};
use crate::identity::IdentityStore;
use crate::models::{
    AuthorInfo, Post, PostCreateRequest, PostListItem, PostListQuery, PostListResponse,
    PostResponse, PostUpdateRequest, SortMode, TagInfo, TagListResponse, TargetType,
    UpvoteResponse,
};

/// 分页上限（1..=50，默认 10）
const PAGE_SIZE_MAX: i64 = 50;
const PAGE_SIZE_DEFAULT: i64 = 10;

const POST_COLUMNS: &str = "id, author_id, title, content, excerpt, tags, upvotes, views, \
     comment_count, is_pinned, last_activity, created_at, updated_at";

pub struct PostService {
    db: Arc<Database>,
    identity: Arc<IdentityStore>,
    votes: VoteLedger,
}

impl PostService {
    pub fn new(db: Arc<Database>, identity: Arc<IdentityStore>) -> Self {
        let votes = VoteLedger::new(Arc::clone(&db));
        Self { db, identity, votes }
    }

    /// 标签规范化：小写、去空白、去重（保持顺序）
    fn normalize_tags(tags: &[String]) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        tags.iter()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.clone()))
            .collect()
    }

    fn post_from_row(row: &Row<'_>) -> rusqlite::Result<Post> {
        let tags_str: String = row.get(5)?;
        let last_activity_str: String = row.get(10)?;
        let created_at_str: String = row.get(11)?;
        let updated_at_str: String = row.get(12)?;

        let tags: Vec<String> = serde_json::from_str(&tags_str).map_err(|_| {
            rusqlite::Error::InvalidColumnType(5, "tags".to_string(), rusqlite::types::Type::Text)
        })?;
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

        Ok(Post {
            id: row.get(0)?,
            author_id: row.get(1)?,
            title: row.get(2)?,
            content: row.get(3)?,
            excerpt: row.get(4)?,
            tags,
            upvotes: row.get(6)?,
            views: row.get(7)?,
            comment_count: row.get(8)?,
            is_pinned: row.get::<_, i64>(9)? != 0,
            last_activity: parse(10, "last_activity", &last_activity_str)?,
            created_at: parse(11, "created_at", &created_at_str)?,
            updated_at: parse(12, "updated_at", &updated_at_str)?,
        })
    }

    fn fetch(&self, post_id: &str) -> AppResult<Post> {
        let conn = self.db.get_conn_safe()?;
        let sql = format!("SELECT {} FROM posts WHERE id = ?1", POST_COLUMNS);
        let post = conn
            .query_row(&sql, params![post_id], Self::post_from_row)
            .optional()?;
        post.ok_or_else(|| AppError::PostNotFound(post_id.to_string()))
    }

    fn build_response(&self, post: Post, user_id: &str) -> AppResult<PostResponse> {
        let user_has_upvoted = self.votes.has_voted(user_id, TargetType::Post, &post.id)?;
        let author = self.identity.resolve(&post.author_id);
        Ok(PostResponse {
            id: post.id,
            author,
            title: post.title,
            content: post.content,
            excerpt: post.excerpt,
            tags: post.tags,
            upvotes: post.upvotes,
            views: post.views,
            comment_count: post.comment_count,
            is_pinned: post.is_pinned,
            user_has_upvoted,
            last_activity: post.last_activity,
            created_at: post.created_at,
            updated_at: post.updated_at,
        })
    }

    /// 创建帖子
    pub fn create(&self, author_id: &str, req: &PostCreateRequest) -> AppResult<PostResponse> {
        let id = Uuid::new_v4().to_string();
        let tags = Self::normalize_tags(&req.tags);
        let excerpt = Post::generate_excerpt(&req.content);
        let now = now_ts();

        {
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "INSERT INTO posts (id, author_id, title, content, excerpt, tags, upvotes, views, \
                 comment_count, is_pinned, last_activity, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, 0, 0, 0, ?7, ?7, ?7)",
                params![
                    id,
                    author_id,
                    req.title,
                    req.content,
                    excerpt,
                    serde_json::to_string(&tags)?,
                    now
                ],
            )?;
        }
        info!("[PostService] Post created: {} by {}", id, author_id);

        self.build_response(self.fetch(&id)?, author_id)
    }

    /// 帖子列表：搜索 + 标签过滤 + 排序 + 分页
    ///
    /// 调用者对本页所有帖子的点赞状态用一条批量查询解析，绝不逐行查询。
    pub fn list(&self, user_id: &str, query: &PostListQuery) -> AppResult<PostListResponse> {
        let page = query.page.unwrap_or(1).max(1);
        let limit = query
            .limit
            .unwrap_or(PAGE_SIZE_DEFAULT)
            .clamp(1, PAGE_SIZE_MAX);
        let sort = query.sort.unwrap_or(SortMode::Newest);

        let mut where_clauses: Vec<String> = Vec::new();
        let mut bound: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(q) = query.q.as_deref() {
            let q = q.trim();
            if !q.is_empty() {
                // 大小写无关的子串匹配（非分词搜索）
                where_clauses
                    .push("(LOWER(title) LIKE ? OR LOWER(content) LIKE ?)".to_string());
                let pattern = format!("%{}%", q.to_lowercase());
                bound.push(Box::new(pattern.clone()));
                bound.push(Box::new(pattern));
            }
        }

        let filter_tags = Self::normalize_tags(&query.tags);
        if !filter_tags.is_empty() {
            // 标签集合相交：帖子 tags 为 JSON 数组文本，按带引号的元素匹配
            let clause = filter_tags
                .iter()
                .map(|_| "tags LIKE ?".to_string())
                .collect::<Vec<_>>()
                .join(" OR ");
            where_clauses.push(format!("({})", clause));
            for tag in &filter_tags {
                bound.push(Box::new(format!("%\"{}\"%", tag)));
            }
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", where_clauses.join(" AND "))
        };

        // 置顶永远是第一排序键，请求的模式是第二排序键
        let order_sql = match sort {
            SortMode::Newest => "is_pinned DESC, created_at DESC",
            SortMode::Upvotes => "is_pinned DESC, upvotes DESC, created_at DESC",
            SortMode::Views => "is_pinned DESC, views DESC, created_at DESC",
            SortMode::Active => "is_pinned DESC, last_activity DESC",
        };

        let (total, posts) = {
            let conn = self.db.get_conn_safe()?;

            let count_sql = format!("SELECT COUNT(*) FROM posts{}", where_sql);
            let total: i64 = conn.query_row(
                &count_sql,
                rusqlite::params_from_iter(bound.iter()),
                |row| row.get(0),
            )?;

            let list_sql = format!(
                "SELECT {} FROM posts{} ORDER BY {} LIMIT ? OFFSET ?",
                POST_COLUMNS, where_sql, order_sql
            );
            bound.push(Box::new(limit));
            bound.push(Box::new((page - 1) * limit));

            let mut stmt = conn.prepare(&list_sql)?;
            let rows = stmt.query_map(
                rusqlite::params_from_iter(bound.iter()),
                Self::post_from_row,
            )?;
            let mut posts = Vec::new();
            for row in rows {
                posts.push(row?);
            }
            (total, posts)
        };

        let total_pages = if total > 0 {
            (total + limit - 1) / limit
        } else {
            1
        };

        let post_ids: Vec<String> = posts.iter().map(|p| p.id.clone()).collect();
        let upvoted = self.votes.voted_set(user_id, TargetType::Post, &post_ids)?;

        // 本次请求内的作者解析缓存（同一作者只解析一次）
        let mut author_cache: HashMap<String, AuthorInfo> = HashMap::new();
        let items = posts
            .into_iter()
            .map(|post| {
                let author = author_cache
                    .entry(post.author_id.clone())
                    .or_insert_with(|| self.identity.resolve(&post.author_id))
                    .clone();
                PostListItem {
                    user_has_upvoted: upvoted.contains(&post.id),
                    id: post.id,
                    author,
                    title: post.title,
                    excerpt: post.excerpt,
                    tags: post.tags,
                    upvotes: post.upvotes,
                    views: post.views,
                    comment_count: post.comment_count,
                    is_pinned: post.is_pinned,
                    created_at: post.created_at,
                }
            })
            .collect();

        Ok(PostListResponse {
            posts: items,
            total,
            page,
            limit,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        })
    }

    /// 帖子详情。副作用：每次读取无条件将浏览量 +1（包括作者本人与重复读取）
    pub fn get(&self, post_id: &str, user_id: &str) -> AppResult<PostResponse> {
        {
            let conn = self.db.get_conn_safe()?;
            let updated = conn.execute(
                "UPDATE posts SET views = views + 1 WHERE id = ?1",
                params![post_id],
            )?;
            if updated == 0 {
                return Err(AppError::PostNotFound(post_id.to_string()));
            }
        }
        self.build_response(self.fetch(post_id)?, user_id)
    }

    /// 更新帖子（仅作者）。只更新提供的字段；content 变更时重新生成摘要
    pub fn update(
        &self,
        post_id: &str,
        user_id: &str,
        req: &PostUpdateRequest,
    ) -> AppResult<PostResponse> {
        let mut post = self.fetch(post_id)?;
        if post.author_id != user_id {
            return Err(AppError::Forbidden(
                "You can only edit your own posts".to_string(),
            ));
        }

        if let Some(title) = &req.title {
            post.title = title.clone();
        }
        if let Some(content) = &req.content {
            post.content = content.clone();
            post.excerpt = Post::generate_excerpt(content);
        }
        if let Some(tags) = &req.tags {
            post.tags = Self::normalize_tags(tags);
        }

        {
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE posts SET title = ?1, content = ?2, excerpt = ?3, tags = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    post.title,
                    post.content,
                    post.excerpt,
                    serde_json::to_string(&post.tags)?,
                    now_ts(),
                    post_id
                ],
            )?;
        }

        self.build_response(self.fetch(post_id)?, user_id)
    }

    /// 删除帖子（仅作者）
    ///
    /// 级联顺序固定为先子后父：评论上的点赞 -> 评论 -> 帖子上的点赞 -> 帖子。
    /// 多步操作，无分布式回滚；中途失败会留下部分删除的状态。
    pub fn delete(&self, post_id: &str, user_id: &str) -> AppResult<()> {
        let post = self.fetch(post_id)?;
        if post.author_id != user_id {
            return Err(AppError::Forbidden(
                "You can only delete your own posts".to_string(),
            ));
        }

        let (comment_votes, comments) = {
            let conn = self.db.get_conn_safe()?;
            let comment_votes = conn.execute(
                "DELETE FROM upvotes WHERE target_type = 'comment' AND target_id IN \
                 (SELECT id FROM comments WHERE post_id = ?1)",
                params![post_id],
            )?;
            let comments = conn.execute("DELETE FROM comments WHERE post_id = ?1", params![post_id])?;
            (comment_votes, comments)
        };
        self.votes.remove_all_for_target(TargetType::Post, post_id)?;
        {
            let conn = self.db.get_conn_safe()?;
            conn.execute("DELETE FROM posts WHERE id = ?1", params![post_id])?;
        }

        info!(
            "[PostService] Post deleted: {} ({} comments, {} comment votes)",
            post_id, comments, comment_votes
        );
        Ok(())
    }

    /// 点赞开关：已点赞则取消并减一（下限 0），未点赞则插入并加一
    pub fn toggle_upvote(&self, post_id: &str, user_id: &str) -> AppResult<UpvoteResponse> {
        // 确认帖子存在
        self.fetch(post_id)?;

        let user_has_upvoted = if self.votes.has_voted(user_id, TargetType::Post, post_id)? {
            self.votes.remove(user_id, TargetType::Post, post_id)?;
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE posts SET upvotes = MAX(upvotes - 1, 0) WHERE id = ?1",
                params![post_id],
            )?;
            false
        } else {
            self.votes.insert(user_id, TargetType::Post, post_id)?;
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "UPDATE posts SET upvotes = upvotes + 1 WHERE id = ?1",
                params![post_id],
            )?;
            true
        };

        let conn = self.db.get_conn_safe()?;
        let upvotes: i64 = conn.query_row(
            "SELECT upvotes FROM posts WHERE id = ?1",
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(UpvoteResponse {
            success: true,
            upvotes,
            user_has_upvoted,
        })
    }

    /// 置顶/取消置顶（仅管理员）
    pub fn set_pinned(
        &self,
        post_id: &str,
        user_id: &str,
        is_pinned: bool,
    ) -> AppResult<PostResponse> {
        if !self.identity.is_admin(user_id) {
            return Err(AppError::Forbidden(
                "Only admins can pin/unpin posts".to_string(),
            ));
        }
        {
            let conn = self.db.get_conn_safe()?;
            let updated = conn.execute(
                "UPDATE posts SET is_pinned = ?1, updated_at = ?2 WHERE id = ?3",
                params![is_pinned as i64, now_ts(), post_id],
            )?;
            if updated == 0 {
                return Err(AppError::PostNotFound(post_id.to_string()));
            }
        }
        debug!("[PostService] Post {} pinned = {}", post_id, is_pinned);
        self.build_response(self.fetch(post_id)?, user_id)
    }

    /// 热门标签：全表扫描 + 进程内计数
    ///
    /// 底层存储的聚合不可用时的折衷做法，中小规模可接受。
    /// 已知的扩展性上限，将来应换成索引支撑的计数器，但不能悄悄改变
    /// 计数语义（标签已在写入时小写化，这里按原样计数）。
    pub fn popular_tags(&self, limit: usize) -> AppResult<TagListResponse> {
        let tag_rows: Vec<String> = {
            let conn = self.db.get_conn_safe()?;
            let mut stmt = conn.prepare("SELECT tags FROM posts")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut out = Vec::new();
            for row in rows {
                out.push(row?);
            }
            out
        };

        let mut counter: HashMap<String, i64> = HashMap::new();
        for tags_json in tag_rows {
            let tags: Vec<String> = serde_json::from_str(&tags_json)?;
            for tag in tags {
                *counter.entry(tag).or_insert(0) += 1;
            }
        }

        let mut tags: Vec<TagInfo> = counter
            .into_iter()
            .map(|(name, count)| TagInfo { name, count })
            .collect();
        // 次数降序，同次数按名称升序保证稳定输出
        tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        tags.truncate(limit);

        Ok(TagListResponse { tags })
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserRole;

    fn service() -> (PostService, Arc<Database>, Arc<IdentityStore>) {
        let db = Arc::new(Database::new_in_memory().unwrap());
        let identity = Arc::new(IdentityStore::new(Arc::clone(&db)));
        identity
            .upsert_user("u1", "tanaka", Some("田中先生"), UserRole::Teacher)
            .unwrap();
        identity
            .upsert_user("u2", "suzuki", None, UserRole::Teacher)
            .unwrap();
        identity
            .upsert_user("admin", "admin", None, UserRole::Admin)
            .unwrap();
        (
            PostService::new(Arc::clone(&db), Arc::clone(&identity)),
            db,
            identity,
        )
    }

    fn make_post(svc: &PostService, author: &str, title: &str, tags: &[&str]) -> PostResponse {
        // 创建时间是排序断言的依据，确保相邻创建的时间戳不同
        std::thread::sleep(std::time::Duration::from_millis(2));
        svc.create(
            author,
            &PostCreateRequest {
                title: title.to_string(),
                content: format!("{} の本文です。", title),
                tags: tags.iter().map(|s| s.to_string()).collect(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_create_initializes_counters() {
        let (svc, _db, _) = service();
        let post = make_post(&svc, "u1", "初投稿", &["Advice", "  classroom "]);
        assert_eq!(post.upvotes, 0);
        assert_eq!(post.views, 0);
        assert_eq!(post.comment_count, 0);
        assert!(!post.is_pinned);
        // 标签小写化 + 去空白
        assert_eq!(post.tags, vec!["advice", "classroom"]);
        assert_eq!(post.author.username, "tanaka");
        assert!(!post.user_has_upvoted);
    }

    #[test]
    fn test_get_increments_views_every_read() {
        let (svc, _db, _) = service();
        let post = make_post(&svc, "u1", "閲覧数", &[]);
        // 作者本人の読み取りもカウントされる
        assert_eq!(svc.get(&post.id, "u1").unwrap().views, 1);
        assert_eq!(svc.get(&post.id, "u1").unwrap().views, 2);
        assert_eq!(svc.get(&post.id, "u2").unwrap().views, 3);
    }

    #[test]
    fn test_get_missing_post() {
        let (svc, _db, _) = service();
        assert_matches::assert_matches!(
            svc.get("no-such-id", "u1"),
            Err(AppError::PostNotFound(_))
        );
    }

    #[test]
    fn test_update_only_author_and_excerpt_regen() {
        let (svc, _db, _) = service();
        let post = make_post(&svc, "u1", "編集対象", &[]);

        assert_matches::assert_matches!(
            svc.update(&post.id, "u2", &PostUpdateRequest::default()),
            Err(AppError::Forbidden(_))
        );

        let long_content = "word ".repeat(60);
        let updated = svc
            .update(
                &post.id,
                "u1",
                &PostUpdateRequest {
                    content: Some(long_content.clone()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.content, long_content);
        assert!(updated.excerpt.ends_with("..."));
        assert_eq!(updated.excerpt, Post::generate_excerpt(&long_content));
        // 未提供的字段不变
        assert_eq!(updated.title, "編集対象");
    }

    #[test]
    fn test_toggle_upvote_parity() {
        let (svc, _db, _) = service();
        let post = make_post(&svc, "u1", "いいね", &[]);

        // N 回 toggle 後の状態は N mod 2
        let r1 = svc.toggle_upvote(&post.id, "u2").unwrap();
        assert!(r1.user_has_upvoted);
        assert_eq!(r1.upvotes, 1);

        let r2 = svc.toggle_upvote(&post.id, "u2").unwrap();
        assert!(!r2.user_has_upvoted);
        assert_eq!(r2.upvotes, 0);

        let r3 = svc.toggle_upvote(&post.id, "u2").unwrap();
        assert!(r3.user_has_upvoted);
        assert_eq!(r3.upvotes, 1);

        // カウンタは 0 を下回らない
        let r4 = svc.toggle_upvote(&post.id, "u2").unwrap();
        assert_eq!(r4.upvotes, 0);
        let r5 = svc.toggle_upvote(&post.id, "u1").unwrap();
        assert_eq!(r5.upvotes, 1);
    }

    #[test]
    fn test_pin_requires_admin_and_orders_first() {
        let (svc, _db, _) = service();
        let a = make_post(&svc, "u1", "古い投稿", &[]);
        let b = make_post(&svc, "u1", "新しい投稿", &[]);

        assert_matches::assert_matches!(
            svc.set_pinned(&a.id, "u1", true),
            Err(AppError::Forbidden(_))
        );

        let pinned = svc.set_pinned(&a.id, "admin", true).unwrap();
        assert!(pinned.is_pinned);

        // newest でも置顶が先頭
        let page = svc.list("u1", &PostListQuery::default()).unwrap();
        assert_eq!(page.posts[0].id, a.id);
        assert_eq!(page.posts[1].id, b.id);

        // 組内は要求されたモードの順（非置顶内で newest）
        let c = make_post(&svc, "u1", "最新の投稿", &[]);
        let page = svc.list("u1", &PostListQuery::default()).unwrap();
        assert_eq!(page.posts[0].id, a.id);
        assert_eq!(page.posts[1].id, c.id);
        assert_eq!(page.posts[2].id, b.id);
    }

    #[test]
    fn test_list_sort_by_upvotes_with_created_tiebreak() {
        let (svc, _db, _) = service();
        let a = make_post(&svc, "u1", "A", &[]);
        let b = make_post(&svc, "u1", "B", &[]);
        let c = make_post(&svc, "u1", "C", &[]);
        svc.toggle_upvote(&b.id, "u1").unwrap();
        svc.toggle_upvote(&b.id, "u2").unwrap();
        svc.toggle_upvote(&a.id, "u2").unwrap();

        let page = svc
            .list(
                "u1",
                &PostListQuery {
                    sort: Some(SortMode::Upvotes),
                    ..Default::default()
                },
            )
            .unwrap();
        let ids: Vec<&str> = page.posts.iter().map(|p| p.id.as_str()).collect();
        // b(2票) -> a(1票) -> c(0票、同数なら新しい順)
        assert_eq!(ids, vec![b.id.as_str(), a.id.as_str(), c.id.as_str()]);
        // 批量解析的点赞状态
        assert!(page.posts.iter().find(|p| p.id == b.id).unwrap().user_has_upvoted);
        assert!(!page.posts.iter().find(|p| p.id == c.id).unwrap().user_has_upvoted);
    }

    #[test]
    fn test_list_search_and_tag_filter() {
        let (svc, _db, _) = service();
        make_post(&svc, "u1", "進路相談のコツ", &["advice"]);
        make_post(&svc, "u1", "保護者面談メモ", &["parent", "memo"]);
        make_post(&svc, "u1", "授業の進め方", &["classroom"]);

        // タイトル/本文の部分一致（大文字小文字無視）
        let page = svc
            .list(
                "u1",
                &PostListQuery {
                    q: Some("面談".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.posts[0].title, "保護者面談メモ");

        // タグ集合の交差
        let page = svc
            .list(
                "u1",
                &PostListQuery {
                    tags: vec!["advice".to_string(), "memo".to_string()],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 2);
    }

    #[test]
    fn test_pagination_bounds() {
        let (svc, _db, _) = service();
        for i in 0..7 {
            make_post(&svc, "u1", &format!("投稿{}", i), &[]);
        }

        let page = svc
            .list(
                "u1",
                &PostListQuery {
                    page: Some(2),
                    limit: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(page.total, 7);
        assert_eq!(page.total_pages, 3);
        assert_eq!(page.posts.len(), 3);
        assert!(page.has_next);
        assert!(page.has_prev);

        // 空集合でも total_pages は最低 1
        let (svc_empty, _db2, _) = service();
        let empty = svc_empty.list("u1", &PostListQuery::default()).unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.total_pages, 1);
        assert!(!empty.has_next);
        assert!(!empty.has_prev);

        // limit は 1..=50 に丸める
        let clamped = svc
            .list(
                "u1",
                &PostListQuery {
                    limit: Some(500),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(clamped.limit, 50);
    }

    #[test]
    fn test_delete_cascades_comments_and_votes() {
        let (svc, db, identity) = service();
        let post = make_post(&svc, "u1", "削除対象", &[]);
        svc.toggle_upvote(&post.id, "u2").unwrap();

        let comments = crate::community::CommentService::new(Arc::clone(&db), identity);
        let root = comments
            .create(
                &post.id,
                "u2",
                &crate::models::CommentCreateRequest {
                    content: "コメント".to_string(),
                    parent_comment_id: None,
                },
            )
            .unwrap();
        comments.toggle_upvote(&root.id, "u1").unwrap();

        assert_matches::assert_matches!(
            svc.delete(&post.id, "u2"),
            Err(AppError::Forbidden(_))
        );
        svc.delete(&post.id, "u1").unwrap();

        assert_matches::assert_matches!(svc.get(&post.id, "u1"), Err(AppError::PostNotFound(_)));
        let conn = db.get_conn_safe().unwrap();
        let remaining_comments: i64 = conn
            .query_row("SELECT COUNT(*) FROM comments", [], |r| r.get(0))
            .unwrap();
        let remaining_votes: i64 = conn
            .query_row("SELECT COUNT(*) FROM upvotes", [], |r| r.get(0))
            .unwrap();
        assert_eq!(remaining_comments, 0);
        assert_eq!(remaining_votes, 0);
    }

    #[test]
    fn test_popular_tags_histogram() {
        let (svc, _db, _) = service();
        make_post(&svc, "u1", "1", &["a", "b"]);
        make_post(&svc, "u1", "2", &["b", "c"]);
        make_post(&svc, "u1", "3", &["b"]);

        let result = svc.popular_tags(20).unwrap();
        assert_eq!(
            result.tags[0],
            TagInfo {
                name: "b".to_string(),
                count: 3
            }
        );
        assert_eq!(result.tags.len(), 3);

        let top1 = svc.popular_tags(1).unwrap();
        assert_eq!(top1.tags.len(), 1);
        assert_eq!(top1.tags[0].name, "b");
    }
}
