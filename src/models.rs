use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 摘要最大长度（字符数）
pub const EXCERPT_MAX_CHARS: usize = 150;

// ============================================================================
// 社区板块实体
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub author_id: String,
    pub title: String,
    pub content: String,
    pub excerpt: String, // content 的派生摘要，content 变更时必须重新计算
    pub tags: Vec<String>, // 已小写化、去空白
    pub upvotes: i64,
    pub views: i64,
    pub comment_count: i64, // 缓存值，软删除的评论仍然计入
    pub is_pinned: bool,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// 从 content 生成摘要：不超过 150 字符，在最后一个完整单词处截断并追加省略号；
    /// content 足够短时原样返回
    pub fn generate_excerpt(content: &str) -> String {
        let chars: Vec<char> = content.chars().collect();
        if chars.len() <= EXCERPT_MAX_CHARS {
            return content.to_string();
        }
        let prefix: String = chars[..EXCERPT_MAX_CHARS].iter().collect();
        // 在限长前的最后一个空白处截断，保留完整单词
        let cut = match prefix.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => &prefix[..pos],
            _ => prefix.as_str(),
        };
        format!("{}...", cut.trim_end())
    }
}

/// 评论的墓碑状态：活跃，或被删除（记录是否由管理员删除）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentState {
    Active,
    Deleted { by_admin: bool },
}

impl CommentState {
    pub fn from_columns(is_deleted: bool, by_admin: bool) -> Self {
        if is_deleted {
            CommentState::Deleted { by_admin }
        } else {
            CommentState::Active
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, CommentState::Deleted { .. })
    }

    pub fn deleted_by_admin(&self) -> bool {
        matches!(self, CommentState::Deleted { by_admin: true })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    pub content: String,
    pub upvotes: i64,
    pub parent_comment_id: Option<String>,
    pub depth: i64, // 0 = 根评论，1 = 回复；不允许更深
    /// 墓碑状态；Deleted 时检索仍返回实体但内容被抑制
    pub state: CommentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 点赞目标类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Post,
    Comment,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Post => "post",
            TargetType::Comment => "comment",
        }
    }
}

/// 作者公开信息（由身份存储解析，解析失败时回退为 Unknown）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorInfo {
    pub id: String,
    pub username: String,
    pub full_name: String,
}

impl AuthorInfo {
    pub fn unknown(author_id: &str) -> Self {
        Self {
            id: author_id.to_string(),
            username: "Unknown".to_string(),
            full_name: "Unknown User".to_string(),
        }
    }
}

/// 用户角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Teacher,
    Admin,
}

// ============================================================================
// 社区板块请求/响应
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PostCreateRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PostUpdateRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub tags: Option<Vec<String>>,
}

/// 排序模式（置顶帖永远排在最前，与此处选择无关）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    Newest,
    Upvotes,
    Views,
    Active,
}

impl SortMode {
    pub fn parse(s: &str) -> Self {
        match s {
            "upvotes" => SortMode::Upvotes,
            "views" => SortMode::Views,
            "active" => SortMode::Active,
            _ => SortMode::Newest,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PostListQuery {
    pub q: Option<String>,
    pub tags: Vec<String>,
    pub sort: Option<SortMode>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PostListItem {
    pub id: String,
    pub author: AuthorInfo,
    pub title: String,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub upvotes: i64,
    pub views: i64,
    pub comment_count: i64,
    pub is_pinned: bool,
    pub user_has_upvoted: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct PostListResponse {
    pub posts: Vec<PostListItem>,
    pub total: i64,
    pub page: i64,
    pub limit: i64,
    pub total_pages: i64,
    pub has_next: bool,
    pub has_prev: bool,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: String,
    pub author: AuthorInfo,
    pub title: String,
    pub content: String,
    pub excerpt: String,
    pub tags: Vec<String>,
    pub upvotes: i64,
    pub views: i64,
    pub comment_count: i64,
    pub is_pinned: bool,
    pub user_has_upvoted: bool,
    pub last_activity: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct UpvoteResponse {
    pub success: bool,
    pub upvotes: i64,
    pub user_has_upvoted: bool,
}

#[derive(Debug, Deserialize)]
pub struct PinPostRequest {
    pub is_pinned: bool,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TagInfo {
    pub name: String,
    pub count: i64,
}

#[derive(Debug, Serialize)]
pub struct TagListResponse {
    pub tags: Vec<TagInfo>,
}

#[derive(Debug, Deserialize)]
pub struct CommentCreateRequest {
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CommentUpdateRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct CommentResponse {
    pub id: String,
    pub post_id: String,
    pub author: AuthorInfo,
    /// 软删除后内容不再暴露（空字符串占位）
    pub content: String,
    pub upvotes: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_comment_id: Option<String>,
    pub depth: i64,
    pub user_has_upvoted: bool,
    pub reply_count: i64,
    pub is_deleted: bool,
    pub deleted_by_admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CommentListResponse {
    pub comments: Vec<CommentResponse>,
    pub total: i64,
}

// ============================================================================
// 对话模拟实体
// ============================================================================

/// 对话练习场景（不可变，由种子数据提供）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: String, // "easy" / "medium" / "hard"
    pub category: String,
    pub initial_message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// 持久化的模拟消息（会话结束时落库）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationMessage {
    pub sender: String, // "teacher" 或 "student"
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sincerity_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appropriateness_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_score: Option<i64>,
}

/// 持久化的模拟记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub id: String,
    pub user_id: String,
    pub scenario_id: String,
    pub messages: Vec<SimulationMessage>,
    pub overall_score: Option<i64>,
    pub feedback: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration: i64, // 秒
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excerpt_short_content_verbatim() {
        let content = "短い投稿です。";
        assert_eq!(Post::generate_excerpt(content), content);

        // ちょうど 150 字符も原样返回
        let exact: String = "a".repeat(EXCERPT_MAX_CHARS);
        assert_eq!(Post::generate_excerpt(&exact), exact);
    }

    #[test]
    fn test_excerpt_truncates_at_word_boundary() {
        let word = "word ";
        let content = word.repeat(40); // 200 chars
        let excerpt = Post::generate_excerpt(&content);
        assert!(excerpt.ends_with("..."));
        let body = excerpt.trim_end_matches("...");
        assert!(body.chars().count() <= EXCERPT_MAX_CHARS);
        // 不在单词中间截断
        assert!(body.ends_with("word"));
        assert!(content.starts_with(body));
    }

    #[test]
    fn test_excerpt_no_whitespace_falls_back_to_hard_cut() {
        let content = "x".repeat(300);
        let excerpt = Post::generate_excerpt(&content);
        assert!(excerpt.ends_with("..."));
        assert_eq!(excerpt.trim_end_matches("...").chars().count(), EXCERPT_MAX_CHARS);
    }

    #[test]
    fn test_comment_state_from_columns() {
        assert_eq!(CommentState::from_columns(false, false), CommentState::Active);
        // 未删除时 by_admin 列无意义
        assert_eq!(CommentState::from_columns(false, true), CommentState::Active);
        let deleted = CommentState::from_columns(true, true);
        assert!(deleted.is_deleted());
        assert!(deleted.deleted_by_admin());
        assert!(!CommentState::from_columns(true, false).deleted_by_admin());
    }

    #[test]
    fn test_sort_mode_parse_defaults_to_newest() {
        assert_eq!(SortMode::parse("upvotes"), SortMode::Upvotes);
        assert_eq!(SortMode::parse("views"), SortMode::Views);
        assert_eq!(SortMode::parse("active"), SortMode::Active);
        assert_eq!(SortMode::parse("newest"), SortMode::Newest);
        assert_eq!(SortMode::parse("garbage"), SortMode::Newest);
    }
}
