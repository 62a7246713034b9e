//! 统一错误类型
//!
//! 提供社区板块与对话模拟共用的错误处理机制。

use serde::Serialize;
use thiserror::Error;

/// 统一错误类型
#[derive(Debug, Error, Serialize)]
pub enum AppError {
    /// 帖子未找到
    #[error("Post not found: {0}")]
    PostNotFound(String),

    /// 评论未找到
    #[error("Comment not found: {0}")]
    CommentNotFound(String),

    /// 场景未找到
    #[error("Scenario not found: {0}")]
    ScenarioNotFound(String),

    /// 会话未找到（或已结束/过期）
    #[error("Session not found or expired: {0}")]
    SessionNotFound(String),

    /// 记录未找到（通用）
    #[error("Not found: {0}")]
    NotFound(String),

    /// 权限不足（非作者或非管理员）
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// 验证错误（超过最大层级、重复删除、空会话等）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 数据库错误
    #[error("Database error: {0}")]
    Database(String),

    /// 序列化/反序列化错误
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// 文本生成服务不可达、报错或超时
    #[error("Collaborator error: {0}")]
    CollaboratorFault(String),

    /// 文本生成服务返回了无法解析的结构化内容
    /// 评分与总结两处调用点会降级为固定兜底值，不会向上传播此错误
    #[error("Collaborator parse error: {0}")]
    CollaboratorParseFault(String),
}

impl AppError {
    /// 稳定的错误码（前端按 code 差异化处理）
    pub fn code(&self) -> &'static str {
        match self {
            AppError::PostNotFound(_) => "POST_NOT_FOUND",
            AppError::CommentNotFound(_) => "COMMENT_NOT_FOUND",
            AppError::ScenarioNotFound(_) => "SCENARIO_NOT_FOUND",
            AppError::SessionNotFound(_) => "SESSION_NOT_FOUND",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::CollaboratorFault(_) => "COLLABORATOR_ERROR",
            AppError::CollaboratorParseFault(_) => "COLLABORATOR_PARSE_ERROR",
        }
    }

    /// 映射到 HTTP 状态码
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::PostNotFound(_)
            | AppError::CommentNotFound(_)
            | AppError::ScenarioNotFound(_)
            | AppError::SessionNotFound(_)
            | AppError::NotFound(_) => 404,
            AppError::Forbidden(_) => 403,
            AppError::Validation(_) => 400,
            AppError::CollaboratorFault(_) => 502,
            AppError::Database(_)
            | AppError::Serialization(_)
            | AppError::CollaboratorParseFault(_) => 500,
        }
    }
}

// 从 rusqlite::Error 转换
impl From<rusqlite::Error> for AppError {
    fn from(e: rusqlite::Error) -> Self {
        AppError::Database(format!("{:#}", e))
    }
}

// 从 serde_json::Error 转换
impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

// 从 anyhow::Error 转换
impl From<anyhow::Error> for AppError {
    fn from(e: anyhow::Error) -> Self {
        AppError::Database(format!("{:#}", e))
    }
}

// HTTP 响应体：序列化为结构化 JSON
impl From<AppError> for String {
    fn from(e: AppError) -> Self {
        let code = e.code();
        let message = e.to_string();
        serde_json::json!({ "code": code, "message": message }).to_string()
    }
}

/// Result 类型别名
pub type AppResult<T> = Result<T, AppError>;
