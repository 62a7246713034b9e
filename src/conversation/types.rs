//! 对话模拟模块类型定义
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Scenario, SimulationMessage};

/// 三维独立评分，每一维单独钳制在 [0, 100]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// 本音度：是否真诚地面对学生
    pub sincerity: i64,
    /// 適切さ：措辞与场合是否得当
    pub appropriateness: i64,
    /// 関連性：是否切中学生的发言与处境
    pub relevance: i64,
}

impl ScoreBreakdown {
    /// 解析失败时的固定中性兜底分（降级而非失败）
    pub const PARSE_FALLBACK: ScoreBreakdown = ScoreBreakdown {
        sincerity: 60,
        appropriateness: 60,
        relevance: 60,
    };

    pub fn clamped(sincerity: i64, appropriateness: i64, relevance: i64) -> Self {
        Self {
            sincerity: sincerity.clamp(0, 100),
            appropriateness: appropriateness.clamp(0, 100),
            relevance: relevance.clamp(0, 100),
        }
    }
}

/// 会话结束时的总结反馈
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionFeedback {
    /// 总体评价（2〜3 句）
    pub summary: String,
    /// 做得好的点
    pub strengths: Vec<String>,
    /// 需要改进的点
    pub improvements: Vec<String>,
    /// 下次练习的建议
    pub suggestions: Vec<String>,
}

impl SessionFeedback {
    /// 解析失败时的通用兜底反馈
    pub fn parse_fallback(turn_count: usize) -> Self {
        Self {
            summary: format!(
                "セッションを完了しました。{}回の対話を行いました。",
                turn_count
            ),
            strengths: vec!["対話を最後まで続けることができました".to_string()],
            improvements: vec!["より具体的な質問を心がけましょう".to_string()],
            suggestions: vec!["学生の気持ちに寄り添う言葉を増やしましょう".to_string()],
        }
    }
}

/// 发言者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    Teacher,
    Student,
}

impl TurnRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnRole::Teacher => "teacher",
            TurnRole::Student => "student",
        }
    }
}

/// 会话中的一轮发言；只有教师轮带评分
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub role: TurnRole,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<ScoreBreakdown>,
}

/// 进程内的活跃会话（结束前不落库）
///
/// 生命周期：start 创建 -> 每次 reply 追加恰好两轮（先教师后学生）与
/// 一组评分 -> end 转换为持久化记录并从表中移除。
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub scenario: Scenario,
    pub turns: Vec<SessionTurn>,
    pub all_scores: Vec<ScoreBreakdown>,
    pub started_at: DateTime<Utc>,
    /// 最后一次被任何操作触达的时间（闲置回收的依据）
    pub touched_at: DateTime<Utc>,
    /// end 或回收后置位；仍持有句柄的并发调用据此报 NotFound
    pub ended: bool,
}

impl ActiveSession {
    pub fn new(scenario: Scenario) -> Self {
        let now = Utc::now();
        let initial = SessionTurn {
            role: TurnRole::Student,
            content: scenario.initial_message.clone(),
            timestamp: now,
            scores: None,
        };
        Self {
            scenario,
            turns: vec![initial],
            all_scores: Vec::new(),
            started_at: now,
            touched_at: now,
            ended: false,
        }
    }
}

// ============================================================================
// 请求/响应
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    pub scenario_id: String,
}

#[derive(Debug, Serialize)]
pub struct StartSessionResponse {
    pub session_id: String,
    pub scenario_id: String,
    pub scenario_title: String,
    pub initial_message: String,
}

#[derive(Debug, Deserialize)]
pub struct ReplyRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct ReplyResponse {
    pub scores: ScoreBreakdown,
    pub student_reply: String,
    /// 第几轮教师发言（1 起）
    pub turn_number: usize,
}

#[derive(Debug, Serialize)]
pub struct EndSessionResponse {
    pub average_scores: ScoreBreakdown,
    pub total_turns: usize,
    pub duration_seconds: i64,
    pub feedback: SessionFeedback,
}

#[derive(Debug, Serialize)]
pub struct SessionHistoryResponse {
    pub session_id: String,
    pub scenario_id: String,
    pub scenario_title: String,
    pub messages: Vec<SessionTurn>,
    pub status: String, // "active" 或 "completed"
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct ScenarioResponse {
    pub id: String,
    pub title: String,
    pub description: String,
    pub difficulty: String,
    pub category: String,
    pub initial_message: String,
}

#[derive(Debug, Serialize)]
pub struct ScenarioListResponse {
    pub scenarios: Vec<ScenarioResponse>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CompletedSessionItem {
    pub session_id: String,
    pub scenario_id: String,
    pub scenario_title: String,
    pub overall_score: i64,
    pub total_turns: usize,
    pub duration_seconds: i64,
    pub feedback_summary: String,
    pub completed_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct CompletedSessionsResponse {
    pub sessions: Vec<CompletedSessionItem>,
    pub total: i64,
}

/// 持久化消息与会话轮之间的互换
impl SessionTurn {
    pub fn to_simulation_message(&self) -> SimulationMessage {
        SimulationMessage {
            sender: self.role.as_str().to_string(),
            content: self.content.clone(),
            timestamp: self.timestamp,
            sincerity_score: self.scores.map(|s| s.sincerity),
            appropriateness_score: self.scores.map(|s| s.appropriateness),
            relevance_score: self.scores.map(|s| s.relevance),
        }
    }

    pub fn from_simulation_message(msg: &SimulationMessage) -> Self {
        let role = if msg.sender == "teacher" {
            TurnRole::Teacher
        } else {
            TurnRole::Student
        };
        let scores = match (msg.sincerity_score, role) {
            (Some(s), TurnRole::Teacher) => Some(ScoreBreakdown::clamped(
                s,
                msg.appropriateness_score.unwrap_or(0),
                msg.relevance_score.unwrap_or(0),
            )),
            _ => None,
        };
        Self {
            role,
            content: msg.content.clone(),
            timestamp: msg.timestamp,
            scores,
        }
    }
}
