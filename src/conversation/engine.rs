//! 对话模拟会话引擎
//!
//! 瞬态状态机：start 建会话、reply 推进、end 聚合评分并落库、inspect 只读。
//! 会话在 end 之前只存在于内存；end 之后以持久化记录的形式继续存在，
//! 原会话 id 不再可寻址。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use crate::conversation::collaborator::ConversationAi;
use crate::conversation::scenarios::ScenarioService;
use crate::conversation::state::SessionTable;
use crate::conversation::types::{
    CompletedSessionItem, CompletedSessionsResponse, EndSessionResponse, ReplyResponse,
    ScoreBreakdown, SessionHistoryResponse, SessionTurn, StartSessionResponse, TurnRole,
};
use crate::database::{format_ts, Database};
use crate::error::{AppError, AppResult};
use crate::models::{SimulationMessage, SimulationRecord};

pub struct ConversationService {
    db: Arc<Database>,
    scenarios: Arc<ScenarioService>,
    sessions: Arc<SessionTable>,
    ai: ConversationAi,
}

impl ConversationService {
    pub fn new(
        db: Arc<Database>,
        scenarios: Arc<ScenarioService>,
        sessions: Arc<SessionTable>,
        ai: ConversationAi,
    ) -> Self {
        Self {
            db,
            scenarios,
            sessions,
            ai,
        }
    }

    /// 开启会话：转录以场景开场白（学生轮）作为唯一一条种子
    pub fn start(&self, scenario_id: &str) -> AppResult<StartSessionResponse> {
        let scenario = self.scenarios.get(scenario_id)?;
        let initial_message = scenario.initial_message.clone();
        let scenario_title = scenario.title.clone();
        let scenario_id = scenario.id.clone();
        let session_id = self.sessions.start(scenario);

        Ok(StartSessionResponse {
            session_id,
            scenario_id,
            scenario_title,
            initial_message,
        })
    }

    /// 教师发言一轮
    ///
    /// 顺序：评分 -> 学生回复 -> 追加教师轮（带分）与学生轮（无分）->
    /// 追加评分。协作者的传输故障让整个请求失败且不改动转录；
    /// 只有评分载荷解析失败会降级为中性分（在协作者层处理）。
    pub async fn reply(&self, session_id: &str, content: &str) -> AppResult<ReplyResponse> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        // 整轮持锁：同一会话的并发 reply 串行化，跨会话不受影响
        let mut session = handle.lock().await;
        if session.ended {
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }

        let scores = self
            .ai
            .evaluate(&session.scenario, &session.turns, content)
            .await?;
        let student_reply = self
            .ai
            .student_reply(&session.scenario, &session.turns, content)
            .await?;

        let now = Utc::now();
        session.turns.push(SessionTurn {
            role: TurnRole::Teacher,
            content: content.to_string(),
            timestamp: now,
            scores: Some(scores),
        });
        session.turns.push(SessionTurn {
            role: TurnRole::Student,
            content: student_reply.clone(),
            timestamp: now,
            scores: None,
        });
        session.all_scores.push(scores);
        session.touched_at = now;

        let turn_number = session.all_scores.len();
        Ok(ReplyResponse {
            scores,
            student_reply,
            turn_number,
        })
    }

    /// 结束会话：聚合评分、生成总结、落库、从内存表移除
    ///
    /// 各维平均为整数下取整除法，总分是三个维度均值再下取整的均值。
    pub async fn end(&self, session_id: &str, user_id: &str) -> AppResult<EndSessionResponse> {
        let handle = self
            .sessions
            .get(session_id)
            .ok_or_else(|| AppError::SessionNotFound(session_id.to_string()))?;
        let mut session = handle.lock().await;
        if session.ended {
            return Err(AppError::SessionNotFound(session_id.to_string()));
        }
        // 没有任何教师轮就无从总结——验证先于一切副作用
        if session.all_scores.is_empty() {
            return Err(AppError::Validation(
                "No conversation turns to evaluate".to_string(),
            ));
        }

        let n = session.all_scores.len() as i64;
        let avg_sincerity = session.all_scores.iter().map(|s| s.sincerity).sum::<i64>() / n;
        let avg_appropriateness = session
            .all_scores
            .iter()
            .map(|s| s.appropriateness)
            .sum::<i64>()
            / n;
        let avg_relevance = session.all_scores.iter().map(|s| s.relevance).sum::<i64>() / n;
        let average_scores = ScoreBreakdown {
            sincerity: avg_sincerity,
            appropriateness: avg_appropriateness,
            relevance: avg_relevance,
        };
        let overall_score = (avg_sincerity + avg_appropriateness + avg_relevance) / 3;

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - session.started_at).num_seconds();

        let feedback = self
            .ai
            .feedback(&session.scenario, &session.turns, &session.all_scores)
            .await?;

        let messages: Vec<SimulationMessage> = session
            .turns
            .iter()
            .map(SessionTurn::to_simulation_message)
            .collect();
        let record_id = Uuid::new_v4().to_string();
        {
            let conn = self.db.get_conn_safe()?;
            conn.execute(
                "INSERT INTO simulations (id, user_id, scenario_id, messages, overall_score, \
                 feedback, started_at, completed_at, duration)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record_id,
                    user_id,
                    session.scenario.id,
                    serde_json::to_string(&messages)?,
                    overall_score,
                    feedback.summary,
                    format_ts(session.started_at),
                    format_ts(completed_at),
                    duration_seconds
                ],
            )?;
        }

        let total_turns = session.all_scores.len();
        session.ended = true;
        drop(session);
        self.sessions.remove(session_id);
        info!(
            "[ConversationService] Session ended: {} -> record {} ({} turns, overall {})",
            session_id, record_id, total_turns, overall_score
        );

        Ok(EndSessionResponse {
            average_scores,
            total_turns,
            duration_seconds,
            feedback,
        })
    }

    /// 只读查看：活跃会话或已完成记录（按各自的 id 空间）
    ///
    /// 除存在性外不做任何鉴权——会话与发起者无绑定（既有行为，按文档保留）。
    pub async fn inspect(&self, session_id: &str) -> AppResult<SessionHistoryResponse> {
        if let Some(handle) = self.sessions.get(session_id) {
            let session = handle.lock().await;
            if !session.ended {
                return Ok(SessionHistoryResponse {
                    session_id: session_id.to_string(),
                    scenario_id: session.scenario.id.clone(),
                    scenario_title: session.scenario.title.clone(),
                    messages: session.turns.clone(),
                    status: "active".to_string(),
                    started_at: session.started_at,
                    completed_at: None,
                });
            }
        }
        self.history_detail(session_id)
    }

    fn record_from_row(row: &Row<'_>) -> rusqlite::Result<SimulationRecord> {
        let messages_str: String = row.get(3)?;
        let started_at_str: String = row.get(6)?;
        let completed_at_str: Option<String> = row.get(7)?;

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
        let messages: Vec<SimulationMessage> =
            serde_json::from_str(&messages_str).map_err(|_| {
                rusqlite::Error::InvalidColumnType(
                    3,
                    "messages".to_string(),
                    rusqlite::types::Type::Text,
                )
            })?;
        let completed_at = match completed_at_str {
            Some(s) => Some(parse(7, "completed_at", &s)?),
            None => None,
        };

        Ok(SimulationRecord {
            id: row.get(0)?,
            user_id: row.get(1)?,
            scenario_id: row.get(2)?,
            messages,
            overall_score: row.get(4)?,
            feedback: row.get(5)?,
            started_at: parse(6, "started_at", &started_at_str)?,
            completed_at,
            duration: row.get(8)?,
        })
    }

    /// 已完成会话列表（完成时间降序）；场景标题一次批量解析，不逐行查询
    pub fn history(&self, limit: i64, skip: i64) -> AppResult<CompletedSessionsResponse> {
        let limit = limit.clamp(1, 50);
        let skip = skip.max(0);

        let (total, records) = {
            let conn = self.db.get_conn_safe()?;
            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM simulations WHERE completed_at IS NOT NULL",
                [],
                |r| r.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, user_id, scenario_id, messages, overall_score, feedback, \
                 started_at, completed_at, duration
                 FROM simulations WHERE completed_at IS NOT NULL
                 ORDER BY completed_at DESC LIMIT ?1 OFFSET ?2",
            )?;
            let rows = stmt.query_map(params![limit, skip], Self::record_from_row)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            (total, records)
        };

        // 批量解析场景标题（避免 N+1 查询）
        let mut scenario_ids: Vec<String> =
            records.iter().map(|r| r.scenario_id.clone()).collect();
        scenario_ids.sort();
        scenario_ids.dedup();
        let title_map = self.scenario_titles(&scenario_ids)?;

        let sessions = records
            .into_iter()
            .filter_map(|record| {
                let completed_at = record.completed_at?;
                let teacher_turns = record
                    .messages
                    .iter()
                    .filter(|m| m.sender == "teacher")
                    .count();
                Some(CompletedSessionItem {
                    scenario_title: title_map
                        .get(&record.scenario_id)
                        .cloned()
                        .unwrap_or_else(|| "Unknown Scenario".to_string()),
                    session_id: record.id,
                    scenario_id: record.scenario_id,
                    overall_score: record.overall_score.unwrap_or(0),
                    total_turns: teacher_turns,
                    duration_seconds: record.duration,
                    feedback_summary: record.feedback.unwrap_or_default(),
                    completed_at,
                })
            })
            .collect();

        Ok(CompletedSessionsResponse { sessions, total })
    }

    fn scenario_titles(
        &self,
        scenario_ids: &[String],
    ) -> AppResult<std::collections::HashMap<String, String>> {
        let mut map = std::collections::HashMap::new();
        if scenario_ids.is_empty() {
            return Ok(map);
        }
        let placeholders = vec!["?"; scenario_ids.len()].join(", ");
        let sql = format!(
            "SELECT id, title FROM scenarios WHERE id IN ({})",
            placeholders
        );
        let conn = self.db.get_conn_safe()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(scenario_ids.iter()), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, title) = row?;
            map.insert(id, title);
        }
        Ok(map)
    }

    /// 已完成会话详情：持久化转录按会话轮的形状重新暴露
    pub fn history_detail(&self, record_id: &str) -> AppResult<SessionHistoryResponse> {
        let record = {
            let conn = self.db.get_conn_safe()?;
            conn.query_row(
                "SELECT id, user_id, scenario_id, messages, overall_score, feedback, \
                 started_at, completed_at, duration
                 FROM simulations WHERE id = ?1",
                params![record_id],
                Self::record_from_row,
            )
            .optional()?
        }
        .ok_or_else(|| AppError::SessionNotFound(record_id.to_string()))?;

        let scenario_title = self
            .scenarios
            .get(&record.scenario_id)
            .map(|s| s.title)
            .unwrap_or_else(|_| "Unknown Scenario".to_string());

        let messages = record
            .messages
            .iter()
            .map(SessionTurn::from_simulation_message)
            .collect();

        Ok(SessionHistoryResponse {
            session_id: record.id,
            scenario_id: record.scenario_id,
            scenario_title,
            messages,
            status: "completed".to_string(),
            started_at: record.started_at,
            completed_at: record.completed_at,
        })
    }
}
