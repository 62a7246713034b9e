//! 文本生成协作者
//!
//! 三种调用形态：学生扮演回复（自由文本）、教师发言三维评分（JSON）、
//! 会话总结反馈（JSON）。传输层故障（不可达/报错/超时）一律作为服务级
//! 错误上抛；只有结构化载荷解析失败才走降级路径，且仅限评分与总结两处。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::warn;

use crate::config::AppConfig;
use crate::conversation::parser;
use crate::conversation::types::{ScoreBreakdown, SessionFeedback, SessionTurn, TurnRole};
use crate::error::{AppError, AppResult};
use crate::models::Scenario;

/// 单次生成调用的参数
#[derive(Debug, Clone, Copy)]
pub struct ChatParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

/// 生成调用的统一接口（引擎与测试都不依赖具体 HTTP 实现）
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: ChatParams,
    ) -> AppResult<String>;
}

/// OpenAI 兼容 HTTP 实现
pub struct OpenAiGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiGenerator {
    pub fn new(cfg: &AppConfig) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.ai_timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::CollaboratorFault(format!("HTTP client build failed: {}", e)))?;
        Ok(Self {
            client,
            base_url: cfg.ai_base_url.trim_end_matches('/').to_string(),
            api_key: cfg.ai_api_key.clone(),
            model: cfg.ai_model.clone(),
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiGenerator {
    async fn chat(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        params: ChatParams,
    ) -> AppResult<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let request_body = serde_json::json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": false
        });

        // 超时到期与连接失败同样视为服务故障，不降级
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key.trim()))
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| AppError::CollaboratorFault(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::CollaboratorFault(format!(
                "upstream returned {}: {}",
                status, error_text
            )));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| AppError::CollaboratorFault(format!("invalid response body: {}", e)))?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                AppError::CollaboratorFault("completion response missing content".to_string())
            })?;
        Ok(content.trim().to_string())
    }
}

// ============================================================================
// 三种调用形态
// ============================================================================

/// 评分载荷；字段缺失时单项回退为 50（解析整体失败才用 60/60/60 兜底）
#[derive(Debug, Deserialize)]
struct RawScores {
    #[serde(default = "default_axis")]
    sincerity: i64,
    #[serde(default = "default_axis")]
    appropriateness: i64,
    #[serde(default = "default_axis")]
    relevance: i64,
}

fn default_axis() -> i64 {
    50
}

#[derive(Debug, Deserialize)]
struct RawFeedback {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    strengths: Option<Vec<String>>,
    #[serde(default)]
    improvements: Option<Vec<String>>,
    #[serde(default)]
    suggestions: Option<Vec<String>>,
}

pub struct ConversationAi {
    generator: Arc<dyn TextGenerator>,
}

impl ConversationAi {
    pub fn new(generator: Arc<dyn TextGenerator>) -> Self {
        Self { generator }
    }

    /// 最近 N 轮会话的 `学生:`/`先生:` 文本化
    fn format_history(turns: &[SessionTurn], last: usize) -> String {
        let skip = turns.len().saturating_sub(last);
        turns[skip..]
            .iter()
            .map(|t| {
                let speaker = match t.role {
                    TurnRole::Student => "学生",
                    TurnRole::Teacher => "先生",
                };
                format!("{}: {}", speaker, t.content)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 学生扮演回复（自由文本）
    ///
    /// 返回值规范化为以 `学生:` 开头。自由文本没有安全的兜底值，
    /// 任何故障都上抛。
    pub async fn student_reply(
        &self,
        scenario: &Scenario,
        history: &[SessionTurn],
        teacher_message: &str,
    ) -> AppResult<String> {
        let system_prompt = "あなたはベトナム人の日本語学習者（高校生）を演じています。\n\
             日本語レベルは N3〜N4 程度で、先生に対して少し緊張しています。\n\
             文法の間違いを恐れ、「えっと」「あの」などの言いよどみを使い、簡単な言葉で話します。\n\
             応答ルール：\n\
             1. 必ず「学生:」で始めること\n\
             2. 1〜3文で短く返答すること\n\
             3. 先生が優しければ少し安心し、厳しければ言葉が出にくくなること";
        let user_prompt = format!(
            "【シナリオ】\n{}\n{}\n\n【これまでの会話】\n{}\n\n【先生の最新メッセージ】\n先生: {}\n\n\
             上記に対して、学生として自然に返答してください。",
            scenario.title,
            scenario.description,
            Self::format_history(history, 6),
            teacher_message
        );

        let reply = self
            .generator
            .chat(
                system_prompt,
                &user_prompt,
                ChatParams {
                    temperature: 0.8,
                    max_tokens: 200,
                },
            )
            .await?;

        let reply = reply.trim().to_string();
        if reply.starts_with("学生:") {
            Ok(reply)
        } else {
            Ok(format!("学生: {}", reply))
        }
    }

    /// 教师发言三维评分（JSON）
    ///
    /// 每一维独立钳制到 [0, 100]。结构化载荷解析失败时降级为固定的
    /// 60/60/60 中性分——这是唯一允许的降级评分路径；传输故障仍上抛。
    pub async fn evaluate(
        &self,
        scenario: &Scenario,
        history: &[SessionTurn],
        teacher_message: &str,
    ) -> AppResult<ScoreBreakdown> {
        let system_prompt = "あなたは日本語教育の専門家です。教師の返答を 3 つの独立した基準で\n\
             0〜100 点で評価してください。\n\
             1. sincerity（本音度）: 学生に心から向き合っているか\n\
             2. appropriateness（適切さ）: 状況と学生のレベルに合った言葉遣いか\n\
             3. relevance（関連性）: 学生の発言と問題に的確に応答しているか\n\
             必ず次の JSON 形式のみで返答してください：\n\
             {\"sincerity\": 数値, \"appropriateness\": 数値, \"relevance\": 数値}";
        let user_prompt = format!(
            "【シナリオ】\n{}: {}\n\n【会話履歴】\n{}\n\n【評価対象の先生の返答】\n先生: {}\n\n\
             JSON 形式で点数を出力してください。",
            scenario.title,
            scenario.description,
            Self::format_history(history, 4),
            teacher_message
        );

        let raw = self
            .generator
            .chat(
                system_prompt,
                &user_prompt,
                ChatParams {
                    temperature: 0.3,
                    max_tokens: 100,
                },
            )
            .await?;

        match parser::parse_structured::<RawScores>(&raw) {
            Some(scores) => Ok(ScoreBreakdown::clamped(
                scores.sincerity,
                scores.appropriateness,
                scores.relevance,
            )),
            None => {
                warn!("[ConversationAi] score payload unparseable, using neutral fallback");
                Ok(ScoreBreakdown::PARSE_FALLBACK)
            }
        }
    }

    /// 会话总结反馈（JSON）
    ///
    /// 解析失败时降级为通用兜底反馈，同样不让请求失败。
    pub async fn feedback(
        &self,
        scenario: &Scenario,
        history: &[SessionTurn],
        all_scores: &[ScoreBreakdown],
    ) -> AppResult<SessionFeedback> {
        let turn_count = all_scores.len();
        let (avg_s, avg_a, avg_r) = if turn_count > 0 {
            let n = turn_count as i64;
            (
                all_scores.iter().map(|s| s.sincerity).sum::<i64>() / n,
                all_scores.iter().map(|s| s.appropriateness).sum::<i64>() / n,
                all_scores.iter().map(|s| s.relevance).sum::<i64>() / n,
            )
        } else {
            (50, 50, 50)
        };

        let system_prompt = "あなたは日本語教育の専門家です。教師の対話練習セッションを総括してください。\n\
             必ず次の JSON 形式で返答してください：\n\
             {\"summary\": \"全体の評価を2〜3文で\", \"strengths\": [\"...\"], \
              \"improvements\": [\"...\"], \"suggestions\": [\"...\"]}\n\
             日本語で、具体的かつ励ましを含むフィードバックを書いてください。";
        let user_prompt = format!(
            "【シナリオ】\n{}\n\n【会話全文】\n{}\n\n【平均スコア】\n\
             本音度: {}/100、適切さ: {}/100、関連性: {}/100\n\n【対話回数】\n{}回\n\n\
             セッションを総括し、JSON 形式でフィードバックを出力してください。",
            scenario.title,
            Self::format_history(history, history.len()),
            avg_s,
            avg_a,
            avg_r,
            turn_count
        );

        let raw = self
            .generator
            .chat(
                system_prompt,
                &user_prompt,
                ChatParams {
                    temperature: 0.6,
                    max_tokens: 500,
                },
            )
            .await?;

        match parser::parse_structured::<RawFeedback>(&raw) {
            Some(parsed) => Ok(SessionFeedback {
                summary: parsed
                    .summary
                    .unwrap_or_else(|| "セッションを完了しました。".to_string()),
                strengths: parsed
                    .strengths
                    .unwrap_or_else(|| vec!["対話を最後まで続けました".to_string()]),
                improvements: parsed
                    .improvements
                    .unwrap_or_else(|| vec!["より具体的な質問を心がけましょう".to_string()]),
                suggestions: parsed
                    .suggestions
                    .unwrap_or_else(|| vec!["学生の気持ちに寄り添う言葉を増やしましょう".to_string()]),
            }),
            None => {
                warn!("[ConversationAi] feedback payload unparseable, using generic fallback");
                Ok(SessionFeedback::parse_fallback(turn_count))
            }
        }
    }
}

impl std::fmt::Debug for ConversationAi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationAi").finish_non_exhaustive()
    }
}
