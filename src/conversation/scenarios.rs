//! 对话练习场景目录
//!
//! 场景对会话而言是不可变输入。空表时在启动阶段播种内置场景；
//! 非空表绝不触碰（幂等）。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tracing::info;
use uuid::Uuid;

use crate::database::{now_ts, Database};
use crate::error::{AppError, AppResult};
use crate::models::Scenario;

/// 内置练习场景（标题、说明、难度、分类、学生的开场白）
const BUILTIN_SCENARIOS: &[(&str, &str, &str, &str, &str)] = &[
    (
        "授業に遅刻した理由を伝える練習",
        "生徒が遅刻した理由をうまく言葉にできず困っている場面。教師が表現を引き出すサポートをします。",
        "easy",
        "classroom",
        "生徒: 先生…すみません。さっき呼ばれたのに、どう言えばいいか分からなくて…。",
    ),
    (
        "授業内容が分からないときの伝え方",
        "分からない部分を率直に伝えられない生徒をフォローする会話パターンを練習します。",
        "medium",
        "academic",
        "生徒: あの…先生、さっきのところがちょっとよく分からなくて…。迷惑じゃないですか？",
    ),
    (
        "学校を休みたい時の相談",
        "体調や家庭の事情で休みたいことを言い出せない生徒との面談を練習します。",
        "medium",
        "classroom",
        "生徒: 先生、あの…ちょっと相談があるんですけど…。明日のこと、なんですが…。",
    ),
    (
        "クラスメートとの問題を相談",
        "誰にも言えずに悩んでいる生徒から人間関係の相談を受ける場面です。",
        "hard",
        "classroom",
        "生徒: 先生…あの…誰にも言ってないんですけど…。最近、クラスでちょっと…。",
    ),
    (
        "家庭の問題を相談",
        "家庭の事情を打ち明けられる、非常にデリケートな相談への対応を練習します。",
        "hard",
        "personal",
        "生徒: 先生、今日…少し話を聞いてもらえますか？家のことで…ちょっと…。",
    ),
];

pub struct ScenarioService {
    db: Arc<Database>,
}

impl ScenarioService {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn scenario_from_row(row: &Row<'_>) -> rusqlite::Result<Scenario> {
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
        let created_at_str: String = row.get(6)?;
        let updated_at_str: String = row.get(7)?;
        Ok(Scenario {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            difficulty: row.get(3)?,
            category: row.get(4)?,
            initial_message: row.get(5)?,
            created_at: parse(6, "created_at", &created_at_str)?,
            updated_at: parse(7, "updated_at", &updated_at_str)?,
        })
    }

    /// 全部场景（创建时间升序，输出稳定）
    pub fn list(&self) -> AppResult<Vec<Scenario>> {
        let conn = self.db.get_conn_safe()?;
        let mut stmt = conn.prepare(
            "SELECT id, title, description, difficulty, category, initial_message, \
             created_at, updated_at FROM scenarios ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map([], Self::scenario_from_row)?;
        let mut scenarios = Vec::new();
        for row in rows {
            scenarios.push(row?);
        }
        Ok(scenarios)
    }

    pub fn get(&self, scenario_id: &str) -> AppResult<Scenario> {
        let conn = self.db.get_conn_safe()?;
        let scenario = conn
            .query_row(
                "SELECT id, title, description, difficulty, category, initial_message, \
                 created_at, updated_at FROM scenarios WHERE id = ?1",
                params![scenario_id],
                Self::scenario_from_row,
            )
            .optional()?;
        scenario.ok_or_else(|| AppError::ScenarioNotFound(scenario_id.to_string()))
    }

    /// 播种内置场景。表非空时不做任何事，返回插入数量
    pub fn seed_builtin(&self) -> AppResult<usize> {
        let conn = self.db.get_conn_safe()?;
        let existing: i64 = conn.query_row("SELECT COUNT(*) FROM scenarios", [], |r| r.get(0))?;
        if existing > 0 {
            return Ok(0);
        }

        for (title, description, difficulty, category, initial_message) in BUILTIN_SCENARIOS {
            conn.execute(
                "INSERT INTO scenarios (id, title, description, difficulty, category, \
                 initial_message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    title,
                    description,
                    difficulty,
                    category,
                    initial_message,
                    now_ts()
                ],
            )?;
        }
        info!(
            "[ScenarioService] Seeded {} builtin scenarios",
            BUILTIN_SCENARIOS.len()
        );
        Ok(BUILTIN_SCENARIOS.len())
    }
}
