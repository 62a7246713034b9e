//! 对话模拟引擎
//!
//! - scenarios: 练习场景目录与种子
//! - state: 进程级活跃会话表（按会话串行化 + 闲置回收）
//! - collaborator: 文本生成协作者（学生扮演 / 评分 / 总结）
//! - parser: 协作者 JSON 载荷的清理与抽取
//! - engine: start / reply / end / inspect 状态机与历史查询
//! - types: 模块类型定义

pub mod collaborator;
pub mod engine;
pub mod parser;
pub mod scenarios;
pub mod state;
pub mod types;

pub use collaborator::{ConversationAi, OpenAiGenerator, TextGenerator};
pub use engine::ConversationService;
pub use scenarios::ScenarioService;
pub use state::SessionTable;
