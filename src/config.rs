//! 应用配置加载
//!
//! 环境变量（DEEP_TEACHER__ 前缀）+ 可选 TOML 文件，叠加 .env。

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// HTTP 监听地址
    pub bind_addr: String,
    /// SQLite 数据库路径
    pub db_path: String,
    /// 文本生成服务（OpenAI 兼容）base URL
    pub ai_base_url: String,
    /// API 密钥
    pub ai_api_key: String,
    /// 模型 ID
    pub ai_model: String,
    /// 单次生成请求超时（秒）；超时视为服务故障而非降级
    pub ai_timeout_secs: u64,
    /// 会话闲置回收扫描间隔（秒）
    pub session_sweep_interval_secs: u64,
    /// 会话最大闲置时长（秒），超过后被回收（等价于放弃，不落库）
    pub session_max_idle_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8300".to_string(),
            db_path: "deep_teacher.db".to_string(),
            ai_base_url: "https://api.openai.com/v1".to_string(),
            ai_api_key: String::new(),
            ai_model: "gpt-4o-mini".to_string(),
            ai_timeout_secs: 30,
            session_sweep_interval_secs: 300,
            session_max_idle_secs: 3600,
        }
    }
}

impl AppConfig {
    pub fn from_env_and_file() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        let mut builder = config::Config::builder().add_source(
            config::Environment::with_prefix("DEEP_TEACHER")
                .separator("__")
                .list_separator(","),
        );
        if std::path::Path::new("config/deep_teacher.toml").exists() {
            builder = builder.add_source(config::File::with_name("config/deep_teacher"));
        }
        let loaded = builder
            .build()
            .unwrap_or_else(|_| config::Config::builder().build().unwrap());
        let mut cfg = AppConfig::default();
        if let Ok(val) = loaded.try_deserialize::<serde_json::Value>() {
            cfg = serde_json::from_value::<AppConfig>(val).unwrap_or(cfg);
        }
        // 直接环境变量回退（与原有部署脚本兼容）
        if cfg.ai_api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                cfg.ai_api_key = key;
            }
        }
        if let Ok(base) = std::env::var("OPENAI_BASE_URL") {
            cfg.ai_base_url = base;
        }
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            cfg.ai_model = model;
        }
        Ok(cfg)
    }
}
