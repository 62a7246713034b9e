use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use deep_teacher_lib::community::{CommentService, PostService};
use deep_teacher_lib::config::AppConfig;
use deep_teacher_lib::conversation::{
    ConversationAi, ConversationService, OpenAiGenerator, ScenarioService, SessionTable,
};
use deep_teacher_lib::database::Database;
use deep_teacher_lib::identity::IdentityStore;
use deep_teacher_lib::server::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = AppConfig::from_env_and_file().context("加载配置失败")?;
    info!("[Main] Config loaded (db: {}, bind: {})", cfg.db_path, cfg.bind_addr);

    let db = Arc::new(Database::new(Path::new(&cfg.db_path)).context("初始化数据库失败")?);
    let identity = Arc::new(IdentityStore::new(Arc::clone(&db)));

    let scenarios = Arc::new(ScenarioService::new(Arc::clone(&db)));
    let seeded = scenarios.seed_builtin().context("播种场景失败")?;
    if seeded > 0 {
        info!("[Main] Seeded {} builtin scenarios", seeded);
    }

    let sessions = Arc::new(SessionTable::new());
    let _sweeper = SessionTable::spawn_sweeper(
        Arc::clone(&sessions),
        Duration::from_secs(cfg.session_sweep_interval_secs),
        Duration::from_secs(cfg.session_max_idle_secs),
    );

    let generator = Arc::new(OpenAiGenerator::new(&cfg).map_err(|e| anyhow::anyhow!("{}", e))?);
    let ai = ConversationAi::new(generator);

    let state = Arc::new(AppState {
        posts: PostService::new(Arc::clone(&db), Arc::clone(&identity)),
        comments: CommentService::new(Arc::clone(&db), Arc::clone(&identity)),
        conversation: ConversationService::new(
            Arc::clone(&db),
            Arc::clone(&scenarios),
            Arc::clone(&sessions),
            ai,
        ),
        scenarios,
    });

    let addr: SocketAddr = cfg
        .bind_addr
        .parse()
        .with_context(|| format!("解析监听地址失败: {}", cfg.bind_addr))?;
    server::serve(state, addr).await
}
