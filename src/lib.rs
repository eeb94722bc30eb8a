//! Flex Deploy - 项目检测与 GitHub / GHCR 发布工具
//!
//! 库入口：模块声明、日志初始化和服务启动

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::env::constants::{JANITOR_INTERVAL_SECS, VERSION};
use config::EnvConfig;
use state::AppState;

/// 未完成的日志通道最长保留时间
const CHANNEL_MAX_AGE_HOURS: i64 = 24;

/// 命令行覆盖项
#[derive(Clone, Debug, Default)]
pub struct RuntimeConfig {
    pub port_override: Option<u16>,
    pub host_override: Option<String>,
}

/// 初始化 tracing
///
/// `RUST_LOG` 控制过滤，`LOG_FORMAT=json` 输出 JSON
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("flex_deploy=info,tower_http=info"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    let result = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };
    if let Err(e) = result {
        eprintln!("Tracing already initialized: {}", e);
    }
}

/// 加载配置并运行 HTTP 服务，直到收到 Ctrl-C / SIGTERM
pub async fn run(runtime: RuntimeConfig) -> anyhow::Result<()> {
    // .env 可选
    let dotenv = dotenvy::dotenv();
    init_tracing();
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "Loaded .env");
    }

    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    if let Some(host) = runtime.host_override {
        config.host = host;
    }

    let state = Arc::new(AppState::with_config(config)?);
    let addr = state.config.bind_addr();

    spawn_janitor(state.clone());

    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;

    tracing::info!(
        version = VERSION,
        addr = %addr,
        workspace_root = %state.config.workspace_root.display(),
        "flex-deploy listening"
    );

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            tracing::info!("Shutdown signal received");
            // 取消运行中的部署，结束控制台 SSE
            shutdown.cancel();
        })
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

/// 定期清理已完成的日志通道和过期任务
fn spawn_janitor(state: Arc<AppState>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(JANITOR_INTERVAL_SECS));
        interval.tick().await;

        loop {
            tokio::select! {
                _ = state.shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            let channels = state.log_hub.cleanup().await
                + state.log_hub.cleanup_expired(CHANNEL_MAX_AGE_HOURS).await;
            let tasks = state.task_store.cleanup_stale().await;
            if channels > 0 || tasks > 0 {
                tracing::info!(channels, tasks, "Cleaned up finished deploys");
            }
        }
    });
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
