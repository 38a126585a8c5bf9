//! Commitment Indexer Server
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Ethereum JSON-RPC (eth_getLogs)              │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Indexer Task                            │
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  poll loop ──(bounded queue)──▶ apply loop              ││
//! │  └─────────────────────────────────────────────────────────┘│
//! │  ┌─────────────────────────────────────────────────────────┐│
//! │  │  EventProcessor ──▶ ProjectionStore ──▶ Checkpoint      ││
//! │  │        └──▶ Notifier (ensure-user, best-effort)          ││
//! │  └─────────────────────────────────────────────────────────┘│
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 PostgreSQL (commitments, participants)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │
//! ┌─────────────────────────────────────────────────────────────┐
//! │             Axum Query API  /health  /commitments            │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// 라이브러리에서 가져오기
use commitment_indexer::{
    routes,
    services::{
        CheckpointTracker, EthLogSource, EventProcessor, HttpNotifier, Indexer, IndexerOptions,
        NoopNotifier, Notifier,
    },
    AppState, Config, Database,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 환경변수 로드
    dotenvy::dotenv().ok();

    // 로깅 초기화
    // RUST_LOG=debug,sqlx=warn 형태로 레벨 제어 가능
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "commitment_indexer=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Commitment Indexer");

    // 설정 로드
    let config = Config::from_env()?;
    tracing::info!(
        chain_id = config.chain_id,
        contract = %format!("{:#x}", config.contract_address),
        "📋 Configuration loaded"
    );

    // 데이터베이스 연결
    let db = Arc::new(Database::connect(&config.database_url, config.store_timeout).await?);
    tracing::info!("🗄️  Database connected");

    // 마이그레이션 실행
    db.run_migrations().await?;
    tracing::info!("📦 Migrations completed");

    // 서비스 초기화
    let notifier: Arc<dyn Notifier> = match &config.ensure_user_url {
        Some(url) => {
            tracing::info!(url = %url, "📨 ensure-user notifier enabled");
            Arc::new(HttpNotifier::new(url, &config.notifier_secret, config.notifier_timeout)?)
        }
        None => {
            tracing::info!("📨 ensure-user notifier disabled (ENSURE_USER_URL not set)");
            Arc::new(NoopNotifier)
        }
    };

    let source = EthLogSource::new(
        &config.eth_rpc_url,
        config.contract_address,
        config.confirmations,
        config.rpc_timeout,
    )?;
    tracing::info!(rpc = %config.eth_rpc_url, "⛓️  Event source ready");

    let processor =
        EventProcessor::new(db.clone(), notifier).with_store_timeout(config.store_timeout);
    let checkpoints = CheckpointTracker::new(db.clone(), config.stream_key(), config.start_block)
        .with_timeout(config.store_timeout);

    let indexer = Indexer::new(
        Arc::new(source),
        Arc::new(processor),
        checkpoints.clone(),
        IndexerOptions::from(&config),
    );

    // 인덱서 시작
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let indexer_task = tokio::spawn(indexer.run(shutdown_rx));

    // 앱 상태 구성
    let state = AppState {
        store: db,
        checkpoints,
        config: Arc::new(config.clone()),
    };

    // 라우터 구성
    let app = routes::create_router(state);

    // 서버 시작
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("🌐 Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 서버 종료 후 인덱서 정리 (진행 중인 배치는 마무리)
    tracing::info!("🛑 Shutting down indexer");
    let _ = shutdown_tx.send(true);
    if let Err(e) = indexer_task.await {
        tracing::error!("Indexer task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
