//! Commitment Indexer Library
//!
//! # Overview
//!
//! 그룹 커밋먼트 스테이킹 컨트랙트의 이벤트를 읽어
//! 오프체인 프로젝션 (commitments, participants) 을 재구성합니다.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   EventBatch   ┌────────────────┐   upsert    ┌──────────────┐
//! │ EventSource  │ ─────────────▶ │ EventProcessor │ ──────────▶ │ ProjectionDB │
//! │ (eth_getLogs)│                │  (idempotent)  │             │  (Postgres)  │
//! └──────────────┘                └───────┬────────┘             └──────┬───────┘
//!        ▲                                │ CommitmentCreated           │
//!        │ resume_block                   ▼                             │
//! ┌──────┴───────┐                ┌────────────────┐             ┌──────┴───────┐
//! │  Checkpoint  │                │    Notifier    │             │  Query API   │
//! │   Tracker    │                │ (ensure-user)  │             │   (Axum)     │
//! └──────────────┘                └────────────────┘             └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config`: 환경 설정 관리
//! - `error`: 에러 타입 및 처리
//! - `routes`: HTTP 조회 엔드포인트
//! - `services`: 이벤트 소스, 프로세서, 체크포인트, notifier, 파이프라인
//! - `db`: 프로젝션 저장소
//! - `types`: 이벤트/블록 위치 타입, 컨트랙트 ABI
//!
//! ## Usage
//!
//! ```rust,ignore
//! use commitment_indexer::{config::Config, db::Database, services::*};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let db = Arc::new(Database::connect(&config.database_url, config.store_timeout).await?);
//!     let processor = EventProcessor::new(db.clone(), Arc::new(NoopNotifier));
//!
//!     // ... 인덱서 + 서버 시작
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

pub mod config;
pub mod db;
pub mod error;
pub mod routes;
pub mod services;
pub mod types;

// Re-exports for convenience
pub use config::Config;
pub use db::Database;
pub use error::{ApiError, IndexerError};
pub use services::{CheckpointTracker, EventProcessor, Indexer};

/// 애플리케이션 전역 상태
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn db::ProjectionStore>,
    pub checkpoints: CheckpointTracker,
    pub config: Arc<Config>,
}
