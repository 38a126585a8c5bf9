//! Health Check Endpoint
//!
//! # Interview Q&A
//!
//! Q: Health check 엔드포인트는 왜 필요한가?
//! A: 3가지 용도
//!    1. 로드밸런서 헬스체크 (ALB, nginx)
//!    2. Kubernetes liveness/readiness probe
//!    3. 모니터링 시스템 연동 (Prometheus, Datadog)
//!
//! Q: 인덱서 체크포인트도 함께 보여주는 이유는?
//! A: 조회 API 는 결과적 일관성 (eventual consistency)
//!    - DB 가 살아 있어도 인덱서가 멈춰 있으면 데이터가 오래됨
//!    - 체크포인트 블록을 보면 얼마나 따라잡았는지 바로 확인 가능

use axum::{extract::State, Json};
use serde::Serialize;

use crate::AppState;

/// Health check 응답
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub database: DatabaseStatus,
    pub indexer: IndexerHealth,
    pub timestamp: String,
}

#[derive(Serialize)]
pub struct DatabaseStatus {
    pub connected: bool,
    pub latency_ms: Option<u64>,
}

#[derive(Serialize)]
pub struct IndexerHealth {
    pub stream: String,
    /// 아직 아무 블록도 반영하지 않았으면 null
    pub checkpoint_block: Option<u64>,
}

/// GET /health
///
/// 서버 및 의존성 상태 확인
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    // DB 연결 테스트
    let db_start = std::time::Instant::now();
    let db_status = match state.store.health_check().await {
        Ok(_) => DatabaseStatus {
            connected: true,
            latency_ms: Some(db_start.elapsed().as_millis() as u64),
        },
        Err(_) => DatabaseStatus {
            connected: false,
            latency_ms: None,
        },
    };

    let checkpoint_block = if db_status.connected {
        state.checkpoints.last_checkpoint().await.ok().flatten()
    } else {
        None
    };

    Json(HealthResponse {
        status: if db_status.connected { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: db_status,
        indexer: IndexerHealth {
            stream: state.checkpoints.stream().to_string(),
            checkpoint_block,
        },
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;

    use super::super::testing::{app_with, get_json};
    use crate::db::memory::MemoryStore;
    use crate::db::CheckpointStore;

    #[tokio::test]
    async fn test_healthy_with_checkpoint() {
        let store = Arc::new(MemoryStore::new());
        store
            .advance_checkpoint("31337:0x5fc8d32690cc91d4c39d9d3abcbd16989f875707", 42)
            .await
            .unwrap();

        let (status, body) = get_json(app_with(store), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["database"]["connected"], true);
        assert_eq!(body["indexer"]["checkpoint_block"], 42);
    }

    #[tokio::test]
    async fn test_degraded_when_store_down() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let (status, body) = get_json(app_with(store), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "degraded");
        assert!(body["indexer"]["checkpoint_block"].is_null());
    }
}
