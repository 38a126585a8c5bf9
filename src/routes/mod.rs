//! API Routes Module
//!
//! 프로젝션 조회용 읽기 전용 HTTP 엔드포인트
//!
//! # Routes
//! - `/health` - 헬스 체크
//! - `/commitments` - 커밋먼트 목록 (필터 + 페이지네이션)
//! - `/commitments/:id` - 커밋먼트 상세 (참가자 포함)
//! - `/indexer/status` - 인덱서 진행 상황

pub mod commitment;
pub mod health;
pub mod indexer;

use axum::{
    http::{HeaderValue, Method},
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::AppState;

/// 라우터 생성
///
/// # Route Structure
///
/// ```text
/// GET  /health              - 서버 + DB + 체크포인트 상태
///
/// GET  /commitments         - ?completed=&creator=&group=&page=&limit=
/// GET  /commitments/:id     - 상세 + 참가자 목록
///
/// GET  /indexer/status      - stream, 체크포인트, 재시작 블록
/// ```
pub fn create_router(state: AppState) -> Router {
    // CORS 설정
    // 프로덕션에서는 ALLOWED_ORIGINS 만, 개발 환경에서는 localhost 허용
    let cors = if state.config.is_production() {
        let origins: Vec<HeaderValue> = state
            .config
            .allowed_origins
            .iter()
            .filter_map(|s| s.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET])
            .allow_headers([axum::http::header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
            .allow_origin([
                HeaderValue::from_static("http://localhost:5173"), // Vite dev server
                HeaderValue::from_static("http://localhost:3000"), // Next.js frontend
                HeaderValue::from_static("http://127.0.0.1:5173"),
            ])
            .allow_methods(Any)
            .allow_headers(Any)
    };

    Router::new()
        // Health check
        .route("/health", get(health::health_check))

        // Commitments
        .route("/commitments", get(commitment::list_commitments))
        .route("/commitments/:id", get(commitment::get_commitment))

        // Indexer
        .route("/indexer/status", get(indexer::indexer_status))

        // 미들웨어
        .layer(TraceLayer::new_for_http())
        .layer(cors)

        // 상태 주입
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use axum::{body::Body, http::Request, Router};
    use tower::ServiceExt;

    use crate::db::memory::MemoryStore;
    use crate::services::CheckpointTracker;
    use crate::{AppState, Config};

    pub fn app_with(store: Arc<MemoryStore>) -> Router {
        let config = Config::from_lookup(|_| None).unwrap();
        let checkpoints =
            CheckpointTracker::new(store.clone(), config.stream_key(), config.start_block);
        super::create_router(AppState {
            store,
            checkpoints,
            config: Arc::new(config),
        })
    }

    /// GET 요청 → (status, JSON body)
    pub async fn get_json(app: Router, uri: &str) -> (axum::http::StatusCode, serde_json::Value) {
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }
}
