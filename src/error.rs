//! Error Handling Module
//!
//! Two layers:
//! - `IndexerError`: the indexing pipeline taxonomy. Only the `*Unavailable`
//!   kinds stop forward progress; everything else is recovered locally with
//!   a log record.
//! - `ApiError`: HTTP status mapping for the read-only query API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::types::{CommitmentId, LogPosition};

/// 인덱서 에러 타입
///
/// | variant              | 처리                                   |
/// |----------------------|----------------------------------------|
/// | SourceUnavailable    | 같은 위치에서 재시도, 상태 변경 없음      |
/// | MalformedEvent       | 이벤트 skip, 체크포인트 전진            |
/// | DataIntegrityAnomaly | 로그 후 부분 적용                       |
/// | StoreUnavailable     | 같은 배치 재시도, 체크포인트 유지        |
/// | NotifierFailure      | 로그만                                  |
/// | RejectedWrite        | 저장소가 값을 거부, 이벤트 skip          |
/// | CorruptRecord        | 저장된 row 디코딩 실패, 이벤트 skip      |
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum IndexerError {
    #[error("Event source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("Malformed event at {position}: {reason}")]
    MalformedEvent { position: LogPosition, reason: String },

    #[error("Data integrity anomaly on commitment {commitment_id}: {detail}")]
    DataIntegrityAnomaly {
        commitment_id: CommitmentId,
        detail: String,
    },

    #[error("Projection store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Downstream notifier failed: {0}")]
    NotifierFailure(String),

    #[error("Store rejected write: {0}")]
    RejectedWrite(String),

    #[error("Corrupt stored record: {0}")]
    CorruptRecord(String),
}

impl IndexerError {
    /// 백오프 후 같은 위치에서 다시 시도해야 하는 에러인가
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IndexerError::SourceUnavailable(_) | IndexerError::StoreUnavailable(_)
        )
    }
}

/// SQLx 에러 분류
///
/// 값 자체가 거부된 경우만 RejectedWrite, 나머지 (연결, 풀, 타임아웃) 는 장애
impl From<sqlx::Error> for IndexerError {
    fn from(err: sqlx::Error) -> Self {
        let sqlstate = match &err {
            sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
            _ => None,
        };
        classify_store_error(sqlstate.as_deref(), err.to_string())
    }
}

/// SQLSTATE class 22 (data exception), 23 (integrity constraint) 은 재시도해도 결과가 같음
fn classify_store_error(sqlstate: Option<&str>, message: String) -> IndexerError {
    match sqlstate {
        Some(code) if code.starts_with("22") || code.starts_with("23") => {
            IndexerError::RejectedWrite(format!("{} (SQLSTATE {})", message, code))
        }
        _ => IndexerError::StoreUnavailable(message),
    }
}

/// API 에러 타입
#[derive(Debug, Error)]
pub enum ApiError {
    // ============ 400 Bad Request ============
    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ============ 404 Not Found ============
    #[error("Resource not found: {0}")]
    NotFound(String),

    // ============ 500 Internal Server Error ============
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Internal server error")]
    InternalError,

    // ============ 503 Service Unavailable ============
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// API 에러 응답 구조
#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            ApiError::ValidationError(msg) => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                "Validation failed".to_string(),
                Some(msg.clone()),
            ),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("{} not found", resource),
                None,
            ),

            // 내부 에러는 클라이언트에 상세 정보 노출 안 함
            ApiError::DatabaseError(_) => {
                tracing::error!("Database error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "Database error occurred".to_string(),
                    None,
                )
            }
            ApiError::InternalError => {
                tracing::error!("Internal error: {:?}", self);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            ApiError::ServiceUnavailable(service) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                format!("{} is currently unavailable", service),
                None,
            ),
        };

        let body = ErrorResponse {
            error: message,
            code: code.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

impl From<IndexerError> for ApiError {
    fn from(err: IndexerError) -> Self {
        match err {
            IndexerError::StoreUnavailable(msg) => ApiError::ServiceUnavailable(msg),
            IndexerError::CorruptRecord(msg) | IndexerError::RejectedWrite(msg) => {
                ApiError::DatabaseError(msg)
            }
            other => {
                tracing::error!("Unexpected indexer error in query path: {:?}", other);
                ApiError::InternalError
            }
        }
    }
}
