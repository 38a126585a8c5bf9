//! Downstream Notifier
//!
//! 새 커밋먼트 creator 를 오프체인 사용자 DB에 등록 (ensure-user).
//!
//! # 정책
//! - best-effort: 실패해도 프로젝션/체크포인트에 영향 없음
//! - 재시도 없음, 타임아웃 있음
//! - 200/201 외 응답은 모두 soft failure

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use reqwest::{Client, StatusCode};
use serde::Serialize;

use crate::error::IndexerError;
use crate::types::address_hex;

/// 프로세서에 주입되는 알림 capability
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_user_seen(&self, address: Address) -> Result<(), IndexerError>;
}

/// ensure-user 요청 바디
#[derive(Debug, Serialize)]
struct EnsureUserRequest {
    address: String,
}

/// `POST {endpoint}` + `Authorization: Bearer {secret}`
pub struct HttpNotifier {
    client: Client,
    endpoint: String,
    secret: String,
}

impl HttpNotifier {
    pub fn new(endpoint: &str, secret: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build notifier HTTP client")?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            secret: secret.to_string(),
        })
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn notify_user_seen(&self, address: Address) -> Result<(), IndexerError> {
        let body = EnsureUserRequest {
            address: address_hex(&address),
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.secret)
            .json(&body)
            .send()
            .await
            .map_err(|e| IndexerError::NotifierFailure(e.to_string()))?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => Ok(()),
            status => {
                let text = resp.text().await.unwrap_or_default();
                Err(IndexerError::NotifierFailure(format!(
                    "ensure-user returned {} {}",
                    status, text
                )))
            }
        }
    }
}

/// ENSURE_USER_URL 미설정 시
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify_user_seen(&self, address: Address) -> Result<(), IndexerError> {
        tracing::debug!(
            address = %address_hex(&address),
            "Notifier disabled, skipping ensure-user"
        );
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, StatusCode as ServerStatus};
    use axum::{routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    /// 로컬 ensure-user 서버를 띄우고 base URL 반환
    async fn spawn_endpoint(status: ServerStatus, seen: Arc<Mutex<Vec<String>>>) -> String {
        let app = Router::new().route(
            "/api/ensure-user",
            post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
                let seen = seen.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or_default()
                        .to_string();
                    if auth != "Bearer s3cret" {
                        return ServerStatus::UNAUTHORIZED;
                    }
                    seen.lock()
                        .unwrap()
                        .push(body["address"].as_str().unwrap_or_default().to_string());
                    status
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api/ensure-user", addr)
    }

    #[tokio::test]
    async fn test_created_response_is_success() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_endpoint(ServerStatus::CREATED, seen.clone()).await;
        let notifier = HttpNotifier::new(&url, "s3cret", Duration::from_secs(2)).unwrap();

        let creator = Address::from_low_u64_be(0xabc);
        notifier.notify_user_seen(creator).await.unwrap();

        assert_eq!(seen.lock().unwrap().clone(), vec![address_hex(&creator)]);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_soft_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_endpoint(ServerStatus::OK, seen.clone()).await;
        let notifier = HttpNotifier::new(&url, "wrong", Duration::from_secs(2)).unwrap();

        let result = notifier.notify_user_seen(Address::from_low_u64_be(1)).await;
        assert!(matches!(result, Err(IndexerError::NotifierFailure(_))));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_server_error_is_soft_failure() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let url = spawn_endpoint(ServerStatus::INTERNAL_SERVER_ERROR, seen).await;
        let notifier = HttpNotifier::new(&url, "s3cret", Duration::from_secs(2)).unwrap();

        let result = notifier.notify_user_seen(Address::from_low_u64_be(1)).await;
        assert!(matches!(result, Err(IndexerError::NotifierFailure(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_soft_failure() {
        // 닫힌 포트
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/api/ensure-user", listener.local_addr().unwrap());
        drop(listener);

        let notifier = HttpNotifier::new(&url, "s3cret", Duration::from_millis(500)).unwrap();
        let result = notifier.notify_user_seen(Address::from_low_u64_be(1)).await;
        assert!(matches!(result, Err(IndexerError::NotifierFailure(_))));
    }
}
