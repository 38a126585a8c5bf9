//! Event Source Adapter
//!
//! 커밋먼트 컨트랙트의 로그를 블록 구간 단위로 읽어옴.
//!
//! # 동작
//! ```text
//! head = eth_blockNumber
//! safe = head - confirmations          (reorg 가능 구간은 읽지 않음)
//! from > safe          → None (따라잡음)
//! to = min(from + max_blocks - 1, safe)
//! eth_getLogs(address, topic0 ∈ signatures, from..=to)
//! ```
//!
//! 중복 제거는 하지 않음. 같은 구간을 다시 읽으면 같은 이벤트가 다시 나옴
//! → 프로세서가 멱등이어야 함
//!
//! 노드가 구간이 너무 넓다고 거부하면 같은 구간을 무한히 재시도하게 되므로,
//! eth_getLogs 실패마다 구간을 절반으로 줄이고 성공하면 다시 두 배씩 늘림.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use ethers::types::{Address, Filter, ValueOrArray};

use crate::error::IndexerError;
use crate::types::abi::{decode_log, event_signatures};
use crate::types::EventBatch;

/// 블록 위치로부터 재시작 가능한 이벤트 스트림
#[async_trait]
pub trait EventSource: Send + Sync {
    /// `[from_block, from_block + max_blocks)` 중 확정된 구간의 이벤트.
    /// 확정된 새 블록이 없으면 `None`
    async fn next_batch(
        &self,
        from_block: u64,
        max_blocks: u64,
    ) -> Result<Option<EventBatch>, IndexerError>;
}

/// JSON-RPC 노드 기반 이벤트 소스
pub struct EthLogSource {
    provider: Provider<Http>,
    contract: Address,
    confirmations: u64,
    rpc_timeout: Duration,
    /// 현재 eth_getLogs 구간 크기. 0 이면 호출자가 준 max_blocks
    window: AtomicU64,
}

impl EthLogSource {
    pub fn new(
        rpc_url: &str,
        contract: Address,
        confirmations: u64,
        rpc_timeout: Duration,
    ) -> Result<Self> {
        let provider = Provider::<Http>::try_from(rpc_url)
            .with_context(|| format!("Invalid ETH_RPC_URL: {}", rpc_url))?;

        Ok(Self {
            provider,
            contract,
            confirmations,
            rpc_timeout,
            window: AtomicU64::new(0),
        })
    }

    fn span(&self, max_blocks: u64) -> u64 {
        match self.window.load(Ordering::Relaxed) {
            0 => max_blocks,
            window => window.min(max_blocks),
        }
    }

    /// RPC 호출 + 타임아웃. 실패는 모두 SourceUnavailable
    async fn rpc<T, E, F>(&self, call: &str, fut: F) -> Result<T, IndexerError>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.rpc_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(IndexerError::SourceUnavailable(format!("{}: {}", call, e))),
            Err(_) => Err(IndexerError::SourceUnavailable(format!(
                "{} timed out after {:?}",
                call, self.rpc_timeout
            ))),
        }
    }
}

#[async_trait]
impl EventSource for EthLogSource {
    async fn next_batch(
        &self,
        from_block: u64,
        max_blocks: u64,
    ) -> Result<Option<EventBatch>, IndexerError> {
        let head = self
            .rpc("eth_blockNumber", self.provider.get_block_number())
            .await?
            .as_u64();

        let span = self.span(max_blocks);
        let Some((from, to)) = block_window(from_block, span, head, self.confirmations) else {
            return Ok(None);
        };

        let filter = Filter::new()
            .address(self.contract)
            .topic0(ValueOrArray::Array(
                event_signatures().into_iter().map(Some).collect(),
            ))
            .from_block(from)
            .to_block(to);

        let logs = match self.rpc("eth_getLogs", self.provider.get_logs(&filter)).await {
            Ok(logs) => {
                self.window.store(grow(span, max_blocks), Ordering::Relaxed);
                logs
            }
            Err(e) => {
                let next = shrink(span);
                self.window.store(next, Ordering::Relaxed);
                tracing::debug!(
                    from_block = from,
                    to_block = to,
                    next_span = next,
                    "Shrinking log window"
                );
                return Err(e);
            }
        };
        let fetched = logs.len();
        let events: Vec<_> = logs.iter().filter_map(decode_log).collect();

        tracing::debug!(
            from_block = from,
            to_block = to,
            head,
            fetched,
            decoded = events.len(),
            "Fetched contract logs"
        );

        Ok(Some(EventBatch::new(from, to, events)))
    }
}

/// 읽을 블록 구간 계산. 확정된 새 블록이 없으면 None
fn block_window(
    from_block: u64,
    max_blocks: u64,
    head: u64,
    confirmations: u64,
) -> Option<(u64, u64)> {
    let safe_head = head.checked_sub(confirmations)?;
    if from_block > safe_head || max_blocks == 0 {
        return None;
    }
    let to = from_block.saturating_add(max_blocks - 1).min(safe_head);
    Some((from_block, to))
}

fn shrink(span: u64) -> u64 {
    (span / 2).max(1)
}

fn grow(span: u64, max_blocks: u64) -> u64 {
    span.saturating_mul(2).min(max_blocks)
}

#[cfg(test)]
pub(crate) mod testing {
    //! 스크립트된 이벤트 소스

    use super::*;
    use crate::types::IndexedEvent;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    pub struct ScriptedSource {
        events: Vec<IndexedEvent>,
        head: AtomicU64,
        /// 남은 강제 실패 횟수
        failures: AtomicUsize,
        pub calls: AtomicUsize,
    }

    impl ScriptedSource {
        pub fn new(events: Vec<IndexedEvent>, head: u64) -> Self {
            Self {
                events,
                head: AtomicU64::new(head),
                failures: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn fail_next(&self, times: usize) {
            self.failures.store(times, Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl EventSource for ScriptedSource {
        async fn next_batch(
            &self,
            from_block: u64,
            max_blocks: u64,
        ) -> Result<Option<EventBatch>, IndexerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(IndexerError::SourceUnavailable("node offline".to_string()));
            }

            let head = self.head.load(Ordering::SeqCst);
            let Some((from, to)) = block_window(from_block, max_blocks, head, 0) else {
                return Ok(None);
            };

            let events = self
                .events
                .iter()
                .filter(|e| (from..=to).contains(&e.position.block_number))
                .cloned()
                .collect();
            Ok(Some(EventBatch::new(from, to, events)))
        }
    }
}
