//! Checkpoint Tracker
//!
//! stream 별로 "여기까지 프로젝션에 완전히 반영됨" 블록을 기록.
//! 프로젝션 커밋 이후에만 `advance` 호출 → 크래시 시 재처리는 있어도 유실은 없음.

use std::sync::Arc;
use std::time::Duration;

use crate::db::{CheckpointStore, StoreResult};
use crate::error::IndexerError;

#[derive(Clone)]
pub struct CheckpointTracker {
    store: Arc<dyn CheckpointStore>,
    stream: String,
    start_block: u64,
    timeout: Duration,
}

impl CheckpointTracker {
    pub fn new(
        store: Arc<dyn CheckpointStore>,
        stream: impl Into<String>,
        start_block: u64,
    ) -> Self {
        Self {
            store,
            stream: stream.into(),
            start_block,
            timeout: Duration::from_secs(5),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    /// 마지막으로 완전히 반영된 블록
    pub async fn last_checkpoint(&self) -> StoreResult<Option<u64>> {
        let stream = self.stream.clone();
        let timeout = self.timeout;
        match tokio::time::timeout(timeout, self.store.load_checkpoint(&stream)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("load_checkpoint", timeout)),
        }
    }

    /// 다음에 읽을 블록: checkpoint + 1, 없으면 START_BLOCK
    pub async fn resume_block(&self) -> StoreResult<u64> {
        Ok(match self.last_checkpoint().await? {
            Some(block) => block.saturating_add(1).max(self.start_block),
            None => self.start_block,
        })
    }

    pub async fn advance(&self, block_number: u64) -> StoreResult<()> {
        let timeout = self.timeout;
        let write = self.store.advance_checkpoint(&self.stream, block_number);
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => result,
            Err(_) => Err(timed_out("advance_checkpoint", timeout)),
        }
    }
}

fn timed_out(call: &str, timeout: Duration) -> IndexerError {
    IndexerError::StoreUnavailable(format!("{} timed out after {:?}", call, timeout))
}
