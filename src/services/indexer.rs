//! Indexer Pipeline
//!
//! ```text
//!  ┌────────────┐  bounded mpsc   ┌─────────────┐      ┌──────────────┐
//!  │ poll loop  │ ──EventBatch──▶ │ apply loop  │ ───▶ │  checkpoint  │
//!  │ (producer) │                 │ (consumer)  │      │  (to_block)  │
//!  └────────────┘                 └─────────────┘      └──────────────┘
//! ```
//!
//! - 큐가 가득 차면 poll loop 가 `send` 에서 대기 → 소스에서 더 읽지 않음
//! - 배치 적용 실패 시 같은 배치를 백오프 후 통째로 재시도
//! - 체크포인트는 배치 전체가 반영된 뒤에만 전진
//! - shutdown: poll loop 는 즉시 종료, apply loop 는 진행 중인 배치까지만

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::IndexerError;
use crate::services::{CheckpointTracker, EventProcessor, EventSource};
use crate::types::EventBatch;

/// 파이프라인 설정
#[derive(Debug, Clone)]
pub struct IndexerOptions {
    pub block_range: u64,
    pub poll_interval: Duration,
    pub queue_capacity: usize,
    pub retry_initial: Duration,
    pub retry_max: Duration,
}

impl From<&Config> for IndexerOptions {
    fn from(config: &Config) -> Self {
        Self {
            block_range: config.block_range,
            poll_interval: config.poll_interval,
            queue_capacity: config.queue_capacity,
            retry_initial: config.retry_initial,
            retry_max: config.retry_max,
        }
    }
}

/// 지수 백오프 (initial, 2x, 4x, ... max)
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = self.current.saturating_mul(2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

pub struct Indexer {
    source: Arc<dyn EventSource>,
    processor: Arc<EventProcessor>,
    checkpoints: CheckpointTracker,
    options: IndexerOptions,
}

impl Indexer {
    pub fn new(
        source: Arc<dyn EventSource>,
        processor: Arc<EventProcessor>,
        checkpoints: CheckpointTracker,
        options: IndexerOptions,
    ) -> Self {
        Self {
            source,
            processor,
            checkpoints,
            options,
        }
    }

    /// shutdown 신호(`true`)가 올 때까지 인덱싱
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let Some(resume) = self.resume_block(&mut shutdown).await else {
            info!("Indexer stopped before start");
            return;
        };

        info!(
            stream = %self.checkpoints.stream(),
            resume_block = resume,
            block_range = self.options.block_range,
            "🔎 Indexer started"
        );

        let (tx, rx) = mpsc::channel(self.options.queue_capacity);

        let producer = tokio::spawn(poll_loop(
            self.source.clone(),
            tx,
            resume,
            self.options.clone(),
            shutdown.clone(),
        ));

        self.apply_loop(rx, shutdown).await;

        // apply loop 가 먼저 끝나도 producer 는 send 실패로 종료됨
        if let Err(e) = producer.await {
            warn!("Poll loop task failed: {}", e);
        }

        info!(stream = %self.checkpoints.stream(), "Indexer stopped");
    }

    /// 시작 위치 로드. 저장소 장애 시 백오프 재시도
    async fn resume_block(&self, shutdown: &mut watch::Receiver<bool>) -> Option<u64> {
        let mut backoff = Backoff::new(self.options.retry_initial, self.options.retry_max);
        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.checkpoints.resume_block().await {
                Ok(block) => return Some(block),
                Err(e) => {
                    let delay = backoff.next_delay();
                    warn!(delay_ms = delay.as_millis() as u64, "Checkpoint load failed: {}", e);
                    if !sleep_or_shutdown(delay, shutdown).await {
                        return None;
                    }
                }
            }
        }
    }

    async fn apply_loop(
        &self,
        mut rx: mpsc::Receiver<EventBatch>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                return;
            }

            let batch = tokio::select! {
                biased;
                _ = shutdown.changed() => return,
                batch = rx.recv() => match batch {
                    Some(batch) => batch,
                    None => return,
                },
            };

            let mut backoff = Backoff::new(self.options.retry_initial, self.options.retry_max);
            loop {
                match self.commit_batch(&batch).await {
                    Ok(()) => break,
                    Err(e) => {
                        let delay = backoff.next_delay();
                        warn!(
                            from_block = batch.from_block,
                            to_block = batch.to_block,
                            delay_ms = delay.as_millis() as u64,
                            retryable = e.is_retryable(),
                            "Batch failed, retrying: {}",
                            e
                        );
                        // 체크포인트 미전진 → 재시작 시 이 배치부터 다시
                        if !sleep_or_shutdown(delay, &mut shutdown).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// 배치 적용 후 체크포인트 전진
    async fn commit_batch(&self, batch: &EventBatch) -> Result<(), IndexerError> {
        let stats = self.processor.apply_batch(batch).await?;
        self.checkpoints.advance(batch.to_block).await?;

        if batch.is_empty() {
            debug!(from_block = batch.from_block, to_block = batch.to_block, "Empty block range");
        } else {
            info!(
                from_block = batch.from_block,
                to_block = batch.to_block,
                applied = stats.applied,
                no_op = stats.no_op,
                anomalies = stats.anomalies,
                skipped = stats.skipped,
                "Batch indexed"
            );
        }
        Ok(())
    }
}

/// producer: 소스 → 큐
async fn poll_loop(
    source: Arc<dyn EventSource>,
    tx: mpsc::Sender<EventBatch>,
    mut next_block: u64,
    options: IndexerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut backoff = Backoff::new(options.retry_initial, options.retry_max);

    loop {
        if *shutdown.borrow() {
            return;
        }

        let polled = tokio::select! {
            _ = shutdown.changed() => return,
            polled = source.next_batch(next_block, options.block_range) => polled,
        };

        match polled {
            Ok(Some(batch)) => {
                backoff.reset();
                let to_block = batch.to_block;

                tokio::select! {
                    _ = shutdown.changed() => return,
                    sent = tx.send(batch) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
                next_block = to_block + 1;
            }
            Ok(None) => {
                if !sleep_or_shutdown(options.poll_interval, &mut shutdown).await {
                    return;
                }
            }
            Err(e) => {
                let delay = backoff.next_delay();
                warn!(
                    from_block = next_block,
                    delay_ms = delay.as_millis() as u64,
                    "{}",
                    e
                );
                if !sleep_or_shutdown(delay, &mut shutdown).await {
                    return;
                }
            }
        }
    }
}

/// `delay` 만큼 대기. shutdown 이 먼저 오면 false
async fn sleep_or_shutdown(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => !*shutdown.borrow(),
        _ = shutdown.changed() => false,
    }
}
