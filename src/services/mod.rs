//! Services Module
//!
//! 인덱싱 파이프라인을 구성하는 서비스 레이어
//!
//! # Services
//! - `EventSource` / `EthLogSource`: 컨트랙트 로그 폴링
//! - `EventProcessor`: 이벤트 → 프로젝션 (멱등 적용)
//! - `CheckpointTracker`: 재시작 위치 관리
//! - `Notifier` / `HttpNotifier`: ensure-user 사이드 콜
//! - `Indexer`: producer/consumer 파이프라인

mod checkpoint;
mod event_source;
mod indexer;
mod notifier;
mod processor;

pub use checkpoint::CheckpointTracker;
pub use event_source::{EthLogSource, EventSource};
pub use indexer::{Backoff, Indexer, IndexerOptions};
pub use notifier::{HttpNotifier, NoopNotifier, Notifier};
pub use processor::{ApplyOutcome, BatchStats, EventProcessor};
