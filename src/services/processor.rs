//! Event Processor
//!
//! # Interview Q&A
//!
//! Q: 같은 이벤트가 여러 번 전달되어도 상태가 한 번만 바뀌는 이유는?
//! A: 이벤트별로 "이미 반영되었는가"를 저장소 상태로 판단
//!
//!    | 이벤트     | 판단 기준                              |
//!    |------------|----------------------------------------|
//!    | Created    | commitment row 존재 여부                |
//!    | Joined     | (commitment, address) 가 새로 기록됐는가 |
//!    | Completed  | is_completed 플래그                     |
//!
//!    "이벤트를 받았는가"로 판단하면 재전송 때마다 total_stake 가 늘어남.
//!
//! Q: 배치 안의 이벤트를 병렬로 처리해도 되는가?
//! A: 같은 commitment 의 이벤트끼리는 순서가 중요 (생성 → 참가 → 완료).
//!    commitment id 별로 lane 을 나누고, lane 안에서는 순서대로,
//!    lane 끼리는 동시에 처리. 하나라도 실패하면 배치 전체를 재시도
//!    (이미 적용된 이벤트는 재적용 시 no-op).
//!
//! Q: 어떤 에러에서 멈추는가?
//! A: 저장소 장애 (StoreUnavailable) 만. 재시도하면 풀리는 에러이기 때문.
//!    RejectedWrite / CorruptRecord 는 몇 번을 재시도해도 같은 결과이므로
//!    그 이벤트만 anomaly 로 남기고 넘어감 (스트림 전체가 멈추지 않도록).
//!    Malformed / DataIntegrityAnomaly / NotifierFailure 는 로그 후 계속 진행.
//!
//! Q: notifier 가 느리면?
//! A: 별도 task 로 띄우고 기다리지 않음. 배치/체크포인트는 notifier 와 무관.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use futures_util::future::try_join_all;
use tracing::{debug, info, warn};

use crate::db::{Commitment, Participant, ProjectionStore, StoreResult};
use crate::error::IndexerError;
use crate::services::Notifier;
use crate::types::{
    address_hex, CommitmentCompleted, CommitmentCreated, CommitmentEvent, CommitmentId,
    EventBatch, EventPayload, IndexedEvent, LogPosition, ParticipantJoined,
};

/// 이벤트 하나를 적용한 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 프로젝션이 바뀜
    Applied,
    /// 재전송 또는 종료 상태. 변경 없음
    NoOp,
    /// DataIntegrityAnomaly 로그 후 (부분) 적용 또는 건너뜀
    Anomaly,
    /// 디코딩 실패 이벤트
    Skipped,
}

/// 배치 처리 통계
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchStats {
    pub applied: usize,
    pub no_op: usize,
    pub anomalies: usize,
    pub skipped: usize,
}

impl BatchStats {
    pub fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::NoOp => self.no_op += 1,
            ApplyOutcome::Anomaly => self.anomalies += 1,
            ApplyOutcome::Skipped => self.skipped += 1,
        }
    }

    pub fn merge(&mut self, other: BatchStats) {
        self.applied += other.applied;
        self.no_op += other.no_op;
        self.anomalies += other.anomalies;
        self.skipped += other.skipped;
    }

    pub fn total(&self) -> usize {
        self.applied + self.no_op + self.anomalies + self.skipped
    }
}

/// 이벤트 → 프로젝션 변경
///
/// 저장소와 notifier 는 생성 시 주입 (전역 상태 없음)
pub struct EventProcessor {
    store: Arc<dyn ProjectionStore>,
    notifier: Arc<dyn Notifier>,
    store_timeout: Duration,
}

impl EventProcessor {
    pub fn new(store: Arc<dyn ProjectionStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            store_timeout: Duration::from_secs(5),
        }
    }

    /// 저장소 호출 하나당 상한. 초과 시 StoreUnavailable
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// 배치 적용. commitment id 별 lane 을 동시에 처리
    pub async fn apply_batch(&self, batch: &EventBatch) -> Result<BatchStats, IndexerError> {
        let lanes = partition_lanes(&batch.events);

        let per_lane = try_join_all(lanes.into_iter().map(|lane| async move {
            let mut stats = BatchStats::default();
            for event in lane {
                stats.record(self.apply(event).await?);
            }
            Ok::<_, IndexerError>(stats)
        }))
        .await?;

        let mut stats = BatchStats::default();
        for lane in per_lane {
            stats.merge(lane);
        }
        Ok(stats)
    }

    /// 이벤트 하나 적용
    ///
    /// `Err` 는 저장소 장애뿐. 나머지는 모두 `ApplyOutcome` 으로 흡수
    pub async fn apply(&self, event: &IndexedEvent) -> Result<ApplyOutcome, IndexerError> {
        let position = event.position;

        let decoded = match &event.payload {
            EventPayload::Decoded(decoded) => decoded,
            EventPayload::Malformed { event_type, reason } => {
                let err = IndexerError::MalformedEvent {
                    position,
                    reason: format!("{}: {}", event_type, reason),
                };
                warn!(block = position.block_number, log_index = position.log_index, "{}", err);
                return Ok(ApplyOutcome::Skipped);
            }
        };

        let result = match decoded {
            CommitmentEvent::Created(e) => self.on_created(e, position).await,
            CommitmentEvent::Joined(e) => self.on_joined(e, position).await,
            CommitmentEvent::Completed(e) => self.on_completed(e, position).await,
        };

        match result {
            // 저장소가 보고한 무결성 문제도 복구 가능한 경고로 처리
            Err(IndexerError::DataIntegrityAnomaly { commitment_id, detail }) => {
                Ok(anomaly(commitment_id, position, detail))
            }
            // 재시도해도 같은 결과 → 이 이벤트만 건너뜀
            Err(err @ (IndexerError::RejectedWrite(_) | IndexerError::CorruptRecord(_))) => {
                let detail = format!("{} skipped: {}", decoded.name(), err);
                Ok(anomaly(decoded.commitment_id(), position, detail))
            }
            other => other,
        }
    }

    async fn on_created(
        &self,
        event: &CommitmentCreated,
        position: LogPosition,
    ) -> Result<ApplyOutcome, IndexerError> {
        let id = event.commitment_id;

        if let Some(existing) = self.guarded(self.store.get_commitment(id)).await? {
            // 재전송. 필드는 건드리지 않고, 이전 실행이 commitment 만 쓰고
            // 죽었을 경우를 위해 저장된 creator 의 참가자 row 만 보충 (스테이크는 이미 포함됨)
            let creator = Participant {
                commitment_id: id,
                address: existing.creator,
                joined_block: existing.created_block,
            };
            let repaired = self
                .guarded(self.store.insert_participant_if_absent(&creator))
                .await?;
            if repaired {
                info!(
                    commitment_id = id,
                    creator = %address_hex(&existing.creator),
                    "Restored missing creator participant"
                );
                return Ok(ApplyOutcome::Applied);
            }
            debug!(commitment_id = id, %position, "Duplicate CommitmentCreated ignored");
            return Ok(ApplyOutcome::NoOp);
        }

        let creator = Participant {
            commitment_id: id,
            address: event.creator,
            joined_block: position.block_number as i64,
        };
        let commitment = Commitment::from_created(event, position.block_number);
        self.guarded(self.store.upsert_commitment(&commitment)).await?;
        self.guarded(self.store.insert_participant_if_absent(&creator))
            .await?;

        info!(
            commitment_id = id,
            creator = %address_hex(&event.creator),
            stake_amount = %event.stake_amount,
            is_group = event.is_group_commitment,
            "Commitment created"
        );

        self.notify_creator(id, event.creator);

        Ok(ApplyOutcome::Applied)
    }

    async fn on_joined(
        &self,
        event: &ParticipantJoined,
        position: LogPosition,
    ) -> Result<ApplyOutcome, IndexerError> {
        let id = event.commitment_id;

        let Some(commitment) = self.guarded(self.store.get_commitment(id)).await? else {
            return Ok(anomaly(id, position, "join for unknown commitment"));
        };

        if commitment.is_completed {
            return Ok(anomaly(
                id,
                position,
                format!("join by {} after completion rejected", address_hex(&event.participant)),
            ));
        }

        let participant = Participant {
            commitment_id: id,
            address: event.participant,
            joined_block: position.block_number as i64,
        };

        // 새로 기록된 참가자일 때만 스테이크 증가
        let inserted = self
            .guarded(self.store.record_join(&participant, commitment.stake_amount))
            .await?;

        if inserted {
            info!(
                commitment_id = id,
                participant = %address_hex(&event.participant),
                "Participant joined"
            );
            Ok(ApplyOutcome::Applied)
        } else {
            debug!(commitment_id = id, %position, "Duplicate ParticipantJoined ignored");
            Ok(ApplyOutcome::NoOp)
        }
    }

    async fn on_completed(
        &self,
        event: &CommitmentCompleted,
        position: LogPosition,
    ) -> Result<ApplyOutcome, IndexerError> {
        let id = event.commitment_id;

        let Some(commitment) = self.guarded(self.store.get_commitment(id)).await? else {
            return Ok(anomaly(id, position, "completion for unknown commitment"));
        };

        if commitment.is_completed {
            debug!(commitment_id = id, %position, "Duplicate CommitmentCompleted ignored");
            return Ok(ApplyOutcome::NoOp);
        }

        let joined: HashSet<_> = self
            .guarded(self.store.list_participants(id))
            .await?
            .into_iter()
            .map(|p| p.address)
            .collect();

        // 참가 기록이 있는 주소만 저장, 나머지는 주소마다 경고
        let mut known = Vec::with_capacity(event.completed_participants.len());
        let mut unknown = 0usize;
        for address in &event.completed_participants {
            if joined.contains(address) {
                if !known.contains(address) {
                    known.push(*address);
                }
            } else {
                unknown += 1;
                anomaly(
                    id,
                    position,
                    format!("completed participant {} never joined", address_hex(address)),
                );
            }
        }

        let changed = self
            .guarded(
                self.store
                    .mark_completed(id, &known, event.reward_per_participant),
            )
            .await?;

        if !changed {
            return Ok(ApplyOutcome::NoOp);
        }

        info!(
            commitment_id = id,
            completed = known.len(),
            reward_per_participant = ?event.reward_per_participant.map(|r| r.to_string()),
            "Commitment completed"
        );

        Ok(if unknown > 0 {
            ApplyOutcome::Anomaly
        } else {
            ApplyOutcome::Applied
        })
    }

    /// best-effort. 결과를 기다리지 않음
    fn notify_creator(&self, id: CommitmentId, creator: Address) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify_user_seen(creator).await {
                warn!(commitment_id = id, creator = %address_hex(&creator), "{}", e);
            }
        });
    }

    async fn guarded<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(IndexerError::StoreUnavailable(format!(
                "store call timed out after {:?}",
                self.store_timeout
            ))),
        }
    }
}

/// 경고 로그 한 건 + Anomaly 결과
fn anomaly(
    commitment_id: CommitmentId,
    position: LogPosition,
    detail: impl Into<String>,
) -> ApplyOutcome {
    let err = IndexerError::DataIntegrityAnomaly {
        commitment_id,
        detail: detail.into(),
    };
    warn!(block = position.block_number, log_index = position.log_index, "{}", err);
    ApplyOutcome::Anomaly
}

/// commitment id 별 lane 분할 (lane 안에서는 도착 순서 유지)
///
/// 디코딩 실패 이벤트는 commitment 를 알 수 없으므로 별도 lane
fn partition_lanes(events: &[IndexedEvent]) -> Vec<Vec<&IndexedEvent>> {
    let mut lanes: Vec<Vec<&IndexedEvent>> = Vec::new();
    let mut index: HashMap<Option<CommitmentId>, usize> = HashMap::new();

    for event in events {
        let slot = *index.entry(event.commitment_id()).or_insert_with(|| {
            lanes.push(Vec::new());
            lanes.len() - 1
        });
        lanes[slot].push(event);
    }
    lanes
}
