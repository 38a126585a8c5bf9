//! Common Types Module
//!
//! 인덱서 전반에서 사용되는 공통 타입 정의
//!
//! - `LogPosition`: 체인 상의 로그 위치 (block, log index)
//! - `CommitmentEvent`: 디코딩된 컨트랙트 이벤트
//! - `IndexedEvent` / `EventBatch`: 이벤트 소스가 넘겨주는 단위

pub mod abi;

use std::fmt;

use ethers::types::{Address, H256, U256};
use serde::Serialize;

/// 커밋먼트 ID (온체인 uint256, DB에는 BIGINT로 저장)
pub type CommitmentId = i64;

/// 로그 위치
///
/// `(block_number, log_index)` 순서가 곧 이벤트 발생 순서
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct LogPosition {
    pub block_number: u64,
    pub log_index: u64,
}

impl LogPosition {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self { block_number, log_index }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// `CommitmentCreated` 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentCreated {
    pub commitment_id: CommitmentId,
    pub creator: Address,
    pub description: String,
    /// 참가자 1인당 스테이크 (wei)
    pub stake_amount: U256,
    /// 종료 시각 (unix seconds)
    pub end_date: i64,
    pub proof_frequency: i64,
    pub is_group_commitment: bool,
}

/// `ParticipantJoined` 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantJoined {
    pub commitment_id: CommitmentId,
    pub participant: Address,
}

/// `CommitmentCompleted` 페이로드
///
/// 구버전 컨트랙트는 `rewardPerParticipant`를 emit 하지 않음 → `None`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitmentCompleted {
    pub commitment_id: CommitmentId,
    pub completed_participants: Vec<Address>,
    pub reward_per_participant: Option<U256>,
}

/// 디코딩된 컨트랙트 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitmentEvent {
    Created(CommitmentCreated),
    Joined(ParticipantJoined),
    Completed(CommitmentCompleted),
}

impl CommitmentEvent {
    pub fn commitment_id(&self) -> CommitmentId {
        match self {
            CommitmentEvent::Created(e) => e.commitment_id,
            CommitmentEvent::Joined(e) => e.commitment_id,
            CommitmentEvent::Completed(e) => e.commitment_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommitmentEvent::Created(_) => "CommitmentCreated",
            CommitmentEvent::Joined(_) => "ParticipantJoined",
            CommitmentEvent::Completed(_) => "CommitmentCompleted",
        }
    }
}

/// 이벤트 페이로드
///
/// 디코딩 실패한 로그도 위치 정보와 함께 전달됨
/// → 프로세서가 건너뛰고 체크포인트는 계속 전진
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    Decoded(CommitmentEvent),
    Malformed { event_type: String, reason: String },
}

/// 위치가 확정된 단일 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedEvent {
    pub position: LogPosition,
    pub tx_hash: Option<H256>,
    pub payload: EventPayload,
}

impl IndexedEvent {
    pub fn decoded(position: LogPosition, event: CommitmentEvent) -> Self {
        Self {
            position,
            tx_hash: None,
            payload: EventPayload::Decoded(event),
        }
    }

    pub fn malformed(position: LogPosition, event_type: &str, reason: impl Into<String>) -> Self {
        Self {
            position,
            tx_hash: None,
            payload: EventPayload::Malformed {
                event_type: event_type.to_string(),
                reason: reason.into(),
            },
        }
    }

    /// 이 이벤트가 속한 커밋먼트 (malformed면 None)
    pub fn commitment_id(&self) -> Option<CommitmentId> {
        match &self.payload {
            EventPayload::Decoded(event) => Some(event.commitment_id()),
            EventPayload::Malformed { .. } => None,
        }
    }
}

/// 블록 구간 `[from_block, to_block]` 의 이벤트 묶음
///
/// 이벤트가 없어도 구간은 유효함 (체크포인트 전진용)
#[derive(Debug, Clone, Default)]
pub struct EventBatch {
    pub from_block: u64,
    pub to_block: u64,
    pub events: Vec<IndexedEvent>,
}

impl EventBatch {
    pub fn new(from_block: u64, to_block: u64, mut events: Vec<IndexedEvent>) -> Self {
        events.sort_by_key(|e| e.position);
        Self { from_block, to_block, events }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// 주소를 lowercase `0x...` 형태로 변환 (DB 저장 형식)
pub fn address_hex(address: &Address) -> String {
    format!("{:#x}", address)
}
