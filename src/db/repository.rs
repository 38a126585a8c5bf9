//! Repository Pattern Implementation
//!
//! # Interview Q&A
//!
//! Q: 왜 프로젝션 저장소를 trait 으로 분리했는가?
//! A: 프로세서 로직(멱등성, 집계)을 DB 없이 테스트하기 위해
//!
//!    - PostgreSQL 구현: `Database` (db/mod.rs)
//!    - 테스트용 구현: `MemoryStore` (db/memory.rs)
//!    - 프로세서는 `Arc<dyn ProjectionStore>` 만 알면 됨
//!
//! Q: 재전송(redelivery) 된 join 이벤트가 스테이크를 두 번 더하지 않게 하려면?
//! A: "이벤트를 받았는가"가 아니라 "이 (commitment, address) 쌍이 새로 기록되었는가"로 판단
//!
//!    ```text
//!    inserted = insert_participant_if_absent(id, addr)
//!    if inserted { increment_total_stake(id, stake) }
//!    ```
//!
//!    두 단계 사이에서 프로세스가 죽으면 증가분이 유실되므로
//!    PostgreSQL 구현은 `record_join` 을 하나의 트랜잭션으로 override 함

use async_trait::async_trait;
use ethers::types::{Address, U256};

use super::models::{Commitment, CommitmentFilter, Participant};
use crate::error::IndexerError;
use crate::types::CommitmentId;

pub type StoreResult<T> = Result<T, IndexerError>;

/// 프로젝션 저장소 인터페이스
///
/// 같은 commitment id 에 대한 연산은 서로 선형화 가능해야 함.
/// 다른 id 끼리는 동시에 진행될 수 있음.
#[async_trait]
pub trait ProjectionStore: Send + Sync {
    async fn health_check(&self) -> StoreResult<()>;

    async fn get_commitment(&self, id: CommitmentId) -> StoreResult<Option<Commitment>>;

    /// 무조건 덮어쓰기. 재생성 방지는 호출자가 `get_commitment` 로 먼저 확인
    async fn upsert_commitment(&self, commitment: &Commitment) -> StoreResult<()>;

    async fn get_participant(
        &self,
        id: CommitmentId,
        address: &Address,
    ) -> StoreResult<Option<Participant>>;

    /// 새로 기록했으면 true, 이미 있었으면 false
    async fn insert_participant_if_absent(&self, participant: &Participant) -> StoreResult<bool>;

    /// 새 참가자가 기록된 직후에 호출됨.
    /// total_stake 가 비어 있는 (구버전) row 는 stake_amount × (참가자 수 - 1) 로
    /// 먼저 복원한 뒤 더함 → 결과는 항상 stake_amount × 참가자 수
    async fn increment_total_stake(&self, id: CommitmentId, amount: U256) -> StoreResult<()>;

    /// 미완료 상태일 때만 완료 처리. 실제로 바뀌었으면 true
    async fn mark_completed(
        &self,
        id: CommitmentId,
        completed_participants: &[Address],
        reward_per_participant: Option<U256>,
    ) -> StoreResult<bool>;

    async fn list_participants(&self, id: CommitmentId) -> StoreResult<Vec<Participant>>;

    /// id 내림차순
    async fn list_commitments(&self, filter: &CommitmentFilter) -> StoreResult<Vec<Commitment>>;

    /// 참가자 기록 + 스테이크 증가를 한 단위로
    async fn record_join(&self, participant: &Participant, stake: U256) -> StoreResult<bool> {
        let inserted = self.insert_participant_if_absent(participant).await?;
        if inserted {
            self.increment_total_stake(participant.commitment_id, stake).await?;
        }
        Ok(inserted)
    }
}

/// 체크포인트 저장소 인터페이스
///
/// stream 별 마지막으로 완전히 반영된 블록 번호
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load_checkpoint(&self, stream: &str) -> StoreResult<Option<u64>>;

    /// 단조 증가. 더 작은 값은 무시
    async fn advance_checkpoint(&self, stream: &str, block_number: u64) -> StoreResult<()>;
}
