//! In-memory projection + checkpoint store
//!
//! 테스트용 구현. 모든 연산이 하나의 lock 안에서 일어나므로
//! commitment id 단위 선형화는 자동으로 보장됨.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use ethers::types::{Address, U256};
use tokio::sync::RwLock;

use super::models::{Commitment, CommitmentFilter, Participant};
use super::repository::{CheckpointStore, ProjectionStore, StoreResult};
use crate::error::IndexerError;
use crate::types::CommitmentId;

#[derive(Default)]
struct State {
    commitments: BTreeMap<CommitmentId, Commitment>,
    /// commitment id → 참가 순서대로의 참가자
    participants: HashMap<CommitmentId, Vec<Participant>>,
    checkpoints: HashMap<String, u64>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
    /// true 면 모든 호출이 StoreUnavailable (장애 주입)
    unavailable: AtomicBool,
    /// true 면 ProjectionStore 호출만 StoreUnavailable (체크포인트는 정상)
    projection_unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    pub fn set_projection_unavailable(&self, down: bool) {
        self.projection_unavailable.store(down, Ordering::SeqCst);
    }

    fn check_projection(&self) -> StoreResult<()> {
        if self.projection_unavailable.load(Ordering::SeqCst) {
            return Err(IndexerError::StoreUnavailable("projection tables offline".to_string()));
        }
        self.check()
    }

    fn check(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(IndexerError::StoreUnavailable("memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    pub async fn participant_count(&self, id: CommitmentId) -> usize {
        self.state
            .read()
            .await
            .participants
            .get(&id)
            .map_or(0, Vec::len)
    }
}

fn insert_participant(state: &mut State, participant: &Participant) -> bool {
    let rows = state.participants.entry(participant.commitment_id).or_default();
    if rows.iter().any(|p| p.address == participant.address) {
        return false;
    }
    rows.push(participant.clone());
    true
}

fn increment(state: &mut State, id: CommitmentId, amount: U256) -> StoreResult<()> {
    // 증가 직전 참가자 수 (방금 추가된 참가자 제외)
    let before = state
        .participants
        .get(&id)
        .map_or(0, Vec::len)
        .saturating_sub(1);

    let commitment = state
        .commitments
        .get_mut(&id)
        .ok_or_else(|| IndexerError::DataIntegrityAnomaly {
            commitment_id: id,
            detail: "stake increment for unknown commitment".to_string(),
        })?;

    let base = commitment
        .total_stake
        .unwrap_or_else(|| commitment.stake_amount.saturating_mul(U256::from(before)));
    commitment.total_stake = Some(base.saturating_add(amount));
    Ok(())
}

#[async_trait]
impl ProjectionStore for MemoryStore {
    async fn health_check(&self) -> StoreResult<()> {
        self.check_projection()
    }

    async fn get_commitment(&self, id: CommitmentId) -> StoreResult<Option<Commitment>> {
        self.check_projection()?;
        Ok(self.state.read().await.commitments.get(&id).cloned())
    }

    async fn upsert_commitment(&self, commitment: &Commitment) -> StoreResult<()> {
        self.check_projection()?;
        // Postgres TEXT 와 동일하게 NUL 거부 (SQLSTATE 22021)
        if commitment.description.contains('\0') {
            return Err(IndexerError::RejectedWrite(
                "invalid byte sequence for encoding \"UTF8\": 0x00".to_string(),
            ));
        }
        self.state
            .write()
            .await
            .commitments
            .insert(commitment.id, commitment.clone());
        Ok(())
    }

    async fn get_participant(
        &self,
        id: CommitmentId,
        address: &Address,
    ) -> StoreResult<Option<Participant>> {
        self.check_projection()?;
        let state = self.state.read().await;
        Ok(state
            .participants
            .get(&id)
            .and_then(|rows| rows.iter().find(|p| &p.address == address))
            .cloned())
    }

    async fn insert_participant_if_absent(&self, participant: &Participant) -> StoreResult<bool> {
        self.check_projection()?;
        let mut state = self.state.write().await;
        Ok(insert_participant(&mut state, participant))
    }

    async fn increment_total_stake(&self, id: CommitmentId, amount: U256) -> StoreResult<()> {
        self.check_projection()?;
        let mut state = self.state.write().await;
        increment(&mut state, id, amount)
    }

    async fn mark_completed(
        &self,
        id: CommitmentId,
        completed_participants: &[Address],
        reward_per_participant: Option<U256>,
    ) -> StoreResult<bool> {
        self.check_projection()?;
        let mut state = self.state.write().await;
        match state.commitments.get_mut(&id) {
            Some(commitment) if !commitment.is_completed => {
                commitment.is_completed = true;
                commitment.completed_participants = completed_participants.to_vec();
                commitment.reward_per_participant = reward_per_participant;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_participants(&self, id: CommitmentId) -> StoreResult<Vec<Participant>> {
        self.check_projection()?;
        Ok(self
            .state
            .read()
            .await
            .participants
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_commitments(&self, filter: &CommitmentFilter) -> StoreResult<Vec<Commitment>> {
        self.check_projection()?;
        let state = self.state.read().await;
        Ok(state
            .commitments
            .values()
            .rev()
            .filter(|c| filter.matches(c))
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .cloned()
            .collect())
    }

    async fn record_join(&self, participant: &Participant, stake: U256) -> StoreResult<bool> {
        self.check_projection()?;
        let mut state = self.state.write().await;
        if !state.commitments.contains_key(&participant.commitment_id) {
            return Err(IndexerError::DataIntegrityAnomaly {
                commitment_id: participant.commitment_id,
                detail: "join recorded for unknown commitment".to_string(),
            });
        }
        let inserted = insert_participant(&mut state, participant);
        if inserted {
            increment(&mut state, participant.commitment_id, stake)?;
        }
        Ok(inserted)
    }
}

#[async_trait]
impl CheckpointStore for MemoryStore {
    async fn load_checkpoint(&self, stream: &str) -> StoreResult<Option<u64>> {
        self.check()?;
        Ok(self.state.read().await.checkpoints.get(stream).copied())
    }

    async fn advance_checkpoint(&self, stream: &str, block_number: u64) -> StoreResult<()> {
        self.check()?;
        let mut state = self.state.write().await;
        let entry = state.checkpoints.entry(stream.to_string()).or_insert(block_number);
        *entry = (*entry).max(block_number);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn commitment(id: CommitmentId, total_stake: Option<U256>) -> Commitment {
        Commitment {
            id,
            creator: Address::from_low_u64_be(0xa),
            description: "Meditate".to_string(),
            stake_amount: U256::from(100u64),
            total_stake,
            end_date: 1_700_000_000,
            proof_frequency: 1,
            is_group_commitment: true,
            is_completed: false,
            completed_participants: vec![],
            reward_per_participant: None,
            created_block: 1,
        }
    }

    fn participant(id: CommitmentId, n: u64) -> Participant {
        Participant {
            commitment_id: id,
            address: Address::from_low_u64_be(n),
            joined_block: 2,
        }
    }

    #[tokio::test]
    async fn test_insert_if_absent_reports_insertion() {
        let store = MemoryStore::new();
        store.upsert_commitment(&commitment(1, Some(U256::from(100u64)))).await.unwrap();

        assert!(store.insert_participant_if_absent(&participant(1, 0xb)).await.unwrap());
        assert!(!store.insert_participant_if_absent(&participant(1, 0xb)).await.unwrap());
        assert_eq!(store.participant_count(1).await, 1);
    }

    #[tokio::test]
    async fn test_increment_restores_missing_total() {
        let store = MemoryStore::new();
        store.upsert_commitment(&commitment(1, None)).await.unwrap();
        store.insert_participant_if_absent(&participant(1, 0xa)).await.unwrap();

        // 구버전 row: creator 1명, total_stake 없음 → 두 번째 참가자 join
        assert!(store.record_join(&participant(1, 0xb), U256::from(100u64)).await.unwrap());

        let stored = store.get_commitment(1).await.unwrap().unwrap();
        assert_eq!(stored.total_stake, Some(U256::from(200u64)));
    }

    #[tokio::test]
    async fn test_mark_completed_is_one_way() {
        let store = MemoryStore::new();
        store.upsert_commitment(&commitment(1, Some(U256::from(100u64)))).await.unwrap();

        let a = [Address::from_low_u64_be(0xa)];
        assert!(store.mark_completed(1, &a, Some(U256::from(5u64))).await.unwrap());
        assert!(!store.mark_completed(1, &[], None).await.unwrap());

        let stored = store.get_commitment(1).await.unwrap().unwrap();
        assert_eq!(stored.completed_participants, a.to_vec());
        assert_eq!(stored.reward_per_participant, Some(U256::from(5u64)));
    }

    #[tokio::test]
    async fn test_checkpoint_never_moves_back() {
        let store = MemoryStore::new();
        store.advance_checkpoint("s", 10).await.unwrap();
        store.advance_checkpoint("s", 4).await.unwrap();
        assert_eq!(store.load_checkpoint("s").await.unwrap(), Some(10));
        assert_eq!(store.load_checkpoint("other").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_list_is_newest_first_and_paginated() {
        let store = MemoryStore::new();
        for id in 0..5 {
            store.upsert_commitment(&commitment(id, None)).await.unwrap();
        }

        let filter = CommitmentFilter { offset: 2, limit: 2, ..Default::default() };
        let ids: Vec<_> = store
            .list_commitments(&filter)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 1]);
    }

    #[tokio::test]
    async fn test_projection_outage_leaves_checkpoints_up() {
        let store = MemoryStore::new();
        store.set_projection_unavailable(true);
        assert!(matches!(
            store.get_commitment(1).await,
            Err(IndexerError::StoreUnavailable(_))
        ));
        store.advance_checkpoint("s", 3).await.unwrap();
        assert_eq!(store.load_checkpoint("s").await.unwrap(), Some(3));
    }

    #[tokio::test]
    async fn test_nul_description_is_rejected() {
        let store = MemoryStore::new();
        let mut bad = commitment(1, None);
        bad.description = "run\0daily".to_string();
        assert!(matches!(
            store.upsert_commitment(&bad).await,
            Err(IndexerError::RejectedWrite(_))
        ));
        assert!(store.get_commitment(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.get_commitment(1).await,
            Err(IndexerError::StoreUnavailable(_))
        ));
        store.set_unavailable(false);
        assert!(store.get_commitment(1).await.unwrap().is_none());
    }
}
