//! Database Models
//!
//! Projection entities rebuilt from contract events. Amounts are uint256 on
//! chain and `NUMERIC(78,0)` in PostgreSQL; rows select them as text and the
//! conversion into domain types happens here.

use chrono::{DateTime, Utc};
use ethers::types::{Address, U256};
use sqlx::FromRow;

use crate::error::IndexerError;
use crate::types::{CommitmentCreated, CommitmentId};

/// 커밋먼트 프로젝션
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commitment {
    pub id: CommitmentId,
    pub creator: Address,
    pub description: String,

    /// 참가자 1인당 스테이크 (생성 시 고정)
    pub stake_amount: U256,

    /// stake_amount × 참가자 수
    /// 구버전 스키마 row 에는 없을 수 있음
    pub total_stake: Option<U256>,

    /// unix seconds
    pub end_date: i64,
    pub proof_frequency: i64,
    pub is_group_commitment: bool,

    /// false → true 단방향
    pub is_completed: bool,

    /// 완료 전에는 항상 비어 있음
    pub completed_participants: Vec<Address>,

    pub reward_per_participant: Option<U256>,

    /// CommitmentCreated 가 포함된 블록
    pub created_block: i64,
}

impl Commitment {
    /// 생성 이벤트로부터 초기 상태 구성 (creator 1명분 스테이크)
    pub fn from_created(event: &CommitmentCreated, block_number: u64) -> Self {
        Self {
            id: event.commitment_id,
            creator: event.creator,
            description: event.description.clone(),
            stake_amount: event.stake_amount,
            total_stake: Some(event.stake_amount),
            end_date: event.end_date,
            proof_frequency: event.proof_frequency,
            is_group_commitment: event.is_group_commitment,
            is_completed: false,
            completed_participants: Vec::new(),
            reward_per_participant: None,
            created_block: block_number as i64,
        }
    }
}

/// 참가자 (commitment_id, address) 가 자연키
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub commitment_id: CommitmentId,
    pub address: Address,
    pub joined_block: i64,
}

/// 커밋먼트 목록 필터 (프론트엔드 useCommitments 필터와 동일)
#[derive(Debug, Clone, Default)]
pub struct CommitmentFilter {
    pub creator: Option<Address>,
    pub is_completed: Option<bool>,
    pub is_group_commitment: Option<bool>,
    /// 건너뛸 row 수
    pub offset: u64,
    pub limit: u32,
}

impl CommitmentFilter {
    pub fn matches(&self, commitment: &Commitment) -> bool {
        self.creator.map_or(true, |c| c == commitment.creator)
            && self.is_completed.map_or(true, |v| v == commitment.is_completed)
            && self
                .is_group_commitment
                .map_or(true, |v| v == commitment.is_group_commitment)
    }
}

/// `commitments` 테이블 row (금액 컬럼은 `::text` 로 조회)
#[derive(Debug, Clone, FromRow)]
pub struct CommitmentRow {
    pub id: i64,
    pub creator: String,
    pub description: String,
    pub stake_amount: String,
    pub total_stake: Option<String>,
    pub end_date: i64,
    pub proof_frequency: i64,
    pub is_group_commitment: bool,
    pub is_completed: bool,
    pub completed_participants: Option<Vec<String>>,
    pub reward_per_participant: Option<String>,
    pub created_block: i64,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CommitmentRow> for Commitment {
    type Error = IndexerError;

    fn try_from(row: CommitmentRow) -> Result<Self, Self::Error> {
        let completed_participants = row
            .completed_participants
            .unwrap_or_default()
            .iter()
            .map(|a| parse_address(a))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Commitment {
            id: row.id,
            creator: parse_address(&row.creator)?,
            description: row.description,
            stake_amount: parse_amount(&row.stake_amount)?,
            total_stake: row.total_stake.as_deref().map(parse_amount).transpose()?,
            end_date: row.end_date,
            proof_frequency: row.proof_frequency,
            is_group_commitment: row.is_group_commitment,
            is_completed: row.is_completed,
            completed_participants,
            reward_per_participant: row
                .reward_per_participant
                .as_deref()
                .map(parse_amount)
                .transpose()?,
            created_block: row.created_block,
        })
    }
}

/// `participants` 테이블 row
#[derive(Debug, Clone, FromRow)]
pub struct ParticipantRow {
    pub commitment_id: i64,
    pub participant: String,
    pub joined_block: i64,
}

impl TryFrom<ParticipantRow> for Participant {
    type Error = IndexerError;

    fn try_from(row: ParticipantRow) -> Result<Self, Self::Error> {
        Ok(Participant {
            commitment_id: row.commitment_id,
            address: parse_address(&row.participant)?,
            joined_block: row.joined_block,
        })
    }
}

fn parse_address(raw: &str) -> Result<Address, IndexerError> {
    raw.parse()
        .map_err(|_| IndexerError::CorruptRecord(format!("invalid address {:?}", raw)))
}

fn parse_amount(raw: &str) -> Result<U256, IndexerError> {
    U256::from_dec_str(raw)
        .map_err(|_| IndexerError::CorruptRecord(format!("invalid amount {:?}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> CommitmentRow {
        CommitmentRow {
            id: 4,
            creator: "0x00000000000000000000000000000000000000aa".to_string(),
            description: "Read 20 pages".to_string(),
            stake_amount: "1000000000000000000".to_string(),
            total_stake: Some("2000000000000000000".to_string()),
            end_date: 1_700_000_000,
            proof_frequency: 1,
            is_group_commitment: true,
            is_completed: true,
            completed_participants: Some(vec![
                "0x00000000000000000000000000000000000000aa".to_string(),
            ]),
            reward_per_participant: None,
            created_block: 12,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_row_conversion() {
        let commitment = Commitment::try_from(row()).unwrap();
        assert_eq!(commitment.stake_amount, U256::exp10(18));
        assert_eq!(commitment.total_stake, Some(U256::exp10(18) * 2));
        assert_eq!(commitment.completed_participants, vec![Address::from_low_u64_be(0xaa)]);
        assert_eq!(commitment.reward_per_participant, None);
    }

    #[test]
    fn test_legacy_row_without_total_stake() {
        let mut legacy = row();
        legacy.total_stake = None;
        legacy.completed_participants = None;

        let commitment = Commitment::try_from(legacy).unwrap();
        assert_eq!(commitment.total_stake, None);
        assert!(commitment.completed_participants.is_empty());
    }

    #[test]
    fn test_corrupt_amount() {
        let mut bad = row();
        bad.stake_amount = "1e18".to_string();
        assert!(matches!(
            Commitment::try_from(bad),
            Err(IndexerError::CorruptRecord(_))
        ));
    }

    #[test]
    fn test_filter_matching() {
        let commitment = Commitment::try_from(row()).unwrap();

        let open_only = CommitmentFilter {
            is_completed: Some(false),
            ..Default::default()
        };
        assert!(!open_only.matches(&commitment));

        let by_creator = CommitmentFilter {
            creator: Some(Address::from_low_u64_be(0xaa)),
            is_group_commitment: Some(true),
            ..Default::default()
        };
        assert!(by_creator.matches(&commitment));
    }
}
