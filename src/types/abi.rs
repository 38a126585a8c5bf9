//! Commitment contract log bindings
//!
//! `commitmentId` is the only indexed parameter on every event, so it
//! arrives as `topics[1]`; everything else is ABI-encoded in `data`.

use ethers::abi::RawLog;
use ethers::contract::EthEvent;
use ethers::types::{Address, Log, H256, U256};

use super::{
    CommitmentCompleted, CommitmentCreated, CommitmentEvent, CommitmentId, EventPayload,
    IndexedEvent, LogPosition, ParticipantJoined,
};

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "CommitmentCreated",
    abi = "CommitmentCreated(uint256,address,string,uint256,uint256,uint256,bool)"
)]
pub struct CommitmentCreatedLog {
    #[ethevent(indexed)]
    pub commitment_id: U256,
    pub creator: Address,
    pub description: String,
    pub stake_amount: U256,
    pub end_date: U256,
    pub proof_frequency: U256,
    pub is_group_commitment: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "ParticipantJoined", abi = "ParticipantJoined(uint256,address)")]
pub struct ParticipantJoinedLog {
    #[ethevent(indexed)]
    pub commitment_id: U256,
    pub participant: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(
    name = "CommitmentCompleted",
    abi = "CommitmentCompleted(uint256,address[],uint256)"
)]
pub struct CommitmentCompletedLog {
    #[ethevent(indexed)]
    pub commitment_id: U256,
    pub completed_participants: Vec<Address>,
    pub reward_per_participant: U256,
}

/// 구버전 컨트랙트 (rewardPerParticipant 없음)
#[derive(Debug, Clone, PartialEq, Eq, EthEvent)]
#[ethevent(name = "CommitmentCompleted", abi = "CommitmentCompleted(uint256,address[])")]
pub struct LegacyCommitmentCompletedLog {
    #[ethevent(indexed)]
    pub commitment_id: U256,
    pub completed_participants: Vec<Address>,
}

/// `eth_getLogs` topic0 필터
pub fn event_signatures() -> Vec<H256> {
    vec![
        CommitmentCreatedLog::signature(),
        ParticipantJoinedLog::signature(),
        CommitmentCompletedLog::signature(),
        LegacyCommitmentCompletedLog::signature(),
    ]
}

/// RPC 로그 → `IndexedEvent`
///
/// 위치를 알 수 없는 로그, reorg로 제거된 로그, 모르는 topic0 은 `None`.
/// 디코딩/검증 실패는 `EventPayload::Malformed` 로 넘김.
pub fn decode_log(log: &Log) -> Option<IndexedEvent> {
    if log.removed == Some(true) {
        tracing::warn!(
            tx_hash = ?log.transaction_hash,
            "Dropping log removed by chain reorganization"
        );
        return None;
    }

    let (block_number, log_index) = match (log.block_number, log.log_index) {
        (Some(block), Some(index)) => (block.as_u64(), index.low_u64()),
        _ => {
            tracing::warn!(tx_hash = ?log.transaction_hash, "Dropping log without position");
            return None;
        }
    };
    let position = LogPosition::new(block_number, log_index);

    let topic0 = *log.topics.first()?;
    let raw = RawLog {
        topics: log.topics.clone(),
        data: log.data.to_vec(),
    };

    let (event_type, decoded) = if topic0 == CommitmentCreatedLog::signature() {
        ("CommitmentCreated", decode_created(&raw))
    } else if topic0 == ParticipantJoinedLog::signature() {
        ("ParticipantJoined", decode_joined(&raw))
    } else if topic0 == CommitmentCompletedLog::signature() {
        ("CommitmentCompleted", decode_completed(&raw))
    } else if topic0 == LegacyCommitmentCompletedLog::signature() {
        ("CommitmentCompleted", decode_legacy_completed(&raw))
    } else {
        tracing::debug!(%position, topic0 = ?topic0, "Ignoring unknown event");
        return None;
    };

    let payload = match decoded {
        Ok(event) => EventPayload::Decoded(event),
        Err(reason) => EventPayload::Malformed {
            event_type: event_type.to_string(),
            reason,
        },
    };

    Some(IndexedEvent {
        position,
        tx_hash: log.transaction_hash,
        payload,
    })
}

fn decode_created(raw: &RawLog) -> Result<CommitmentEvent, String> {
    let log = CommitmentCreatedLog::decode_log(raw).map_err(|e| e.to_string())?;
    Ok(CommitmentEvent::Created(CommitmentCreated {
        commitment_id: to_i64(log.commitment_id, "commitmentId")?,
        creator: non_zero(log.creator, "creator")?,
        // Postgres TEXT 는 NUL 을 저장할 수 없음
        description: log.description.replace('\0', ""),
        stake_amount: log.stake_amount,
        end_date: to_i64(log.end_date, "endDate")?,
        proof_frequency: to_i64(log.proof_frequency, "proofFrequency")?,
        is_group_commitment: log.is_group_commitment,
    }))
}

fn decode_joined(raw: &RawLog) -> Result<CommitmentEvent, String> {
    let log = ParticipantJoinedLog::decode_log(raw).map_err(|e| e.to_string())?;
    Ok(CommitmentEvent::Joined(ParticipantJoined {
        commitment_id: to_i64(log.commitment_id, "commitmentId")?,
        participant: non_zero(log.participant, "participant")?,
    }))
}

fn decode_completed(raw: &RawLog) -> Result<CommitmentEvent, String> {
    let log = CommitmentCompletedLog::decode_log(raw).map_err(|e| e.to_string())?;
    Ok(CommitmentEvent::Completed(CommitmentCompleted {
        commitment_id: to_i64(log.commitment_id, "commitmentId")?,
        completed_participants: log.completed_participants,
        reward_per_participant: Some(log.reward_per_participant),
    }))
}

fn decode_legacy_completed(raw: &RawLog) -> Result<CommitmentEvent, String> {
    let log = LegacyCommitmentCompletedLog::decode_log(raw).map_err(|e| e.to_string())?;
    Ok(CommitmentEvent::Completed(CommitmentCompleted {
        commitment_id: to_i64(log.commitment_id, "commitmentId")?,
        completed_participants: log.completed_participants,
        reward_per_participant: None,
    }))
}

fn to_i64(value: U256, field: &str) -> Result<CommitmentId, String> {
    if value > U256::from(i64::MAX as u64) {
        return Err(format!("{} out of range: {}", field, value));
    }
    Ok(value.as_u64() as i64)
}

fn non_zero(address: Address, field: &str) -> Result<Address, String> {
    if address.is_zero() {
        Err(format!("missing {}", field))
    } else {
        Ok(address)
    }
}
