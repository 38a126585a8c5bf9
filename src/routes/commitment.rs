//! Commitment Endpoints
//!
//! Read-only views over the commitment projection. Amounts are uint256 on
//! chain, so they are serialized as decimal strings; `total_stake` and
//! `reward_per_participant` may be null for rows written by older schemas.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use ethers::types::Address;
use serde::{Deserialize, Serialize};

use crate::db::{Commitment, CommitmentFilter, Participant};
use crate::types::{address_hex, CommitmentId};
use crate::{error::ApiError, AppState};

// ============ Request/Response Types ============

/// 목록 쿼리 파라미터
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// 완료 여부 필터
    pub completed: Option<bool>,
    /// creator 주소 필터
    pub creator: Option<String>,
    /// 그룹 커밋먼트 여부 필터
    pub group: Option<bool>,
    /// 페이지 (0부터 시작)
    pub page: Option<u32>,
    /// 페이지 크기 (기본 20, 최대 100)
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct CommitmentResponse {
    pub id: CommitmentId,
    pub creator: String,
    pub description: String,
    pub stake_amount: String,
    pub total_stake: Option<String>,
    /// unix seconds
    pub end_date: i64,
    pub proof_frequency: i64,
    pub is_group_commitment: bool,
    pub is_completed: bool,
    pub completed_participants: Vec<String>,
    pub reward_per_participant: Option<String>,
    pub created_block: i64,
    pub participants: Vec<String>,
}

impl CommitmentResponse {
    fn new(commitment: Commitment, participants: Vec<Participant>) -> Self {
        Self {
            id: commitment.id,
            creator: address_hex(&commitment.creator),
            description: commitment.description,
            stake_amount: commitment.stake_amount.to_string(),
            total_stake: commitment.total_stake.map(|v| v.to_string()),
            end_date: commitment.end_date,
            proof_frequency: commitment.proof_frequency,
            is_group_commitment: commitment.is_group_commitment,
            is_completed: commitment.is_completed,
            completed_participants: commitment
                .completed_participants
                .iter()
                .map(address_hex)
                .collect(),
            reward_per_participant: commitment.reward_per_participant.map(|v| v.to_string()),
            created_block: commitment.created_block,
            participants: participants.iter().map(|p| address_hex(&p.address)).collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub commitments: Vec<CommitmentResponse>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub has_next: bool,
}

// ============ Handlers ============

/// GET /commitments
///
/// 커밋먼트 목록 (id 내림차순)
///
/// # Example
///
/// ```text
/// GET /commitments?completed=false&group=true&limit=10
/// GET /commitments?creator=0x5fc8...5707
/// ```
pub async fn list_commitments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, ApiError> {
    let creator = query.creator.as_deref().map(parse_address).transpose()?;

    let page = query.page.unwrap_or(0);
    let limit = query.limit.unwrap_or(20).clamp(1, 100); // 최대 100개

    // 다음 페이지 여부 확인용으로 하나 더 조회
    let filter = CommitmentFilter {
        creator,
        is_completed: query.completed,
        is_group_commitment: query.group,
        offset: page as u64 * limit as u64,
        limit: limit + 1,
    };
    let mut rows = state.store.list_commitments(&filter).await?;

    let has_next = rows.len() > limit as usize;
    rows.truncate(limit as usize);

    let mut commitments = Vec::with_capacity(rows.len());
    for commitment in rows {
        let participants = state.store.list_participants(commitment.id).await?;
        commitments.push(CommitmentResponse::new(commitment, participants));
    }

    Ok(Json(ListResponse {
        commitments,
        pagination: Pagination { page, limit, has_next },
    }))
}

/// GET /commitments/:id
///
/// 커밋먼트 상세 + 참가자 목록
pub async fn get_commitment(
    State(state): State<AppState>,
    Path(id): Path<CommitmentId>,
) -> Result<Json<CommitmentResponse>, ApiError> {
    let commitment = state
        .store
        .get_commitment(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Commitment {}", id)))?;

    let participants = state.store.list_participants(id).await?;

    Ok(Json(CommitmentResponse::new(commitment, participants)))
}

// ============ Helpers ============

fn is_valid_ethereum_address(addr: &str) -> bool {
    // 0x로 시작하고 40자리 hex
    addr.starts_with("0x") && addr.len() == 42 && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
}

fn parse_address(raw: &str) -> Result<Address, ApiError> {
    if !is_valid_ethereum_address(raw) {
        return Err(ApiError::ValidationError("Invalid Ethereum address".to_string()));
    }
    raw.parse()
        .map_err(|_| ApiError::ValidationError("Invalid Ethereum address".to_string()))
}
