//! Indexer Status Endpoint

use axum::{extract::State, Json};
use serde::Serialize;

use crate::types::address_hex;
use crate::{error::ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct IndexerStatusResponse {
    /// `{chain_id}:{contract}`
    pub stream: String,
    pub chain_id: u64,
    pub contract_address: String,
    pub start_block: u64,
    /// 마지막으로 완전히 반영된 블록
    pub checkpoint_block: Option<u64>,
    /// 재시작 시 처음 읽을 블록
    pub resume_block: u64,
}

/// GET /indexer/status
pub async fn indexer_status(
    State(state): State<AppState>,
) -> Result<Json<IndexerStatusResponse>, ApiError> {
    let checkpoint_block = state.checkpoints.last_checkpoint().await?;
    let resume_block = state.checkpoints.resume_block().await?;

    Ok(Json(IndexerStatusResponse {
        stream: state.checkpoints.stream().to_string(),
        chain_id: state.config.chain_id,
        contract_address: address_hex(&state.config.contract_address),
        start_block: state.checkpoints.start_block(),
        checkpoint_block,
        resume_block,
    }))
}
