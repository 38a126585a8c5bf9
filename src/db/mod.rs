//! Database Module
//!
//! # Interview Q&A
//!
//! Q: 왜 PostgreSQL을 선택했는가?
//! A: 프로젝션 저장소에 필요한 것
//!
//!    1. ACID 트랜잭션: 참가자 기록 + 스테이크 증가를 원자적으로
//!    2. NUMERIC(78,0): uint256 금액을 손실 없이 저장
//!    3. `ON CONFLICT`: insert-if-absent 를 한 문장으로
//!    4. 인덱싱: creator, 완료 여부별 조회 최적화
//!
//! Q: 커넥션 풀은 어떻게 관리하는가?
//! A: SQLx의 PgPool 사용
//!    - 최소/최대 커넥션 수 설정
//!    - acquire_timeout 으로 무한 대기 방지 → StoreUnavailable 로 이어짐
//!
//! Q: 체크포인트와 프로젝션을 같은 DB에 두는 이유는?
//! A: 체크포인트는 프로젝션 반영이 커밋된 뒤에만 전진함
//!    - 같은 DB 라서 백업/복구 시점이 일치
//!    - 사이에서 크래시 → 재처리 (멱등이므로 안전), 유실은 없음

#[cfg(test)]
pub mod memory;
mod models;
mod repository;

pub use models::*;
pub use repository::{CheckpointStore, ProjectionStore, StoreResult};

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ethers::types::{Address, U256};
use sqlx::{postgres::PgPoolOptions, PgConnection, PgPool};

use crate::error::IndexerError;
use crate::types::{address_hex, CommitmentId};

const COMMITMENT_COLUMNS: &str = r#"
    id,
    creator,
    description,
    stake_amount::text AS stake_amount,
    total_stake::text AS total_stake,
    end_date,
    proof_frequency,
    is_group_commitment,
    is_completed,
    completed_participants,
    reward_per_participant::text AS reward_per_participant,
    created_block,
    updated_at
"#;

/// 데이터베이스 연결 및 쿼리 담당
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// 데이터베이스 연결
    ///
    /// # Connection Pool Settings
    ///
    /// - max_connections: 10
    /// - min_connections: 1 (idle 시 최소 유지)
    /// - acquire_timeout: 커넥션 획득 대기 상한
    pub async fn connect(database_url: &str, acquire_timeout: Duration) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .min_connections(1)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 마이그레이션 실행
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

async fn insert_participant(
    conn: &mut PgConnection,
    participant: &Participant,
) -> StoreResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO participants (commitment_id, participant, joined_block, created_at)
        VALUES ($1, $2, $3, NOW())
        ON CONFLICT (commitment_id, participant) DO NOTHING
        "#,
    )
    .bind(participant.commitment_id)
    .bind(address_hex(&participant.address))
    .bind(participant.joined_block)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn increment_stake(
    conn: &mut PgConnection,
    id: CommitmentId,
    amount: U256,
) -> StoreResult<()> {
    // total_stake 가 NULL 이면 (방금 기록된 참가자를 제외한) 참가자 수로 복원
    let result = sqlx::query(
        r#"
        UPDATE commitments
        SET total_stake = COALESCE(
                total_stake,
                stake_amount * GREATEST(
                    (SELECT COUNT(*) FROM participants WHERE commitment_id = $1) - 1,
                    0
                )
            ) + $2::numeric,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(amount.to_string())
    .execute(conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(IndexerError::DataIntegrityAnomaly {
            commitment_id: id,
            detail: "stake increment for unknown commitment".to_string(),
        });
    }
    Ok(())
}

#[async_trait]
impl ProjectionStore for Database {
    /// Health check
    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn get_commitment(&self, id: CommitmentId) -> StoreResult<Option<Commitment>> {
        let sql = format!("SELECT {} FROM commitments WHERE id = $1", COMMITMENT_COLUMNS);
        let row = sqlx::query_as::<_, CommitmentRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(Commitment::try_from).transpose()
    }

    async fn upsert_commitment(&self, commitment: &Commitment) -> StoreResult<()> {
        let completed: Option<Vec<String>> = if commitment.completed_participants.is_empty() {
            None
        } else {
            Some(commitment.completed_participants.iter().map(address_hex).collect())
        };

        sqlx::query(
            r#"
            INSERT INTO commitments (
                id, creator, description, stake_amount, total_stake,
                end_date, proof_frequency, is_group_commitment, is_completed,
                completed_participants, reward_per_participant, created_block, updated_at
            )
            VALUES ($1, $2, $3, $4::numeric, $5::numeric, $6, $7, $8, $9, $10, $11::numeric, $12, NOW())
            ON CONFLICT (id)
            DO UPDATE SET
                creator = EXCLUDED.creator,
                description = EXCLUDED.description,
                stake_amount = EXCLUDED.stake_amount,
                total_stake = EXCLUDED.total_stake,
                end_date = EXCLUDED.end_date,
                proof_frequency = EXCLUDED.proof_frequency,
                is_group_commitment = EXCLUDED.is_group_commitment,
                is_completed = EXCLUDED.is_completed,
                completed_participants = EXCLUDED.completed_participants,
                reward_per_participant = EXCLUDED.reward_per_participant,
                created_block = EXCLUDED.created_block,
                updated_at = NOW()
            "#,
        )
        .bind(commitment.id)
        .bind(address_hex(&commitment.creator))
        .bind(&commitment.description)
        .bind(commitment.stake_amount.to_string())
        .bind(commitment.total_stake.map(|v| v.to_string()))
        .bind(commitment.end_date)
        .bind(commitment.proof_frequency)
        .bind(commitment.is_group_commitment)
        .bind(commitment.is_completed)
        .bind(completed)
        .bind(commitment.reward_per_participant.map(|v| v.to_string()))
        .bind(commitment.created_block)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_participant(
        &self,
        id: CommitmentId,
        address: &Address,
    ) -> StoreResult<Option<Participant>> {
        let row = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT commitment_id, participant, joined_block
            FROM participants
            WHERE commitment_id = $1 AND participant = $2
            "#,
        )
        .bind(id)
        .bind(address_hex(address))
        .fetch_optional(&self.pool)
        .await?;

        row.map(Participant::try_from).transpose()
    }

    async fn insert_participant_if_absent(&self, participant: &Participant) -> StoreResult<bool> {
        let mut conn = self.pool.acquire().await?;
        insert_participant(&mut conn, participant).await
    }

    async fn increment_total_stake(&self, id: CommitmentId, amount: U256) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await?;
        increment_stake(&mut conn, id, amount).await
    }

    async fn mark_completed(
        &self,
        id: CommitmentId,
        completed_participants: &[Address],
        reward_per_participant: Option<U256>,
    ) -> StoreResult<bool> {
        let completed: Vec<String> = completed_participants.iter().map(address_hex).collect();

        let result = sqlx::query(
            r#"
            UPDATE commitments
            SET is_completed = TRUE,
                completed_participants = $2,
                reward_per_participant = $3::numeric,
                updated_at = NOW()
            WHERE id = $1 AND is_completed = FALSE
            "#,
        )
        .bind(id)
        .bind(completed)
        .bind(reward_per_participant.map(|v| v.to_string()))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_participants(&self, id: CommitmentId) -> StoreResult<Vec<Participant>> {
        let rows = sqlx::query_as::<_, ParticipantRow>(
            r#"
            SELECT commitment_id, participant, joined_block
            FROM participants
            WHERE commitment_id = $1
            ORDER BY joined_block, created_at
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Participant::try_from).collect()
    }

    async fn list_commitments(&self, filter: &CommitmentFilter) -> StoreResult<Vec<Commitment>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM commitments
            WHERE ($1::text IS NULL OR creator = $1)
              AND ($2::boolean IS NULL OR is_completed = $2)
              AND ($3::boolean IS NULL OR is_group_commitment = $3)
            ORDER BY id DESC
            LIMIT $4 OFFSET $5
            "#,
            COMMITMENT_COLUMNS
        );
        let rows = sqlx::query_as::<_, CommitmentRow>(&sql)
            .bind(filter.creator.as_ref().map(address_hex))
            .bind(filter.is_completed)
            .bind(filter.is_group_commitment)
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Commitment::try_from).collect()
    }

    /// 참가자 기록 + 스테이크 증가를 하나의 트랜잭션으로
    async fn record_join(&self, participant: &Participant, stake: U256) -> StoreResult<bool> {
        let mut tx = self.pool.begin().await?;

        let inserted = insert_participant(&mut tx, participant).await?;
        if inserted {
            // 에러 시 tx 가 drop 되면서 rollback
            increment_stake(&mut tx, participant.commitment_id, stake).await?;
        }

        tx.commit().await?;
        Ok(inserted)
    }
}

#[async_trait]
impl CheckpointStore for Database {
    async fn load_checkpoint(&self, stream: &str) -> StoreResult<Option<u64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT block_number FROM indexer_checkpoints WHERE stream = $1")
                .bind(stream)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(|(block,)| block as u64))
    }

    async fn advance_checkpoint(&self, stream: &str, block_number: u64) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO indexer_checkpoints (stream, block_number, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (stream)
            DO UPDATE SET
                block_number = GREATEST(indexer_checkpoints.block_number, EXCLUDED.block_number),
                updated_at = NOW()
            "#,
        )
        .bind(stream)
        .bind(block_number as i64)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
