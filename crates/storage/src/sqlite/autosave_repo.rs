use async_trait::async_trait;
use quiz_core::model::{AutosaveSnapshot, QuizId, UserId};
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, quiz_id_to_i64, ser, user_id_to_i64};
use crate::repository::{AutosaveStore, StorageError};

#[async_trait]
impl AutosaveStore for SqliteRepository {
    async fn get(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
    ) -> Result<Option<AutosaveSnapshot>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT payload
            FROM autosave_snapshots
            WHERE user_id = ?1 AND quiz_id = ?2
            ",
        )
        .bind(user_id_to_i64(user_id)?)
        .bind(quiz_id_to_i64(quiz_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(conn)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let payload: String = row.try_get("payload").map_err(ser)?;
        serde_json::from_str(&payload).map(Some).map_err(ser)
    }

    async fn save(
        &self,
        user_id: UserId,
        quiz_id: QuizId,
        snapshot: &AutosaveSnapshot,
    ) -> Result<(), StorageError> {
        let payload = serde_json::to_string(snapshot).map_err(ser)?;

        sqlx::query(
            r"
            INSERT INTO autosave_snapshots (user_id, quiz_id, attempt_id, payload, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(user_id, quiz_id) DO UPDATE SET
                attempt_id = excluded.attempt_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            ",
        )
        .bind(user_id_to_i64(user_id)?)
        .bind(quiz_id_to_i64(quiz_id)?)
        .bind(id_i64("attempt_id", snapshot.attempt_id.value())?)
        .bind(payload)
        .bind(snapshot.updated_at)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }

    async fn delete(&self, user_id: UserId, quiz_id: QuizId) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM autosave_snapshots WHERE user_id = ?1 AND quiz_id = ?2")
            .bind(user_id_to_i64(user_id)?)
            .bind(quiz_id_to_i64(quiz_id)?)
            .execute(&self.pool)
            .await
            .map_err(conn)?;
        Ok(())
    }
}
