use async_trait::async_trait;
use chrono::Utc;
use quiz_core::model::{AttemptId, AttemptRef, AttemptResult, QuestionId, QuizId, SubmissionRecord};
use quiz_core::scoring::score_submission;
use sqlx::Row;

use super::SqliteRepository;
use super::mapping::{attempt_id_from_i64, conn, id_i64, quiz_id_to_i64, ser};
use crate::repository::{AttemptStore, QuestionStore, StorageError};

fn count_i64(field: &'static str, v: usize) -> Result<i64, StorageError> {
    i64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} overflow")))
}

#[async_trait]
impl AttemptStore for SqliteRepository {
    async fn create(&self, quiz_id: QuizId) -> Result<AttemptId, StorageError> {
        let res = sqlx::query(
            r"
            INSERT INTO attempts (quiz_id, created_at)
            VALUES (?1, ?2)
            ",
        )
        .bind(quiz_id_to_i64(quiz_id)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        let id = attempt_id_from_i64(res.last_insert_rowid())?;
        tracing::debug!(%quiz_id, attempt_id = %id, "created attempt");
        Ok(id)
    }

    async fn submit(
        &self,
        attempt_id: AttemptId,
        record: &SubmissionRecord,
    ) -> Result<AttemptResult, StorageError> {
        let id = id_i64("attempt_id", attempt_id.value())?;

        let row = sqlx::query("SELECT submitted_at FROM attempts WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(conn)?
            .ok_or(StorageError::NotFound)?;
        let submitted_at: Option<chrono::DateTime<Utc>> =
            row.try_get("submitted_at").map_err(ser)?;
        if submitted_at.is_some() {
            return Err(StorageError::Conflict);
        }

        let ids: Vec<QuestionId> = record.entries().iter().map(|e| e.question_id).collect();
        let questions = self.fetch(&ids).await?;
        let result = score_submission(AttemptRef::Graded(attempt_id), &questions, record);
        let answers = serde_json::to_string(record).map_err(ser)?;

        let updated = sqlx::query(
            r"
            UPDATE attempts
            SET submitted_at = ?2, answers = ?3, score = ?4, max_score = ?5,
                correct = ?6, total = ?7
            WHERE id = ?1 AND submitted_at IS NULL
            ",
        )
        .bind(id)
        .bind(Utc::now())
        .bind(answers)
        .bind(i64::from(result.score))
        .bind(i64::from(result.max_score))
        .bind(count_i64("correct", result.correct)?)
        .bind(count_i64("total", result.total)?)
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        if updated.rows_affected() == 0 {
            return Err(StorageError::Conflict);
        }
        Ok(result)
    }
}
