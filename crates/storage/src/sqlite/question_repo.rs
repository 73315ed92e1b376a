use async_trait::async_trait;
use quiz_core::model::{Question, QuestionId};
use std::collections::HashMap;

use super::SqliteRepository;
use super::mapping::{conn, id_i64, map_question_row, ser};
use crate::repository::{QuestionStore, StorageError};

impl SqliteRepository {
    /// Insert or replace a question record.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be written.
    pub async fn upsert_question(&self, question: &Question) -> Result<(), StorageError> {
        let options = serde_json::to_string(&question.options).map_err(ser)?;
        let correct = question
            .correct_answer
            .map(|a| id_i64("correct_answer", a.value()))
            .transpose()?;

        sqlx::query(
            r"
            INSERT INTO questions (id, prompt, options, correct_answer, points)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                prompt = excluded.prompt,
                options = excluded.options,
                correct_answer = excluded.correct_answer,
                points = excluded.points
            ",
        )
        .bind(id_i64("question_id", question.id.value())?)
        .bind(&question.prompt)
        .bind(options)
        .bind(correct)
        .bind(i64::from(question.points))
        .execute(&self.pool)
        .await
        .map_err(conn)?;

        Ok(())
    }
}

#[async_trait]
impl QuestionStore for SqliteRepository {
    async fn fetch(&self, ids: &[QuestionId]) -> Result<Vec<Question>, StorageError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut sql = String::from(
            r"
            SELECT id, prompt, options, correct_answer, points
            FROM questions
            WHERE id IN (
            ",
        );
        for i in 0..ids.len() {
            if i > 0 {
                sql.push_str(", ");
            }
            sql.push('?');
            sql.push_str(&(i + 1).to_string());
        }
        sql.push_str(")\n");

        let mut q = sqlx::query(&sql);
        for id in ids {
            q = q.bind(id_i64("question_id", id.value())?);
        }

        let rows = q.fetch_all(&self.pool).await.map_err(conn)?;

        let mut by_id: HashMap<QuestionId, Question> = HashMap::with_capacity(rows.len());
        for row in rows {
            let question = map_question_row(&row)?;
            by_id.insert(question.id, question);
        }

        // Duplicate ids keep their positions, so clone rather than remove.
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            match by_id.get(id) {
                Some(question) => out.push(question.clone()),
                None => return Err(StorageError::NotFound),
            }
        }
        Ok(out)
    }
}
