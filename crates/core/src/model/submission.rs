use serde::{Deserialize, Serialize};

use crate::model::{AnswerId, AttemptRef, QuestionId};

/// One question's final answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionEntry {
    pub question_id: QuestionId,
    pub answer_given: Option<AnswerId>,
    pub risked: bool,
}

/// Complete, immutable answer list sent when an attempt is finalized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubmissionRecord {
    entries: Vec<SubmissionEntry>,
}

impl SubmissionRecord {
    #[must_use]
    pub fn new(entries: Vec<SubmissionEntry>) -> Self {
        Self { entries }
    }

    #[must_use]
    pub fn entries(&self) -> &[SubmissionEntry] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn answered(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.answer_given.is_some())
            .count()
    }
}

/// Scored outcome of a submitted attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptResult {
    pub attempt: AttemptRef,
    pub score: u32,
    pub max_score: u32,
    pub correct: usize,
    pub total: usize,
    /// Wall-clock seconds spent, computed locally for practice runs.
    pub duration_secs: Option<u64>,
}

impl AttemptResult {
    /// Score as a percentage of the maximum, 0 for quizzes worth nothing.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        if self.max_score == 0 {
            return 0.0;
        }
        f64::from(self.score) * 100.0 / f64::from(self.max_score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AttemptId;

    #[test]
    fn record_serializes_as_a_plain_list() {
        let record = SubmissionRecord::new(vec![SubmissionEntry {
            question_id: QuestionId::new(1),
            answer_given: None,
            risked: false,
        }]);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"[{"question_id":1,"answer_given":null,"risked":false}]"#);
    }

    #[test]
    fn percentage_handles_zero_max() {
        let result = AttemptResult {
            attempt: AttemptRef::Graded(AttemptId::new(1)),
            score: 0,
            max_score: 0,
            correct: 0,
            total: 0,
            duration_secs: None,
        };
        assert!(result.percentage().abs() < f64::EPSILON);
    }
}
