use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::model::{AnswerId, AttemptId, QuestionId, QuizId};

/// Durable, resumable projection of an in-progress graded attempt.
///
/// One snapshot exists per (user, quiz). It is the only state that survives a
/// crash or a closed tab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutosaveSnapshot {
    pub quiz_id: QuizId,
    pub attempt_id: AttemptId,
    pub ordered_question_ids: Vec<QuestionId>,
    pub current_index: usize,
    pub answers: BTreeMap<QuestionId, AnswerId>,
    #[serde(default)]
    pub risked: BTreeSet<QuestionId>,
    pub time_remaining_secs: Option<u32>,
    pub updated_at: DateTime<Utc>,
}

impl AutosaveSnapshot {
    /// Returns true when both snapshots describe the same progress, ignoring `updated_at`.
    #[must_use]
    pub fn same_content(&self, other: &AutosaveSnapshot) -> bool {
        self.quiz_id == other.quiz_id
            && self.attempt_id == other.attempt_id
            && self.current_index == other.current_index
            && self.time_remaining_secs == other.time_remaining_secs
            && self.answers == other.answers
            && self.risked == other.risked
            && self.ordered_question_ids == other.ordered_question_ids
    }

    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    fn snapshot() -> AutosaveSnapshot {
        AutosaveSnapshot {
            quiz_id: QuizId::new(3),
            attempt_id: AttemptId::new(11),
            ordered_question_ids: vec![QuestionId::new(101), QuestionId::new(102)],
            current_index: 1,
            answers: BTreeMap::from([(QuestionId::new(101), AnswerId::new(5))]),
            risked: BTreeSet::new(),
            time_remaining_secs: Some(42),
            updated_at: fixed_now(),
        }
    }

    #[test]
    fn json_keeps_answer_map_keys() {
        let snap = snapshot();
        let json = serde_json::to_string(&snap).unwrap();
        let parsed: AutosaveSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, snap);
        assert_eq!(
            parsed.answers.get(&QuestionId::new(101)),
            Some(&AnswerId::new(5))
        );
    }

    #[test]
    fn payload_without_risked_still_parses() {
        let json = r#"{
            "quiz_id": 3,
            "attempt_id": 11,
            "ordered_question_ids": [101],
            "current_index": 0,
            "answers": {},
            "time_remaining_secs": null,
            "updated_at": "2023-11-14T22:13:20Z"
        }"#;
        let parsed: AutosaveSnapshot = serde_json::from_str(json).unwrap();
        assert!(parsed.risked.is_empty());
        assert_eq!(parsed.time_remaining_secs, None);
    }

    #[test]
    fn same_content_ignores_timestamp() {
        let a = snapshot();
        let mut b = snapshot();
        b.updated_at = fixed_now() + chrono::Duration::seconds(30);
        assert!(a.same_content(&b));
        b.current_index = 0;
        assert!(!a.same_content(&b));
    }
}
