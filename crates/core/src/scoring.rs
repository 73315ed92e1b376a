//! Local scoring for practice runs and in-process attempt stores.
//!
//! A correct answer earns the question's points. A risked answer doubles the reward
//! when correct and costs the question's points when wrong. The total never drops
//! below zero.

use std::collections::HashMap;

use crate::model::{AttemptRef, AttemptResult, Question, QuestionId, SubmissionRecord};

/// Score a submission against the questions it covers.
///
/// Entries whose question is missing from `questions` count toward `total` but
/// contribute nothing to the maximum score.
#[must_use]
pub fn score_submission(
    attempt: AttemptRef,
    questions: &[Question],
    record: &SubmissionRecord,
) -> AttemptResult {
    let by_id: HashMap<QuestionId, &Question> = questions.iter().map(|q| (q.id, q)).collect();

    let mut earned: i64 = 0;
    let mut max_score: u32 = 0;
    let mut correct = 0_usize;

    for entry in record.entries() {
        let Some(question) = by_id.get(&entry.question_id) else {
            continue;
        };
        let points = i64::from(question.points);
        max_score = max_score.saturating_add(question.points);

        let Some(given) = entry.answer_given else {
            continue;
        };
        let is_correct = question.correct_answer == Some(given);
        if is_correct {
            correct += 1;
        }
        earned += match (is_correct, entry.risked) {
            (true, true) => points * 2,
            (true, false) => points,
            (false, true) => -points,
            (false, false) => 0,
        };
    }

    AttemptResult {
        attempt,
        score: u32::try_from(earned.max(0)).unwrap_or(u32::MAX),
        max_score,
        correct,
        total: record.len(),
        duration_secs: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AnswerId, SubmissionEntry};

    fn question(id: u64, correct: u64) -> Question {
        Question::new(QuestionId::new(id), format!("Q{id}"))
            .with_correct_answer(AnswerId::new(correct))
    }

    fn entry(id: u64, answer: Option<u64>, risked: bool) -> SubmissionEntry {
        SubmissionEntry {
            question_id: QuestionId::new(id),
            answer_given: answer.map(AnswerId::new),
            risked,
        }
    }

    #[test]
    fn counts_correct_answers() {
        let questions = vec![question(1, 10), question(2, 20), question(3, 30)];
        let record = SubmissionRecord::new(vec![
            entry(1, Some(10), false),
            entry(2, Some(21), false),
            entry(3, None, false),
        ]);

        let result = score_submission(AttemptRef::Practice, &questions, &record);
        assert_eq!(result.score, 1);
        assert_eq!(result.max_score, 3);
        assert_eq!(result.correct, 1);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn risked_answers_double_or_penalize() {
        let questions = vec![question(1, 10).with_points(2), question(2, 20)];
        let record = SubmissionRecord::new(vec![entry(1, Some(10), true), entry(2, Some(1), true)]);

        let result = score_submission(AttemptRef::Practice, &questions, &record);
        // 2 * 2 for the risked correct answer, minus 1 for the risked miss.
        assert_eq!(result.score, 3);
        assert_eq!(result.max_score, 3);
    }

    #[test]
    fn score_never_goes_negative() {
        let questions = vec![question(1, 10)];
        let record = SubmissionRecord::new(vec![entry(1, Some(11), true)]);

        let result = score_submission(AttemptRef::Practice, &questions, &record);
        assert_eq!(result.score, 0);
    }
}
