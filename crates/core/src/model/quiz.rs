use crate::model::{QuestionId, QuizId};

/// How an attempt is scored and persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuizMode {
    /// Store-backed attempt: created and scored by the attempt store, autosaved.
    #[default]
    Graded,
    /// Custom practice run: scored locally, never autosaved.
    Practice,
}

/// Everything the engine needs to know about a quiz before an attempt starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuizDefinition {
    pub id: QuizId,
    pub question_ids: Vec<QuestionId>,
    /// Time limit in whole minutes; `None` or zero means untimed.
    pub duration_minutes: Option<u32>,
    /// Shuffle question order once when a fresh attempt starts.
    pub randomize: bool,
    pub mode: QuizMode,
}

impl QuizDefinition {
    #[must_use]
    pub fn graded(id: QuizId, question_ids: Vec<QuestionId>) -> Self {
        Self {
            id,
            question_ids,
            duration_minutes: None,
            randomize: false,
            mode: QuizMode::Graded,
        }
    }

    #[must_use]
    pub fn practice(id: QuizId, question_ids: Vec<QuestionId>) -> Self {
        Self {
            mode: QuizMode::Practice,
            ..Self::graded(id, question_ids)
        }
    }

    #[must_use]
    pub fn with_duration_minutes(mut self, minutes: u32) -> Self {
        self.duration_minutes = Some(minutes);
        self
    }

    #[must_use]
    pub fn with_randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    /// Effective time limit in seconds, `None` when untimed.
    #[must_use]
    pub fn time_limit_secs(&self) -> Option<u32> {
        self.duration_minutes
            .filter(|m| *m > 0)
            .map(|m| m.saturating_mul(60))
    }

    #[must_use]
    pub fn is_practice(&self) -> bool {
        self.mode == QuizMode::Practice
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_minutes_is_untimed() {
        let quiz = QuizDefinition::graded(QuizId::new(1), vec![]).with_duration_minutes(0);
        assert_eq!(quiz.time_limit_secs(), None);
    }

    #[test]
    fn minutes_convert_to_seconds() {
        let quiz = QuizDefinition::practice(QuizId::new(1), vec![]).with_duration_minutes(10);
        assert_eq!(quiz.time_limit_secs(), Some(600));
        assert!(quiz.is_practice());
    }
}
