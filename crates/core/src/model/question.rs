use serde::{Deserialize, Serialize};

use crate::model::{AnswerId, QuestionId};

/// A selectable answer within a question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOption {
    pub id: AnswerId,
    pub text: String,
}

/// A question record as returned by the question store.
///
/// Content is opaque to the engine; only `id`, `correct_answer` and `points`
/// are read, the latter two by local scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub id: QuestionId,
    pub prompt: String,
    #[serde(default)]
    pub options: Vec<AnswerOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<AnswerId>,
    #[serde(default = "default_points")]
    pub points: u32,
}

fn default_points() -> u32 {
    1
}

impl Question {
    /// Build a question worth one point.
    #[must_use]
    pub fn new(id: QuestionId, prompt: impl Into<String>) -> Self {
        Self {
            id,
            prompt: prompt.into(),
            options: Vec::new(),
            correct_answer: None,
            points: default_points(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: Vec<AnswerOption>) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn with_correct_answer(mut self, answer: AnswerId) -> Self {
        self.correct_answer = Some(answer);
        self
    }

    #[must_use]
    pub fn with_points(mut self, points: u32) -> Self {
        self.points = points;
        self
    }

    /// Returns true when `answer` is one of this question's options.
    ///
    /// Questions without options accept any answer id.
    #[must_use]
    pub fn accepts(&self, answer: AnswerId) -> bool {
        self.options.is_empty() || self.options.iter().any(|opt| opt.id == answer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_points_default_to_one() {
        let q: Question = serde_json::from_str(r#"{"id": 3, "prompt": "2 + 2?"}"#).unwrap();
        assert_eq!(q.points, 1);
        assert!(q.options.is_empty());
        assert_eq!(q.correct_answer, None);
    }

    #[test]
    fn accepts_only_listed_options() {
        let q = Question::new(QuestionId::new(1), "Pick").with_options(vec![
            AnswerOption {
                id: AnswerId::new(10),
                text: "a".into(),
            },
            AnswerOption {
                id: AnswerId::new(11),
                text: "b".into(),
            },
        ]);
        assert!(q.accepts(AnswerId::new(11)));
        assert!(!q.accepts(AnswerId::new(12)));
    }
}
