use quiz_core::model::SessionState;

/// Read-only summary of an attempt for status lines and navigation grids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionProgress {
    pub state: SessionState,
    pub total: usize,
    pub answered: usize,
    pub risked: usize,
    pub loaded: usize,
    pub current_index: usize,
    pub time_remaining_secs: Option<u32>,
    pub degraded: bool,
    /// Last autosave attempt failed; the user should be warned.
    pub autosave_failed: bool,
}

impl SessionProgress {
    #[must_use]
    pub fn unanswered(&self) -> usize {
        self.total.saturating_sub(self.answered)
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.answered == self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(total: usize, answered: usize) -> SessionProgress {
        SessionProgress {
            state: SessionState::InProgress,
            total,
            answered,
            risked: 0,
            loaded: total,
            current_index: 0,
            time_remaining_secs: None,
            degraded: false,
            autosave_failed: false,
        }
    }

    #[test]
    fn counts_unanswered_questions() {
        assert_eq!(progress(10, 4).unanswered(), 6);
        assert!(!progress(10, 4).is_complete());
        assert!(progress(3, 3).is_complete());
        assert!(!progress(0, 0).is_complete());
    }
}
