use std::env;
use std::time::Duration;

/// Questions requested per page.
pub const DEFAULT_PAGE_SIZE: usize = 50;
/// Loaded-but-unconsumed questions at or below which the next page is requested.
pub const DEFAULT_PREFETCH_THRESHOLD: usize = 5;
/// Quiet period before a pending autosave is written.
pub const DEFAULT_AUTOSAVE_DEBOUNCE: Duration = Duration::from_millis(1_000);
/// Longest wait for the first page before a session proceeds without it.
pub const DEFAULT_SAFETY_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunables for an attempt session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub page_size: usize,
    pub prefetch_threshold: usize,
    pub debounce: Duration,
    pub safety_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            prefetch_threshold: DEFAULT_PREFETCH_THRESHOLD,
            debounce: DEFAULT_AUTOSAVE_DEBOUNCE,
            safety_timeout: DEFAULT_SAFETY_TIMEOUT,
        }
    }
}

impl EngineConfig {
    /// Read overrides from `QUIZ_PAGE_SIZE`, `QUIZ_PREFETCH_THRESHOLD`,
    /// `QUIZ_AUTOSAVE_DEBOUNCE_MS` and `QUIZ_SAFETY_TIMEOUT_MS`.
    ///
    /// Missing or unparsable values fall back to the defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let read = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    tracing::warn!(key, value = %raw, "ignoring invalid engine setting");
                    None
                }
            }
        };

        let page_size = read("QUIZ_PAGE_SIZE")
            .and_then(|v| usize::try_from(v).ok())
            .filter(|v| *v > 0)
            .unwrap_or(defaults.page_size);
        let prefetch_threshold = read("QUIZ_PREFETCH_THRESHOLD")
            .and_then(|v| usize::try_from(v).ok())
            .unwrap_or(defaults.prefetch_threshold);
        let debounce = read("QUIZ_AUTOSAVE_DEBOUNCE_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.debounce);
        let safety_timeout = read("QUIZ_SAFETY_TIMEOUT_MS")
            .map(Duration::from_millis)
            .unwrap_or(defaults.safety_timeout);

        Self {
            page_size,
            prefetch_threshold,
            debounce,
            safety_timeout,
        }
    }

    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    #[must_use]
    pub fn with_prefetch_threshold(mut self, threshold: usize) -> Self {
        self.prefetch_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    #[must_use]
    pub fn with_safety_timeout(mut self, timeout: Duration) -> Self {
        self.safety_timeout = timeout;
        self
    }
}
