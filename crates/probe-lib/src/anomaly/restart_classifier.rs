//! Out-of-memory restart pattern detection
//!
//! A pod that keeps being killed for exceeding its memory limit restarts in
//! tight succession, because more restarts do not help. Restarts that are
//! spread out are treated as transient failures.

use crate::models::RestartVerdict;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Restarts bunched within this window are classified as out-of-memory
const DEFAULT_WINDOW_SECS: u64 = 30;

/// Minimum restarts required before a pattern can be classified
const DEFAULT_MIN_RESTARTS: usize = 2;

/// Classifies a series of restart timestamps
#[derive(Debug, Clone)]
pub struct RestartClassifier {
    /// Maximum span between the earliest and the latest restart
    pub window: Duration,
    /// Series shorter than this are never out-of-memory
    pub min_restarts: usize,
}

impl RestartClassifier {
    pub fn new(window: Duration, min_restarts: usize) -> Self {
        Self {
            window,
            min_restarts,
        }
    }

    pub fn with_min_restarts(mut self, min_restarts: usize) -> Self {
        self.min_restarts = min_restarts;
        self
    }

    /// Classify a restart series
    ///
    /// The elapsed time since the first restart minus the elapsed time since
    /// the last restart is the span of the series; a span within the window
    /// means the restarts are bunched together.
    pub fn classify(&self, restarts: &[DateTime<Utc>]) -> RestartVerdict {
        let span = restarts
            .iter()
            .min()
            .zip(restarts.iter().max())
            .map(|(first, last)| (*last - *first).num_milliseconds());

        let window_millis = i64::try_from(self.window.as_millis()).unwrap_or(i64::MAX);

        let out_of_memory = match span {
            None => false,
            Some(_) if restarts.len() < self.min_restarts => false,
            Some(span) => span <= window_millis,
        };

        RestartVerdict {
            restart_count: restarts.len(),
            span_millis: span,
            window_secs: self.window.as_secs(),
            min_restarts: self.min_restarts,
            out_of_memory,
        }
    }

    pub fn is_out_of_memory(&self, restarts: &[DateTime<Utc>]) -> bool {
        self.classify(restarts).out_of_memory
    }
}

impl Default for RestartClassifier {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            min_restarts: DEFAULT_MIN_RESTARTS,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn ago(secs: i64) -> DateTime<Utc> {
        Utc::now() - ChronoDuration::seconds(secs)
    }

    #[test]
    fn test_empty_series_is_not_oom() {
        let classifier = RestartClassifier::default();
        let verdict = classifier.classify(&[]);

        assert!(!verdict.out_of_memory);
        assert_eq!(verdict.restart_count, 0);
        assert_eq!(verdict.span_millis, None);
    }

    #[test]
    fn test_single_restart_needs_min_restarts_of_one() {
        let restarts = [ago(5)];

        assert!(!RestartClassifier::default().is_out_of_memory(&restarts));

        let permissive = RestartClassifier::default().with_min_restarts(1);
        let verdict = permissive.classify(&restarts);
        assert!(verdict.out_of_memory);
        assert_eq!(verdict.span_millis, Some(0));
    }

    #[test]
    fn test_restarts_40s_apart_are_transient() {
        let classifier = RestartClassifier::default();
        assert!(!classifier.is_out_of_memory(&[ago(50), ago(10)]));
    }

    #[test]
    fn test_restarts_10s_apart_are_oom() {
        let classifier = RestartClassifier::default();
        assert!(classifier.is_out_of_memory(&[ago(20), ago(10)]));
    }

    #[test]
    fn test_span_exactly_at_window_is_oom() {
        let last = Utc::now();
        let first = last - ChronoDuration::seconds(30);
        assert!(RestartClassifier::default().is_out_of_memory(&[first, last]));
    }

    #[test]
    fn test_span_uses_whole_series() {
        let classifier = RestartClassifier::default();
        let restarts = [ago(60), ago(40), ago(25), ago(10)];

        let verdict = classifier.classify(&restarts);
        assert!(!verdict.out_of_memory);
        assert_eq!(verdict.restart_count, 4);
        assert_eq!(verdict.span_millis, Some(50_000));
    }

    #[test]
    fn test_custom_window() {
        let classifier = RestartClassifier::new(Duration::from_secs(120), 3);

        assert!(classifier.is_out_of_memory(&[ago(100), ago(60), ago(5)]));
        assert!(!classifier.is_out_of_memory(&[ago(60), ago(5)]));
    }
}
