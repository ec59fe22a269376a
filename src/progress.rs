//! Progress bar display for update runs
//!
//! Wraps indicatif behind the engine's ProgressReporter trait so the
//! orchestrator stays free of terminal concerns.

use crate::update::ProgressReporter;
use indicatif::{ProgressBar, ProgressStyle};

/// Terminal progress display for a batch of plans
pub struct Progress {
    bar: Option<ProgressBar>,
}

impl Progress {
    /// Creates a progress bar for `total` plans; disabled bars are inert
    pub fn new(total: u64, enabled: bool) -> Self {
        if !enabled || total == 0 {
            return Self { bar: None };
        }

        let bar = ProgressBar::new(total);
        let style = ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        bar.set_style(style);
        Self { bar: Some(bar) }
    }

    /// Updates the message shown next to the bar
    pub fn set_message(&self, message: impl Into<String>) {
        if let Some(bar) = &self.bar {
            bar.set_message(message.into());
        }
    }

    /// Finishes the bar and removes it from the terminal
    pub fn finish_and_clear(&self) {
        if let Some(bar) = &self.bar {
            bar.finish_and_clear();
        }
    }
}

impl ProgressReporter for Progress {
    fn increment(&self) {
        if let Some(bar) = &self.bar {
            bar.inc(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_progress_is_inert() {
        let progress = Progress::new(10, false);
        progress.increment();
        progress.set_message("noop");
        progress.finish_and_clear();
        assert!(progress.bar.is_none());
    }

    #[test]
    fn test_zero_total_disables_bar() {
        let progress = Progress::new(0, true);
        assert!(progress.bar.is_none());
    }

    #[test]
    fn test_enabled_progress_counts() {
        let progress = Progress::new(3, true);
        progress.increment();
        progress.increment();
        if let Some(bar) = &progress.bar {
            assert_eq!(bar.position(), 2);
        }
        progress.finish_and_clear();
    }
}
