// file: src/pipeline/progress.rs
// description: progress tracking and statistics reporting for pipeline runs
// reference: uses indicatif for progress bars and tracks execution metrics

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

#[derive(Debug, Clone, Default)]
pub struct RunStats {
    pub modules_run: usize,
    pub modules_failed: usize,
    pub datasets_in_storage: usize,
    pub duration_secs: u64,
}

impl RunStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn modules_per_second(&self) -> f64 {
        if self.duration_secs == 0 {
            return 0.0;
        }
        self.modules_run as f64 / self.duration_secs as f64
    }

    pub fn success_rate(&self) -> f64 {
        let total = self.modules_run + self.modules_failed;
        if total == 0 {
            return 0.0;
        }
        (self.modules_run as f64 / total as f64) * 100.0
    }
}

pub struct ProgressTracker {
    bar: ProgressBar,
    modules_run: AtomicUsize,
    modules_failed: AtomicUsize,
    start_time: Instant,
}

impl ProgressTracker {
    pub fn new(total_modules: usize) -> Self {
        Self::with_color(total_modules, true)
    }

    pub fn with_color(total_modules: usize, colored: bool) -> Self {
        let bar = ProgressBar::new(total_modules as u64);
        let template = if colored {
            "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}"
        } else {
            "{spinner} [{elapsed_precise}] [{bar:40}] {pos}/{len} {msg}"
        };
        bar.set_style(
            ProgressStyle::default_bar()
                .template(template)
                .expect("Failed to create progress bar template")
                .progress_chars("█▓▒░"),
        );

        Self {
            bar,
            modules_run: AtomicUsize::new(0),
            modules_failed: AtomicUsize::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn module_started(&self, name: &str) {
        self.bar.set_message(format!("Running {}", name));
    }

    pub fn module_finished(&self) {
        self.modules_run.fetch_add(1, Ordering::SeqCst);
        self.bar.inc(1);
    }

    pub fn module_failed(&self, name: &str) {
        self.modules_failed.fetch_add(1, Ordering::SeqCst);
        self.bar.set_message(format!("Failed in {}", name));
    }

    pub fn finish(&self) {
        self.bar.finish_with_message("Pipeline complete");
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }

    pub fn get_stats(&self, datasets_in_storage: usize) -> RunStats {
        RunStats {
            modules_run: self.modules_run.load(Ordering::SeqCst),
            modules_failed: self.modules_failed.load(Ordering::SeqCst),
            datasets_in_storage,
            duration_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_stats_calculations() {
        let stats = RunStats {
            modules_run: 9,
            modules_failed: 1,
            datasets_in_storage: 4,
            duration_secs: 3,
        };

        assert_eq!(stats.modules_per_second(), 3.0);
        assert!((stats.success_rate() - 90.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_run_stats_zero_duration() {
        let stats = RunStats::new();
        assert_eq!(stats.modules_per_second(), 0.0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn test_tracker_counts() {
        let tracker = ProgressTracker::with_color(3, false);

        tracker.module_started("reader");
        tracker.module_finished();
        tracker.module_started("select");
        tracker.module_failed("select");

        let stats = tracker.get_stats(2);
        assert_eq!(stats.modules_run, 1);
        assert_eq!(stats.modules_failed, 1);
        assert_eq!(stats.datasets_in_storage, 2);
    }
}
