use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::info;
use num_format::{Locale, ToFormattedString};

const REPORT_INTERVAL: Duration = Duration::from_secs(5);
// percent steps are reported in units of 0.25%
const PERCENT_STEP: f64 = 0.25;

/// Progress over the item pairs touched while training.
///
/// Workers only increment an atomic counter. Whichever worker notices that a report is due
/// claims the reentrancy flag and formats the line; everybody else moves on.
pub struct ProgressTracker {
    total: usize,
    // processed count per quarter percent, at least 1
    step_size: usize,
    processed: AtomicUsize,
    reporting: AtomicBool,
    created: Instant,
    // millis since `created`
    phase_start_millis: AtomicU64,
    last_report_millis: AtomicU64,
    last_reported_step: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        ProgressTracker {
            total: total.max(1),
            step_size: (total / 400).max(1),
            processed: AtomicUsize::new(0),
            reporting: AtomicBool::new(false),
            created: Instant::now(),
            phase_start_millis: AtomicU64::new(0),
            last_report_millis: AtomicU64::new(0),
            last_reported_step: AtomicUsize::new(0),
        }
    }

    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn increment(&self, count: usize) {
        let before = self.processed.fetch_add(count, Ordering::Relaxed);
        let processed = before + count;
        if !self.crosses_step(before, processed) {
            return;
        }

        let elapsed = self.phase_elapsed();
        let last = Duration::from_millis(self.last_report_millis.load(Ordering::Relaxed));
        if elapsed < last + REPORT_INTERVAL {
            return;
        }

        if self
            .reporting
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        let step = self.percent_step(processed);
        if step > self.last_reported_step.load(Ordering::Relaxed) {
            self.last_reported_step.store(step, Ordering::Relaxed);
            self.last_report_millis
                .store(elapsed.as_millis() as u64, Ordering::Relaxed);
            info!(
                "| {:>10.1}s | {:>7.2}% | {:>20} |",
                elapsed.as_secs_f64(),
                step as f64 * PERCENT_STEP,
                processed.min(self.total).to_formatted_string(&Locale::en)
            );
        }

        self.reporting.store(false, Ordering::Release);
    }

    fn crosses_step(&self, before: usize, after: usize) -> bool {
        before / self.step_size != after / self.step_size
    }

    fn phase_elapsed(&self) -> Duration {
        let phase_start = Duration::from_millis(self.phase_start_millis.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(phase_start)
    }

    fn percent_step(&self, processed: usize) -> usize {
        let percent = 100.0 * processed.min(self.total) as f64 / self.total as f64;
        (percent / PERCENT_STEP).floor() as usize
    }

    pub fn print_header(&self) {
        self.phase_start_millis
            .store(self.created.elapsed().as_millis() as u64, Ordering::Relaxed);
        self.last_report_millis.store(0, Ordering::Relaxed);
        self.last_reported_step.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        info!("+-------------+----------+----------------------+");
        info!("| Elapsed     | Percent  | Pairs processed      |");
        info!("+-------------+----------+----------------------+");
    }

    /// Separates the passes of one phase.
    pub fn print_break(&self) {
        info!("+-------------+----------+----------------------+");
    }

    pub fn print_footer(&self) {
        info!(
            "| {:>10.1}s | {:>7.2}% | {:>20} |",
            self.phase_elapsed().as_secs_f64(),
            100.0,
            self.processed()
                .min(self.total)
                .to_formatted_string(&Locale::en)
        );
        info!("+-------------+----------+----------------------+");
    }
}
