use indicatif::{ProgressBar, ProgressStyle};

/// Told about every refit as it completes. Never affects results.
pub trait Progress: Sync {
    fn start(&self, _total: usize) {}
    fn inc(&self);
    fn finish(&self) {}
}

/// Reports nothing.
pub struct NoProgress;

impl Progress for NoProgress {
    fn inc(&self) {}
}

/// Console progress bar.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new(message: &str) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{msg} [{elapsed_precise}] {wide_bar} {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        bar.set_message(message.to_string());
        BarProgress { bar }
    }
}

impl Progress for BarProgress {
    fn start(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn inc(&self) {
        self.bar.inc(1);
    }

    fn finish(&self) {
        self.bar.finish();
    }
}

#[test]
fn test_bar_progress_counts() {
    let progress = BarProgress { bar: ProgressBar::hidden() };
    progress.start(3);
    for _ in 0..3 {
        progress.inc();
    }
    assert_eq!(progress.bar.position(), 3);
    assert_eq!(progress.bar.length(), Some(3));
    progress.finish();
}
