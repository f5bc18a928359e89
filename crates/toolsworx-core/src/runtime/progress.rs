use tokio::sync::watch;

/// Create a connected reporter/watcher pair starting at 0 %.
pub fn progress_channel() -> (ProgressReporter, ProgressWatcher) {
    let (tx, rx) = watch::channel(0u8);
    (ProgressReporter { tx }, ProgressWatcher { rx })
}

/// Converter-side handle for publishing a job's completion percentage.
///
/// Only the latest value is kept. Reports are clamped to `0..=100` and never
/// move backwards, so a converter can report freely from noisy tool output.
#[derive(Debug)]
pub struct ProgressReporter {
    tx: watch::Sender<u8>,
}

impl ProgressReporter {
    /// A reporter nobody listens to.
    pub fn noop() -> Self {
        progress_channel().0
    }

    pub fn report(&self, percent: f64) {
        let value = if percent.is_nan() {
            0
        } else {
            percent.clamp(0.0, 100.0).floor() as u8
        };
        self.tx.send_if_modified(|current| {
            if value > *current {
                *current = value;
                true
            } else {
                false
            }
        });
    }

    pub fn finish(&self) {
        self.report(100.0);
    }

    pub fn current(&self) -> u8 {
        *self.tx.borrow()
    }
}

/// Server-side handle that observes progress updates.
#[derive(Debug)]
pub struct ProgressWatcher {
    rx: watch::Receiver<u8>,
}

impl ProgressWatcher {
    /// Wait for the next change. Returns `None` once the reporter is dropped.
    pub async fn changed(&mut self) -> Option<u8> {
        self.rx.changed().await.ok()?;
        Some(*self.rx.borrow_and_update())
    }

    pub fn latest(&self) -> u8 {
        *self.rx.borrow()
    }
}
