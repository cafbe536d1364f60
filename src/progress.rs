/// Receives the fraction of work done, in `[0, 1]`. Purely observational.
pub trait ProgressSink {
    fn update(&mut self, fraction: f64);
}

/// Discards progress updates.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn update(&mut self, _fraction: f64) {}
}

/// Logs every update, skipping repeats of the same whole percentage.
#[derive(Default)]
pub struct LogProgress {
    last_percent: Option<u32>,
}

impl ProgressSink for LogProgress {
    fn update(&mut self, fraction: f64) {
        let percent = (fraction.clamp(0.0, 1.0) * 100.0).round() as u32;
        if self.last_percent != Some(percent) {
            self.last_percent = Some(percent);
            log::info!("progress: {}%", percent);
        }
    }
}

#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordedProgress {
    pub updates: Vec<f64>,
}

#[cfg(test)]
impl ProgressSink for RecordedProgress {
    fn update(&mut self, fraction: f64) {
        self.updates.push(fraction);
    }
}

/// Progress after `done` chunks when the total is unknown: the denominator is
/// capped at `assumed_total`, so the estimate saturates at 1.0.
pub fn capped_estimate(done: usize, assumed_total: usize) -> f64 {
    if assumed_total == 0 {
        return 1.0;
    }
    (done as f64 / assumed_total as f64).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_grows_then_saturates() {
        assert_eq!(capped_estimate(1, 50), 0.02);
        assert_eq!(capped_estimate(25, 50), 0.5);
        assert_eq!(capped_estimate(50, 50), 1.0);
        assert_eq!(capped_estimate(80, 50), 1.0);
    }

    #[test]
    fn recorded_progress_keeps_order() {
        let mut sink = RecordedProgress::default();
        sink.update(0.25);
        sink.update(1.0);
        assert_eq!(sink.updates, vec![0.25, 1.0]);
    }

    #[test]
    fn log_progress_tracks_the_last_percentage() {
        let mut sink = LogProgress::default();
        sink.update(0.333);
        sink.update(0.3331);
        assert_eq!(sink.last_percent, Some(33));
        sink.update(2.0);
        assert_eq!(sink.last_percent, Some(100));
    }
}
