//! Admission pacing
//!
//! [`PacingGate`] spaces admissions at least `interval` apart, measured from
//! the moment the previous admission was granted. It throttles the admission
//! rate only; how long a placement takes afterwards does not matter.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

/// Interval-wait gate on the admission path
#[derive(Debug)]
pub struct PacingGate {
    interval: Duration,
    next_admission: Mutex<Option<Instant>>,
}

impl PacingGate {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_admission: Mutex::new(None),
        }
    }

    /// Gate admitting at most `rate` callers per second
    pub fn from_rate(rate: f64) -> Self {
        Self::new(Duration::from_secs_f64(1.0 / rate))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next admission slot and claim it
    ///
    /// The first call returns immediately. Dropping the future before it
    /// completes leaves the schedule untouched.
    pub async fn admit(&self) -> Instant {
        let mut next = self.next_admission.lock().await;
        if let Some(at) = *next {
            tokio::time::sleep_until(at).await;
        }
        let admitted = Instant::now();
        *next = Some(admitted + self.interval);
        trace!("admission granted, next no earlier than {:?}", self.interval);
        admitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_first_admission_is_immediate() {
        let gate = PacingGate::from_rate(2.0);
        let start = Instant::now();
        let admitted = gate.admit().await;
        assert_eq!(admitted, start);
    }

    #[tokio::test(start_paused = true)]
    async fn test_admissions_are_spaced() {
        let gate = PacingGate::from_rate(5.0);
        let mut times = Vec::new();
        for _ in 0..6 {
            times.push(gate.admit().await);
        }
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(200));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_schedule() {
        let gate = Arc::new(PacingGate::new(Duration::from_millis(100)));
        let mut handles = Vec::new();
        for _ in 0..5 {
            let gate = gate.clone();
            handles.push(tokio::spawn(async move { gate.admit().await }));
        }
        let mut times = Vec::new();
        for handle in handles {
            times.push(handle.await.unwrap());
        }
        times.sort();
        for pair in times.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_gap_does_not_accumulate_credit() {
        let gate = PacingGate::new(Duration::from_millis(100));
        gate.admit().await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        let a = gate.admit().await;
        let b = gate.admit().await;
        assert!(b - a >= Duration::from_millis(100));
    }
}
