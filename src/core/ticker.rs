//! Drift-free periodic ticking shared by the orchestrator and the job runner.

use std::time::Duration;

use tokio::time::Instant;

/// Fires at `start + k * period`, independent of how long each tick's work takes.
#[derive(Debug)]
pub(crate) struct Ticker {
    period: Duration,
    next: Instant,
}

impl Ticker {
    /// First tick lands one full period from now.
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            next: Instant::now() + period,
        }
    }

    /// Wait for the next scheduled instant.
    ///
    /// Returns how many whole ticks were missed because the caller fell more
    /// than a period behind; those ticks are dropped and the phase is kept.
    pub(crate) async fn tick(&mut self) -> u64 {
        tokio::time::sleep_until(self.next).await;

        let behind = Instant::now().saturating_duration_since(self.next);
        let missed = if behind >= self.period {
            u64::try_from(behind.as_nanos() / self.period.as_nanos()).unwrap_or(u64::MAX)
        } else {
            0
        };
        if missed > 0 {
            self.next += self
                .period
                .saturating_mul(u32::try_from(missed).unwrap_or(u32::MAX));
        }

        // lastRun + period, where lastRun is the scheduled instant just reached.
        self.next += self.period;
        missed
    }
}
