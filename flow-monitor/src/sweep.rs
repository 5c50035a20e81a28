//! Scheduling of the periodic loss sweep
//!
//! The schedule does not own a timer. The monitor polls it with the current simulation time and
//! runs a sweep whenever one is due.

use std::time::Duration;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SweepState {
    /// No sweep is scheduled (before start and after stop)
    Idle,
    /// A sweep will run once the simulation reaches `next_sweep_at`
    Armed { next_sweep_at: Duration },
}

/// Whether a sweep scheduled exactly at the polled time counts as due
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Boundary {
    Inclusive,
    Exclusive,
}

pub struct SweepSchedule {
    interval: Duration,
    state: SweepState,
}

impl SweepSchedule {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            state: SweepState::Idle,
        }
    }

    pub fn state(&self) -> SweepState {
        self.state
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self, now: Duration) {
        self.state = SweepState::Armed {
            next_sweep_at: now.saturating_add(self.interval),
        };
    }

    pub fn stop(&mut self) {
        self.state = SweepState::Idle;
    }

    /// Returns the time at which a due sweep should run, re-arming the schedule
    ///
    /// When several intervals elapsed since the last poll, only the latest due sweep is returned:
    /// with no events in between, running the earlier ones would not change the outcome.
    pub fn poll_due(&mut self, now: Duration, boundary: Boundary) -> Option<Duration> {
        let SweepState::Armed { next_sweep_at } = self.state else {
            return None;
        };

        let due = match boundary {
            Boundary::Inclusive => next_sweep_at <= now,
            Boundary::Exclusive => next_sweep_at < now,
        };
        if !due {
            return None;
        }

        let interval = self.interval.as_nanos().max(1);
        let elapsed = (now - next_sweep_at).as_nanos();
        let mut skipped = elapsed / interval;
        if boundary == Boundary::Exclusive && skipped > 0 && elapsed % interval == 0 {
            // The boundary that coincides with `now` is not due yet
            skipped -= 1;
        }

        let sweep_at = duration_from_nanos(next_sweep_at.as_nanos() + skipped * interval);
        self.state = SweepState::Armed {
            next_sweep_at: sweep_at.saturating_add(self.interval),
        };

        Some(sweep_at)
    }
}

fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
