//! Cancellable fixed-cadence ticker driven by the bus clock

/// Progress cadence in seconds of bus time
pub const PROGRESS_INTERVAL: f64 = 0.020;

/// Cooperative periodic task; `poll` is called from the control loop
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressTicker {
    interval: f64,
    next_due: Option<f64>,
}

impl Default for ProgressTicker {
    fn default() -> Self {
        Self::new(PROGRESS_INTERVAL)
    }
}

impl ProgressTicker {
    pub fn new(interval: f64) -> Self {
        Self {
            interval,
            next_due: None,
        }
    }

    pub fn interval(&self) -> f64 {
        self.interval
    }

    /// (Re)start; the first tick is due one interval after `now`
    pub fn start(&mut self, now: f64) {
        self.next_due = Some(now + self.interval);
    }

    pub fn cancel(&mut self) {
        self.next_due = None;
    }

    pub fn is_active(&self) -> bool {
        self.next_due.is_some()
    }

    /// Whether a tick is due at `now`. Missed ticks collapse into one,
    /// and the schedule stays aligned to its start time.
    pub fn poll(&mut self, now: f64) -> bool {
        let Some(due) = self.next_due else {
            return false;
        };
        if now < due {
            return false;
        }
        let missed = ((now - due) / self.interval).floor() + 1.0;
        self.next_due = Some(due + missed * self.interval);
        true
    }
}
