//! Per-provider request throttling.
//!
//! A [`RateGovernor`] enforces a [`RateBudget`]: an optional minimum
//! interval between consecutive requests and an optional quota of
//! requests per fixed window (e.g. 2,500 per day). Callers over budget
//! are suspended until budget is available; nothing is dropped or
//! rejected.
//!
//! The governor's state sits behind an async mutex, so concurrent
//! workers queue on it in FIFO order. One governor exists per provider,
//! which keeps providers from contending with each other.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Maximum number of requests allowed within a fixed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Requests allowed per window. Must be at least 1.
    pub max_requests: u32,
    /// Window length.
    pub window: Duration,
}

impl Quota {
    /// A quota of `max_requests` per 24 hours.
    #[must_use]
    pub const fn per_day(max_requests: u32) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Request budget for one provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RateBudget {
    /// Minimum delay between the starts of two requests.
    pub min_interval: Option<Duration>,
    /// Fixed-window request quota.
    pub quota: Option<Quota>,
}

impl RateBudget {
    /// A budget with no limits at all.
    #[must_use]
    pub const fn unlimited() -> Self {
        Self {
            min_interval: None,
            quota: None,
        }
    }

    /// A budget enforcing only a minimum inter-request interval.
    #[must_use]
    pub const fn interval(min_interval: Duration) -> Self {
        Self {
            min_interval: Some(min_interval),
            quota: None,
        }
    }
}

#[derive(Debug, Default)]
struct GovernorState {
    last_request: Option<Instant>,
    window_start: Option<Instant>,
    window_count: u32,
}

/// Throttles the requests sent to one provider.
#[derive(Debug)]
pub struct RateGovernor {
    name: String,
    budget: RateBudget,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    /// Creates a governor for the provider called `name`.
    #[must_use]
    pub fn new(name: &str, budget: RateBudget) -> Self {
        Self {
            name: name.to_string(),
            budget,
            state: Mutex::new(GovernorState::default()),
        }
    }

    /// The enforced budget.
    #[must_use]
    pub const fn budget(&self) -> RateBudget {
        self.budget
    }

    /// Waits until one more request fits in the budget, then records it.
    ///
    /// The lock is held while sleeping, so waiters are released one at a
    /// time in arrival order.
    pub async fn acquire(&self) {
        let mut state = self.state.lock().await;

        loop {
            let now = Instant::now();

            if let Some(wait) = self.quota_wait(&mut state, now) {
                log::debug!("{}: quota exhausted, waiting {wait:?}", self.name);
                tokio::time::sleep(wait).await;
                continue;
            }

            if let Some(wait) = self.interval_wait(&state, now) {
                log::trace!("{}: rate limiting, waiting {wait:?}", self.name);
                tokio::time::sleep(wait).await;
                continue;
            }

            break;
        }

        state.last_request = Some(Instant::now());
        if self.budget.quota.is_some() {
            state.window_count += 1;
        }
    }

    /// Returns how long to wait for the quota window to roll over, or
    /// `None` when a request is allowed now. Starts a fresh window when
    /// the previous one has expired.
    fn quota_wait(&self, state: &mut GovernorState, now: Instant) -> Option<Duration> {
        let quota = self.budget.quota?;

        match state.window_start {
            Some(start) if now.duration_since(start) < quota.window => {
                if state.window_count >= quota.max_requests.max(1) {
                    Some(quota.window - now.duration_since(start))
                } else {
                    None
                }
            }
            _ => {
                state.window_start = Some(now);
                state.window_count = 0;
                None
            }
        }
    }

    fn interval_wait(&self, state: &GovernorState, now: Instant) -> Option<Duration> {
        let min_interval = self.budget.min_interval?;
        let last = state.last_request?;
        let elapsed = now.duration_since(last);
        (elapsed < min_interval).then(|| min_interval - elapsed)
    }
}
