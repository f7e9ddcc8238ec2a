//! Cooperative yielding for long traversals.
//!
//! Loading runs on a single thread; the traversal stays responsive by
//! suspending itself when a time budget runs out, not by spreading work
//! across workers. The clock is injectable so the throttle can be tested
//! without wall-clock timing.

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Default time budget between two yields.
pub const DEFAULT_YIELD_INTERVAL: Duration = Duration::from_millis(100);

/// Monotonic time source.
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin.
    fn now(&self) -> Duration;
}

/// Clock backed by `std::time::Instant`.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Future that returns `Pending` exactly once, waking itself so the executor
/// polls it again on its next tick.
#[derive(Debug, Default)]
pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            return Poll::Ready(());
        }
        self.yielded = true;
        cx.waker().wake_by_ref();
        Poll::Pending
    }
}

/// Suspend the current task once.
pub fn yield_now() -> YieldNow {
    YieldNow::default()
}

/// Time-based yield throttle.
///
/// [`checkpoint`](Self::checkpoint) is called once per unit of work and only
/// suspends when at least `interval` has passed since the last suspension.
pub struct YieldThrottle {
    clock: Rc<dyn Clock>,
    interval: Duration,
    last_yield: Cell<Duration>,
    yields: Cell<usize>,
}

impl YieldThrottle {
    /// Create a throttle on the system clock.
    pub fn new(interval: Duration) -> Self {
        Self::with_clock(interval, Rc::new(SystemClock::new()))
    }

    /// Create a throttle on a custom clock.
    pub fn with_clock(interval: Duration, clock: Rc<dyn Clock>) -> Self {
        let last_yield = Cell::new(clock.now());
        Self {
            clock,
            interval,
            last_yield,
            yields: Cell::new(0),
        }
    }

    /// Configured time budget.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Number of times the throttle has suspended.
    pub fn yield_count(&self) -> usize {
        self.yields.get()
    }

    /// Suspend once if the time budget is used up.
    pub async fn checkpoint(&self) {
        let now = self.clock.now();
        if now.saturating_sub(self.last_yield.get()) >= self.interval {
            self.last_yield.set(now);
            self.yields.set(self.yields.get() + 1);
            yield_now().await;
        }
    }
}

impl Default for YieldThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_YIELD_INTERVAL)
    }
}

/// Manually advanced clock for deterministic tests.
#[cfg(test)]
#[derive(Default)]
pub(crate) struct ManualClock {
    now: Cell<Duration>,
    /// Added to the time after every read
    step: Cell<Duration>,
}

#[cfg(test)]
impl ManualClock {
    pub(crate) fn ticking(step: Duration) -> Self {
        let clock = Self::default();
        clock.step.set(step);
        clock
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

#[cfg(test)]
impl Clock for ManualClock {
    fn now(&self) -> Duration {
        let now = self.now.get();
        self.now.set(now + self.step.get());
        now
    }
}
