//! Fixed-rate tick source pacing the audit loop.
//!
//! The scheduler yields a lazy sequence of tick events anchored to a grid
//! `t0 + i × P` on the monotone clock. The sleep primitive only guarantees
//! "not before": after waking, the truth is the current monotone time, and
//! the coalesce policy (default) skips any grid slots the loop body burned
//! through instead of firing a catch-up burst.

use crate::clock::Clock;
use crate::error::AuditError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Sleep slice between cancellation checks.
const SLEEP_SLICE_NS: u64 = 25_000_000;

/// Cooperative cancellation token shared between caller, controller and
/// scheduler. Cloning shares the flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Overrun policy: what to do when a tick body outlives its grid slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TickPolicy {
    /// Preserve the grid; late ticks fire back-to-back until caught up.
    Burst,
    /// Skip to the next future deadline, reporting the dropped slots.
    #[default]
    Coalesce,
}

/// One tick event.
#[derive(Debug, Clone, Copy)]
pub struct Tick {
    /// 0-based count of produced ticks, strictly increasing.
    pub tick_id: u64,
    /// Theoretical grid index; may skip ahead under coalesce.
    pub schedule_index: u64,
    pub period_ns: u64,
    pub t0_ns: u64,
    /// `t0 + schedule_index × period`.
    pub deadline_ns: u64,
    /// Actual monotone wake time.
    pub start_ns: u64,
    /// `start - previous start`; 0 for the first tick.
    pub dt_ns: u64,
    /// `max(0, start - deadline)`.
    pub lateness_ns: u64,
    /// Grid slots dropped since the previous produced tick.
    pub skipped_periods: u64,
}

/// Monotone fixed-period tick producer.
#[derive(Debug)]
pub struct Scheduler<C: Clock> {
    clock: Arc<C>,
    cancel: CancelToken,
    policy: TickPolicy,
    period_ns: u64,
    t0_ns: u64,
    prev_index: Option<u64>,
    prev_start_ns: Option<u64>,
    produced: u64,
}

impl<C: Clock> Scheduler<C> {
    /// Anchors `t0` to the clock now; `period_ms` must be finite and
    /// strictly positive.
    pub fn new(
        clock: Arc<C>,
        period_ms: f64,
        policy: TickPolicy,
        cancel: CancelToken,
    ) -> Result<Self, AuditError> {
        if !period_ms.is_finite() || period_ms <= 0.0 {
            return Err(AuditError::InvalidPeriod(period_ms));
        }
        let period_ns = (period_ms * 1e6).round() as u64;
        if period_ns == 0 {
            return Err(AuditError::InvalidPeriod(period_ms));
        }
        let t0_ns = clock.now_ns();
        Ok(Self {
            clock,
            cancel,
            policy,
            period_ns,
            t0_ns,
            prev_index: None,
            prev_start_ns: None,
            produced: 0,
        })
    }

    pub fn t0_ns(&self) -> u64 {
        self.t0_ns
    }

    pub fn period_ns(&self) -> u64 {
        self.period_ns
    }

    /// Produces the next tick, or `None` once cancelled.
    pub fn next_tick(&mut self) -> Option<Tick> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let base = self.prev_index.map_or(0, |i| i + 1);
        let schedule_index = match self.policy {
            TickPolicy::Burst => base,
            TickPolicy::Coalesce => {
                // Skip straight to the next deadline that is now or later;
                // a slot whose deadline is exactly "now" is still usable.
                let elapsed = self.clock.now_ns().saturating_sub(self.t0_ns);
                base.max(elapsed.div_ceil(self.period_ns))
            }
        };
        let deadline_ns = self.t0_ns + schedule_index * self.period_ns;

        loop {
            let now = self.clock.now_ns();
            if now >= deadline_ns {
                break;
            }
            if self.cancel.is_cancelled() {
                return None;
            }
            let remaining = deadline_ns - now;
            self.clock
                .sleep(Duration::from_nanos(remaining.min(SLEEP_SLICE_NS)));
        }
        if self.cancel.is_cancelled() {
            return None;
        }

        let start_ns = self.clock.now_ns();
        let tick = Tick {
            tick_id: self.produced,
            schedule_index,
            period_ns: self.period_ns,
            t0_ns: self.t0_ns,
            deadline_ns,
            start_ns,
            dt_ns: self.prev_start_ns.map_or(0, |p| start_ns.saturating_sub(p)),
            lateness_ns: start_ns.saturating_sub(deadline_ns),
            skipped_periods: schedule_index - base,
        };

        self.produced += 1;
        self.prev_index = Some(schedule_index);
        self.prev_start_ns = Some(start_ns);
        Some(tick)
    }
}

impl<C: Clock> Iterator for Scheduler<C> {
    type Item = Tick;

    fn next(&mut self) -> Option<Tick> {
        self.next_tick()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const MS: u64 = 1_000_000;

    fn scheduler(
        clock: &Arc<ManualClock>,
        period_ms: f64,
        policy: TickPolicy,
    ) -> Scheduler<ManualClock> {
        Scheduler::new(clock.clone(), period_ms, policy, CancelToken::new()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_periods() {
        let clock = Arc::new(ManualClock::new());
        for period in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            let err = Scheduler::new(
                clock.clone(),
                period,
                TickPolicy::Coalesce,
                CancelToken::new(),
            )
            .unwrap_err();
            assert_eq!(err.kind(), "invalid_period");
        }
    }

    #[test]
    fn test_on_grid_ticks() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = scheduler(&clock, 200.0, TickPolicy::Coalesce);

        for i in 0..5u64 {
            let tick = sched.next_tick().unwrap();
            assert_eq!(tick.tick_id, i);
            assert_eq!(tick.schedule_index, i);
            assert_eq!(tick.deadline_ns, i * 200 * MS);
            assert_eq!(tick.start_ns, i * 200 * MS);
            assert_eq!(tick.lateness_ns, 0);
            assert_eq!(tick.skipped_periods, 0);
            assert_eq!(tick.dt_ns, if i == 0 { 0 } else { 200 * MS });
        }
    }

    #[test]
    fn test_coalesce_overrun_exact_grid_landing() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = scheduler(&clock, 200.0, TickPolicy::Coalesce);

        // ticks 0..=10 on grid
        for _ in 0..=10 {
            sched.next_tick().unwrap();
        }
        // the body of tick 10 takes 600 ms, landing exactly on slot 13
        clock.advance(Duration::from_millis(600));

        let tick = sched.next_tick().unwrap();
        assert_eq!(tick.tick_id, 11);
        assert_eq!(tick.schedule_index, 13);
        assert_eq!(tick.skipped_periods, 2);
        assert_eq!(tick.lateness_ns, 0);
        assert_eq!(tick.start_ns, 2600 * MS);
    }

    #[test]
    fn test_coalesce_overrun_mid_slot() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = scheduler(&clock, 200.0, TickPolicy::Coalesce);

        let first = sched.next_tick().unwrap();
        assert_eq!(first.schedule_index, 0);

        // body runs 3.7 periods: slots 1..=3 dropped, resume at slot 4
        clock.advance(Duration::from_millis(740));
        let tick = sched.next_tick().unwrap();

        assert_eq!(tick.tick_id, 1);
        assert_eq!(tick.schedule_index, 4);
        assert_eq!(tick.skipped_periods, 3);
        assert_eq!(tick.deadline_ns, 800 * MS);
        // slept the remaining 60 ms to the slot-4 deadline
        assert_eq!(tick.start_ns, 800 * MS);
        assert_eq!(tick.lateness_ns, 0);
    }

    #[test]
    fn test_burst_policy_fires_back_to_back() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = scheduler(&clock, 200.0, TickPolicy::Burst);

        sched.next_tick().unwrap();
        clock.advance(Duration::from_millis(740));

        // grid preserved: slots 1, 2, 3 fire immediately and late
        let t1 = sched.next_tick().unwrap();
        assert_eq!(t1.schedule_index, 1);
        assert_eq!(t1.skipped_periods, 0);
        assert_eq!(t1.lateness_ns, 540 * MS);

        let t2 = sched.next_tick().unwrap();
        assert_eq!(t2.schedule_index, 2);
        assert_eq!(t2.lateness_ns, 340 * MS);

        let t3 = sched.next_tick().unwrap();
        assert_eq!(t3.schedule_index, 3);
        assert_eq!(t3.lateness_ns, 140 * MS);

        // caught up: slot 4 waits for its deadline
        let t4 = sched.next_tick().unwrap();
        assert_eq!(t4.schedule_index, 4);
        assert_eq!(t4.lateness_ns, 0);
    }

    #[test]
    fn test_ids_monotone_under_load() {
        let clock = Arc::new(ManualClock::new());
        let mut sched = scheduler(&clock, 100.0, TickPolicy::Coalesce);

        let mut last_id = None;
        let mut last_index = None;
        for i in 0..50u64 {
            // alternate between fast and slow bodies
            if i % 3 == 0 {
                clock.advance(Duration::from_millis(350));
            }
            let tick = sched.next_tick().unwrap();
            if let Some(prev) = last_id {
                assert!(tick.tick_id > prev);
            }
            if let Some(prev) = last_index {
                assert!(tick.schedule_index >= prev);
            }
            last_id = Some(tick.tick_id);
            last_index = Some(tick.schedule_index);
        }
    }

    #[test]
    fn test_cancel_before_pull() {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancelToken::new();
        let mut sched =
            Scheduler::new(clock, 200.0, TickPolicy::Coalesce, cancel.clone()).unwrap();

        sched.next_tick().unwrap();
        cancel.cancel();
        assert!(sched.next_tick().is_none());
    }

    #[test]
    fn test_cancel_during_sleep_terminates_promptly() {
        // a clock whose sleep trips the token, simulating a signal landing
        // mid-wait
        struct CancellingClock {
            inner: ManualClock,
            cancel: CancelToken,
        }
        impl Clock for CancellingClock {
            fn now_ns(&self) -> u64 {
                self.inner.now_ns()
            }
            fn sleep(&self, duration: Duration) {
                self.cancel.cancel();
                self.inner.sleep(duration);
            }
        }

        let cancel = CancelToken::new();
        let clock = Arc::new(CancellingClock {
            inner: ManualClock::new(),
            cancel: cancel.clone(),
        });
        let mut sched =
            Scheduler::new(clock, 200.0, TickPolicy::Coalesce, cancel).unwrap();

        // first tick fires at t0 without sleeping; the second sleeps and
        // must observe the cancellation instead of yielding
        assert!(sched.next_tick().is_some());
        assert!(sched.next_tick().is_none());
    }

    #[test]
    fn test_iterator_interface() {
        let clock = Arc::new(ManualClock::new());
        let cancel = CancelToken::new();
        let sched = Scheduler::new(
            clock.clone(),
            50.0,
            TickPolicy::Coalesce,
            cancel.clone(),
        )
        .unwrap();

        let ids: Vec<u64> = sched.take(4).map(|t| t.tick_id).collect();
        assert_eq!(ids, vec![0, 1, 2, 3]);
    }
}
