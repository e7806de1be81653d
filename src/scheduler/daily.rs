//! Fixed-clock daily maintenance.
//!
//! # Responsibilities
//! - Sleep until 01:00 UTC of the next day, then run maintenance
//! - Never overlap runs: the next wait is planned after a run returns
//! - Collapse ticks missed during a long run into a single deferred run
//! - Survive failing or panicking maintenance
//!
//! The target is anchored to the current day's midnight plus 25 hours rather
//! than "now + 24h", so a loop that wakes late does not drift.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use tokio::task::JoinHandle;

use crate::lifecycle::ShutdownListener;
use crate::observability::metrics;
use crate::scheduler::clock::{Clock, SystemClock};

/// The operation run once per UTC day.
#[async_trait]
pub trait Maintenance: Send + Sync + 'static {
    async fn run(&self) -> anyhow::Result<()>;
}

/// 01:00 UTC of the day after `now`'s calendar day.
pub fn next_run_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let midnight = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    midnight + Duration::hours(25)
}

/// The most recent 01:00 UTC tick at or before `now`.
fn latest_tick(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = next_run_after(now) - Duration::hours(24);
    if today <= now {
        today
    } else {
        today - Duration::hours(24)
    }
}

/// What the scheduler does after planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NextRun {
    /// A tick passed while the previous run was executing; run now on its behalf.
    Immediately(DateTime<Utc>),
    /// Sleep until the given instant.
    At(DateTime<Utc>),
}

/// Plan the next run given the tick that was served last.
pub fn plan_next(now: DateTime<Utc>, last_tick: Option<DateTime<Utc>>) -> NextRun {
    if let Some(last) = last_tick {
        if last + Duration::hours(24) <= now {
            return NextRun::Immediately(latest_tick(now));
        }
    }
    NextRun::At(next_run_after(now))
}

/// Background task running [`Maintenance`] at 01:00 UTC every day.
pub struct DailyScheduler<C = SystemClock> {
    maintenance: Arc<dyn Maintenance>,
    clock: C,
    run_on_start: bool,
}

impl DailyScheduler<SystemClock> {
    pub fn new(maintenance: Arc<dyn Maintenance>) -> Self {
        Self {
            maintenance,
            clock: SystemClock,
            run_on_start: false,
        }
    }
}

impl<C: Clock> DailyScheduler<C> {
    /// Replace the time source.
    pub fn with_clock<C2: Clock>(self, clock: C2) -> DailyScheduler<C2> {
        DailyScheduler {
            maintenance: self.maintenance,
            clock,
            run_on_start: self.run_on_start,
        }
    }

    /// Run maintenance once before the first wait.
    pub fn run_on_start(mut self, enabled: bool) -> Self {
        self.run_on_start = enabled;
        self
    }

    /// Spawn the scheduler loop onto the runtime.
    pub fn spawn(self, shutdown: ShutdownListener) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Run until `shutdown` fires. A maintenance run in progress is allowed to
    /// finish, but no further run starts once shutdown was requested.
    pub async fn run(self, mut shutdown: ShutdownListener) {
        tracing::info!(run_on_start = self.run_on_start, "Daily scheduler starting");

        if self.run_on_start {
            self.run_once().await;
        }

        let mut last_tick = None;
        loop {
            let now = self.clock.now();
            let tick = match plan_next(now, last_tick) {
                NextRun::Immediately(tick) => {
                    if shutdown.is_triggered() {
                        tracing::info!(missed_tick = %tick, "Shutdown requested, skipping deferred maintenance");
                        return;
                    }
                    tracing::warn!(
                        missed_tick = %tick,
                        "Previous maintenance outlasted a daily tick, running deferred maintenance now"
                    );
                    tick
                }
                NextRun::At(target) => {
                    let wait = (target - now).to_std().unwrap_or_default();
                    tracing::info!(
                        target = %target,
                        wait_secs = wait.as_secs(),
                        "Waiting to run daily maintenance"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        () = shutdown.triggered() => {
                            tracing::info!("Daily scheduler received shutdown signal, exiting loop");
                            return;
                        }
                    }
                    target
                }
            };

            self.run_once().await;
            last_tick = Some(tick);
        }
    }

    /// One maintenance run in its own task so a panic cannot end the loop.
    async fn run_once(&self) {
        let maintenance = Arc::clone(&self.maintenance);
        let started = Instant::now();
        tracing::info!(at = %self.clock.now(), "Executing daily maintenance");

        match tokio::spawn(async move { maintenance.run().await }).await {
            Ok(Ok(())) => {
                metrics::record_maintenance("ok");
                tracing::info!(elapsed_ms = started.elapsed().as_millis() as u64, "Daily maintenance finished");
            }
            Ok(Err(e)) => {
                metrics::record_maintenance("error");
                tracing::error!(error = %e, "Daily maintenance failed");
            }
            Err(e) => {
                metrics::record_maintenance("panic");
                tracing::error!(error = %e, "Daily maintenance task aborted");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::lifecycle::Shutdown;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    /// Wall clock that follows tokio's (pausable) clock from a fixed origin.
    struct VirtualClock {
        origin: DateTime<Utc>,
        started: tokio::time::Instant,
    }

    impl VirtualClock {
        fn new(origin: DateTime<Utc>) -> Self {
            Self {
                origin,
                started: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for VirtualClock {
        fn now(&self) -> DateTime<Utc> {
            self.origin + Duration::from_std(self.started.elapsed()).unwrap()
        }
    }

    /// Records when it ran; the first run optionally takes `first_run` long.
    struct Recorder {
        clock: Arc<VirtualClock>,
        runs: Mutex<Vec<DateTime<Utc>>>,
        first_run: std::time::Duration,
    }

    #[async_trait]
    impl Maintenance for Recorder {
        async fn run(&self) -> anyhow::Result<()> {
            let first = {
                let mut runs = self.runs.lock();
                runs.push(self.clock.now());
                runs.len() == 1
            };
            if first {
                tokio::time::sleep(self.first_run).await;
            }
            Ok(())
        }
    }

    fn assert_close(actual: DateTime<Utc>, expected: DateTime<Utc>) {
        assert!(
            (actual - expected).num_seconds().abs() <= 1,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_target_is_next_day_one_am() {
        let cases = [
            utc(2024, 3, 10, 0, 0, 0),
            utc(2024, 3, 10, 0, 30, 0),
            utc(2024, 3, 10, 1, 0, 0),
            utc(2024, 3, 10, 13, 45, 12),
            utc(2024, 3, 10, 23, 59, 59),
        ];
        for now in cases {
            let target = next_run_after(now);
            assert_eq!(target, utc(2024, 3, 11, 1, 0, 0), "now = {now}");
            assert!(target > now);
            assert!(target <= now + Duration::hours(25));
        }
    }

    #[test]
    fn test_target_crosses_month_and_year() {
        assert_eq!(
            next_run_after(utc(2023, 12, 31, 18, 0, 0)),
            utc(2024, 1, 1, 1, 0, 0)
        );
        assert_eq!(
            next_run_after(utc(2024, 2, 28, 9, 0, 0)),
            utc(2024, 2, 29, 1, 0, 0)
        );
    }

    #[test]
    fn test_plan_after_normal_run_waits_for_next_tick() {
        let last = utc(2024, 5, 2, 1, 0, 0);
        let now = utc(2024, 5, 2, 1, 5, 0);
        assert_eq!(
            plan_next(now, Some(last)),
            NextRun::At(utc(2024, 5, 3, 1, 0, 0))
        );
    }

    #[test]
    fn test_plan_collapses_missed_ticks() {
        let last = utc(2024, 5, 2, 1, 0, 0);
        // Run lasted more than two days: two ticks missed, one deferred run.
        let now = utc(2024, 5, 4, 7, 0, 0);
        assert_eq!(
            plan_next(now, Some(last)),
            NextRun::Immediately(utc(2024, 5, 4, 1, 0, 0))
        );
        // Having served that tick, the cadence resumes.
        assert_eq!(
            plan_next(now, Some(utc(2024, 5, 4, 1, 0, 0))),
            NextRun::At(utc(2024, 5, 5, 1, 0, 0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_daily_at_one_am() {
        let clock = Arc::new(VirtualClock::new(utc(2024, 5, 1, 10, 0, 0)));
        let recorder = Arc::new(Recorder {
            clock: Arc::clone(&clock),
            runs: Mutex::new(Vec::new()),
            first_run: std::time::Duration::ZERO,
        });
        let shutdown = Shutdown::new();
        let handle = DailyScheduler::new(recorder.clone())
            .with_clock(Arc::clone(&clock))
            .spawn(shutdown.listener());

        tokio::time::sleep(std::time::Duration::from_secs(3 * 86_400)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let runs = recorder.runs.lock().clone();
        assert_eq!(runs.len(), 3, "{runs:?}");
        assert_close(runs[0], utc(2024, 5, 2, 1, 0, 0));
        assert_close(runs[1], utc(2024, 5, 3, 1, 0, 0));
        assert_close(runs[2], utc(2024, 5, 4, 1, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_on_start_runs_immediately() {
        let clock = Arc::new(VirtualClock::new(utc(2024, 5, 1, 10, 0, 0)));
        let recorder = Arc::new(Recorder {
            clock: Arc::clone(&clock),
            runs: Mutex::new(Vec::new()),
            first_run: std::time::Duration::ZERO,
        });
        let shutdown = Shutdown::new();
        let handle = DailyScheduler::new(recorder.clone())
            .with_clock(Arc::clone(&clock))
            .run_on_start(true)
            .spawn(shutdown.listener());

        tokio::time::sleep(std::time::Duration::from_secs(20 * 3600)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let runs = recorder.runs.lock().clone();
        assert_eq!(runs.len(), 2, "{runs:?}");
        assert_close(runs[0], utc(2024, 5, 1, 10, 0, 0));
        assert_close(runs[1], utc(2024, 5, 2, 1, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_run_defers_exactly_one_run() {
        let clock = Arc::new(VirtualClock::new(utc(2024, 5, 1, 10, 0, 0)));
        let recorder = Arc::new(Recorder {
            clock: Arc::clone(&clock),
            runs: Mutex::new(Vec::new()),
            first_run: std::time::Duration::from_secs(26 * 3600),
        });
        let shutdown = Shutdown::new();
        let handle = DailyScheduler::new(recorder.clone())
            .with_clock(Arc::clone(&clock))
            .spawn(shutdown.listener());

        // First run 05-02 01:00 until 05-03 03:00, missing the 05-03 tick.
        tokio::time::sleep(std::time::Duration::from_secs(3 * 86_400)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let runs = recorder.runs.lock().clone();
        assert_eq!(runs.len(), 3, "{runs:?}");
        assert_close(runs[0], utc(2024, 5, 2, 1, 0, 0));
        assert_close(runs[1], utc(2024, 5, 3, 3, 0, 0));
        assert_close(runs[2], utc(2024, 5, 4, 1, 0, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_deferred_run_after_shutdown() {
        let clock = Arc::new(VirtualClock::new(utc(2024, 5, 1, 10, 0, 0)));
        let recorder = Arc::new(Recorder {
            clock: Arc::clone(&clock),
            runs: Mutex::new(Vec::new()),
            first_run: std::time::Duration::from_secs(26 * 3600),
        });
        let shutdown = Shutdown::new();
        let handle = DailyScheduler::new(recorder.clone())
            .with_clock(Arc::clone(&clock))
            .spawn(shutdown.listener());

        // Shutdown arrives in the middle of the first (05-02 01:00) run, which
        // then outlasts the 05-03 tick.
        tokio::time::sleep(std::time::Duration::from_secs(20 * 3600)).await;
        shutdown.trigger();
        handle.await.unwrap();

        let runs = recorder.runs.lock().clone();
        assert_eq!(runs.len(), 1, "{runs:?}");
        assert_close(runs[0], utc(2024, 5, 2, 1, 0, 0));
        assert!(clock.now() >= utc(2024, 5, 3, 3, 0, 0));
    }

    struct Flaky {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Maintenance for Flaky {
        async fn run(&self) -> anyhow::Result<()> {
            match self.calls.fetch_add(1, Ordering::SeqCst) {
                0 => anyhow::bail!("index build failed"),
                1 => panic!("index build panicked"),
                _ => Ok(()),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_the_loop() {
        let flaky = Arc::new(Flaky {
            calls: AtomicU32::new(0),
        });
        let shutdown = Shutdown::new();
        let handle = DailyScheduler::new(flaky.clone())
            .with_clock(VirtualClock::new(utc(2024, 5, 1, 10, 0, 0)))
            .run_on_start(true)
            .spawn(shutdown.listener());

        tokio::time::sleep(std::time::Duration::from_secs(2 * 86_400)).await;
        shutdown.trigger();
        handle.await.unwrap();

        assert_eq!(flaky.calls.load(Ordering::SeqCst), 3);
    }
}
