//! Integration tests for retry functionality.

use super::*;
use crate::kind::{Classify, FailureKind};
use crate::scheduler::{Job, Registration, Scheduler, TokioScheduler};
use crate::testing::RecordingScheduler;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing_test::traced_test;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Transient,
    Timeout,
    Fatal,
}

impl FailureKind for Kind {
    fn parent(self) -> Option<Self> {
        match self {
            Kind::Timeout => Some(Kind::Transient),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Failure(Kind);

impl Classify for Failure {
    type Kind = Kind;

    fn kind(&self) -> Kind {
        self.0
    }
}

fn counter() -> Arc<AtomicU32> {
    Arc::new(AtomicU32::new(0))
}

#[tokio::test(start_paused = true)]
async fn test_succeeds_after_transient_failures() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(10)
        .with_max_retries(5);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 3 {
                    Err("transient failure")
                } else {
                    Ok("success")
                }
            }
        })
        .await;

    assert_eq!(result, Ok("success"));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_after_max_retries() {
    let calls = counter();
    let start = Instant::now();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(100)
        .with_max_retries(3);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(format!("failure {}", n + 1))
            }
        })
        .await;

    let exhausted = match result {
        Err(RetryError::Exhausted(exhausted)) => exhausted,
        other => panic!("Expected exhaustion, got {:?}", other),
    };
    assert_eq!(exhausted.attempts, 4); // 1 initial + 3 retries
    assert_eq!(exhausted.final_error, "failure 4");
    assert_eq!(exhausted.total_duration, Duration::from_millis(300));
    assert_eq!(start.elapsed(), Duration::from_millis(300));
    assert_eq!(calls.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_fixed_backoff_scenario() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let calls = counter();
    let executor = RetryExecutor::new(scheduler.clone())
        .with_fixed_backoff(100)
        .with_max_retries(3);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || match calls.fetch_add(1, Ordering::SeqCst) {
                0 | 1 => Err(Failure(Kind::Transient)),
                _ => Ok(42),
            }
        })
        .await;

    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(
        scheduler.retry_delays(),
        vec![Duration::from_millis(100), Duration::from_millis(100)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_attempt_is_scheduled_without_delay() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone());

    let handle = executor.submit(|| Ok::<_, String>(1));

    assert_eq!(scheduler.delays(), vec![Duration::ZERO]);
    assert!(!handle.is_finished());
    assert_eq!(handle.await, Ok(1));
}

#[tokio::test(start_paused = true)]
async fn test_dont_retry_runs_once() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_max_retries(10)
        .dont_retry();

    let result = executor
        .submit({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("nope")
            }
        })
        .await;

    assert!(result.as_ref().is_err_and(RetryError::is_exhausted));
    assert_eq!(result.unwrap_err().into_failure(), Some("nope"));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_abort_if_short_circuits() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(10)
        .abort_if(|f: &Failure| f.0 == Kind::Fatal);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err::<(), _>(Failure(Kind::Transient)),
                _ => Err(Failure(Kind::Fatal)),
            }
        })
        .await;

    let exhausted = match result {
        Err(RetryError::Exhausted(exhausted)) => exhausted,
        other => panic!("Expected exhaustion, got {:?}", other),
    };
    assert_eq!(exhausted.final_error, Failure(Kind::Fatal));
    assert_eq!(exhausted.attempts, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_abort_for_matches_subkinds() {
    let calls = counter();
    let executor = RetryExecutor::<Failure>::new(TokioScheduler::current())
        .with_max_retries(10)
        .abort_for(Kind::Transient);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure(Kind::Timeout))
            }
        })
        .await;

    assert!(result.is_err_and(|e| e.is_exhausted()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_for_rejects_unlisted_kind() {
    let calls = counter();
    let executor = RetryExecutor::<Failure>::new(TokioScheduler::current())
        .with_max_retries(3)
        .retry_for(Kind::Transient);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure(Kind::Fatal))
            }
        })
        .await;

    assert_eq!(
        result.unwrap_err().into_failure(),
        Some(Failure(Kind::Fatal))
    );
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_for_admits_listed_kind() {
    let calls = counter();
    let executor = RetryExecutor::<Failure>::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(3)
        .retry_for(Kind::Transient);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(Failure(Kind::Timeout)),
                _ => Ok("recovered"),
            }
        })
        .await;

    assert_eq!(result, Ok("recovered"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_delays_increase() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone())
        .with_exponential_backoff(50, 2.0)
        .with_max_retries(4);

    let _ = executor.submit(|| Err::<(), _>("down")).await;

    let delays = scheduler.retry_delays();
    assert_eq!(
        delays,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(800)
        ]
    );
    assert!(delays.windows(2).all(|pair| pair[0] < pair[1]));
}

#[tokio::test(start_paused = true)]
async fn test_fixed_delay_mode_keeps_spacing_constant() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone())
        .with_exponential_backoff(50, 2.0)
        .with_fixed_delay(true)
        .with_max_retries(3);

    let _ = executor.submit(|| Err::<(), _>("down")).await;

    assert_eq!(scheduler.retry_delays(), vec![Duration::from_millis(100); 3]);
}

#[tokio::test(start_paused = true)]
async fn test_uniform_jitter_stays_in_range() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone())
        .with_fixed_backoff(200)
        .with_random_source(SeededRandom::new(99))
        .with_uniform_jitter_range(50)
        .with_max_retries(20);

    let _ = executor.submit(|| Err::<(), _>("down")).await;

    let delays = scheduler.retry_delays();
    assert_eq!(delays.len(), 20);
    for delay in delays {
        assert!(
            (150..=250).contains(&delay.as_millis()),
            "delay {:?} outside jitter range",
            delay
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_first_retry_no_delay() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone())
        .with_fixed_backoff(30)
        .with_first_retry_no_delay()
        .with_max_retries(2);

    let _ = executor.submit(|| Err::<(), _>("down")).await;

    assert_eq!(
        scheduler.retry_delays(),
        vec![Duration::ZERO, Duration::from_millis(30)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_first_retry_no_delay_in_fixed_delay_mode() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current());
    let executor = RetryExecutor::new(scheduler.clone())
        .with_fixed_backoff(30)
        .with_first_retry_no_delay()
        .with_fixed_delay(true)
        .with_max_retries(3);

    let result = executor.submit(|| Err::<(), _>("down")).await;

    assert!(result.is_err_and(|e| e.is_exhausted()));
    // every retry is evaluated as the first one
    assert_eq!(scheduler.retry_delays(), vec![Duration::ZERO; 3]);
}

#[tokio::test(start_paused = true)]
async fn test_context_tracks_retries_and_last_failure() {
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(5);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let result = executor
        .submit_with_context({
            let seen = seen.clone();
            move |ctx: &mut RetryContext<String>| {
                seen.lock()
                    .unwrap()
                    .push((ctx.retry_count(), ctx.last_failure().cloned()));
                if ctx.retry_count() < 2 {
                    Err(format!("fail {}", ctx.retry_count()))
                } else {
                    Ok(ctx.retry_count())
                }
            }
        })
        .await;

    assert_eq!(result, Ok(2));
    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (0, None),
            (1, Some("fail 0".to_string())),
            (2, Some("fail 1".to_string())),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_user_context_survives_retries() {
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(3);

    let result = executor
        .submit_with_user_context(10u32, |ctx: &mut RetryContext<&'static str>| {
            let budget = ctx.user_context::<u32>().copied().unwrap_or_default();
            if ctx.is_first_attempt() {
                ctx.set_user_context(budget * 2);
                Err("warming up")
            } else {
                Ok(budget)
            }
        })
        .await;

    assert_eq!(result, Ok(20));
}

#[tokio::test(start_paused = true)]
async fn test_submit_void() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(2);

    let result = executor
        .submit_void({
            let calls = calls.clone();
            move |ctx: &mut RetryContext<&'static str>| {
                calls.fetch_add(1, Ordering::SeqCst);
                if ctx.is_first_attempt() {
                    Err("once")
                } else {
                    Ok(())
                }
            }
        })
        .await;

    assert_eq!(result, Ok(()));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_submit_async_awaits_each_attempt() {
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(10)
        .with_max_retries(3);
    let start = Instant::now();

    let result = executor
        .submit_async(|ctx: &RetryContext<String>| {
            let retry = ctx.retry_count();
            async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                if retry < 2 {
                    Err(format!("attempt {} failed", retry + 1))
                } else {
                    Ok(retry * 10)
                }
            }
        })
        .await;

    assert_eq!(result, Ok(20));
    // three 5ms attempts and two 10ms pauses
    assert_eq!(start.elapsed(), Duration::from_millis(35));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_retry_prevents_invocation() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1_000)
        .with_max_retries(5);

    let handle = executor.submit({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>("down")
        }
    });

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handle.cancel());
    assert!(!handle.cancel());
    assert!(handle.is_finished());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(handle.await, Err(RetryError::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_first_attempt() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current());

    let handle = executor.submit({
        let calls = calls.clone();
        move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, String>(())
        }
    });
    handle.cancel();

    assert_eq!(handle.await, Err(RetryError::Cancelled));
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_while_running_discards_result() {
    let calls = counter();
    let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
    let started_tx = Arc::new(std::sync::Mutex::new(Some(started_tx)));
    let release = Arc::new(tokio::sync::Notify::new());
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(5);

    let handle = executor.submit_async({
        let calls = calls.clone();
        let release = release.clone();
        move |_: &RetryContext<String>| {
            calls.fetch_add(1, Ordering::SeqCst);
            let started = started_tx.lock().unwrap().take();
            let release = release.clone();
            async move {
                if let Some(started) = started {
                    let _ = started.send(());
                }
                release.notified().await;
                Err::<u32, _>("late failure".to_string())
            }
        }
    });

    started_rx.await.unwrap();
    let canceller = handle.canceller();
    assert!(canceller.cancel());
    release.notify_one();

    assert_eq!(handle.await, Err(RetryError::Cancelled));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_canceller_from_another_task() {
    let executor = RetryExecutor::new(TokioScheduler::current()).with_fixed_backoff(100);
    let handle = executor.submit(|| Err::<(), _>("down"));
    let canceller = handle.canceller();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(250)).await;
        canceller.cancel();
    });

    assert!(handle.await.is_err_and(|e| e.is_cancelled()));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_after_completion_is_noop() {
    let executor = RetryExecutor::new(TokioScheduler::current());
    let handle = executor.submit(|| Ok::<_, String>(7));
    let canceller = handle.canceller();

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(handle.is_finished());
    assert!(!canceller.cancel());
    assert_eq!(handle.await, Ok(7));
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_shutdown_fails_sequence() {
    let scheduler = TokioScheduler::current();
    let executor = RetryExecutor::new(scheduler.clone()).with_fixed_backoff(10);

    let result = executor
        .submit(move || {
            scheduler.shutdown();
            Err::<(), _>("down")
        })
        .await;

    assert_eq!(
        result,
        Err(RetryError::Scheduler {
            error: ScheduleError::Shutdown,
            last_failure: Some("down"),
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_scheduler_rejection_on_first_attempt() {
    let scheduler = RecordingScheduler::new(TokioScheduler::current()).reject_after(0);
    let executor = RetryExecutor::new(scheduler);

    let result = executor.submit(|| Ok::<_, String>(1)).await;

    assert!(matches!(
        result,
        Err(RetryError::Scheduler {
            error: ScheduleError::Rejected(_),
            last_failure: None,
        })
    ));
}

#[derive(Debug)]
struct NoopRegistration;

impl Registration for NoopRegistration {
    fn cancel(&self) {}
}

/// Accepts jobs and holds them without running; `discard` drops them.
#[derive(Default)]
struct ParkingScheduler {
    jobs: Mutex<Vec<Job>>,
    run_first: Option<TokioScheduler>,
    calls: AtomicU32,
}

impl ParkingScheduler {
    fn running_first(inner: TokioScheduler) -> Self {
        Self {
            run_first: Some(inner),
            ..Self::default()
        }
    }

    fn discard(&self) {
        self.jobs.lock().unwrap().clear();
    }
}

impl fmt::Debug for ParkingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkingScheduler")
            .field("parked", &self.jobs.lock().unwrap().len())
            .finish()
    }
}

impl Scheduler for ParkingScheduler {
    fn schedule(&self, delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Some(inner) = &self.run_first {
                return inner.schedule(delay, job);
            }
        }
        self.jobs.lock().unwrap().push(job);
        Ok(Box::new(NoopRegistration))
    }
}

/// Accepts every job and drops it on the spot.
#[derive(Debug)]
struct DroppingScheduler;

impl Scheduler for DroppingScheduler {
    fn schedule(&self, _delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        drop(job);
        Ok(Box::new(NoopRegistration))
    }
}

#[test]
fn test_job_dropped_during_registration() {
    let executor = RetryExecutor::new(DroppingScheduler);

    let handle = executor.submit(|| Ok::<_, String>(1));

    assert!(handle.is_finished());
    assert_eq!(
        futures::executor::block_on(handle),
        Err(RetryError::Scheduler {
            error: ScheduleError::Dropped,
            last_failure: None,
        })
    );
}

#[test]
fn test_job_dropped_after_registration() {
    let scheduler = Arc::new(ParkingScheduler::default());
    let executor = RetryExecutor::new(scheduler.clone());

    let handle = executor.submit(|| Ok::<_, String>(1));
    assert!(!handle.is_finished());

    scheduler.discard();

    assert_eq!(
        futures::executor::block_on(handle),
        Err(RetryError::Scheduler {
            error: ScheduleError::Dropped,
            last_failure: None,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_dropped_retry_keeps_last_failure() {
    let scheduler = Arc::new(ParkingScheduler::running_first(TokioScheduler::current()));
    let executor = RetryExecutor::new(scheduler.clone()).with_fixed_backoff(10);

    let handle = executor.submit(|| Err::<(), _>("down"));
    while scheduler.calls.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }
    scheduler.discard();

    assert_eq!(
        handle.await,
        Err(RetryError::Scheduler {
            error: ScheduleError::Dropped,
            last_failure: Some("down"),
        })
    );
}

#[test]
fn test_cancel_after_drop_is_noop() {
    let scheduler = Arc::new(ParkingScheduler::default());
    let executor = RetryExecutor::new(scheduler.clone());

    let handle = executor.submit(|| Ok::<_, String>(1));
    scheduler.discard();

    assert!(handle.is_finished());
    assert!(!handle.cancel());
}

/// Runs the first job on its own thread while the first registration is
/// still in progress, then refuses the retry that job asks for.
#[derive(Debug)]
struct OverlappingScheduler {
    calls: AtomicU32,
    retry_requested: Barrier,
    release: Arc<Barrier>,
}

impl Scheduler for OverlappingScheduler {
    fn schedule(&self, _delay: Duration, job: Job) -> Result<Box<dyn Registration>, ScheduleError> {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            std::thread::spawn(move || futures::executor::block_on(job));
            // return only once the retry registration has begun
            self.retry_requested.wait();
            Ok(Box::new(NoopRegistration))
        } else {
            self.retry_requested.wait();
            self.release.wait();
            Err(ScheduleError::Shutdown)
        }
    }
}

#[test]
fn test_retry_registered_during_first_registration_reports_its_error() {
    let release = Arc::new(Barrier::new(2));
    let scheduler = Arc::new(OverlappingScheduler {
        calls: AtomicU32::new(0),
        retry_requested: Barrier::new(2),
        release: release.clone(),
    });
    let executor = RetryExecutor::new(scheduler.clone()).with_fixed_backoff(10);

    let handle = executor.submit(|| Err::<(), _>("down"));
    release.wait();

    assert_eq!(
        futures::executor::block_on(handle),
        Err(RetryError::Scheduler {
            error: ScheduleError::Shutdown,
            last_failure: Some("down"),
        })
    );
    assert_eq!(scheduler.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_panicking_work_resolves_handle() {
    let calls = counter();
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(5);

    let result = executor
        .submit({
            let calls = calls.clone();
            move || -> Result<(), String> {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err("first".to_string())
                } else {
                    panic!("kaboom")
                }
            }
        })
        .await;

    assert_eq!(
        result,
        Err(RetryError::Panicked {
            message: "kaboom".to_string(),
            attempts: 2,
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_executor_shared_between_submissions() {
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(5)
        .with_max_retries(2);

    let handles: Vec<_> = (0..8u32)
        .map(|i| {
            let calls = counter();
            executor.submit(move || {
                if calls.fetch_add(1, Ordering::SeqCst) < i % 3 {
                    Err(i)
                } else {
                    Ok(i)
                }
            })
        })
        .collect();

    let results = futures::future::join_all(handles).await;
    assert_eq!(results, (0..8u32).map(Ok).collect::<Vec<_>>());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn test_retries_are_logged() {
    let executor = RetryExecutor::new(TokioScheduler::current())
        .with_fixed_backoff(1)
        .with_max_retries(1);

    let _ = executor.submit(|| Err::<(), _>("down")).await;

    assert!(logs_contain("attempt failed, retrying"));
    assert!(logs_contain("attempt failed, not retrying"));
}
