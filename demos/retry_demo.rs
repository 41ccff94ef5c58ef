//! Retry Executor Demo
//!
//! Shows the executor against a flaky service:
//! - Exponential backoff with jitter and a delay cap
//! - Aborting on failures that retrying cannot fix
//! - Asynchronous work and cancellation
//! - Building an executor from configuration
//!
//! Run with: cargo run --example retry_demo

use std::io::{Error, ErrorKind};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use retry_executor::prelude::*;

/// Fails with a timeout `failures` times, then succeeds.
fn flaky_service(failures: u32) -> impl FnMut() -> Result<String, Error> {
    let calls = AtomicU32::new(0);
    move || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(Error::new(ErrorKind::TimedOut, format!("call {} timed out", n + 1)))
        } else {
            Ok(format!("response after {} calls", n + 1))
        }
    }
}

// ==================== Backoff and Jitter ====================

async fn example_backoff(executor: &RetryExecutor<Error>) {
    println!("\n=== Example 1: Exponential Backoff With Jitter ===");

    let executor = executor
        .with_exponential_backoff(50, 2.0)
        .with_proportional_jitter()
        .with_max_delay(400)
        .with_max_retries(5);

    match executor.submit(flaky_service(3)).await {
        Ok(response) => println!("Success: {}", response),
        Err(e) => println!("Failed: {}", e),
    }
}

// ==================== Abort Conditions ====================

async fn example_abort(executor: &RetryExecutor<Error>) {
    println!("\n=== Example 2: Aborting Early ===");

    let executor = executor
        .with_fixed_backoff(50)
        .with_max_retries(10)
        .abort_for(ErrorKind::PermissionDenied);

    let calls = Arc::new(AtomicU32::new(0));
    let result = executor
        .submit({
            let calls = calls.clone();
            move || -> Result<(), Error> {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 => Err(Error::new(ErrorKind::TimedOut, "slow network")),
                    _ => Err(Error::new(ErrorKind::PermissionDenied, "token revoked")),
                }
            }
        })
        .await;

    match result {
        Err(RetryError::Exhausted(exhausted)) => println!(
            "Gave up after {} attempts in {:?}: {}",
            exhausted.attempts, exhausted.total_duration, exhausted.final_error
        ),
        other => println!("Unexpected outcome: {:?}", other),
    }
}

// ==================== Async Work and Cancellation ====================

async fn example_cancel(executor: &RetryExecutor<Error>) {
    println!("\n=== Example 3: Cancelling a Long Retry ===");

    let executor = executor.with_fixed_backoff(200);
    let handle = executor.submit_async(|ctx: &RetryContext<Error>| {
        let attempt = ctx.retry_count() + 1;
        async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Err::<(), _>(Error::new(
                ErrorKind::ConnectionRefused,
                format!("attempt {} refused", attempt),
            ))
        }
    });

    let canceller = handle.canceller();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(500)).await;
        println!("Cancelling...");
        canceller.cancel();
    });

    match handle.await {
        Err(RetryError::Cancelled) => println!("Sequence cancelled"),
        other => println!("Unexpected outcome: {:?}", other),
    }
}

// ==================== Configuration ====================

async fn example_config() {
    println!("\n=== Example 4: Executor From Configuration ===");

    let config = RetryConfig {
        max_retries: Some(4),
        backoff: BackoffConfig::Exponential {
            initial_delay_ms: 10,
            multiplier: 3.0,
        },
        uniform_jitter_ms: Some(5),
        max_delay_ms: Some(100),
        ..RetryConfig::default()
    };
    let executor = RetryExecutor::from_config(TokioScheduler::current(), &config);

    let backoff = config.build_backoff();
    for retry in 1..=4 {
        println!("  retry {} waits ~{}ms", retry, backoff.delay_millis(retry));
    }

    match executor.submit(flaky_service(2)).await {
        Ok(response) => println!("Success: {}", response),
        Err(e) => println!("Failed: {}", e),
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    tracing::info!("Starting retry demo");

    let executor = RetryExecutor::<Error>::new(TokioScheduler::current());

    example_backoff(&executor).await;
    example_abort(&executor).await;
    example_cancel(&executor).await;
    example_config().await;

    println!("\n=== All examples completed ===");
}
