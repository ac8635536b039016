//! Retry logic for external process invocations
//!
//! Retries transient process failures (timeouts, interrupted spawns) with
//! exponential backoff. Missing binaries and non-zero exits fail immediately.

use crate::utils::process::{CommandRunner, ProcessError, ProcessOutput, ProcessSpec};
use std::time::{Duration, Instant};

/// Initial backoff delay
const INITIAL_BACKOFF_MS: u64 = 10;

/// Backoff cap
const MAX_BACKOFF_MS: u64 = 1000;

/// Run a process, retrying transient failures up to `max_retries` times.
///
/// **Backoff Strategy:**
/// - Initial delay: 10ms
/// - Max delay: 1000ms
/// - Multiplier: 2.0 (exponential)
pub async fn run_with_retry(
    runner: &dyn CommandRunner,
    spec: &ProcessSpec,
    max_retries: u32,
) -> Result<ProcessOutput, ProcessError> {
    let start_time = Instant::now();
    let program = spec.program_name();
    let mut attempt: u32 = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        if attempt > 1 {
            tracing::debug!(program = %program, attempt, "Retrying process");
        }

        match runner.run(spec).await {
            Ok(output) => {
                if attempt > 1 {
                    tracing::info!(
                        program = %program,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        "Process succeeded after retry"
                    );
                }
                return Ok(output);
            }
            Err(err) => {
                if !err.is_transient() {
                    return Err(err);
                }

                if attempt > max_retries {
                    tracing::error!(
                        program = %program,
                        attempt,
                        elapsed_ms = start_time.elapsed().as_millis() as u64,
                        error = %err,
                        "Process failed: retries exhausted"
                    );
                    return Err(err);
                }

                tracing::warn!(
                    program = %program,
                    attempt,
                    backoff_ms,
                    error = %err,
                    "Transient process failure, backing off"
                );

                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}
