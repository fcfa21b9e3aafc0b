use std::{future::Future, time::Duration};

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::{ApiError, SnapshotRecord, SnapshotStatus};

/// How often to emit the "still waiting" progress note, in checks.
const LONG_RUNNING_LOG_EVERY: u32 = 10;

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
    /// Hard execution deadline from the trigger context. Crossing it is
    /// reported as a timeout so the caller can run compensating cleanup
    /// instead of being killed mid-flight.
    pub deadline: Option<Instant>,
}

#[derive(Debug)]
pub enum PollError {
    Timeout { waited: Duration },
    ServiceFailed { status: SnapshotStatus },
    Api(ApiError),
}

impl std::fmt::Display for PollError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout { waited } => {
                write!(f, "status poll timed out after {:.1}s", waited.as_secs_f64())
            }
            Self::ServiceFailed { status } => {
                write!(f, "service reported terminal status '{status}'")
            }
            Self::Api(err) => write!(f, "status fetch failed: {err}"),
        }
    }
}

impl std::error::Error for PollError {}

/// Repeatedly fetch a snapshot record until `is_success` matches, `is_failure`
/// matches, or `cfg.max_wait` elapses. A `NotFound` from the fetch is an
/// expected visibility lag and is retried; any other fetch error escalates
/// immediately. Statuses matching neither predicate count as still in
/// progress. Total wall-clock time never exceeds max_wait by more than one
/// interval.
pub async fn poll_until<F, Fut>(
    what: &'static str,
    fetch: F,
    is_success: impl Fn(&SnapshotStatus) -> bool,
    is_failure: impl Fn(&SnapshotStatus) -> bool,
    cfg: PollConfig,
) -> Result<SnapshotRecord, PollError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<SnapshotRecord, ApiError>>,
{
    let started = Instant::now();
    let mut checks: u32 = 0;

    loop {
        let deadline_hit = cfg.deadline.is_some_and(|d| Instant::now() >= d);
        if started.elapsed() >= cfg.max_wait || deadline_hit {
            let waited = started.elapsed();
            warn!(what, waited_secs = %format!("{:.1}", waited.as_secs_f64()), "poll timed out");
            return Err(PollError::Timeout { waited });
        }

        match fetch().await {
            Ok(record) => {
                checks += 1;
                let elapsed = started.elapsed().as_secs_f64();

                if is_success(&record.status) {
                    info!(
                        what,
                        checks,
                        elapsed_secs = %format!("{elapsed:.1}"),
                        status = %record.status,
                        "poll resolved"
                    );
                    return Ok(record);
                }
                if is_failure(&record.status) {
                    warn!(what, checks, status = %record.status, "poll hit terminal failure status");
                    return Err(PollError::ServiceFailed {
                        status: record.status,
                    });
                }

                debug!(
                    what,
                    check = checks,
                    status = %record.status,
                    progress_percent = record.progress_percent,
                    elapsed_secs = %format!("{elapsed:.1}"),
                    "still in progress"
                );
                if checks % LONG_RUNNING_LOG_EVERY == 0 {
                    info!(
                        what,
                        checks,
                        status = %record.status,
                        elapsed_secs = %format!("{elapsed:.1}"),
                        "long-running operation, still waiting"
                    );
                }
            }
            Err(ApiError::NotFound) => {
                // Visibility lag right after create; keep waiting.
                warn!(what, "snapshot not yet visible, continuing to wait");
            }
            Err(err) => return Err(PollError::Api(err)),
        }

        let sleep_for = match cfg.deadline {
            Some(d) => cfg.interval.min(d.saturating_duration_since(Instant::now())),
            None => cfg.interval,
        };
        tokio::time::sleep(sleep_for).await;
    }
}
