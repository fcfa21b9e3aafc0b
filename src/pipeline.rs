use std::{sync::Arc, time::Duration};

use chrono::Utc;
use serde::{Serialize, Serializer, ser::SerializeMap};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::{
    api::{ApiError, SnapshotApi, SnapshotStatus},
    cleanup,
    config::Settings,
    export,
    id::new_ulid_string,
    naming,
    poller::{self, PollConfig, PollError},
};

pub const STEP_SNAPSHOT_CREATION: &str = "snapshot_creation";
pub const STEP_SNAPSHOT_WAIT: &str = "snapshot_wait";
pub const STEP_S3_EXPORT: &str = "s3_export";
pub const STEP_EXPORT_WAIT: &str = "export_wait";
pub const STEP_CLEANUP: &str = "cleanup";
pub const STEP_CLEANUP_ON_ERROR: &str = "cleanup_on_error";

/// Per-invocation context from the trigger: a correlation id and an
/// optional hard deadline from the execution environment.
#[derive(Debug, Clone)]
pub struct TriggerContext {
    pub run_id: String,
    pub deadline: Option<Instant>,
}

impl TriggerContext {
    pub fn new() -> Self {
        Self {
            run_id: new_ulid_string(),
            deadline: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            run_id: new_ulid_string(),
            deadline: Some(deadline),
        }
    }
}

impl Default for TriggerContext {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BackupStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorCategory {
    Timeout,
    ServiceFailed,
    ConfigurationError,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "Timeout"),
            Self::ServiceFailed => write!(f, "ServiceFailed"),
            Self::ConfigurationError => write!(f, "ConfigurationError"),
        }
    }
}

/// Append-only phase-name to elapsed-seconds map, recorded whether a
/// phase succeeds or fails so timing analysis works post-mortem too.
#[derive(Debug, Clone, Default)]
pub struct StepTimings {
    entries: Vec<(&'static str, f64)>,
}

impl StepTimings {
    fn record(&mut self, step: &'static str, elapsed: Duration) {
        self.entries.push((step, round2(elapsed.as_secs_f64())));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, step: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(name, _)| *name == step)
            .map(|(_, secs)| *secs)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, f64)> + '_ {
        self.entries.iter().copied()
    }
}

impl Serialize for StepTimings {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (step, secs) in &self.entries {
            map.serialize_entry(step, secs)?;
        }
        map.end()
    }
}

/// The structured record every invocation returns; the entry point never
/// fails past its own boundary.
#[derive(Debug, Clone, Serialize)]
pub struct BackupReport {
    pub status: BackupStatus,
    pub message: String,
    pub run_id: String,
    pub total_execution_time_seconds: f64,
    pub step_timings: StepTimings,
    pub cache_node: String,
    pub snapshot_name: Option<String>,
    pub target_snapshot_name: Option<String>,
    pub s3_location: Option<String>,
    pub s3_bucket: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
}

impl BackupReport {
    /// Report for a run that never started because required configuration
    /// was missing. No resource exists, so there is nothing to clean up.
    pub fn config_error(node_id: &str, bucket: &str, message: String) -> Self {
        Self {
            status: BackupStatus::Error,
            message,
            run_id: new_ulid_string(),
            total_execution_time_seconds: 0.0,
            step_timings: StepTimings::default(),
            cache_node: node_id.to_string(),
            snapshot_name: None,
            target_snapshot_name: None,
            s3_location: None,
            s3_bucket: bucket.to_string(),
            error_category: Some(ErrorCategory::ConfigurationError),
        }
    }
}

struct PhaseFailure {
    category: ErrorCategory,
    message: String,
    /// Whether a snapshot resource may exist and deserves compensating
    /// cleanup. False only when the create call itself failed outright.
    cleanup_needed: bool,
}

/// Drives the five backup phases in sequence: create, wait for
/// availability, export, wait for the export to settle, clean up the
/// source. Any failure routes through one best-effort compensating
/// cleanup before the structured result is returned.
pub struct Orchestrator {
    settings: Settings,
    api: Arc<dyn SnapshotApi>,
}

impl Orchestrator {
    pub fn new(settings: Settings, api: Arc<dyn SnapshotApi>) -> Self {
        Self { settings, api }
    }

    pub async fn run(&self, ctx: TriggerContext) -> BackupReport {
        let started = Instant::now();
        let snapshot_name = naming::snapshot_name(&self.settings.node_id, Utc::now());
        info!(
            run_id = %ctx.run_id,
            node = %self.settings.node_id,
            bucket = %self.settings.bucket,
            snapshot = %snapshot_name,
            "backup run started"
        );

        let mut timings = StepTimings::default();
        match self.run_phases(&ctx, &snapshot_name, &mut timings).await {
            Ok(handle) => {
                let total = started.elapsed();
                for (step, secs) in timings.iter() {
                    info!(step, seconds = secs, "step timing");
                }
                info!(
                    run_id = %ctx.run_id,
                    total_secs = %format!("{:.2}", total.as_secs_f64()),
                    s3_location = %handle.location,
                    "backup run completed"
                );
                BackupReport {
                    status: BackupStatus::Success,
                    message: "cache snapshot backup completed successfully".to_string(),
                    run_id: ctx.run_id,
                    total_execution_time_seconds: round2(total.as_secs_f64()),
                    step_timings: timings,
                    cache_node: self.settings.node_id.clone(),
                    snapshot_name: Some(snapshot_name),
                    target_snapshot_name: Some(handle.target_name),
                    s3_location: Some(handle.location),
                    s3_bucket: self.settings.bucket.clone(),
                    error_category: None,
                }
            }
            Err(failure) => {
                if failure.cleanup_needed {
                    info!(snapshot = %snapshot_name, "attempting compensating cleanup after failure");
                    let t0 = Instant::now();
                    let outcome = cleanup::cleanup_snapshot(self.api.as_ref(), &snapshot_name).await;
                    timings.record(STEP_CLEANUP_ON_ERROR, t0.elapsed());
                    info!(snapshot = %snapshot_name, ?outcome, "compensating cleanup finished");
                }

                let total = started.elapsed();
                for (step, secs) in timings.iter() {
                    error!(step, seconds = secs, "step timing (failed run)");
                }
                error!(
                    run_id = %ctx.run_id,
                    category = %failure.category,
                    total_secs = %format!("{:.2}", total.as_secs_f64()),
                    "backup run failed: {}", failure.message
                );
                BackupReport {
                    status: BackupStatus::Error,
                    message: failure.message,
                    run_id: ctx.run_id,
                    total_execution_time_seconds: round2(total.as_secs_f64()),
                    step_timings: timings,
                    cache_node: self.settings.node_id.clone(),
                    snapshot_name: Some(snapshot_name),
                    target_snapshot_name: None,
                    s3_location: None,
                    s3_bucket: self.settings.bucket.clone(),
                    error_category: Some(failure.category),
                }
            }
        }
    }

    async fn run_phases(
        &self,
        ctx: &TriggerContext,
        snapshot_name: &str,
        timings: &mut StepTimings,
    ) -> Result<export::ExportHandle, PhaseFailure> {
        // Phase 1: create. Failure here needs no cleanup (nothing exists),
        // but the timing entry is still recorded.
        let t0 = Instant::now();
        info!(snapshot = %snapshot_name, "step 1: creating snapshot");
        let created = self.api.create(&self.settings.node_id, snapshot_name).await;
        let phase_result = match created {
            Ok(record) => {
                info!(
                    snapshot = %snapshot_name,
                    status = %record.status,
                    resource_id = record.resource_id.as_deref(),
                    "snapshot creation initiated"
                );
                Ok(())
            }
            Err(ApiError::AlreadyExists) => {
                // Deterministic same-day name; a re-run targets the same
                // snapshot and falls through to polling the existing one.
                warn!(snapshot = %snapshot_name, "snapshot already exists, continuing with the existing one");
                Ok(())
            }
            Err(err) => Err(PhaseFailure {
                category: ErrorCategory::ServiceFailed,
                message: format!("snapshot creation failed: {err}"),
                cleanup_needed: false,
            }),
        };
        timings.record(STEP_SNAPSHOT_CREATION, t0.elapsed());
        phase_result?;

        // Phase 2: wait for the snapshot to become available.
        let t0 = Instant::now();
        info!(snapshot = %snapshot_name, "step 2: waiting for snapshot availability");
        let waited = poller::poll_until(
            "snapshot availability",
            || self.api.describe(snapshot_name),
            |s| *s == SnapshotStatus::Available,
            |s| *s == SnapshotStatus::Failed,
            PollConfig {
                interval: self.settings.availability_poll_interval,
                max_wait: self.settings.availability_max_wait,
                deadline: ctx.deadline,
            },
        )
        .await;
        timings.record(STEP_SNAPSHOT_WAIT, t0.elapsed());
        let record = waited.map_err(|err| PhaseFailure {
            category: categorize_poll_error(&err),
            message: format!("waiting for snapshot availability failed: {err}"),
            cleanup_needed: true,
        })?;
        if let Some(size) = record.size_bytes {
            info!(
                snapshot = %snapshot_name,
                engine = record.engine.as_deref(),
                engine_version = record.engine_version.as_deref(),
                size_bytes = size,
                size_mb = %format!("{:.1}", size as f64 / 1024.0 / 1024.0),
                "snapshot ready for export"
            );
        }

        // Phase 3: export. From here a snapshot exists, so failures get
        // compensating cleanup.
        self.check_deadline(ctx, "snapshot export")?;
        let t0 = Instant::now();
        info!(snapshot = %snapshot_name, "step 3: exporting snapshot to bucket");
        let exported =
            export::export_to_bucket(self.api.as_ref(), snapshot_name, &self.settings.bucket).await;
        timings.record(STEP_S3_EXPORT, t0.elapsed());
        let handle = exported.map_err(|err| PhaseFailure {
            category: ErrorCategory::ServiceFailed,
            message: format!("snapshot export failed: {err}"),
            cleanup_needed: true,
        })?;

        // Phase 4: the service models export progress through the source
        // snapshot; wait for it to return to available.
        let t0 = Instant::now();
        info!(snapshot = %snapshot_name, "step 4: waiting for export to settle");
        let settled = poller::poll_until(
            "export settle",
            || self.api.describe(snapshot_name),
            |s| *s == SnapshotStatus::Available,
            |s| *s == SnapshotStatus::Failed,
            PollConfig {
                interval: self.settings.export_poll_interval,
                max_wait: self.settings.export_max_wait,
                deadline: ctx.deadline,
            },
        )
        .await;
        timings.record(STEP_EXPORT_WAIT, t0.elapsed());
        settled.map_err(|err| PhaseFailure {
            category: categorize_poll_error(&err),
            message: format!("waiting for export completion failed: {err}"),
            cleanup_needed: true,
        })?;

        // Phase 5: delete the now-redundant source. Best effort; the
        // outcome never changes the overall verdict.
        let t0 = Instant::now();
        info!(snapshot = %snapshot_name, "step 5: cleaning up source snapshot");
        let outcome = cleanup::cleanup_snapshot(self.api.as_ref(), snapshot_name).await;
        timings.record(STEP_CLEANUP, t0.elapsed());
        info!(snapshot = %snapshot_name, ?outcome, "cleanup finished");

        Ok(handle)
    }

    /// An exhausted trigger deadline is equivalent to a timeout at the
    /// phase that was about to run.
    fn check_deadline(&self, ctx: &TriggerContext, phase: &str) -> Result<(), PhaseFailure> {
        let expired = ctx.deadline.is_some_and(|d| Instant::now() >= d);
        if expired {
            return Err(PhaseFailure {
                category: ErrorCategory::Timeout,
                message: format!("execution deadline reached before {phase}"),
                cleanup_needed: true,
            });
        }
        Ok(())
    }
}

fn categorize_poll_error(err: &PollError) -> ErrorCategory {
    match err {
        PollError::Timeout { .. } => ErrorCategory::Timeout,
        PollError::ServiceFailed { .. } | PollError::Api(_) => ErrorCategory::ServiceFailed,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
