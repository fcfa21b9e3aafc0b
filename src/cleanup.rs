use tracing::{info, warn};

use crate::{
    api::{ApiError, SnapshotApi},
    naming,
};

/// What a cleanup attempt did. Informational only; cleanup never fails
/// its caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Deleted,
    /// Export copies are the deliverable and are never auto-deleted.
    SkippedExportArtifact,
    /// Snapshot was not in a deletable state (still creating/copying).
    SkippedState { status: String },
    /// Nothing to clean up.
    SkippedMissing,
    /// Delete was attempted and failed; absorbed.
    Failed,
}

/// Delete a source snapshot, best effort. Deletion only happens when the
/// observed status is terminal (available or failed); anything else is a
/// skip with a warning, never a retry, since deleting an in-progress
/// resource is unsafe.
pub async fn cleanup_snapshot(api: &dyn SnapshotApi, snapshot_name: &str) -> CleanupOutcome {
    if naming::is_export_target(snapshot_name) {
        info!(snapshot = snapshot_name, "skipping cleanup of export artifact");
        return CleanupOutcome::SkippedExportArtifact;
    }

    match api.describe(snapshot_name).await {
        Ok(record) => {
            if !record.status.is_terminal() {
                warn!(
                    snapshot = snapshot_name,
                    status = %record.status,
                    "snapshot not in a deletable state, skipping cleanup"
                );
                return CleanupOutcome::SkippedState {
                    status: record.status.to_string(),
                };
            }
            info!(snapshot = snapshot_name, status = %record.status, "deleting source snapshot");
        }
        Err(ApiError::NotFound) => {
            warn!(snapshot = snapshot_name, "snapshot not found for cleanup");
            return CleanupOutcome::SkippedMissing;
        }
        Err(err) => {
            // Could not verify the state; still attempt the delete and let
            // the service refuse it if the snapshot is busy.
            warn!(snapshot = snapshot_name, %err, "could not verify snapshot state before cleanup");
        }
    }

    match api.delete(snapshot_name).await {
        Ok(()) => {
            info!(snapshot = snapshot_name, "source snapshot cleanup completed");
            CleanupOutcome::Deleted
        }
        Err(err) => {
            warn!(snapshot = snapshot_name, %err, "snapshot cleanup failed");
            CleanupOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::api::{BoxFuture, SnapshotRecord, SnapshotStatus};

    struct FakeApi {
        describe_result: Mutex<Option<Result<SnapshotRecord, ApiError>>>,
        delete_result: Mutex<Option<Result<(), ApiError>>>,
        delete_calls: Mutex<Vec<String>>,
    }

    impl FakeApi {
        fn new(
            describe: Result<SnapshotRecord, ApiError>,
            delete: Result<(), ApiError>,
        ) -> Self {
            Self {
                describe_result: Mutex::new(Some(describe)),
                delete_result: Mutex::new(Some(delete)),
                delete_calls: Mutex::new(Vec::new()),
            }
        }

        fn delete_calls(&self) -> Vec<String> {
            self.delete_calls.lock().unwrap().clone()
        }
    }

    fn record(status: SnapshotStatus) -> SnapshotRecord {
        SnapshotRecord {
            name: "node-a-20260823".to_string(),
            status,
            size_bytes: None,
            engine: None,
            engine_version: None,
            progress_percent: None,
            resource_id: None,
        }
    }

    impl SnapshotApi for FakeApi {
        fn create<'a>(
            &'a self,
            _node_id: &'a str,
            _snapshot_name: &'a str,
        ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
            unreachable!("cleanup never creates")
        }

        fn describe<'a>(
            &'a self,
            _snapshot_name: &'a str,
        ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
            let out = self.describe_result.lock().unwrap().take().unwrap();
            Box::pin(std::future::ready(out))
        }

        fn copy<'a>(
            &'a self,
            _source_name: &'a str,
            _target_name: &'a str,
            _target_bucket: &'a str,
        ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
            unreachable!("cleanup never copies")
        }

        fn delete<'a>(&'a self, snapshot_name: &'a str) -> BoxFuture<'a, Result<(), ApiError>> {
            self.delete_calls
                .lock()
                .unwrap()
                .push(snapshot_name.to_string());
            let out = self.delete_result.lock().unwrap().take().unwrap();
            Box::pin(std::future::ready(out))
        }
    }

    #[tokio::test]
    async fn deletes_available_snapshot() {
        let api = FakeApi::new(Ok(record(SnapshotStatus::Available)), Ok(()));
        let out = cleanup_snapshot(&api, "node-a-20260823").await;
        assert_eq!(out, CleanupOutcome::Deleted);
        assert_eq!(api.delete_calls(), vec!["node-a-20260823".to_string()]);
    }

    #[tokio::test]
    async fn never_deletes_a_non_terminal_snapshot() {
        for status in [
            SnapshotStatus::Creating,
            SnapshotStatus::Copying,
            SnapshotStatus::Other("exporting".to_string()),
        ] {
            let api = FakeApi::new(Ok(record(status.clone())), Ok(()));
            let out = cleanup_snapshot(&api, "node-a-20260823").await;
            assert_eq!(
                out,
                CleanupOutcome::SkippedState {
                    status: status.to_string()
                }
            );
            assert!(api.delete_calls().is_empty(), "status {status} must skip");
        }
    }

    #[tokio::test]
    async fn export_artifacts_are_never_touched() {
        let api = FakeApi::new(Ok(record(SnapshotStatus::Available)), Ok(()));
        let out = cleanup_snapshot(&api, "node-a-20260823-s3-export").await;
        assert_eq!(out, CleanupOutcome::SkippedExportArtifact);
        assert!(api.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn missing_snapshot_is_a_quiet_skip() {
        let api = FakeApi::new(Err(ApiError::NotFound), Ok(()));
        let out = cleanup_snapshot(&api, "node-a-20260823").await;
        assert_eq!(out, CleanupOutcome::SkippedMissing);
        assert!(api.delete_calls().is_empty());
    }

    #[tokio::test]
    async fn unverifiable_state_still_attempts_the_delete() {
        let api = FakeApi::new(
            Err(ApiError::Transient {
                message: "describe flaked".to_string(),
            }),
            Ok(()),
        );
        let out = cleanup_snapshot(&api, "node-a-20260823").await;
        assert_eq!(out, CleanupOutcome::Deleted);
    }

    #[tokio::test]
    async fn delete_failure_is_absorbed() {
        let api = FakeApi::new(
            Ok(record(SnapshotStatus::Failed)),
            Err(ApiError::InvalidState {
                message: "busy".to_string(),
            }),
        );
        let out = cleanup_snapshot(&api, "node-a-20260823").await;
        assert_eq!(out, CleanupOutcome::Failed);
    }
}
