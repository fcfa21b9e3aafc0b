use tracing::{info, warn};

use crate::{
    api::{ApiError, SnapshotApi},
    naming,
};

/// Where the export landed. The target name is derived before the copy
/// call is issued, so it is known even if the call's response is
/// incomplete.
#[derive(Debug, Clone)]
pub struct ExportHandle {
    pub target_name: String,
    pub location: String,
}

/// Kick off the copy of `source_name` into `bucket`. The copy itself is
/// asynchronous on the service side; progress surfaces through the source
/// snapshot's status, which the caller polls afterwards.
pub async fn export_to_bucket(
    api: &dyn SnapshotApi,
    source_name: &str,
    bucket: &str,
) -> Result<ExportHandle, ApiError> {
    // Best effort: a size read before the copy is useful for operators but
    // must never abort the export.
    match api.describe(source_name).await {
        Ok(record) => {
            if let Some(size) = record.size_bytes {
                info!(
                    snapshot = source_name,
                    size_bytes = size,
                    size_mb = %format!("{:.1}", size as f64 / 1024.0 / 1024.0),
                    "source snapshot size before export"
                );
            }
        }
        Err(err) => {
            warn!(snapshot = source_name, %err, "could not read source snapshot size before export");
        }
    }

    let target_name = naming::export_target_name(source_name);
    info!(
        source = source_name,
        target = %target_name,
        bucket,
        "starting snapshot export"
    );

    let copied = api.copy(source_name, &target_name, bucket).await?;
    if let Some(resource_id) = &copied.resource_id {
        info!(target = %target_name, resource_id = %resource_id, "export initiated");
    }

    Ok(ExportHandle {
        location: naming::s3_location(bucket, &target_name),
        target_name,
    })
}
