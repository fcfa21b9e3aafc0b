use std::{future::Future, pin::Pin, time::Duration};

use serde::Deserialize;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Status of a snapshot as reported by the control plane. Unrecognized
/// values map to `Other` and are treated as "still in progress" by the
/// poller, so new intermediate states do not break the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotStatus {
    Creating,
    Available,
    Copying,
    Failed,
    Other(String),
}

impl SnapshotStatus {
    /// Terminal states are the only ones a snapshot may be deleted from.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Available | Self::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating",
            Self::Available => "available",
            Self::Copying => "copying",
            Self::Failed => "failed",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl From<String> for SnapshotStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "creating" => Self::Creating,
            "available" => Self::Available,
            "copying" => Self::Copying,
            "failed" => Self::Failed,
            _ => Self::Other(s),
        }
    }
}

impl std::fmt::Display for SnapshotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SnapshotStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self::from(String::deserialize(deserializer)?))
    }
}

/// Read-only view of a snapshot owned by the external service. Only the
/// name and status are load-bearing; the rest is logged for operators.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotRecord {
    pub name: String,
    pub status: SnapshotStatus,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub engine: Option<String>,
    #[serde(default)]
    pub engine_version: Option<String>,
    #[serde(default)]
    pub progress_percent: Option<u8>,
    #[serde(default)]
    pub resource_id: Option<String>,
}

#[derive(Debug)]
pub enum ApiError {
    /// Resource not (yet) visible. Expected right after create due to
    /// eventual consistency; the poller retries it, nobody else does.
    NotFound,
    /// A snapshot with this name already exists.
    AlreadyExists,
    /// Operation not legal in the snapshot's current state.
    InvalidState { message: String },
    /// Transport failure or 5xx from the control plane.
    Transient { message: String },
    /// Any other service-reported failure.
    Api { message: String },
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound => write!(f, "snapshot not found"),
            Self::AlreadyExists => write!(f, "snapshot already exists"),
            Self::InvalidState { message } => write!(f, "invalid snapshot state: {message}"),
            Self::Transient { message } => write!(f, "transient service error: {message}"),
            Self::Api { message } => write!(f, "service error: {message}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Thin contract over the snapshot control plane. No retry or backoff
/// here; raw results and raw failures surface to the caller.
pub trait SnapshotApi: Send + Sync + 'static {
    fn create<'a>(
        &'a self,
        node_id: &'a str,
        snapshot_name: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>>;

    fn describe<'a>(
        &'a self,
        snapshot_name: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>>;

    fn copy<'a>(
        &'a self,
        source_name: &'a str,
        target_name: &'a str,
        target_bucket: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>>;

    fn delete<'a>(&'a self, snapshot_name: &'a str) -> BoxFuture<'a, Result<(), ApiError>>;
}

#[derive(Debug)]
pub struct HttpSnapshotApi {
    base: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpSnapshotApi {
    pub fn new(base: String, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("snapback/", env!("CARGO_PKG_VERSION")))
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            base,
            token,
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base.trim_end_matches('/'))
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn execute<T: serde::de::DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let resp = self
            .authed(req)
            .send()
            .await
            .map_err(|e| ApiError::Transient {
                message: e.to_string(),
            })?;

        let http_status = resp.status();
        if http_status.is_server_error() {
            return Err(ApiError::Transient {
                message: format!("control plane returned {http_status}"),
            });
        }

        // 4xx responses still carry the envelope; classify from the error
        // code when present and fall back to the HTTP status.
        let envelope: ApiEnvelope<T> = resp.json().await.map_err(|e| {
            if http_status == reqwest::StatusCode::NOT_FOUND {
                ApiError::NotFound
            } else {
                ApiError::Transient {
                    message: format!("decode response ({http_status}): {e}"),
                }
            }
        })?;
        envelope.into_result(http_status)
    }
}

impl SnapshotApi for HttpSnapshotApi {
    fn create<'a>(
        &'a self,
        node_id: &'a str,
        snapshot_name: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "node_id": node_id,
                "snapshot_name": snapshot_name,
            });
            self.execute(self.client.post(self.url("/v1/snapshots")).json(&body))
                .await
        })
    }

    fn describe<'a>(
        &'a self,
        snapshot_name: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
        Box::pin(async move {
            self.execute(
                self.client
                    .get(self.url(&format!("/v1/snapshots/{snapshot_name}"))),
            )
            .await
        })
    }

    fn copy<'a>(
        &'a self,
        source_name: &'a str,
        target_name: &'a str,
        target_bucket: &'a str,
    ) -> BoxFuture<'a, Result<SnapshotRecord, ApiError>> {
        Box::pin(async move {
            let body = serde_json::json!({
                "target_name": target_name,
                "target_bucket": target_bucket,
            });
            self.execute(
                self.client
                    .post(self.url(&format!("/v1/snapshots/{source_name}/copy")))
                    .json(&body),
            )
            .await
        })
    }

    fn delete<'a>(&'a self, snapshot_name: &'a str) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let _: serde_json::Value = self
                .execute(
                    self.client
                        .delete(self.url(&format!("/v1/snapshots/{snapshot_name}"))),
                )
                .await?;
            Ok(())
        })
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope<T> {
    success: bool,
    #[serde(default)]
    errors: Vec<ApiEnvelopeError>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct ApiEnvelopeError {
    code: Option<String>,
    message: Option<String>,
}

impl<T> ApiEnvelope<T> {
    fn into_result(self, http_status: reqwest::StatusCode) -> Result<T, ApiError> {
        if self.success {
            return self.result.ok_or_else(|| ApiError::Api {
                message: "missing result in successful response".to_string(),
            });
        }

        if let Some(err) = classify_error_code(&self.errors) {
            return Err(err);
        }
        if http_status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound);
        }

        let mut msgs = Vec::new();
        for e in self.errors {
            let msg = match (e.code, e.message) {
                (Some(c), Some(m)) => format!("{c}: {m}"),
                (Some(c), None) => c,
                (None, Some(m)) => m,
                (None, None) => "unknown".to_string(),
            };
            msgs.push(msg);
        }
        Err(ApiError::Api {
            message: msgs.join(", "),
        })
    }
}

/// Structural fault classification. This replaces any substring matching
/// on error messages: the decision keys off the machine-readable code.
fn classify_error_code(errors: &[ApiEnvelopeError]) -> Option<ApiError> {
    for e in errors {
        let message = || e.message.clone().unwrap_or_default();
        match e.code.as_deref() {
            Some("snapshot_not_found") => return Some(ApiError::NotFound),
            Some("snapshot_already_exists") => return Some(ApiError::AlreadyExists),
            Some("invalid_snapshot_state") => {
                return Some(ApiError::InvalidState { message: message() });
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_known_values_and_keep_unknown_ones() {
        assert_eq!(SnapshotStatus::from("creating".to_string()), SnapshotStatus::Creating);
        assert_eq!(SnapshotStatus::from("available".to_string()), SnapshotStatus::Available);
        assert_eq!(SnapshotStatus::from("copying".to_string()), SnapshotStatus::Copying);
        assert_eq!(SnapshotStatus::from("failed".to_string()), SnapshotStatus::Failed);
        assert_eq!(
            SnapshotStatus::from("exporting".to_string()),
            SnapshotStatus::Other("exporting".to_string())
        );
    }

    #[test]
    fn only_available_and_failed_are_terminal() {
        assert!(SnapshotStatus::Available.is_terminal());
        assert!(SnapshotStatus::Failed.is_terminal());
        assert!(!SnapshotStatus::Creating.is_terminal());
        assert!(!SnapshotStatus::Copying.is_terminal());
        assert!(!SnapshotStatus::Other("exporting".to_string()).is_terminal());
    }

    #[test]
    fn error_codes_classify_structurally() {
        let errs = vec![ApiEnvelopeError {
            code: Some("snapshot_not_found".to_string()),
            message: Some("no such snapshot".to_string()),
        }];
        assert!(matches!(classify_error_code(&errs), Some(ApiError::NotFound)));

        let errs = vec![ApiEnvelopeError {
            code: Some("snapshot_already_exists".to_string()),
            message: None,
        }];
        assert!(matches!(
            classify_error_code(&errs),
            Some(ApiError::AlreadyExists)
        ));

        let errs = vec![ApiEnvelopeError {
            code: Some("invalid_snapshot_state".to_string()),
            message: Some("still creating".to_string()),
        }];
        assert!(matches!(
            classify_error_code(&errs),
            Some(ApiError::InvalidState { .. })
        ));

        let errs = vec![ApiEnvelopeError {
            code: Some("quota_exceeded".to_string()),
            message: None,
        }];
        assert!(classify_error_code(&errs).is_none());
    }

    #[test]
    fn record_deserializes_with_partial_fields() {
        let rec: SnapshotRecord = serde_json::from_value(serde_json::json!({
            "name": "node-a-20260823",
            "status": "creating"
        }))
        .unwrap();
        assert_eq!(rec.name, "node-a-20260823");
        assert_eq!(rec.status, SnapshotStatus::Creating);
        assert!(rec.size_bytes.is_none());
    }
}
