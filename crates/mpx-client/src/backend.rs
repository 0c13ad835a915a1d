//! Submit, poll and retry composed into single calls

use crate::cancel::CancelToken;
use crate::client::RemoteClient;
use crate::config::MpxConfig;
use crate::poller::StatusPoller;
use crate::request::{AssetSlot, AssetSpec, GenerationRequest, JobStatus, StatusResult};
use crate::retry::RetryPolicy;
use mpx_core::{MpxError, Result};
use std::sync::Arc;

/// A remote client plus the polling and retry policy applied to every call
#[derive(Clone)]
pub struct Backend {
    client: Arc<dyn RemoteClient>,
    poller: StatusPoller,
    retry: RetryPolicy,
}

impl Backend {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            poller: StatusPoller::default(),
            retry: RetryPolicy::default(),
        }
    }

    /// Poll and retry settings taken from configuration
    pub fn from_config(client: Arc<dyn RemoteClient>, config: &MpxConfig) -> Result<Self> {
        let poller = StatusPoller::new(config.poll_interval).with_deadline(config.poll_deadline);
        let retry = RetryPolicy::new(config.retry_max_attempts)?.with_backoff(config.retry_backoff);
        Ok(Self {
            client,
            poller,
            retry,
        })
    }

    pub fn with_poller(mut self, poller: StatusPoller) -> Self {
        self.poller = poller;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn client(&self) -> &dyn RemoteClient {
        self.client.as_ref()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Submit once and wait for a terminal state; `Failed` becomes an error
    pub fn run(&self, request: &GenerationRequest, cancel: &CancelToken) -> Result<StatusResult> {
        cancel.check()?;
        let request_id = self.client.submit(request)?;
        tracing::info!(kind = %request.kind(), request_id = %request_id, "submitted request");

        let status = self
            .poller
            .await_completion(self.client.as_ref(), &request_id, cancel)?;

        if status.status == JobStatus::Failed {
            return Err(MpxError::BackendFailed {
                request_id: request_id.to_string(),
                detail: status
                    .error
                    .clone()
                    .unwrap_or_else(|| "status: failed".to_string()),
            });
        }
        Ok(status)
    }

    /// Submit, poll and extract under the retry policy.
    ///
    /// Every attempt submits a fresh request. `extract` turns the completed
    /// status into the caller's value; a malformed-response error from it
    /// counts as a failed attempt.
    pub fn run_with_retry<T, F>(
        &self,
        request: &GenerationRequest,
        cancel: &CancelToken,
        mut extract: F,
    ) -> Result<T>
    where
        F: FnMut(&StatusResult) -> Result<T>,
    {
        self.retry.run(|attempt| {
            tracing::debug!(kind = %request.kind(), attempt, "attempt");
            let status = self.run(request, cancel)?;
            extract(&status)
        })
    }

    /// Create an asset slot and upload `bytes` into it
    pub fn upload(&self, spec: &AssetSpec, bytes: &[u8]) -> Result<AssetSlot> {
        let slot = self.client.create_asset(spec)?;
        self.client
            .upload_asset(&slot, &spec.content_type, bytes)?;
        tracing::info!(request_id = %slot.request_id, name = %spec.name, "asset uploaded");
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockReply};
    use crate::request::LlmParams;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn llm_request() -> GenerationRequest {
        GenerationRequest::LlmCall {
            system_prompt: "Respond with JSON.".into(),
            user_prompt: "Hello".into(),
            params: LlmParams::default(),
        }
    }

    fn backend(client: Arc<MockClient>) -> Backend {
        Backend::new(client).with_poller(StatusPoller::new(Duration::from_millis(1)))
    }

    #[test]
    fn test_failed_status_becomes_error() {
        let client = Arc::new(MockClient::new(|_| MockReply::Failed("gpu lost".into())));
        let err = backend(client)
            .run(&llm_request(), &CancelToken::new())
            .unwrap_err();
        match err {
            MpxError::BackendFailed { detail, .. } => assert_eq!(detail, "gpu lost"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_retry_resubmits_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let client = Arc::new(MockClient::new(move |_| {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                MockReply::Failed("transient".into())
            } else {
                MockReply::Complete(json!({"output": "ok"}))
            }
        }));

        let out = backend(client.clone())
            .run_with_retry(&llm_request(), &CancelToken::new(), |s| {
                Ok(s.output_str("output").unwrap_or_default().to_string())
            })
            .unwrap();
        assert_eq!(out, "ok");
        assert_eq!(client.submit_count(), 3);
    }

    #[test]
    fn test_extract_failure_is_retried_then_exhausted() {
        let client = Arc::new(MockClient::new(|_| {
            MockReply::Complete(json!({"output": "not json"}))
        }));
        let err = backend(client.clone())
            .run_with_retry(&llm_request(), &CancelToken::new(), |_| -> Result<()> {
                Err(MpxError::malformed("missing keys"))
            })
            .unwrap_err();
        assert!(matches!(err, MpxError::RetriesExhausted { attempts: 3, .. }));
        assert_eq!(client.submit_count(), 3);
    }

    #[test]
    fn test_cancelled_before_submit() {
        let client = Arc::new(MockClient::canned());
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = backend(client.clone()).run(&llm_request(), &cancel).unwrap_err();
        assert!(matches!(err, MpxError::Cancelled));
        assert_eq!(client.submit_count(), 0);
    }

    #[test]
    fn test_upload_records_bytes() {
        let client = Arc::new(MockClient::canned());
        let slot = backend(client.clone())
            .upload(&AssetSpec::png("User uploaded image"), &[1, 2, 3])
            .unwrap();
        assert!(slot.public_url().ends_with("image.png"));
        assert_eq!(client.upload_count(), 1);
    }
}
