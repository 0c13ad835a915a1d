//! Status polling
//!
//! Blocks the calling worker until a submitted request reaches a terminal
//! state. Other workers keep running; only this thread sleeps.

use crate::cancel::CancelToken;
use crate::client::RemoteClient;
use crate::request::{RequestId, StatusResult};
use mpx_core::{MpxError, Result};
use std::time::{Duration, Instant};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(30 * 60);

/// Polls a request's status at a fixed interval
#[derive(Debug, Clone, Copy)]
pub struct StatusPoller {
    interval: Duration,
    deadline: Option<Duration>,
}

impl Default for StatusPoller {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: Some(DEFAULT_POLL_DEADLINE),
        }
    }
}

impl StatusPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            ..Self::default()
        }
    }

    /// Overall time limit; `None` waits indefinitely
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Poll until the request is `Complete` or `Failed`.
    ///
    /// A `Failed` status is returned as a value; deciding whether to retry is
    /// the caller's job.
    pub fn await_completion(
        &self,
        client: &dyn RemoteClient,
        request_id: &RequestId,
        cancel: &CancelToken,
    ) -> Result<StatusResult> {
        let start = Instant::now();
        let mut polls = 0u32;

        loop {
            cancel.check()?;
            let status = client.get_status(request_id)?;
            polls += 1;

            if status.status.is_terminal() {
                tracing::info!(
                    request_id = %request_id,
                    status = %status.status,
                    polls,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "request finished"
                );
                return Ok(status);
            }

            tracing::debug!(
                request_id = %request_id,
                status = %status.status,
                progress = status.progress,
                "request pending"
            );

            let wait = match self.deadline {
                Some(deadline) => {
                    let elapsed = start.elapsed();
                    if elapsed >= deadline {
                        return Err(MpxError::PollTimeout {
                            request_id: request_id.to_string(),
                            waited_secs: elapsed.as_secs(),
                        });
                    }
                    self.interval.min(deadline - elapsed)
                }
                None => self.interval,
            };
            cancel.sleep(wait)?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockClient, MockReply};
    use crate::request::{GenerationRequest, JobStatus};
    use serde_json::json;
    use std::sync::Arc;

    fn image_request() -> GenerationRequest {
        GenerationRequest::TextToImage {
            prompt: "a chair".into(),
            num_images: 1,
            num_steps: 4,
            seed: 1,
            lora_scale: 0.8,
            lora_weights: String::new(),
        }
    }

    fn fast_poller() -> StatusPoller {
        StatusPoller::new(Duration::from_millis(1))
    }

    #[test]
    fn test_pending_then_complete() {
        let client = MockClient::new(|_| MockReply::CompleteAfter {
            pending_polls: 3,
            outputs: json!({"images": ["u1"]}),
        });
        let id = client.submit(&image_request()).unwrap();

        let status = fast_poller()
            .await_completion(&client, &id, &CancelToken::new())
            .unwrap();
        assert_eq!(status.status, JobStatus::Complete);
        assert_eq!(status.output_strings("images"), vec!["u1"]);
        assert_eq!(client.status_calls(), 4);
    }

    #[test]
    fn test_failed_is_returned_not_raised() {
        let client = MockClient::new(|_| MockReply::Failed("content policy".into()));
        let id = client.submit(&image_request()).unwrap();

        let status = fast_poller()
            .await_completion(&client, &id, &CancelToken::new())
            .unwrap();
        assert_eq!(status.status, JobStatus::Failed);
        assert_eq!(status.error.as_deref(), Some("content policy"));
    }

    #[test]
    fn test_deadline_yields_timeout() {
        let client = MockClient::new(|_| MockReply::CompleteAfter {
            pending_polls: u32::MAX,
            outputs: json!({}),
        });
        let id = client.submit(&image_request()).unwrap();

        let poller = fast_poller().with_deadline(Some(Duration::from_millis(20)));
        let err = poller
            .await_completion(&client, &id, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, MpxError::PollTimeout { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancel_stops_polling() {
        let client = Arc::new(MockClient::new(|_| MockReply::CompleteAfter {
            pending_polls: u32::MAX,
            outputs: json!({}),
        }));
        let id = client.submit(&image_request()).unwrap();
        let cancel = CancelToken::new();

        let remote = cancel.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });

        let poller = StatusPoller::new(Duration::from_millis(5)).with_deadline(None);
        let err = poller
            .await_completion(client.as_ref(), &id, &cancel)
            .unwrap_err();
        handle.join().unwrap();
        assert!(matches!(err, MpxError::Cancelled));
    }

    #[test]
    fn test_unknown_request_is_transport_error() {
        let client = MockClient::new(|_| MockReply::Complete(json!({})));
        let err = fast_poller()
            .await_completion(&client, &RequestId::new("nope"), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, MpxError::Transport(_)));
    }
}
