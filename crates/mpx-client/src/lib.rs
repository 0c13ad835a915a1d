//! Client for the MPX generation backend
//!
//! Requests are submitted, polled until they reach a terminal state, and
//! retried a bounded number of times when they fail.

mod backend;
mod cancel;
mod client;
mod config;
mod credentials;
mod mock;
mod poller;
mod request;
mod retry;

pub use backend::Backend;
pub use cancel::CancelToken;
pub use client::{HttpClient, RemoteClient, DEFAULT_API_URL};
pub use config::{MpxConfig, MpxConfigFile, API_URL_VAR};
pub use credentials::{
    setup_api_key, CredentialStore, SetupOutcome, SetupStatus, PLACEHOLDER_TOKEN, TOKEN_VAR,
};
pub use mock::{MockClient, MockReply};
pub use poller::{StatusPoller, DEFAULT_POLL_DEADLINE, DEFAULT_POLL_INTERVAL};
pub use request::{
    AssetSlot, AssetSpec, GenerationRequest, ImageSource, JobStatus, LlmParams, RequestId,
    RequestKind, StatusResult,
};
pub use retry::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
