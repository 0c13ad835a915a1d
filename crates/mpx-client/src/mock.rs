//! Scripted in-process backend
//!
//! Answers every request from a responder closure without any network
//! traffic. Used by tests and by `mpx --mock`.

use crate::client::RemoteClient;
use crate::request::{
    AssetSlot, AssetSpec, GenerationRequest, JobStatus, RequestId, RequestKind, StatusResult,
};
use mpx_core::{MpxError, Result};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::Cursor;

/// How the mock answers one submitted request
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Complete on the first poll with these outputs
    Complete(Value),
    /// Report pending for `pending_polls` polls, then complete
    CompleteAfter { pending_polls: u32, outputs: Value },
    /// Complete with an `output_url` and no outputs (optimize style)
    CompleteWithUrl(String),
    /// Terminal failure with an error message
    Failed(String),
    /// Reject the submission itself with a transport error
    SubmitError(String),
}

type Responder = dyn Fn(&GenerationRequest) -> MockReply + Send + Sync;

struct Job {
    reply: MockReply,
    polls: u32,
}

#[derive(Default)]
struct MockState {
    next_id: u64,
    jobs: HashMap<RequestId, Job>,
    submitted: Vec<GenerationRequest>,
    uploads: Vec<(AssetSlot, String, usize)>,
    downloads: Vec<String>,
    status_calls: u32,
}

/// A `RemoteClient` driven by a closure
pub struct MockClient {
    responder: Box<Responder>,
    state: Mutex<MockState>,
    reject_credentials: bool,
}

impl MockClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&GenerationRequest) -> MockReply + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            state: Mutex::new(MockState::default()),
            reject_credentials: false,
        }
    }

    /// A mock that produces plausible outputs for every request kind
    pub fn canned() -> Self {
        Self::new(canned_reply)
    }

    /// Make `connection_test` fail as if the key were invalid
    pub fn rejecting_credentials(mut self) -> Self {
        self.reject_credentials = true;
        self
    }

    /// Number of accepted submissions
    pub fn submit_count(&self) -> usize {
        self.state.lock().submitted.len()
    }

    /// Number of accepted submissions of one kind
    pub fn submit_count_of(&self, kind: RequestKind) -> usize {
        self.state
            .lock()
            .submitted
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// All accepted submissions, oldest first
    pub fn submissions(&self) -> Vec<GenerationRequest> {
        self.state.lock().submitted.clone()
    }

    pub fn status_calls(&self) -> u32 {
        self.state.lock().status_calls
    }

    pub fn upload_count(&self) -> usize {
        self.state.lock().uploads.len()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.state.lock().downloads.clone()
    }
}

impl RemoteClient for MockClient {
    fn submit(&self, request: &GenerationRequest) -> Result<RequestId> {
        let reply = (self.responder)(request);
        if let MockReply::SubmitError(msg) = &reply {
            return Err(MpxError::Transport(msg.clone()));
        }

        let mut state = self.state.lock();
        state.next_id += 1;
        let id = RequestId::new(format!("mock-{}-{}", request.kind(), state.next_id));
        state.jobs.insert(id.clone(), Job { reply, polls: 0 });
        state.submitted.push(request.clone());
        Ok(id)
    }

    fn get_status(&self, request_id: &RequestId) -> Result<StatusResult> {
        let mut state = self.state.lock();
        state.status_calls += 1;
        let job = state
            .jobs
            .get_mut(request_id)
            .ok_or_else(|| MpxError::Transport(format!("unknown request {}", request_id)))?;
        job.polls += 1;

        let mut status = StatusResult::new(request_id.clone(), JobStatus::Complete);
        match &job.reply {
            MockReply::Complete(outputs) => status.outputs = as_map(outputs),
            MockReply::CompleteAfter {
                pending_polls,
                outputs,
            } => {
                if job.polls <= *pending_polls {
                    status.status = JobStatus::Pending;
                } else {
                    status.outputs = as_map(outputs);
                }
            }
            MockReply::CompleteWithUrl(url) => status.output_url = Some(url.clone()),
            MockReply::Failed(msg) => {
                status.status = JobStatus::Failed;
                status.error = Some(msg.clone());
            }
            MockReply::SubmitError(_) => status.status = JobStatus::Failed,
        }
        Ok(status)
    }

    fn create_asset(&self, spec: &AssetSpec) -> Result<AssetSlot> {
        let mut state = self.state.lock();
        state.next_id += 1;
        let id = state.next_id;
        Ok(AssetSlot {
            request_id: RequestId::new(format!("mock-asset-{}", id)),
            asset_url: format!(
                "https://mock.invalid/assets/{}/{}?signature=mock",
                id, spec.name
            ),
        })
    }

    fn upload_asset(&self, slot: &AssetSlot, content_type: &str, bytes: &[u8]) -> Result<()> {
        self.state
            .lock()
            .uploads
            .push((slot.clone(), content_type.to_string(), bytes.len()));
        Ok(())
    }

    fn download(&self, url: &str) -> Result<Vec<u8>> {
        self.state.lock().downloads.push(url.to_string());
        let path = url.split('?').next().unwrap_or(url).to_ascii_lowercase();
        if path.ends_with(".png") || path.ends_with(".jpg") || path.ends_with(".webp") {
            placeholder_png()
        } else {
            Ok(format!("mock asset from {}", url).into_bytes())
        }
    }

    fn connection_test(&self) -> Result<()> {
        if self.reject_credentials {
            Err(MpxError::Unauthorized("mock rejects this key".to_string()))
        } else {
            Ok(())
        }
    }
}

fn as_map(outputs: &Value) -> Map<String, Value> {
    outputs.as_object().cloned().unwrap_or_default()
}

/// An 8x8 grey PNG
fn placeholder_png() -> Result<Vec<u8>> {
    let img = image::RgbImage::from_pixel(8, 8, image::Rgb([200, 200, 200]));
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, image::ImageFormat::Png)
        .map_err(|e| MpxError::ImageError(e.to_string()))?;
    Ok(bytes.into_inner())
}

fn canned_reply(request: &GenerationRequest) -> MockReply {
    use serde_json::json;

    match request {
        GenerationRequest::LlmCall { .. } => MockReply::Complete(json!({
            "output": json!({
                "updated_text": "A refined description.",
                "merged_text": "A merged description.",
                "list_of_strings": ["first", "second"],
                "objects": ["wooden chair", "oak table"],
                "description": "A weathered wooden chair.",
                "story": "Once upon a time a chair met a table.",
                "characters": ["Chair", "Table"],
                "props": ["lamp"],
                "scene_synopses": ["The meeting."],
                "new_prompt": "A single wooden chair, side view.",
                "reasoning": "Mock response."
            }).to_string()
        })),
        GenerationRequest::ImageQuery { .. } => MockReply::Complete(json!({
            "output": json!({
                "image_index": 1,
                "answers": ["yes", "yes", "yes", "yes"],
                "reasoning": ["Centered.", "Uncropped.", "White background.", "One object."]
            }).to_string()
        })),
        GenerationRequest::TextToImage { num_images, .. } => {
            let images: Vec<String> = (0..*num_images)
                .map(|i| format!("https://mock.invalid/images/{}.png", i))
                .collect();
            MockReply::Complete(json!({ "images": images }))
        }
        GenerationRequest::ImageTo3d { .. } => MockReply::Complete(json!({
            "glb": "https://mock.invalid/models/model.glb",
            "fbx": "https://mock.invalid/models/model.fbx",
            "usdz": "https://mock.invalid/models/model.usdz",
            "thumbnail": "https://mock.invalid/models/thumbnail.png"
        })),
        GenerationRequest::Optimize {
            output_file_format, ..
        } => MockReply::CompleteWithUrl(format!(
            "https://mock.invalid/exports/optimized.{}",
            output_file_format
        )),
    }
}
