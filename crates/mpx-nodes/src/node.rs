//! The node interface and the context nodes run in

use crate::fanout::{run_parallel_under, ItemContext, LogProgress, ProgressSink};
use mpx_client::{Backend, CancelToken, LlmParams, MpxConfig};
use mpx_core::{MpxError, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A pipeline operation with typed inputs and outputs.
///
/// Nodes are stateful only where they memoize their last result, hence
/// `&mut self`.
pub trait Node {
    /// Stable identifier used by hosts and the CLI
    const NAME: &'static str;
    const DISPLAY_NAME: &'static str;
    const DESCRIPTION: &'static str;

    type Input;
    type Output;

    fn execute(&mut self, ctx: &NodeContext, input: Self::Input) -> Result<Self::Output>;
}

/// Shared services for node execution
#[derive(Clone)]
pub struct NodeContext {
    backend: Backend,
    llm: LlmParams,
    workers: usize,
    output_dir: PathBuf,
    cancel: CancelToken,
    progress: Arc<dyn ProgressSink>,
}

impl NodeContext {
    pub fn new(backend: Backend) -> Self {
        Self {
            backend,
            llm: LlmParams::default(),
            workers: 1,
            output_dir: PathBuf::from("output"),
            cancel: CancelToken::new(),
            progress: Arc::new(LogProgress::new("nodes")),
        }
    }

    /// LLM defaults and worker count from configuration
    pub fn from_config(backend: Backend, config: &MpxConfig) -> Self {
        Self::new(backend)
            .with_llm(config.llm.clone())
            .with_workers(config.workers)
    }

    pub fn with_llm(mut self, llm: LlmParams) -> Self {
        self.llm = llm;
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Default LLM parameters
    pub fn llm(&self) -> &LlmParams {
        &self.llm
    }

    /// Default LLM parameters with a node-specific model and temperature
    pub fn llm_with(&self, model: Option<&str>, temperature: Option<f64>) -> LlmParams {
        let mut params = self.llm.clone();
        if let Some(model) = model {
            params.model = model.to_string();
        }
        if let Some(temperature) = temperature {
            params.temperature = temperature;
        }
        params
    }

    pub fn cancel(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// A node's worker override, or the context default
    pub fn workers(&self, requested: Option<usize>) -> Result<usize> {
        match requested {
            Some(0) => Err(MpxError::validation("worker count must be at least 1")),
            Some(n) => Ok(n),
            None => Ok(self.workers),
        }
    }

    /// `requested` when it is an existing directory, else the context's
    /// output directory (created on demand)
    pub fn resolve_output_dir(&self, requested: Option<&Path>) -> Result<PathBuf> {
        if let Some(dir) = requested {
            if dir.is_dir() {
                return Ok(dir.to_path_buf());
            }
            tracing::warn!(
                requested = %dir.display(),
                fallback = %self.output_dir.display(),
                "output folder does not exist, using default"
            );
        }
        std::fs::create_dir_all(&self.output_dir)?;
        Ok(self.output_dir.clone())
    }

    /// Fan `items` out over `workers` threads under this context's
    /// cancellation and progress reporting
    pub fn fan_out<I, T, F>(&self, items: &[I], workers: usize, op: F) -> Result<Vec<T>>
    where
        I: Sync,
        T: Send,
        F: Fn(&I, &ItemContext) -> Result<T> + Sync,
    {
        run_parallel_under(&self.cancel, items, workers, self.progress.as_ref(), op)
    }
}

/// Timestamp for generated file names, microsecond resolution
pub(crate) fn file_timestamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// Name and description of a node type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
}

impl NodeInfo {
    pub fn of<N: Node>() -> Self {
        Self {
            name: N::NAME,
            display_name: N::DISPLAY_NAME,
            description: N::DESCRIPTION,
        }
    }
}

/// Every node type this crate provides
pub fn registry() -> Vec<NodeInfo> {
    use crate::nodes::*;
    vec![
        NodeInfo::of::<TextToText>(),
        NodeInfo::of::<TwoTextToText>(),
        NodeInfo::of::<TextToList>(),
        NodeInfo::of::<StringListToText>(),
        NodeInfo::of::<StringListToStringList>(),
        NodeInfo::of::<TextToObjectList>(),
        NodeInfo::of::<TextToStory>(),
        NodeInfo::of::<TextToScriptBreakdown>(),
        NodeInfo::of::<TransformObjectList>(),
        NodeInfo::of::<TextToImage>(),
        NodeInfo::of::<ObjectListToImageList>(),
        NodeInfo::of::<PickBestImage>(),
        NodeInfo::of::<ReflectOnImageList>(),
        NodeInfo::of::<ImagesTo3DModels>(),
        NodeInfo::of::<ModelOptimizer>(),
        NodeInfo::of::<SaveModelsToDisk>(),
        NodeInfo::of::<PickFromList>(),
        NodeInfo::of::<ShowList>(),
        NodeInfo::of::<ShowString>(),
    ]
}
