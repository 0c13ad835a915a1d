//! MPX Nodes - pipeline operations over the generation backend
//!
//! Each node turns typed inputs into typed outputs by templating a prompt,
//! running a retried backend call and validating the structured reply.
//! Nodes that work on lists fan their items out over a bounded worker pool.

pub mod calls;
pub mod fanout;
pub mod node;
pub mod nodes;
pub mod tensor;

pub use calls::{ImageInput, MeshSource, ModelUrls, OptimizedModel};
pub use fanout::{run_parallel, run_parallel_under, ItemContext, LogProgress, ProgressSink};
pub use node::{registry, Node, NodeContext, NodeInfo};
pub use tensor::ImageTensor;
