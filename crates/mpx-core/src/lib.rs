//! MPX Core - Foundational types for the MPX pipeline nodes
//!
//! This crate provides the types that all other MPX crates depend on:
//! - `MpxError` - Error taxonomy with retry classification, and the Result alias
//! - `InputHash` - SHA-256 digest over an operation's inputs
//! - `PromptTemplate` - `{name}` placeholder substitution
//! - `SingleEntryMemo` - one-slot memoization keyed by `InputHash`
//! - `parse_structured` - lenient decoding of model JSON output

mod error;
mod hash;
mod memo;
mod response;
mod template;

pub use error::{MpxError, Result};
pub use hash::InputHash;
pub use memo::SingleEntryMemo;
pub use response::{parse_structured, ResponseParser, StructuredResponse};
pub use template::{PromptData, PromptTemplate, PromptValue};
