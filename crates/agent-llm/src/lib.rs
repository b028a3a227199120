//! Streaming chat contract consumed by the agent loop.
//!
//! Provider HTTP clients live outside this workspace; they implement
//! [`LLMProvider`] and translate their wire events into [`LLMChunk`]s.

pub mod provider;
pub mod types;

pub use provider::{LLMError, LLMProvider, LLMStream, Result};
pub use types::LLMChunk;
