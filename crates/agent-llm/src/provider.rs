use std::pin::Pin;

use agent_core::{tools::ToolSchema, Message};
use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use crate::types::LLMChunk;

#[derive(Error, Debug)]
pub enum LLMError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("API error: {0}")]
    Api(String),
}

pub type Result<T> = std::result::Result<T, LLMError>;

pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMChunk>> + Send>>;

#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Stream chat completion
    ///
    /// # Arguments
    /// * `messages` - Full conversation history
    /// * `tools` - Tool definitions currently offered to the model
    /// * `model` - Optional model override. If None, uses the provider's default model
    async fn chat_stream(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        model: Option<&str>,
    ) -> Result<LLMStream>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct FixedProvider {
        chunks: Vec<LLMChunk>,
    }

    #[async_trait]
    impl LLMProvider for FixedProvider {
        async fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolSchema],
            _model: Option<&str>,
        ) -> Result<LLMStream> {
            let chunks = self.chunks.clone();
            Ok(Box::pin(futures::stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    #[tokio::test]
    async fn provider_streams_chunks_in_order() {
        let mut chunks = vec![LLMChunk::token("hi")];
        chunks.extend(LLMChunk::whole_tool_call("call_1", "search", "{}"));
        chunks.push(LLMChunk::Done);
        let provider = FixedProvider {
            chunks: chunks.clone(),
        };

        let stream = provider.chat_stream(&[], &[], None).await.unwrap();
        let received: Vec<LLMChunk> = stream.map(|chunk| chunk.unwrap()).collect().await;

        assert_eq!(received, chunks);
    }
}
