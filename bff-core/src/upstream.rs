//! Completion provider abstraction.
//!
//! The relay only needs "give me a stream of text fragments for this
//! content". [`OpenAiProvider`] is the production implementation; tests use
//! [`crate::testing::ScriptedProvider`].

use crate::error::UpstreamError;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use openai::{ChatMessage, ChatRequest, OpenAi, StreamEvent};
use std::pin::Pin;

/// Fixed instruction sent ahead of every user message.
pub const DEFAULT_INSTRUCTION: &str = "Task Instructions:
You will be provided with a question from the user, and you need to provide an answer based on the data provided.
If the question can be answered with the data provided, you should provide a direct answer.
If the question requires reasoning or analysis, you should provide a detailed explanation of your reasoning process and the steps you took to arrive at your answer.
Your answer should always be structured and use fun emojis.";

/// One item of upstream output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamEvent {
    /// Incremental text. May be empty.
    Delta(String),
    /// The upstream signalled a clean end.
    Done,
}

/// Stream of upstream output. Ending without [`UpstreamEvent::Done`] is also a clean end.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<UpstreamEvent, UpstreamError>> + Send>>;

/// Core trait for completion providers
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Start a streaming completion for `content`.
    async fn open(&self, content: &str) -> Result<ChunkStream, UpstreamError>;

    /// Get the provider name
    fn name(&self) -> &str;

    /// Check the provider can be used, e.g. that its credentials are accepted.
    async fn verify(&self) -> Result<(), UpstreamError> {
        Ok(())
    }
}

/// Streams completions from the Chat Completions API.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: OpenAi,
    instruction: String,
}

impl OpenAiProvider {
    pub fn new(client: OpenAi) -> Self {
        Self {
            client,
            instruction: DEFAULT_INSTRUCTION.to_string(),
        }
    }

    /// Replace the instruction sent ahead of the user content.
    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.instruction = instruction.into();
        self
    }

    pub fn client(&self) -> &OpenAi {
        &self.client
    }

    fn build_request(&self, content: &str) -> ChatRequest {
        ChatRequest::new(vec![
            ChatMessage::assistant(self.instruction.clone()),
            ChatMessage::user(content),
        ])
    }
}

#[async_trait]
impl CompletionProvider for OpenAiProvider {
    async fn open(&self, content: &str) -> Result<ChunkStream, UpstreamError> {
        let events = self.client.stream(self.build_request(content)).await?;
        let chunks = events.map(|event| match event {
            Ok(StreamEvent::Delta { text }) => Ok(UpstreamEvent::Delta(text)),
            Ok(StreamEvent::Done) => Ok(UpstreamEvent::Done),
            Err(e) => Err(UpstreamError::from(e)),
        });
        Ok(Box::pin(chunks))
    }

    fn name(&self) -> &str {
        "openai"
    }

    async fn verify(&self) -> Result<(), UpstreamError> {
        self.client.validate_api_key().await?;
        tracing::info!(model = self.client.model(), "API key validated");
        Ok(())
    }
}
