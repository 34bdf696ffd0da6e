pub mod openai;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;

use crate::error::AppError;

pub use openai::OpenAiGateway;

/// Token deltas from a streaming completion.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// A structured-output call: the model must answer with JSON matching the
/// supplied schema.
#[derive(Debug, Clone)]
pub struct StructuredRequest {
    pub system_prompt: String,
    pub user_message: String,
    pub schema_name: &'static str,
    pub schema_description: &'static str,
    pub schema: Value,
    /// Strict schema enforcement; off for schemas with free-form maps, which
    /// strict mode cannot express.
    pub strict: bool,
}

/// A free-text streaming call.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub system_prompt: String,
    pub user_message: String,
}

/// An image attached to a chat turn, to be summarized for the router.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Narrow surface over the external model provider. Everything the agents
/// need goes through this trait so tests can substitute scripted doubles and
/// no module talks to the provider SDK directly.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Single-shot structured call; returns the raw JSON text.
    async fn complete_structured(&self, request: StructuredRequest) -> Result<String, AppError>;

    /// Streaming free-text call; yields token deltas.
    async fn stream_completion(&self, request: StreamRequest) -> Result<TextStream, AppError>;

    /// Embedding vector for one input string.
    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError>;

    /// Short textual description of an attached image.
    async fn describe_image(&self, image: &ImageAttachment) -> Result<String, AppError>;
}
