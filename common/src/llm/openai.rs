use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::types::{
    ChatCompletionRequestMessageContentPartImageArgs,
    ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestUserMessage, ChatCompletionRequestUserMessageArgs,
    CreateChatCompletionRequest, CreateChatCompletionRequestArgs, CreateEmbeddingRequestArgs,
    ImageDetail, ImageUrlArgs, ResponseFormat, ResponseFormatJsonSchema,
};
use async_openai::Client;
use async_trait::async_trait;
use base64::prelude::{Engine, BASE64_STANDARD};
use futures::StreamExt;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    Retry,
};
use tracing::debug;

use crate::error::AppError;
use crate::utils::config::AppConfig;

use super::{ImageAttachment, ModelGateway, StreamRequest, StructuredRequest, TextStream};

/// What the vision model is asked to do with an attached image. Score report
/// screenshots are the common case.
const IMAGE_DESCRIPTION_PROMPT: &str = "첨부된 이미지는 수험생이 올린 입시 관련 자료입니다. \
    성적표라면 과목별 등급/표준점수/백분위를, 모집요강이라면 핵심 수치를 \
    짧은 한국어 문장으로 정리해 주세요.";

/// Production gateway over the OpenAI-compatible API. Transient failures are
/// retried with jittered exponential backoff; every attempt runs under the
/// configured per-call timeout.
pub struct OpenAiGateway {
    client: Client<OpenAIConfig>,
    chat_model: String,
    embedding_model: String,
    embedding_dimensions: u32,
    call_timeout: Duration,
}

impl OpenAiGateway {
    pub fn from_config(config: &AppConfig) -> Self {
        let client = Client::with_config(
            OpenAIConfig::new()
                .with_api_key(&config.model_api_key)
                .with_api_base(&config.model_base_url),
        );

        Self {
            client,
            chat_model: config.chat_model.clone(),
            embedding_model: config.embedding_model.clone(),
            embedding_dimensions: config.embedding_dim,
            call_timeout: Duration::from_millis(config.model_call_timeout_ms),
        }
    }

    fn retry_strategy() -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100).map(jitter).take(3)
    }

    fn build_structured_request(
        &self,
        request: &StructuredRequest,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some(request.schema_description.to_string()),
                name: request.schema_name.to_string(),
                schema: Some(request.schema.clone()),
                strict: Some(request.strict),
            },
        };

        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user_message.clone()).into(),
            ])
            .response_format(response_format)
            .build()?)
    }

    fn build_stream_request(
        &self,
        request: &StreamRequest,
    ) -> Result<CreateChatCompletionRequest, AppError> {
        Ok(CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages([
                ChatCompletionRequestSystemMessage::from(request.system_prompt.clone()).into(),
                ChatCompletionRequestUserMessage::from(request.user_message.clone()).into(),
            ])
            .stream(true)
            .build()?)
    }

    async fn with_deadline<T, F>(&self, label: &str, fut: F) -> Result<T, AppError>
    where
        F: std::future::Future<Output = Result<T, AppError>>,
    {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| AppError::Timeout(format!("model call '{label}' timed out")))?
    }
}

#[async_trait]
impl ModelGateway for OpenAiGateway {
    async fn complete_structured(&self, request: StructuredRequest) -> Result<String, AppError> {
        let chat_request = self.build_structured_request(&request)?;

        let response = Retry::spawn(Self::retry_strategy(), || {
            let chat_request = chat_request.clone();
            async move {
                self.with_deadline(request.schema_name, async {
                    Ok(self.client.chat().create(chat_request).await?)
                })
                .await
            }
        })
        .await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::ModelParsing("No content found in model response".into()))
    }

    async fn stream_completion(&self, request: StreamRequest) -> Result<TextStream, AppError> {
        let chat_request = self.build_stream_request(&request)?;

        let stream = self
            .with_deadline("stream_completion", async {
                Ok(self.client.chat().create_stream(chat_request).await?)
            })
            .await?;

        let deltas = stream.filter_map(|result| async move {
            match result {
                Ok(response) => {
                    let content = response
                        .choices
                        .first()
                        .and_then(|choice| choice.delta.content.clone())
                        .unwrap_or_default();
                    (!content.is_empty()).then_some(Ok(content))
                }
                Err(e) => Some(Err(AppError::Model(e))),
            }
        });

        Ok(Box::pin(deltas))
    }

    async fn embed(&self, input: &str) -> Result<Vec<f32>, AppError> {
        let request = CreateEmbeddingRequestArgs::default()
            .model(&self.embedding_model)
            .dimensions(self.embedding_dimensions)
            .input([input])
            .build()?;

        let response = Retry::spawn(Self::retry_strategy(), || {
            let request = request.clone();
            async move {
                self.with_deadline("embedding", async {
                    Ok(self.client.embeddings().create(request).await?)
                })
                .await
            }
        })
        .await?;

        let embedding: Vec<f32> = response
            .data
            .first()
            .ok_or_else(|| AppError::ModelParsing("No embedding data received".into()))?
            .embedding
            .clone();

        debug!(dimensions = embedding.len(), "Embedding generated");

        Ok(embedding)
    }

    async fn describe_image(&self, image: &ImageAttachment) -> Result<String, AppError> {
        let data_url = format!(
            "data:{};base64,{}",
            image.content_type,
            BASE64_STANDARD.encode(&image.bytes)
        );

        let text_part = ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(IMAGE_DESCRIPTION_PROMPT)
            .build()?;
        let image_part = ChatCompletionRequestMessageContentPartImageArgs::default()
            .image_url(ImageUrlArgs::default().url(data_url).detail(ImageDetail::Auto).build()?)
            .build()?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.chat_model)
            .messages([ChatCompletionRequestUserMessageArgs::default()
                .content(vec![text_part.into(), image_part.into()])
                .build()?
                .into()])
            .build()?;

        let response = Retry::spawn(Self::retry_strategy(), || {
            let request = request.clone();
            async move {
                self.with_deadline("describe_image", async {
                    Ok(self.client.chat().create(request).await?)
                })
                .await
            }
        })
        .await?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| AppError::ModelParsing("No image description received".into()))
    }
}
