//! OpenAI-compatible chat-completions adapter
//!
//! One implementation serves OpenRouter, OpenAI, and Gemini (through Google's
//! OpenAI-compatible endpoint). They differ only in base URL, auth header
//! value, and a couple of OpenRouter attribution headers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::payload::parse_code_payload;
use crate::prompt::build_prompt;
use crate::settings::AdapterConfig;
use crate::types::{
    GeneratedCode, GenerationRequest, Prompt, ProviderAdapter, ProviderFailure, ProviderKind,
};

/// Default HTTP referer header value sent to OpenRouter
const OPENROUTER_REFERER: &str = "https://github.com/buildrelay/buildrelay";

/// Default X-Title header value sent to OpenRouter
const OPENROUTER_TITLE: &str = "buildrelay";

pub struct OpenAiCompatibleAdapter {
    client: HttpClient,
    config: AdapterConfig,
}

impl OpenAiCompatibleAdapter {
    #[must_use]
    pub fn new(client: HttpClient, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    fn request_body(&self, prompt: &Prompt) -> ChatRequest {
        let user_content = if prompt.images.is_empty() {
            ChatContent::Text(prompt.user.clone())
        } else {
            let mut parts = vec![ContentPart::Text {
                text: prompt.user.clone(),
            }];
            parts.extend(prompt.images.iter().map(|image| ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: image.data_uri(),
                },
            }));
            ChatContent::Parts(parts)
        };

        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: ChatContent::Text(prompt.system.clone()),
                },
                ChatMessage {
                    role: "user",
                    content: user_content,
                },
            ],
            max_tokens: self.config.params.max_tokens,
            temperature: self.config.params.temperature,
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ProviderFailure> {
        let provider = self.name();
        let prompt = build_prompt(request);
        let body = self.request_body(&prompt);

        debug!(
            provider,
            model = %self.config.model,
            max_tokens = self.config.params.max_tokens,
            images = prompt.images.len(),
            "Invoking chat-completions provider"
        );

        let mut http = self
            .client
            .inner()
            .post(&self.config.base_url)
            .bearer_auth(&self.config.api_key)
            .json(&body);
        if self.config.kind == ProviderKind::OpenRouter {
            http = http
                .header("HTTP-Referer", OPENROUTER_REFERER)
                .header("X-Title", OPENROUTER_TITLE);
        }

        let raw = self.client.send(http, provider).await?;
        let response: ChatResponse = serde_json::from_str(&raw).map_err(|e| {
            ProviderFailure::malformed(format!("{provider} response was not valid JSON: {e}"))
        })?;

        let choice = response.choices.into_iter().next().ok_or_else(|| {
            ProviderFailure::malformed(format!("{provider} response missing choices[0]"))
        })?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(ProviderFailure::new(
                crate::types::FailureKind::ContentRejected,
                format!("{provider} stopped generation with finish_reason=content_filter"),
            ));
        }
        let content = choice.message.content.unwrap_or_default();

        let files = parse_code_payload(&content)?;
        let mut generated = GeneratedCode::new(
            files,
            response.model.unwrap_or_else(|| self.config.model.clone()),
        );
        if let Some(usage) = response.usage {
            generated.tokens_input = Some(usage.prompt_tokens);
            generated.tokens_output = Some(usage.completion_tokens);
        }

        debug!(
            provider,
            files = generated.files.len(),
            tokens_input = ?generated.tokens_input,
            tokens_output = ?generated.tokens_output,
            "Chat-completions invocation completed"
        );
        Ok(generated)
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: ChatContent,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum ChatContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
struct ImageUrl {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    prompt_tokens: u64,
    completion_tokens: u64,
}
