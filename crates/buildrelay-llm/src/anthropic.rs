//! Anthropic Messages API adapter

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::http_client::HttpClient;
use crate::payload::parse_code_payload;
use crate::prompt::build_prompt;
use crate::settings::AdapterConfig;
use crate::types::{
    FailureKind, GeneratedCode, GenerationRequest, Prompt, ProviderAdapter, ProviderFailure,
};

/// Anthropic API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicAdapter {
    client: HttpClient,
    config: AdapterConfig,
}

impl AnthropicAdapter {
    #[must_use]
    pub fn new(client: HttpClient, config: AdapterConfig) -> Self {
        Self { client, config }
    }

    /// The system prompt goes in its own field; images ride as base64 source
    /// blocks ahead of the user text.
    fn request_body(&self, prompt: &Prompt) -> AnthropicRequest {
        let mut content: Vec<ContentBlock> = prompt
            .images
            .iter()
            .map(|image| ContentBlock::Image {
                source: ImageSource {
                    source_type: "base64",
                    media_type: image.media_type.clone(),
                    data: image.base64.clone(),
                },
            })
            .collect();
        content.push(ContentBlock::Text {
            text: prompt.user.clone(),
        });

        AnthropicRequest {
            model: self.config.model.clone(),
            system: prompt.system.clone(),
            messages: vec![AnthropicMessage {
                role: "user",
                content,
            }],
            max_tokens: self.config.params.max_tokens,
            temperature: self.config.params.temperature,
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        self.config.kind.as_str()
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedCode, ProviderFailure> {
        let prompt = build_prompt(request);
        let body = self.request_body(&prompt);

        debug!(
            provider = "anthropic",
            model = %self.config.model,
            max_tokens = self.config.params.max_tokens,
            temperature = self.config.params.temperature,
            "Invoking Anthropic provider"
        );

        let http = self
            .client
            .inner()
            .post(&self.config.base_url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body);

        let raw = self.client.send(http, "anthropic").await?;
        let response: AnthropicResponse = serde_json::from_str(&raw).map_err(|e| {
            ProviderFailure::malformed(format!("anthropic response was not valid JSON: {e}"))
        })?;

        if response.stop_reason.as_deref() == Some("refusal") {
            return Err(ProviderFailure::new(
                FailureKind::ContentRejected,
                "anthropic declined the request (stop_reason=refusal)",
            ));
        }

        let text: String = response
            .content
            .iter()
            .filter(|block| block.content_type == "text")
            .filter_map(|block| block.text.as_deref())
            .collect();

        let files = parse_code_payload(&text)?;
        let mut generated = GeneratedCode::new(
            files,
            response.model.unwrap_or_else(|| self.config.model.clone()),
        );
        if let Some(usage) = response.usage {
            generated.tokens_input = Some(usage.input_tokens);
            generated.tokens_output = Some(usage.output_tokens);
        }

        debug!(
            provider = "anthropic",
            files = generated.files.len(),
            tokens_input = ?generated.tokens_input,
            tokens_output = ?generated.tokens_output,
            "Anthropic invocation completed"
        );
        Ok(generated)
    }
}

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    system: String,
    messages: Vec<AnthropicMessage>,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: &'static str,
    content: Vec<ContentBlock>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentBlock {
    Text { text: String },
    Image { source: ImageSource },
}

#[derive(Debug, Serialize)]
struct ImageSource {
    #[serde(rename = "type")]
    source_type: &'static str,
    media_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: Option<String>,
    content: Vec<ResponseBlock>,
    stop_reason: Option<String>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(rename = "type")]
    content_type: String,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Usage {
    input_tokens: u64,
    output_tokens: u64,
}
