//! Remote extraction collaborator using OpenAI-compatible APIs
//!
//! Sends the rendered extraction prompt to a `/chat/completions` endpoint
//! and parses the sectioned reply. The API key is read from the environment
//! variable named in the config.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{ExtractionConfig, ExtractorConfig};
use crate::extraction::ExtractionCollaborator;
use crate::extraction::parser::parse_extraction_response;
use crate::extraction::prompts::render_extraction_prompt;
use crate::extraction::types::{ExtractorError, RawExtraction};

#[derive(Debug)]
pub struct RemoteExtractor {
    client: Client,
    config: ExtractorConfig,
    api_key: String,
    assistant_name: String,
    max_episodic: usize,
    max_factual: usize,
    initial_backoff: Duration,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

impl RemoteExtractor {
    /// Create a remote extractor
    ///
    /// Fails with `ConfigError` if the API key variable is not set.
    pub fn new(
        config: &ExtractorConfig,
        extraction: &ExtractionConfig,
    ) -> Result<Self, ExtractorError> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            ExtractorError::ConfigError(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ExtractorError::ApiError(e.to_string()))?;

        info!(
            "RemoteExtractor initialized with model: {}, api_url: {}",
            config.model, config.api_url
        );

        Ok(Self {
            client,
            config: config.clone(),
            api_key,
            assistant_name: extraction.assistant_name.clone(),
            max_episodic: extraction.max_episodic,
            max_factual: extraction.max_factual,
            initial_backoff: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay (tests use milliseconds)
    pub fn with_initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    async fn call_api(&self, prompt: &str) -> Result<String, ExtractorError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: 0.3,
            max_tokens: self.config.max_tokens,
        };

        let url = format!("{}/chat/completions", self.config.api_url.trim_end_matches('/'));
        debug!("Calling extraction API at: {}", url);

        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = None;
        let mut delay = self.initial_backoff;

        for attempt in 0..max_attempts {
            match self
                .client
                .post(&url)
                .header("Authorization", format!("Bearer {}", self.api_key))
                .json(&request)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status();

                    if status == 429 || status.is_server_error() {
                        warn!(
                            "Extraction API returned {} on attempt {}/{}, waiting {:?}",
                            status,
                            attempt + 1,
                            max_attempts,
                            delay
                        );
                        last_error = Some(format!("API returned {status}"));
                        if attempt + 1 < max_attempts {
                            tokio::time::sleep(delay).await;
                            delay *= 2;
                        }
                        continue;
                    }

                    if !status.is_success() {
                        let error_text = response
                            .text()
                            .await
                            .unwrap_or_else(|_| "Unknown error".to_string());
                        return Err(ExtractorError::ApiError(format!(
                            "API returned {status}: {error_text}"
                        )));
                    }

                    let completion: ChatCompletionResponse = response
                        .json()
                        .await
                        .map_err(|e| ExtractorError::ParseError(e.to_string()))?;

                    return completion
                        .choices
                        .into_iter()
                        .next()
                        .map(|c| c.message.content)
                        .ok_or_else(|| ExtractorError::ApiError("Empty response".to_string()));
                }
                Err(e) => {
                    let err_msg = e.to_string();
                    last_error = Some(err_msg.clone());
                    if attempt + 1 < max_attempts {
                        warn!(
                            "Extraction request failed on attempt {}/{}, retrying: {}",
                            attempt + 1,
                            max_attempts,
                            err_msg
                        );
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        Err(ExtractorError::ApiError(format!(
            "Failed after {} attempts: {}",
            max_attempts,
            last_error.unwrap_or_else(|| "Unknown error".to_string())
        )))
    }
}

#[async_trait]
impl ExtractionCollaborator for RemoteExtractor {
    async fn extract(
        &self,
        batch_text: &str,
        user_identity: &str,
    ) -> Result<RawExtraction, ExtractorError> {
        let prompt = render_extraction_prompt(
            batch_text,
            user_identity,
            &self.assistant_name,
            self.max_episodic,
            self.max_factual,
        );
        let response = self.call_api(&prompt).await?;
        debug!(chars = response.len(), "Extraction response received");
        parse_extraction_response(&response)
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
