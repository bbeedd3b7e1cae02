//! OpenAI-compatible chat completions client.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{ChatFragmentStream, FragmentStream, SynthesisClient, SynthesisError};
use crate::config::LlmConfig;

/// Upper bound on how much of an error body is echoed back to the caller.
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Chat client over `POST {base_url}/chat/completions`.
///
/// Built once at process start and shared by every run; the inner
/// `reqwest::Client` pools connections across requests.
pub struct ChatClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    api_key: String,
    total_timeout: Duration,
    max_in_flight: usize,
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponseRaw {
    #[serde(default)]
    choices: Vec<ChoiceRaw>,
}

#[derive(Deserialize)]
struct ChoiceRaw {
    message: MessageRaw,
}

#[derive(Deserialize)]
struct MessageRaw {
    #[serde(default)]
    content: Option<String>,
}

impl ChatClient {
    /// Creates a client from configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment variable named by
    /// `llm.api_key_env` is unset or empty, or the HTTP client cannot be built.
    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).unwrap_or_default();
        if api_key.trim().is_empty() {
            bail!("{} environment variable not set", config.api_key_env);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .pool_max_idle_per_host(config.max_in_flight)
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            total_timeout: Duration::from_secs(config.timeout_secs),
            max_in_flight: config.max_in_flight,
            temperature: config.temperature,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Builds the completion request. Only non-streaming requests carry a
    /// total timeout; a streamed report may legitimately run for many minutes.
    fn request(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        stream: bool,
    ) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            stream,
            temperature: self.temperature,
        };

        let request = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if stream {
            request
        } else {
            request.timeout(self.total_timeout)
        }
    }

    async fn send(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        stream: bool,
    ) -> Result<reqwest::Response, SynthesisError> {
        let response = self
            .request(system_prompt, user_prompt, stream)
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, stream, "chat completion request failed");
                SynthesisError::from_reqwest(e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            warn!(%status, stream, "chat completion API error");
            return Err(SynthesisError::Request(format!(
                "API error {}: {}",
                status,
                body_text.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl SynthesisClient for ChatClient {
    fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    async fn submit_one(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<String, SynthesisError> {
        let start = Instant::now();
        let response = self.send(system_prompt, user_prompt, false).await?;
        let parsed: ChatResponseRaw = response
            .json()
            .await
            .map_err(SynthesisError::from_reqwest)?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SynthesisError::Request("response contained no choices".into()))?;

        debug!(
            model = %self.model,
            duration_ms = start.elapsed().as_millis() as u64,
            chars = content.chars().count(),
            "chat completion"
        );
        Ok(content)
    }

    async fn submit_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<FragmentStream, SynthesisError> {
        let response = self.send(system_prompt, user_prompt, true).await?;
        Ok(Box::pin(ChatFragmentStream::new(response.bytes_stream())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let body = ChatRequest {
            model: "deepseek-chat",
            messages: [
                ChatMessage {
                    role: "system",
                    content: "sys",
                },
                ChatMessage {
                    role: "user",
                    content: "usr",
                },
            ],
            stream: true,
            temperature: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["model"], "deepseek-chat");
        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "usr");
        assert_eq!(json["stream"], true);
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = LlmConfig {
            api_key_env: "BOOK_DISTILL_TEST_UNSET_KEY".to_string(),
            ..LlmConfig::default()
        };
        let err = ChatClient::from_config(&config).err().unwrap();
        assert!(err.to_string().contains("BOOK_DISTILL_TEST_UNSET_KEY"));
    }

    #[test]
    fn only_non_streaming_requests_have_a_total_timeout() {
        std::env::set_var("BOOK_DISTILL_TEST_TIMEOUT_KEY", "sk-test");
        let config = LlmConfig {
            api_key_env: "BOOK_DISTILL_TEST_TIMEOUT_KEY".to_string(),
            timeout_secs: 45,
            ..LlmConfig::default()
        };
        let client = ChatClient::from_config(&config).unwrap();

        let one = client.request("sys", "usr", false).build().unwrap();
        assert_eq!(one.timeout(), Some(&Duration::from_secs(45)));

        let streamed = client.request("sys", "usr", true).build().unwrap();
        assert_eq!(streamed.timeout(), None);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_connectivity() {
        std::env::set_var("BOOK_DISTILL_TEST_KEY", "sk-test");
        let config = LlmConfig {
            // Nothing listens on the discard port.
            base_url: "http://127.0.0.1:9/v1".to_string(),
            api_key_env: "BOOK_DISTILL_TEST_KEY".to_string(),
            connect_timeout_secs: 2,
            ..LlmConfig::default()
        };
        let client = ChatClient::from_config(&config).unwrap();
        let err = client.submit_one("sys", "usr").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Connectivity);
    }
}
