use crate::domain::model::{Completion, FinishReason, Message};
use crate::domain::ports::CompletionService;
use crate::utils::error::{MettaError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const CONTEXT_LENGTH_EXCEEDED: &str = "context_length_exceeded";

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: &'a [Message],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

/// OpenAI chat-completions client.
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: String, base_url: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Maps a non-2xx reply onto a typed error. Only the
    /// `context_length_exceeded` code is singled out; everything else is kept
    /// as-is for the caller to report.
    fn classify_error(status: u16, body: &str, max_tokens: u32) -> MettaError {
        match serde_json::from_str::<ErrorEnvelope>(body) {
            Ok(envelope) => {
                let code = envelope
                    .error
                    .code
                    .or(envelope.error.kind)
                    .unwrap_or_default();
                if code == CONTEXT_LENGTH_EXCEEDED {
                    MettaError::ContextLengthExceeded { max_tokens }
                } else {
                    MettaError::Upstream {
                        status,
                        code,
                        message: envelope.error.message,
                    }
                }
            }
            Err(_) => MettaError::Upstream {
                status,
                code: String::new(),
                message: body.to_string(),
            },
        }
    }
}

#[async_trait]
impl CompletionService for OpenAiClient {
    async fn complete(&self, model: &str, max_response_tokens: u32, messages: &[Message]) -> Result<Vec<Completion>> {
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!("Making completion request to: {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&ChatRequest {
                model,
                max_tokens: max_response_tokens,
                messages,
            })
            .send()
            .await?;

        let status = response.status();
        tracing::debug!("Completion response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_error(status.as_u16(), &body, max_response_tokens));
        }

        let reply: ChatResponse = response.json().await?;
        Ok(reply
            .choices
            .into_iter()
            .map(|choice| Completion {
                content: choice.message.content.unwrap_or_default(),
                finish_reason: choice
                    .finish_reason
                    .as_deref()
                    .map(FinishReason::from)
                    .unwrap_or(FinishReason::Stop),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    fn client(server: &MockServer) -> OpenAiClient {
        OpenAiClient::new("sk-test".to_string(), server.url("/v1"), Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_complete_maps_choices() {
        let server = MockServer::start();
        let api_mock = server.mock(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .header("Authorization", "Bearer sk-test")
                .json_body_partial(r#"{"model": "gpt-3.5-turbo", "max_tokens": 100}"#);
            then.status(200)
                .header("Content-Type", "application/json")
                .json_body(serde_json::json!({
                    "id": "chatcmpl-1",
                    "choices": [
                        {"index": 0, "message": {"role": "assistant", "content": "1. Q?\n- A"}, "finish_reason": "stop"},
                        {"index": 1, "message": {"role": "assistant", "content": "1. Q?\n- A"}, "finish_reason": "length"}
                    ]
                }));
        });

        let completions = client(&server)
            .complete("gpt-3.5-turbo", 100, &[Message::user("hi")])
            .await
            .unwrap();

        api_mock.assert();
        assert_eq!(completions.len(), 2);
        assert_eq!(completions[0].content, "1. Q?\n- A");
        assert_eq!(completions[0].finish_reason, FinishReason::Stop);
        assert_eq!(completions[1].finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_context_length_is_classified() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(400).json_body(serde_json::json!({
                "error": {
                    "message": "This model's maximum context length is 4097 tokens.",
                    "type": "invalid_request_error",
                    "param": "messages",
                    "code": "context_length_exceeded"
                }
            }));
        });

        let result = client(&server).complete("gpt-3.5-turbo", 4000, &[Message::user("hi")]).await;
        assert!(matches!(
            result,
            Err(MettaError::ContextLengthExceeded { max_tokens: 4000 })
        ));
    }

    #[tokio::test]
    async fn test_other_errors_pass_through() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(POST).path("/v1/chat/completions");
            then.status(401).json_body(serde_json::json!({
                "error": {"message": "Incorrect API key provided", "type": "invalid_request_error", "code": "invalid_api_key"}
            }));
        });

        let result = client(&server).complete("gpt-3.5-turbo", 100, &[Message::user("hi")]).await;
        match result {
            Err(MettaError::Upstream { status, code, message }) => {
                assert_eq!(status, 401);
                assert_eq!(code, "invalid_api_key");
                assert_eq!(message, "Incorrect API key provided");
            }
            other => panic!("expected Upstream, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_non_json_body() {
        let err = OpenAiClient::classify_error(502, "Bad Gateway", 10);
        assert!(matches!(err, MettaError::Upstream { status: 502, .. }));
    }
}
