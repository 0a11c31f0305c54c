use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::error::CompletionError;

const SYSTEM_PROMPT: &str =
    "Ты — добрый, умный и отзывчивый психолог, который всегда готов помочь.";
const MODEL: &str = "yandexgpt-lite";
const TEMPERATURE: f64 = 0.6;
const MAX_TOKENS: &str = "2000";

const API_KEY_PLACEHOLDER: &str = "YOUR_YANDEX_API_KEY";
const FOLDER_ID_PLACEHOLDER: &str = "YOUR_YANDEX_FOLDER_ID";

/// Something that turns one user message into one model reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, user_text: &str) -> Result<String, CompletionError>;
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    pub model_uri: String,
    pub completion_options: CompletionOptions,
    pub messages: Vec<PromptMessage>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    pub stream: bool,
    pub temperature: f64,
    /// The provider takes this as a string.
    pub max_tokens: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptMessage {
    pub role: PromptRole,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    result: CompletionResult,
}

#[derive(Debug, Deserialize)]
struct CompletionResult {
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    message: AlternativeMessage,
}

#[derive(Debug, Deserialize)]
struct AlternativeMessage {
    text: String,
}

impl CompletionRequest {
    pub fn new(folder_id: &str, user_text: &str) -> Self {
        Self {
            model_uri: format!("gpt://{}/{}", folder_id, MODEL),
            completion_options: CompletionOptions {
                stream: false,
                temperature: TEMPERATURE,
                max_tokens: MAX_TOKENS.to_string(),
            },
            messages: vec![
                PromptMessage {
                    role: PromptRole::System,
                    text: SYSTEM_PROMPT.to_string(),
                },
                PromptMessage {
                    role: PromptRole::User,
                    text: user_text.to_string(),
                },
            ],
        }
    }
}

/// Client for the Yandex Foundation Models completion endpoint.
pub struct YandexGpt {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    folder_id: Option<String>,
}

impl YandexGpt {
    pub fn new(endpoint: String, api_key: Option<String>, folder_id: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key,
            folder_id,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.completion_url.clone(),
            config.api_key.clone(),
            config.folder_id.clone(),
        )
    }

    pub fn is_configured(&self) -> bool {
        self.credentials().is_ok()
    }

    fn credentials(&self) -> Result<(&str, &str), CompletionError> {
        let api_key = usable(self.api_key.as_deref(), API_KEY_PLACEHOLDER);
        let folder_id = usable(self.folder_id.as_deref(), FOLDER_ID_PLACEHOLDER);
        match (api_key, folder_id) {
            (Some(key), Some(folder)) => Ok((key, folder)),
            _ => Err(CompletionError::Config(
                "YANDEX_API_KEY or YANDEX_FOLDER_ID is not set".to_string(),
            )),
        }
    }
}

/// Surrounding whitespace is dropped, so only the trimmed value is sent.
fn usable<'a>(value: Option<&'a str>, placeholder: &str) -> Option<&'a str> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty() && *v != placeholder)
}

#[async_trait]
impl CompletionProvider for YandexGpt {
    async fn complete(&self, user_text: &str) -> Result<String, CompletionError> {
        let (api_key, folder_id) = self.credentials()?;
        let request = CompletionRequest::new(folder_id, user_text);
        debug!(endpoint = %self.endpoint, chars = user_text.len(), "requesting completion");

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Api-Key {}", api_key))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: CompletionResponse =
            serde_json::from_str(&body).map_err(|e| CompletionError::Parse(e.to_string()))?;
        let reply = parsed
            .result
            .alternatives
            .into_iter()
            .next()
            .map(|alternative| alternative.message.text)
            .ok_or_else(|| CompletionError::Parse("no alternatives in result".to_string()))?;

        info!(chars = reply.len(), "completion received");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use serde_json::{json, Value};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    /// Serves `reply` with `status` on `/completion` and records every request.
    async fn spawn_provider(status: StatusCode, reply: Value) -> (String, Seen) {
        let seen: Seen = Arc::new(Mutex::new(Vec::new()));
        let handler = {
            let seen = seen.clone();
            move |headers: HeaderMap, Json(body): Json<Value>| {
                let seen = seen.clone();
                let reply = reply.clone();
                async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    seen.lock().unwrap().push((auth, body));
                    (status, Json(reply))
                }
            }
        };
        let app = Router::new().route("/completion", post(handler));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/completion", addr), seen)
    }

    fn success_body(text: &str) -> Value {
        json!({
            "result": {
                "alternatives": [
                    {"message": {"role": "assistant", "text": text}, "status": "ALTERNATIVE_STATUS_FINAL"}
                ],
                "usage": {"inputTextTokens": "12", "completionTokens": "3", "totalTokens": "15"},
                "modelVersion": "23.10.2024"
            }
        })
    }

    fn configured(endpoint: String) -> YandexGpt {
        YandexGpt::new(endpoint, Some("secret".to_string()), Some("b1gfolder".to_string()))
    }

    #[test]
    fn request_has_provider_shape() {
        let request = CompletionRequest::new("b1gfolder", "Hello");
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({
                "modelUri": "gpt://b1gfolder/yandexgpt-lite",
                "completionOptions": {"stream": false, "temperature": 0.6, "maxTokens": "2000"},
                "messages": [
                    {"role": "system", "text": SYSTEM_PROMPT},
                    {"role": "user", "text": "Hello"}
                ]
            })
        );
    }

    #[test]
    fn user_text_is_passed_verbatim() {
        let request = CompletionRequest::new("f", "  <b>raw</b>\n");
        assert_eq!(request.messages[1].text, "  <b>raw</b>\n");
        assert_eq!(request.messages[1].role, PromptRole::User);
    }

    #[test]
    fn placeholders_count_as_missing() {
        let gpt = YandexGpt::new(
            "http://unused".to_string(),
            Some(API_KEY_PLACEHOLDER.to_string()),
            Some("folder".to_string()),
        );
        assert!(!gpt.is_configured());

        let gpt = YandexGpt::new(
            "http://unused".to_string(),
            Some("key".to_string()),
            Some(FOLDER_ID_PLACEHOLDER.to_string()),
        );
        assert!(!gpt.is_configured());

        let gpt = YandexGpt::new("http://unused".to_string(), Some("  ".to_string()), Some("f".to_string()));
        assert!(!gpt.is_configured());
    }

    #[tokio::test]
    async fn returns_first_alternative_text() {
        let (endpoint, seen) = spawn_provider(StatusCode::OK, success_body("Hi there")).await;
        let reply = configured(endpoint).complete("Hello").await.unwrap();
        assert_eq!(reply, "Hi there");

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Api-Key secret"));
        assert_eq!(seen[0].1["messages"][1]["text"], "Hello");
        assert_eq!(seen[0].1["modelUri"], "gpt://b1gfolder/yandexgpt-lite");
    }

    #[tokio::test]
    async fn padded_credentials_are_sent_trimmed() {
        let (endpoint, seen) = spawn_provider(StatusCode::OK, success_body("ok")).await;
        let gpt = YandexGpt::new(
            endpoint,
            Some(" secret\n".to_string()),
            Some("\tb1gfolder ".to_string()),
        );
        assert_eq!(gpt.complete("Hello").await.unwrap(), "ok");

        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0.as_deref(), Some("Api-Key secret"));
        assert_eq!(seen[0].1["modelUri"], "gpt://b1gfolder/yandexgpt-lite");
    }

    #[tokio::test]
    async fn missing_credentials_make_no_request() {
        let (endpoint, seen) = spawn_provider(StatusCode::OK, success_body("unused")).await;
        let gpt = YandexGpt::new(endpoint, None, Some("b1gfolder".to_string()));

        let err = gpt.complete("test").await.unwrap_err();
        assert!(matches!(err, CompletionError::Config(_)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let (endpoint, _) =
            spawn_provider(StatusCode::INTERNAL_SERVER_ERROR, json!({"error": "boom"})).await;
        let err = configured(endpoint).complete("Hello").await.unwrap_err();
        match err {
            CompletionError::Provider { status, body } => {
                assert_eq!(status, 500);
                assert!(body.contains("boom"));
            }
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_without_alternatives_is_a_parse_error() {
        let (endpoint, _) =
            spawn_provider(StatusCode::OK, json!({"result": {"alternatives": []}})).await;
        let err = configured(endpoint).complete("Hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::Parse(_)));
    }

    #[tokio::test]
    async fn success_with_wrong_shape_is_a_parse_error() {
        let (endpoint, _) = spawn_provider(StatusCode::OK, json!({"choices": []})).await;
        let err = configured(endpoint).complete("Hello").await.unwrap_err();
        assert!(matches!(err, CompletionError::Parse(_)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_a_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = configured(format!("http://{}/completion", addr))
            .complete("Hello")
            .await
            .unwrap_err();
        assert!(matches!(err, CompletionError::Transport(_)));
    }
}
