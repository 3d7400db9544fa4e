//! HTTP transport for the Bedrock Converse API.
//!
//! One reqwest client is shared across regions; the region only selects the
//! endpoint host. Authentication uses a bearer API key.

use crate::client::{ConverseOutput, ConverseRequest, Transport};
use crate::models::{BedrockConfig, CallError, CallErrorKind, EvalError, Message, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Error type names that mean "rate limited or out of quota".
const THROTTLING_ERROR_TYPES: [&str; 3] = [
    "ThrottlingException",
    "TooManyRequestsException",
    "ServiceQuotaExceededException",
];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConverseBody<'a> {
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    system: Vec<TextBlock<'a>>,
    inference_config: InferenceConfig,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'a str,
    content: Vec<TextBlock<'a>>,
}

#[derive(Debug, Serialize)]
struct TextBlock<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct InferenceConfig {
    max_tokens: u32,
    temperature: f64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConverseResponse {
    output: ResponseOutput,
    stop_reason: Option<String>,
    usage: Option<ResponseUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseOutput {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Vec<ResponseBlock>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponseUsage {
    input_tokens: u32,
    output_tokens: u32,
}

/// Error body returned by the service.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "Message")]
    message: Option<String>,
    #[serde(rename = "__type")]
    error_type: Option<String>,
}

/// Bedrock Converse client.
pub struct BedrockClient {
    client: reqwest::Client,
    api_key: String,
    /// Endpoint with a `{region}` placeholder
    endpoint_template: String,
    timeout: Duration,
}

impl BedrockClient {
    /// Create a new client.
    pub fn new(api_key: String, endpoint_template: String, timeout_secs: u64) -> Result<Self> {
        let timeout = Duration::from_secs(timeout_secs);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(EvalError::Network)?;

        Ok(Self {
            client,
            api_key,
            endpoint_template,
            timeout,
        })
    }

    /// Create a client from the `[bedrock]` config section.
    pub fn from_config(config: &BedrockConfig, api_key: String) -> Result<Self> {
        Self::new(
            api_key,
            config.endpoint_template.clone(),
            config.timeout_secs,
        )
    }

    /// Converse URL for a model in a region.
    fn url(&self, region: &str, model_id: &str) -> String {
        let endpoint = self.endpoint_template.replace("{region}", region);
        // Model ids carry a version suffix after ':' which must be escaped in the path.
        format!(
            "{}/model/{}/converse",
            endpoint.trim_end_matches('/'),
            model_id.replace(':', "%3A")
        )
    }

    fn headers(&self) -> std::result::Result<HeaderMap, CallError> {
        let mut headers = HeaderMap::new();
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| CallError::fatal(format!("invalid API key header: {e}")))?;
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

fn wire_messages(messages: &[Message]) -> Vec<WireMessage<'_>> {
    messages
        .iter()
        .map(|m| WireMessage {
            role: m.role.as_str(),
            content: vec![TextBlock {
                text: m.content.as_str(),
            }],
        })
        .collect()
}

/// Classify a non-success response.
///
/// Throttling is recognised from the status code or the service error type
/// (header first, body second).
pub(crate) fn classify_failure(
    status: StatusCode,
    error_type_header: Option<&str>,
    body: &str,
) -> CallError {
    let parsed = serde_json::from_str::<ApiErrorBody>(body).ok();
    let error_type = error_type_header
        .map(str::to_string)
        .or_else(|| parsed.as_ref().and_then(|p| p.error_type.clone()))
        .unwrap_or_default();
    let message = parsed
        .and_then(|p| p.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| body.to_string());

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || THROTTLING_ERROR_TYPES
            .iter()
            .any(|t| error_type.contains(t));

    let kind = if throttled {
        CallErrorKind::Throttled
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        CallErrorKind::Transient
    } else {
        CallErrorKind::Fatal
    };

    let message = if error_type.is_empty() {
        message
    } else {
        format!("{}: {message}", error_type.split(':').next().unwrap_or(&error_type))
    };

    CallError::new(kind, message).with_status(status.as_u16())
}

#[async_trait]
impl Transport for BedrockClient {
    async fn converse(
        &self,
        region: &str,
        request: &ConverseRequest,
    ) -> std::result::Result<ConverseOutput, CallError> {
        let body = ConverseBody {
            messages: wire_messages(&request.messages),
            system: request
                .system
                .as_deref()
                .map(|text| vec![TextBlock { text }])
                .unwrap_or_default(),
            inference_config: InferenceConfig {
                max_tokens: request.max_tokens,
                temperature: request.temperature,
            },
        };

        let url = self.url(region, &request.model_id);
        debug!(region = region, model_id = %request.model_id, "Sending converse request");

        let response = self
            .client
            .post(&url)
            .headers(self.headers()?)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CallError::transient(format!("request timed out after {:?}", self.timeout))
                } else {
                    CallError::transient(format!("network error: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_type = response
                .headers()
                .get("x-amzn-errortype")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let text = response.text().await.unwrap_or_default();
            return Err(classify_failure(status, error_type.as_deref(), &text));
        }

        let parsed: ConverseResponse = response
            .json()
            .await
            .map_err(|e| CallError::malformed(format!("failed to decode response: {e}")))?;

        let text = parsed
            .output
            .message
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join("");

        let usage = parsed.usage.unwrap_or(ResponseUsage {
            input_tokens: 0,
            output_tokens: 0,
        });

        Ok(ConverseOutput {
            text,
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
            stop_reason: parsed.stop_reason,
        })
    }
}
