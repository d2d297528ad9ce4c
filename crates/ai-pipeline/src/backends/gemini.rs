/// Google Gemini REST backend
///
/// Image editing and text use `models/{model}:generateContent`; video uses
/// `models/{model}:predictLongRunning` followed by operation polling and a
/// file download. The key travels in the `x-goog-api-key` header.
use super::{GenerativeBackend, VideoAsset, VideoOperation};
use crate::config::{BackendConfig, BackendType};
use crate::credentials::ActiveCredential;
use crate::error::BackendError;
use assets::ImageAsset;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

pub struct GeminiBackend {
    api_base: String,
    host_key_env: Option<String>,
    client: reqwest::Client,
}

impl GeminiBackend {
    /// Create new Gemini backend
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = config.request_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        Ok(Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            host_key_env: config.host_key_env.clone(),
            client: builder.build()?,
        })
    }

    fn model_endpoint(&self, model: &str, method: &str) -> String {
        format!("{}/v1beta/models/{}:{}", self.api_base, model.trim(), method)
    }

    /// The key to send. Host-managed keys are read here and nowhere else.
    fn api_key(&self, credential: &ActiveCredential) -> Result<String, BackendError> {
        match credential {
            ActiveCredential::Key(key) => Ok(key.expose().to_string()),
            ActiveCredential::HostManaged => self
                .host_key_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .ok_or(BackendError::MissingApiKey),
        }
    }

    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        credential: &ActiveCredential,
        body: &Value,
    ) -> Result<T, BackendError> {
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", self.api_key(credential)?)
            .json(body)
            .send()
            .await?;
        parse_response(response).await
    }

    async fn generate_content(
        &self,
        credential: &ActiveCredential,
        model: &str,
        body: &Value,
    ) -> Result<GenerateContentResponse, BackendError> {
        let url = self.model_endpoint(model, "generateContent");
        debug!(model, "generateContent");
        self.post_json(&url, credential, body).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Http {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or(body),
        });
    }
    let body = response.text().await?;
    serde_json::from_str(&body)
        .map_err(|err| BackendError::invalid_response(format!("{err}; raw: {body}")))
}

/// Pull `error.message` out of a Google error envelope
fn error_message(body: &str) -> Option<String> {
    let parsed: ErrorEnvelope = serde_json::from_str(body).ok()?;
    Some(match parsed.error.status {
        Some(status) => format!("{} ({})", parsed.error.message, status),
        None => parsed.error.message,
    })
}

fn inline_part(image: &ImageAsset) -> Value {
    json!({
        "inlineData": {
            "mimeType": image.mime_type(),
            "data": image.base64_payload(),
        }
    })
}

pub(crate) fn edit_request_body(images: &[ImageAsset], instruction: &str) -> Value {
    let mut parts: Vec<Value> = images.iter().map(inline_part).collect();
    parts.push(json!({ "text": instruction }));
    json!({
        "contents": [{ "parts": parts }],
        "generationConfig": { "responseModalities": ["IMAGE"] },
    })
}

pub(crate) fn describe_request_body(image: &ImageAsset, instruction: &str) -> Value {
    json!({
        "contents": [{ "parts": [inline_part(image), { "text": instruction }] }],
    })
}

pub(crate) fn text_request_body(instruction: &str) -> Value {
    json!({
        "contents": [{ "parts": [{ "text": instruction }] }],
    })
}

pub(crate) fn video_request_body(image: &ImageAsset, prompt: &str) -> Value {
    json!({
        "instances": [{
            "prompt": prompt,
            "image": {
                "bytesBase64Encoded": image.base64_payload(),
                "mimeType": image.mime_type(),
            },
        }],
        "parameters": {
            "aspectRatio": "16:9",
            "resolution": "720p",
            "sampleCount": 1,
        },
    })
}

#[async_trait::async_trait]
impl GenerativeBackend for GeminiBackend {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Gemini
    }

    async fn edit_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        images: &[ImageAsset],
        instruction: &str,
    ) -> Result<Option<ImageAsset>, BackendError> {
        let response = self
            .generate_content(credential, model, &edit_request_body(images, instruction))
            .await?;
        Ok(response.first_image())
    }

    async fn describe_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        image: &ImageAsset,
        instruction: &str,
    ) -> Result<String, BackendError> {
        let response = self
            .generate_content(credential, model, &describe_request_body(image, instruction))
            .await?;
        response
            .text()
            .ok_or_else(|| BackendError::invalid_response("response had no text"))
    }

    async fn generate_text(
        &self,
        credential: &ActiveCredential,
        model: &str,
        instruction: &str,
    ) -> Result<String, BackendError> {
        let response = self
            .generate_content(credential, model, &text_request_body(instruction))
            .await?;
        response
            .text()
            .ok_or_else(|| BackendError::invalid_response("response had no text"))
    }

    async fn submit_video(
        &self,
        credential: &ActiveCredential,
        model: &str,
        image: &ImageAsset,
        prompt: &str,
    ) -> Result<VideoOperation, BackendError> {
        let url = self.model_endpoint(model, "predictLongRunning");
        let operation: OperationResponse = self
            .post_json(&url, credential, &video_request_body(image, prompt))
            .await?;
        debug!(operation = %operation.name, "video job submitted");
        operation.into_video_operation()
    }

    async fn poll_video(
        &self,
        credential: &ActiveCredential,
        operation: &VideoOperation,
    ) -> Result<VideoOperation, BackendError> {
        let url = format!("{}/v1beta/{}", self.api_base, operation.name);
        let response = self
            .client
            .get(&url)
            .header("x-goog-api-key", self.api_key(credential)?)
            .send()
            .await?;
        let operation: OperationResponse = parse_response(response).await?;
        operation.into_video_operation()
    }

    async fn download_video(
        &self,
        credential: &ActiveCredential,
        uri: &str,
    ) -> Result<VideoAsset, BackendError> {
        let response = self
            .client
            .get(uri)
            .header("x-goog-api-key", self.api_key(credential)?)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(BackendError::Http {
                status: status.as_u16(),
                message: format!(
                    "Failed to download video file: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            });
        }

        let mime_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
            .filter(|v| v.starts_with("video/"))
            .unwrap_or_else(|| "video/mp4".to_string());
        let bytes = response.bytes().await?;

        Ok(VideoAsset {
            bytes: bytes.to_vec(),
            mime_type,
        })
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    status: Option<String>,
}

/// `generateContent` response
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

impl GenerateContentResponse {
    fn parts(&self) -> impl Iterator<Item = &Part> {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .into_iter()
            .flat_map(|content| content.parts.iter())
    }

    /// First inline image of the first candidate
    pub(crate) fn first_image(&self) -> Option<ImageAsset> {
        self.parts()
            .filter_map(|part| part.inline_data.as_ref())
            .next()
            .map(|data| ImageAsset::from_base64(&data.mime_type, &data.data))
    }

    /// Concatenated text parts of the first candidate
    pub(crate) fn text(&self) -> Option<String> {
        let text: String = self.parts().filter_map(|part| part.text.as_deref()).collect();
        let text = text.trim();
        (!text.is_empty()).then(|| text.to_string())
    }
}

/// Long-running operation resource
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationResponse {
    name: String,
    #[serde(default)]
    done: bool,
    response: Option<Value>,
    error: Option<ErrorBody>,
}

impl OperationResponse {
    pub(crate) fn into_video_operation(self) -> Result<VideoOperation, BackendError> {
        if let Some(error) = self.error {
            return Err(BackendError::Operation(error.message));
        }
        let video_uri = self.response.as_ref().and_then(|response| {
            response
                .pointer("/generateVideoResponse/generatedSamples/0/video/uri")
                .or_else(|| response.pointer("/generatedVideos/0/video/uri"))
                .and_then(Value::as_str)
                .map(str::to_string)
        });
        Ok(VideoOperation {
            name: self.name,
            done: self.done,
            video_uri,
        })
    }
}
