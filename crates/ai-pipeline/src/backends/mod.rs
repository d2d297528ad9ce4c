/// Generative backends abstraction
///
/// Provides unified interface for the three capabilities the pipeline uses:
/// - multi-image + text -> image
/// - image + text -> text (and text -> text)
/// - image + text -> long-running video job
pub mod gemini;
pub mod mock;

use assets::ImageAsset;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use gemini::GeminiBackend;
pub use mock::{MockBackend, MockCall, MockConfig};

use crate::config::{BackendConfig, BackendType};
use crate::credentials::ActiveCredential;
use crate::error::BackendError;

/// Handle of a long-running video job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoOperation {
    /// Opaque operation name used for polling
    pub name: String,

    /// Whether the backend reports the job as finished
    pub done: bool,

    /// Result locator, present once done
    pub video_uri: Option<String>,
}

impl VideoOperation {
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            done: false,
            video_uri: None,
        }
    }
}

/// Downloaded video
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoAsset {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl VideoAsset {
    pub fn extension(&self) -> &str {
        match self.mime_type.split_once('/') {
            Some((_, subtype)) if !subtype.is_empty() => subtype,
            _ => "mp4",
        }
    }
}

/// Generative backend trait
#[async_trait::async_trait]
pub trait GenerativeBackend: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Backend type
    fn backend_type(&self) -> BackendType;

    /// Combine `images` according to `instruction`; `Ok(None)` when the
    /// response carried no image
    async fn edit_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        images: &[ImageAsset],
        instruction: &str,
    ) -> Result<Option<ImageAsset>, BackendError>;

    /// Text about a single image
    async fn describe_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        image: &ImageAsset,
        instruction: &str,
    ) -> Result<String, BackendError>;

    /// Plain text completion
    async fn generate_text(
        &self,
        credential: &ActiveCredential,
        model: &str,
        instruction: &str,
    ) -> Result<String, BackendError>;

    /// Start a video job from a still image
    async fn submit_video(
        &self,
        credential: &ActiveCredential,
        model: &str,
        image: &ImageAsset,
        prompt: &str,
    ) -> Result<VideoOperation, BackendError>;

    /// Refresh the status of a video job
    async fn poll_video(
        &self,
        credential: &ActiveCredential,
        operation: &VideoOperation,
    ) -> Result<VideoOperation, BackendError>;

    /// Fetch the finished video; the request carries the credential
    async fn download_video(
        &self,
        credential: &ActiveCredential,
        uri: &str,
    ) -> Result<VideoAsset, BackendError>;
}

/// Backend factory for creating backend instances
pub struct BackendFactory;

impl BackendFactory {
    /// Create backend from config
    pub fn create(config: &BackendConfig) -> Result<Arc<dyn GenerativeBackend>, BackendError> {
        match config.backend_type {
            BackendType::Gemini => Ok(Arc::new(GeminiBackend::new(config)?)),
            BackendType::Mock => Ok(Arc::new(MockBackend::new(MockConfig::default()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factory_builds_configured_backend() {
        let mock = BackendFactory::create(&BackendConfig::new(BackendType::Mock)).unwrap();
        assert_eq!(mock.backend_type(), BackendType::Mock);

        let gemini = BackendFactory::create(&BackendConfig::new(BackendType::Gemini)).unwrap();
        assert_eq!(gemini.name(), "Gemini");
    }

    #[test]
    fn test_video_extension() {
        let video = VideoAsset {
            bytes: vec![],
            mime_type: "video/mp4".to_string(),
        };
        assert_eq!(video.extension(), "mp4");
    }
}
