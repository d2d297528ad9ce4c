/// Offline scripted backend
///
/// Echoes the first reference image as the "edited" image, answers text
/// calls from its config and finishes video jobs after a fixed number of
/// polls. Every call is recorded so callers can assert on what was sent.
use super::{GenerativeBackend, VideoAsset, VideoOperation};
use crate::config::BackendType;
use crate::credentials::ActiveCredential;
use crate::error::BackendError;
use assets::ImageAsset;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use tokio::sync::oneshot;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct MockConfig {
    /// Description text; a stock sentence when `None`
    pub description: Option<String>,
    /// Raw filename answer; a stock name when `None`
    pub filename: Option<String>,
    pub fail_edit: Option<String>,
    pub fail_describe: Option<String>,
    pub fail_filename: Option<String>,
    /// Answer the edit call without an image part
    pub omit_edit_image: bool,
    /// Status checks before a video job reports done
    pub polls_until_done: u32,
    /// Finish video jobs without a result locator
    pub omit_video_uri: bool,
    pub fail_video_submit: Option<String>,
    pub fail_video_download: Option<String>,
    /// Only this explicit key is accepted; others get a 403
    pub accepted_key: Option<String>,
}

/// One recorded backend call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    EditImage {
        model: String,
        images: usize,
        instruction: String,
        credential: ActiveCredential,
    },
    DescribeImage {
        model: String,
    },
    GenerateText {
        model: String,
    },
    SubmitVideo {
        model: String,
        prompt: String,
        credential: ActiveCredential,
    },
    PollVideo {
        name: String,
    },
    DownloadVideo {
        uri: String,
        credential: ActiveCredential,
    },
}

pub struct MockBackend {
    config: MockConfig,
    calls: Mutex<Vec<MockCall>>,
    held_edits: Mutex<VecDeque<oneshot::Receiver<()>>>,
    polls: Mutex<HashMap<String, u32>>,
}

impl MockBackend {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config,
            calls: Mutex::new(Vec::new()),
            held_edits: Mutex::new(VecDeque::new()),
            polls: Mutex::new(HashMap::new()),
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Make the next `edit_image` call wait until the returned sender fires
    /// (or is dropped)
    pub fn hold_next_edit(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        self.held_edits.lock().push_back(rx);
        tx
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn check_credential(&self, credential: &ActiveCredential) -> Result<(), BackendError> {
        match (&self.config.accepted_key, credential) {
            (Some(accepted), ActiveCredential::Key(key)) if key.expose() != accepted => {
                Err(BackendError::Http {
                    status: 403,
                    message: "API key not valid. Please pass a valid API key.".to_string(),
                })
            }
            _ => Ok(()),
        }
    }

    fn scripted_failure(message: &Option<String>) -> Result<(), BackendError> {
        match message {
            Some(msg) => Err(BackendError::Operation(msg.clone())),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl GenerativeBackend for MockBackend {
    fn name(&self) -> &str {
        "Mock"
    }

    fn backend_type(&self) -> BackendType {
        BackendType::Mock
    }

    async fn edit_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        images: &[ImageAsset],
        instruction: &str,
    ) -> Result<Option<ImageAsset>, BackendError> {
        self.record(MockCall::EditImage {
            model: model.to_string(),
            images: images.len(),
            instruction: instruction.to_string(),
            credential: credential.clone(),
        });
        let held = self.held_edits.lock().pop_front();
        if let Some(rx) = held {
            let _ = rx.await;
        }
        self.check_credential(credential)?;
        Self::scripted_failure(&self.config.fail_edit)?;

        if self.config.omit_edit_image {
            return Ok(None);
        }
        Ok(images.first().cloned())
    }

    async fn describe_image(
        &self,
        credential: &ActiveCredential,
        model: &str,
        _image: &ImageAsset,
        _instruction: &str,
    ) -> Result<String, BackendError> {
        self.record(MockCall::DescribeImage {
            model: model.to_string(),
        });
        self.check_credential(credential)?;
        Self::scripted_failure(&self.config.fail_describe)?;
        Ok(self
            .config
            .description
            .clone()
            .unwrap_or_else(|| "A calm, modular living space bathed in soft daylight.".to_string()))
    }

    async fn generate_text(
        &self,
        credential: &ActiveCredential,
        model: &str,
        _instruction: &str,
    ) -> Result<String, BackendError> {
        self.record(MockCall::GenerateText {
            model: model.to_string(),
        });
        self.check_credential(credential)?;
        Self::scripted_failure(&self.config.fail_filename)?;
        Ok(self
            .config
            .filename
            .clone()
            .unwrap_or_else(|| "calm-modular-living-space".to_string()))
    }

    async fn submit_video(
        &self,
        credential: &ActiveCredential,
        model: &str,
        _image: &ImageAsset,
        prompt: &str,
    ) -> Result<VideoOperation, BackendError> {
        self.record(MockCall::SubmitVideo {
            model: model.to_string(),
            prompt: prompt.to_string(),
            credential: credential.clone(),
        });
        self.check_credential(credential)?;
        Self::scripted_failure(&self.config.fail_video_submit)?;

        let name = format!("operations/mock-{}", Uuid::new_v4());
        self.polls.lock().insert(name.clone(), 0);
        Ok(VideoOperation::pending(name))
    }

    async fn poll_video(
        &self,
        credential: &ActiveCredential,
        operation: &VideoOperation,
    ) -> Result<VideoOperation, BackendError> {
        self.record(MockCall::PollVideo {
            name: operation.name.clone(),
        });
        self.check_credential(credential)?;

        let polls = {
            let mut all = self.polls.lock();
            let count = all.entry(operation.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        if polls < self.config.polls_until_done {
            return Ok(operation.clone());
        }
        Ok(VideoOperation {
            name: operation.name.clone(),
            done: true,
            video_uri: (!self.config.omit_video_uri)
                .then(|| format!("mock://{}/video.mp4", operation.name)),
        })
    }

    async fn download_video(
        &self,
        credential: &ActiveCredential,
        uri: &str,
    ) -> Result<VideoAsset, BackendError> {
        self.record(MockCall::DownloadVideo {
            uri: uri.to_string(),
            credential: credential.clone(),
        });
        self.check_credential(credential)?;
        Self::scripted_failure(&self.config.fail_video_download)?;
        Ok(VideoAsset {
            bytes: b"mock-mp4".to_vec(),
            mime_type: "video/mp4".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Credential;

    #[tokio::test]
    async fn test_rejects_unaccepted_key() {
        let backend = MockBackend::new(MockConfig {
            accepted_key: Some("good".to_string()),
            ..Default::default()
        });
        let image = ImageAsset::from_base64("image/png", "AAAA");
        let bad = ActiveCredential::Key(Credential::new("bad").unwrap());
        let err = backend.edit_image(&bad, "m", &[image.clone()], "x").await.unwrap_err();
        assert!(err.is_authorization());

        let good = ActiveCredential::Key(Credential::new("good").unwrap());
        let out = backend.edit_image(&good, "m", &[image.clone()], "x").await.unwrap();
        assert_eq!(out, Some(image));
    }

    #[tokio::test]
    async fn test_video_finishes_after_configured_polls() {
        let backend = MockBackend::new(MockConfig {
            polls_until_done: 2,
            ..Default::default()
        });
        let cred = ActiveCredential::HostManaged;
        let image = ImageAsset::from_base64("image/png", "AAAA");
        let op = backend.submit_video(&cred, "veo", &image, "pan").await.unwrap();

        let op = backend.poll_video(&cred, &op).await.unwrap();
        assert!(!op.done);
        let op = backend.poll_video(&cred, &op).await.unwrap();
        assert!(op.done);
        assert!(op.video_uri.is_some());
    }
}
