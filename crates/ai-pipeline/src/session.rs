/// Session context: one backend, one credential gate, one image run slot and
/// one video slot for the lifetime of a user session.
use assets::ImageAsset;
use std::sync::Arc;
use tracing::{debug, info};

use crate::backends::{GenerativeBackend, VideoAsset};
use crate::config::BackendConfig;
use crate::credentials::{
    Authorization, Credential, CredentialGate, EnvHostKey, HostKeySelector, PendingAction,
    SessionStore,
};
use crate::error::PipelineError;
use crate::pipeline::{GenerationRequest, GenerationResult, Orchestrator, PipelineRun};
use crate::video::{VideoJob, VideoRunner};

/// How a gated action ended
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Completed(T),
    /// Parked in the credential gate until [`Session::resolve`] is called
    Suspended(SuspendReason),
    /// A newer run took over; this result was dropped
    Superseded,
}

impl<T> Outcome<T> {
    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, Outcome::Suspended(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SuspendReason {
    /// No override, session or host key was available
    MissingCredential,
    /// The backend rejected the key that was used
    Rejected(String),
}

/// Result of re-invoking a parked action
#[derive(Debug, Clone, PartialEq)]
pub enum Resumed {
    Image(Outcome<GenerationResult>),
    Video(Outcome<VideoAsset>),
}

pub struct Session<B: GenerativeBackend + ?Sized> {
    backend: Arc<B>,
    config: BackendConfig,
    gate: CredentialGate,
    pipeline: Orchestrator,
    video: VideoRunner,
}

impl<B: GenerativeBackend + ?Sized> Session<B> {
    /// Build a session. A host key selector is attached when the config
    /// names a host key variable.
    pub fn new(backend: Arc<B>, config: BackendConfig, store: Arc<dyn SessionStore>) -> Self {
        let mut gate = CredentialGate::new(config.session_key(), store);
        if let Some(var) = &config.host_key_env {
            gate = gate.with_host(Arc::new(EnvHostKey::new(var.clone())));
        }
        let video = VideoRunner::new(config.video_model.clone(), config.poll.clone());
        Self {
            backend,
            config,
            gate,
            pipeline: Orchestrator::new(),
            video,
        }
    }

    /// Replace the host key selector
    pub fn with_host(mut self, host: Arc<dyn HostKeySelector>) -> Self {
        self.gate = self.gate.with_host(host);
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn gate(&self) -> &CredentialGate {
        &self.gate
    }

    pub fn run_snapshot(&self) -> PipelineRun {
        self.pipeline.snapshot()
    }

    pub fn video_snapshot(&self) -> VideoJob {
        self.video.snapshot()
    }

    /// Validate, gate and run the three-stage image pipeline
    pub async fn generate(
        &self,
        request: GenerationRequest,
        override_key: Option<&Credential>,
    ) -> Result<Outcome<GenerationResult>, PipelineError> {
        request.validate()?;

        let generation = self.pipeline.begin();
        let action = PendingAction::Image(request.clone());
        let credential = match self.gate.authorize(&action, override_key).await {
            Authorization::Proceed(credential) => credential,
            Authorization::Suspend => {
                self.pipeline.suspend(generation);
                return Ok(Outcome::Suspended(SuspendReason::MissingCredential));
            }
        };

        self.video.reset();
        match self
            .pipeline
            .run(generation, self.backend.as_ref(), &credential, &request)
            .await
        {
            Err(PipelineError::Authorization(message)) => {
                info!("image request rejected by the backend, asking for a new key");
                self.gate.park(action);
                Ok(Outcome::Suspended(SuspendReason::Rejected(message)))
            }
            other => other,
        }
    }

    /// Animate the current edited image
    pub async fn generate_video(
        &self,
        override_key: Option<&Credential>,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Outcome<VideoAsset>, PipelineError> {
        let source = self
            .pipeline
            .snapshot()
            .edited_image
            .ok_or_else(|| PipelineError::validation("Generate an image before creating a video."))?;
        self.run_video(source, override_key, on_status).await
    }

    async fn run_video(
        &self,
        source: ImageAsset,
        override_key: Option<&Credential>,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Outcome<VideoAsset>, PipelineError> {
        let action = PendingAction::Video(source.clone());
        let credential = match self.gate.authorize(&action, override_key).await {
            Authorization::Proceed(credential) => credential,
            Authorization::Suspend => {
                return Ok(Outcome::Suspended(SuspendReason::MissingCredential))
            }
        };

        let generation = self.video.begin();
        match self
            .video
            .run(generation, self.backend.as_ref(), &credential, &source, on_status)
            .await
        {
            Err(PipelineError::Authorization(message)) => {
                info!("video request rejected by the backend, asking for a new key");
                self.gate.park(action);
                Ok(Outcome::Suspended(SuspendReason::Rejected(message)))
            }
            other => other,
        }
    }

    /// Answer a credential prompt. `None` cancels the pending action. With a
    /// key (or an empty answer) the parked action is re-invoked with its
    /// original inputs.
    pub async fn resolve(
        &self,
        supplied: Option<&str>,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Option<Resumed>, PipelineError> {
        let Some((action, key)) = self.gate.resolve(supplied) else {
            return Ok(None);
        };
        debug!(action = ?action.kind(), "re-invoking parked action");
        let resumed = match action {
            PendingAction::Image(request) => {
                Resumed::Image(self.generate(request, key.as_ref()).await?)
            }
            PendingAction::Video(source) => {
                Resumed::Video(self.run_video(source, key.as_ref(), on_status).await?)
            }
        };
        Ok(Some(resumed))
    }

    /// Ask the host to show its key picker
    pub async fn open_host_selection(&self) -> bool {
        self.gate.open_host_selection().await
    }

    /// Erase the session key; nothing happens without confirmation
    pub fn clear_credential(&self, confirmed: bool) -> bool {
        self.gate.clear(confirmed)
    }

    /// Show a saved scenario: replaces inputs and outputs of the run slot,
    /// drops the video and supersedes anything in flight
    pub fn load_scenario_outputs(
        &self,
        original_images: Vec<ImageAsset>,
        prompt: String,
        edited_image: ImageAsset,
        description: Option<String>,
        filename: Option<String>,
    ) {
        self.pipeline
            .load(original_images, prompt, edited_image, description, filename);
        self.video.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockConfig};
    use crate::config::{BackendType, ModelMode};
    use crate::credentials::MemorySessionStore;

    fn session(config: MockConfig) -> Session<MockBackend> {
        let mut backend_config = BackendConfig::new(BackendType::Mock);
        backend_config.host_key_env = None;
        Session::new(
            Arc::new(MockBackend::new(config)),
            backend_config,
            Arc::new(MemorySessionStore::new()),
        )
    }

    fn request() -> GenerationRequest {
        GenerationRequest::new(
            vec![ImageAsset::from_base64("image/png", "AAAA")],
            "a sunlit loft",
            "system",
            ModelMode::Standard,
        )
    }

    #[test]
    fn test_outcome_helpers() {
        assert_eq!(Outcome::Completed(3).completed(), Some(3));
        assert!(Outcome::<u8>::Suspended(SuspendReason::MissingCredential).is_suspended());
        assert_eq!(Outcome::<u8>::Superseded.completed(), None);
    }

    #[tokio::test]
    async fn test_video_without_edited_image_is_rejected() {
        let session = session(MockConfig::default());
        let err = session.generate_video(None, &|_| {}).await.unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert!(session.backend().calls().is_empty());
        assert_eq!(session.gate().pending(), None);
    }

    #[tokio::test]
    async fn test_cancelled_prompt_runs_nothing() {
        let session = session(MockConfig::default());
        let outcome = session.generate(request(), None).await.unwrap();
        assert_eq!(outcome, Outcome::Suspended(SuspendReason::MissingCredential));

        assert_eq!(session.resolve(None, &|_| {}).await.unwrap(), None);
        assert!(session.backend().calls().is_empty());
    }

    #[tokio::test]
    async fn test_load_scenario_outputs_replaces_run() {
        let session = session(MockConfig::default());
        let edited = ImageAsset::from_base64("image/jpeg", "EDIT");
        session.load_scenario_outputs(
            vec![ImageAsset::from_base64("image/png", "ORIG")],
            "saved prompt".to_string(),
            edited.clone(),
            Some("desc".to_string()),
            None,
        );

        let run = session.run_snapshot();
        assert_eq!(run.prompt, "saved prompt");
        assert_eq!(run.edited_image, Some(edited));
        assert!(session.video_snapshot().result.is_none());
    }
}
