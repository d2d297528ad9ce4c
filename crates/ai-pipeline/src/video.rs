/// Video job runner: submit, poll until done, download
use assets::ImageAsset;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info, warn};

use crate::backends::{GenerativeBackend, VideoAsset};
use crate::config::PollPolicy;
use crate::credentials::ActiveCredential;
use crate::error::{BackendError, PipelineError};
use crate::prompts;
use crate::session::Outcome;

pub const STATUS_INITIALIZING: &str = "Initializing video generation...";
pub const STATUS_GENERATING: &str = "Generating video... This may take a few minutes.";
pub const STATUS_DOWNLOADING: &str = "Downloading video...";
pub const STATUS_DONE: &str = "Done.";

/// State of the latest video job
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoJob {
    pub generation: u64,
    pub source_image: Option<ImageAsset>,
    pub status: String,
    pub running: bool,
    pub result: Option<VideoAsset>,
    pub error: Option<String>,
}

pub struct VideoRunner {
    model: String,
    poll: PollPolicy,
    state: Mutex<VideoJob>,
    generation: AtomicU64,
}

impl VideoRunner {
    pub fn new(model: impl Into<String>, poll: PollPolicy) -> Self {
        Self {
            model: model.into(),
            poll,
            state: Mutex::new(VideoJob::default()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> VideoJob {
        self.state.lock().clone()
    }

    /// Drop any shown video and invalidate jobs still in flight
    pub fn reset(&self) {
        let mut state = self.state.lock();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *state = VideoJob {
            generation,
            ..VideoJob::default()
        };
    }

    /// Take a generation for a new job without touching the shown state
    pub fn begin(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Apply `f` only while `generation` is current. The check runs under the
    /// state lock so a concurrent `reset` lands either before or after it.
    fn commit(&self, generation: u64, f: impl FnOnce(&mut VideoJob)) -> bool {
        let mut state = self.state.lock();
        if self.generation.load(Ordering::SeqCst) != generation {
            return false;
        }
        f(&mut state);
        true
    }

    fn set_status(&self, generation: u64, status: &str, on_status: &(dyn Fn(&str) + Send + Sync)) {
        if self.commit(generation, |job| job.status = status.to_string()) {
            on_status(status);
        }
    }

    /// Submit a job for `source`, poll it to completion and download the result.
    pub async fn run<B: GenerativeBackend + ?Sized>(
        &self,
        generation: u64,
        backend: &B,
        credential: &ActiveCredential,
        source: &ImageAsset,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Outcome<VideoAsset>, PipelineError> {
        if !self.commit(generation, |job| {
            *job = VideoJob {
                generation,
                source_image: Some(source.clone()),
                running: true,
                ..VideoJob::default()
            };
        }) {
            return Ok(Outcome::Superseded);
        }

        match self.drive(generation, backend, credential, source, on_status).await {
            Ok(Some(video)) => {
                if !self.commit(generation, |job| {
                    job.running = false;
                    job.result = Some(video.clone());
                }) {
                    return Ok(Outcome::Superseded);
                }
                self.set_status(generation, STATUS_DONE, on_status);
                info!(generation, bytes = video.bytes.len(), "video ready");
                Ok(Outcome::Completed(video))
            }
            Ok(None) => Ok(Outcome::Superseded),
            Err(err) => {
                let error = if err.is_authorization() {
                    PipelineError::Authorization(err.to_string())
                } else {
                    PipelineError::Video(err.to_string())
                };
                warn!(generation, error = %error, "video generation failed");
                if !self.commit(generation, |job| {
                    job.running = false;
                    job.result = None;
                    job.error = Some(error.to_string());
                }) {
                    return Ok(Outcome::Superseded);
                }
                Err(error)
            }
        }
    }

    /// `Ok(None)` when the job was superseded while polling
    async fn drive<B: GenerativeBackend + ?Sized>(
        &self,
        generation: u64,
        backend: &B,
        credential: &ActiveCredential,
        source: &ImageAsset,
        on_status: &(dyn Fn(&str) + Send + Sync),
    ) -> Result<Option<VideoAsset>, BackendError> {
        self.set_status(generation, STATUS_INITIALIZING, on_status);
        let mut operation = backend
            .submit_video(credential, &self.model, source, prompts::DEFAULT_VIDEO_PROMPT)
            .await?;

        self.set_status(generation, STATUS_GENERATING, on_status);
        let mut attempts = 0u32;
        let mut delay = self.poll.initial_delay();
        while !operation.done {
            if self.poll.exhausted(attempts) {
                return Err(BackendError::Operation(format!(
                    "Video generation did not finish after {attempts} status checks."
                )));
            }
            tokio::time::sleep(delay).await;
            if self.generation.load(Ordering::SeqCst) != generation {
                debug!(generation, "video job superseded while polling");
                return Ok(None);
            }
            attempts += 1;
            operation = backend.poll_video(credential, &operation).await?;
            debug!(generation, attempts, done = operation.done, "polled video job");
            delay = self.poll.next_delay(delay);
        }

        let uri = operation.video_uri.ok_or_else(|| {
            BackendError::Operation(
                "Video generation completed, but no download link was found.".to_string(),
            )
        })?;

        self.set_status(generation, STATUS_DOWNLOADING, on_status);
        let video = backend.download_video(credential, &uri).await?;
        Ok(Some(video))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{MockBackend, MockCall, MockConfig};
    use std::time::Duration;

    fn fast_poll(max_attempts: Option<u32>) -> PollPolicy {
        PollPolicy {
            interval_ms: 1,
            max_interval_ms: 2,
            backoff: 2.0,
            max_attempts,
        }
    }

    fn source() -> ImageAsset {
        ImageAsset::from_base64("image/png", "SRC")
    }

    #[tokio::test]
    async fn test_video_polls_until_done_and_reports_status() {
        let backend = MockBackend::new(MockConfig {
            polls_until_done: 3,
            ..Default::default()
        });
        let runner = VideoRunner::new("veo-test", fast_poll(Some(10)));
        let statuses = Mutex::new(Vec::new());
        let on_status = |s: &str| statuses.lock().push(s.to_string());

        let generation = runner.begin();
        let outcome = runner
            .run(generation, &backend, &ActiveCredential::HostManaged, &source(), &on_status)
            .await
            .unwrap();

        let Outcome::Completed(video) = outcome else {
            panic!("expected a video");
        };
        assert_eq!(video.mime_type, "video/mp4");
        assert_eq!(
            *statuses.lock(),
            vec![STATUS_INITIALIZING, STATUS_GENERATING, STATUS_DOWNLOADING, STATUS_DONE]
        );

        let calls = backend.calls();
        let polls = calls.iter().filter(|c| matches!(c, MockCall::PollVideo { .. })).count();
        assert_eq!(polls, 3);
        assert!(matches!(
            calls.last(),
            Some(MockCall::DownloadVideo { credential: ActiveCredential::HostManaged, .. })
        ));
        assert!(matches!(
            &calls[0],
            MockCall::SubmitVideo { model, prompt, .. }
                if model == "veo-test" && prompt == prompts::DEFAULT_VIDEO_PROMPT
        ));

        let job = runner.snapshot();
        assert!(!job.running);
        assert_eq!(job.status, STATUS_DONE);
        assert!(job.result.is_some());
    }

    #[tokio::test]
    async fn test_missing_locator_is_fatal() {
        let backend = MockBackend::new(MockConfig {
            omit_video_uri: true,
            ..Default::default()
        });
        let runner = VideoRunner::new("veo", fast_poll(None));
        let generation = runner.begin();
        let err = runner
            .run(generation, &backend, &ActiveCredential::HostManaged, &source(), &|_| {})
            .await
            .unwrap_err();

        assert!(err.to_string().contains("no download link"));
        assert!(runner.snapshot().result.is_none());
        assert!(!backend
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::DownloadVideo { .. })));
    }

    #[tokio::test]
    async fn test_poll_cap_stops_the_loop() {
        let backend = MockBackend::new(MockConfig {
            polls_until_done: 100,
            ..Default::default()
        });
        let runner = VideoRunner::new("veo", fast_poll(Some(3)));
        let generation = runner.begin();
        let err = runner
            .run(generation, &backend, &ActiveCredential::HostManaged, &source(), &|_| {})
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Video(_)));
        let polls = backend
            .calls()
            .iter()
            .filter(|c| matches!(c, MockCall::PollVideo { .. }))
            .count();
        assert_eq!(polls, 3);
    }

    #[tokio::test]
    async fn test_reset_supersedes_running_job() {
        let backend = MockBackend::new(MockConfig {
            polls_until_done: 50,
            ..Default::default()
        });
        let runner = VideoRunner::new(
            "veo",
            PollPolicy::unbounded(Duration::from_millis(5)),
        );
        let generation = runner.begin();
        let credential = ActiveCredential::HostManaged;
        let src = source();
        let quiet = |_: &str| {};

        let (outcome, _) = tokio::join!(
            runner.run(generation, &backend, &credential, &src, &quiet),
            async {
                tokio::time::sleep(Duration::from_millis(12)).await;
                runner.reset();
            }
        );

        assert_eq!(outcome.unwrap(), Outcome::Superseded);
        let job = runner.snapshot();
        assert!(job.result.is_none());
        assert!(job.source_image.is_none());
    }

    #[tokio::test]
    async fn test_download_failure_is_fatal() {
        let backend = MockBackend::new(MockConfig {
            polls_until_done: 1,
            fail_video_download: Some("HTTP 500: file service unavailable".to_string()),
            ..Default::default()
        });
        let runner = VideoRunner::new("veo", fast_poll(Some(5)));
        let statuses = Mutex::new(Vec::new());
        let on_status = |s: &str| statuses.lock().push(s.to_string());

        let generation = runner.begin();
        let err = runner
            .run(generation, &backend, &ActiveCredential::HostManaged, &source(), &on_status)
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Video(ref msg) if msg.contains("file service unavailable")));
        let job = runner.snapshot();
        assert!(job.result.is_none());
        assert!(!job.running);
        assert_eq!(job.error.as_deref(), Some(err.to_string().as_str()));
        assert_eq!(job.status, STATUS_DOWNLOADING);
        assert!(!statuses.lock().iter().any(|s| s == STATUS_DONE));
        assert!(backend
            .calls()
            .iter()
            .any(|c| matches!(c, MockCall::DownloadVideo { .. })));
    }

    #[test]
    fn test_commit_after_reset_is_rejected() {
        let runner = VideoRunner::new("veo", fast_poll(None));
        let generation = runner.begin();
        assert!(runner.commit(generation, |job| job.running = true));

        runner.reset();
        assert!(!runner.commit(generation, |job| job.status = STATUS_DONE.to_string()));
        let job = runner.snapshot();
        assert!(!job.running);
        assert!(job.status.is_empty());
    }

    #[tokio::test]
    async fn test_submit_failure_with_forbidden_is_authorization() {
        let backend = MockBackend::new(MockConfig {
            fail_video_submit: Some("403 Forbidden".to_string()),
            ..Default::default()
        });
        let runner = VideoRunner::new("veo", fast_poll(None));
        let generation = runner.begin();
        let err = runner
            .run(generation, &backend, &ActiveCredential::HostManaged, &source(), &|_| {})
            .await
            .unwrap_err();
        assert!(err.is_authorization());
    }
}
