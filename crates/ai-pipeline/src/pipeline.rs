/// Generation orchestrator: edit -> describe -> name-file
///
/// Each invocation is tagged with a generation number. Results are written to
/// the shared [`PipelineRun`] only while that generation is still current, so
/// a superseded run can never overwrite the output of a newer one.
use assets::ImageAsset;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, warn};

use crate::backends::GenerativeBackend;
use crate::config::ModelMode;
use crate::credentials::ActiveCredential;
use crate::error::{BackendError, PipelineError};
use crate::prompts::{self, postprocess};
use crate::session::Outcome;

/// Maximum number of reference images per run
pub const MAX_IMAGES: usize = 5;

/// Inputs of one generation run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub images: Vec<ImageAsset>,
    pub prompt: String,
    pub system_prompt: String,
    pub mode: ModelMode,
}

impl GenerationRequest {
    pub fn new(
        images: Vec<ImageAsset>,
        prompt: impl Into<String>,
        system_prompt: impl Into<String>,
        mode: ModelMode,
    ) -> Self {
        Self {
            images,
            prompt: prompt.into(),
            system_prompt: system_prompt.into(),
            mode,
        }
    }

    /// Preconditions for leaving `Idle`
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.images.is_empty() {
            return Err(PipelineError::validation(
                "Please upload at least one image first.",
            ));
        }
        if self.images.len() > MAX_IMAGES {
            return Err(PipelineError::validation(format!(
                "You can upload a maximum of {MAX_IMAGES} images."
            )));
        }
        if self.prompt.trim().is_empty() {
            return Err(PipelineError::validation(
                "Please enter a prompt to describe the changes.",
            ));
        }
        Ok(())
    }
}

/// Pipeline stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Stage {
    #[default]
    Idle,
    Gating,
    EditingImage,
    DescribingImage,
    NamingFile,
    Done,
    Failed,
}

/// Snapshot of the current (latest) run and its outputs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineRun {
    pub generation: u64,
    pub stage: Stage,
    pub prompt: String,
    pub system_prompt: String,
    pub original_images: Vec<ImageAsset>,
    pub edited_image: Option<ImageAsset>,
    pub description: Option<String>,
    pub filename: Option<String>,
    pub error: Option<String>,
}

impl PipelineRun {
    fn clear_outputs(&mut self) {
        self.edited_image = None;
        self.description = None;
        self.filename = None;
        self.error = None;
    }
}

/// Outputs of a completed run
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult {
    pub edited_image: ImageAsset,
    pub description: Option<String>,
    pub filename: Option<String>,
}

impl GenerationResult {
    /// `<filename or default>.<ext>`
    pub fn download_name(&self) -> String {
        format!(
            "{}.{}",
            self.filename.as_deref().unwrap_or(prompts::DEFAULT_DOWNLOAD_NAME),
            self.edited_image.extension()
        )
    }
}

#[derive(Default)]
pub struct Orchestrator {
    state: Mutex<PipelineRun>,
    generation: AtomicU64,
}

impl Orchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> PipelineRun {
        self.state.lock().clone()
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Start a new invocation: takes a fresh generation and enters `Gating`.
    /// Previous outputs stay visible until the run actually starts.
    pub fn begin(&self) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        state.generation = generation;
        state.stage = Stage::Gating;
        generation
    }

    /// The run was parked by the credential gate
    pub fn suspend(&self, generation: u64) {
        self.commit(generation, |run| run.stage = Stage::Idle);
    }

    /// Replace the current inputs and outputs, e.g. when a saved scenario is
    /// loaded. Supersedes any run still in flight.
    pub fn load(
        &self,
        original_images: Vec<ImageAsset>,
        prompt: String,
        edited_image: ImageAsset,
        description: Option<String>,
        filename: Option<String>,
    ) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut state = self.state.lock();
        let system_prompt = std::mem::take(&mut state.system_prompt);
        *state = PipelineRun {
            generation,
            stage: Stage::Done,
            prompt,
            system_prompt,
            original_images,
            edited_image: Some(edited_image),
            description,
            filename,
            error: None,
        };
    }

    /// Apply `f` if `generation` is still current. Returns false for stale runs.
    fn commit(&self, generation: u64, f: impl FnOnce(&mut PipelineRun)) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation || self.current_generation() != generation {
            return false;
        }
        f(&mut state);
        true
    }

    /// Run the three stages for `request` under `generation`.
    pub async fn run<B: GenerativeBackend + ?Sized>(
        &self,
        generation: u64,
        backend: &B,
        credential: &ActiveCredential,
        request: &GenerationRequest,
    ) -> Result<Outcome<GenerationResult>, PipelineError> {
        let models = request.mode.models();

        let started = self.commit(generation, |run| {
            run.clear_outputs();
            run.prompt = request.prompt.clone();
            run.system_prompt = request.system_prompt.clone();
            run.original_images = request.images.clone();
            run.stage = Stage::EditingImage;
        });
        if !started {
            return Ok(Outcome::Superseded);
        }
        info!(generation, images = request.images.len(), mode = %request.mode, "generation started");

        let instruction = prompts::edit_instruction(&request.system_prompt, &request.prompt);
        let edited = match backend
            .edit_image(credential, models.image_model, &request.images, &instruction)
            .await
        {
            Ok(Some(image)) => image,
            Ok(None) => {
                return self.fail_edit(
                    generation,
                    BackendError::invalid_response("No image was generated in the response."),
                )
            }
            Err(err) => return self.fail_edit(generation, err),
        };

        if !self.commit(generation, |run| {
            run.edited_image = Some(edited.clone());
            run.stage = Stage::DescribingImage;
        }) {
            info!(generation, "run superseded after edit stage");
            return Ok(Outcome::Superseded);
        }

        let description = match backend
            .describe_image(
                credential,
                models.text_model,
                &edited,
                &prompts::describe_instruction(&request.prompt),
            )
            .await
        {
            Ok(text) => Some(postprocess::clean_text(&text)).filter(|t| !t.is_empty()),
            Err(err) => {
                warn!(generation, error = %err, "could not generate image description");
                None
            }
        };

        let next_stage = if description.is_some() {
            Stage::NamingFile
        } else {
            Stage::Done
        };
        if !self.commit(generation, |run| {
            run.description = description.clone();
            run.stage = next_stage;
        }) {
            return Ok(Outcome::Superseded);
        }

        let mut filename = None;
        if let Some(description) = &description {
            let name = match backend
                .generate_text(
                    credential,
                    models.text_model,
                    &prompts::filename_instruction(description),
                )
                .await
            {
                Ok(raw) => Some(postprocess::sanitize_filename(&raw)).filter(|n| !n.is_empty()),
                Err(err) => {
                    warn!(generation, error = %err, "could not generate filename");
                    None
                }
            };
            filename = Some(name.unwrap_or_else(|| prompts::FALLBACK_FILENAME.to_string()));

            if !self.commit(generation, |run| {
                run.filename = filename.clone();
                run.stage = Stage::Done;
            }) {
                return Ok(Outcome::Superseded);
            }
        }

        info!(generation, has_description = description.is_some(), "generation finished");
        Ok(Outcome::Completed(GenerationResult {
            edited_image: edited,
            description,
            filename,
        }))
    }

    fn fail_edit(
        &self,
        generation: u64,
        err: BackendError,
    ) -> Result<Outcome<GenerationResult>, PipelineError> {
        let authorization = err.is_authorization();
        let message = err.to_string();
        let error = if authorization {
            PipelineError::Authorization(message)
        } else {
            PipelineError::Edit(message)
        };
        warn!(generation, error = %error, "image edit stage failed");

        if !self.commit(generation, |run| {
            run.clear_outputs();
            run.stage = Stage::Failed;
            run.error = Some(error.to_string());
        }) {
            return Ok(Outcome::Superseded);
        }
        Err(error)
    }
}
