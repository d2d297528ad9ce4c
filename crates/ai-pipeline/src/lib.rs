/// AI pipeline for scenario generation
///
/// Turns product photos plus a prompt into an edited scene, a short marketing
/// description and a file-safe name, and animates the scene into a short
/// video. Every billable call goes through the credential gate.

pub mod backends;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pipeline;
pub mod prompts;
pub mod session;
pub mod video;

pub use backends::{BackendFactory, GenerativeBackend, VideoAsset, VideoOperation};
pub use config::{BackendConfig, BackendType, ModelMode, PollPolicy};
pub use credentials::{
    ActiveCredential, Credential, CredentialGate, EnvHostKey, HostKeySelector,
    MemorySessionStore, PendingKind, SessionStore,
};
pub use error::{BackendError, PipelineError};
pub use pipeline::{GenerationRequest, GenerationResult, PipelineRun, Stage, MAX_IMAGES};
pub use session::{Outcome, Resumed, Session, SuspendReason};
pub use video::{VideoJob, VideoRunner};
