use ai_pipeline::prompts::{DEFAULT_DOWNLOAD_NAME, DEFAULT_SYSTEM_PROMPT, SYSTEM_PROMPT_EXPORT_NAME};
use ai_pipeline::{
    BackendFactory, Credential, GenerationRequest, GenerativeBackend, MemorySessionStore,
    ModelMode, Outcome, Resumed, Session, SuspendReason, VideoAsset,
};
use anyhow::{bail, Context, Result};
use assets::ImageAsset;
use clap::{Args, Parser, Subcommand};
use scenarios::{Scenario, ScenarioPatch, ScenarioStore, SqliteMedium, EXPORT_FILENAME};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::AppConfig;

type CliSession = Session<dyn GenerativeBackend>;

#[derive(Parser)]
#[command(name = "corkscene")]
#[command(about = "Corkbrick scene generator - AI-edited scenes, descriptions and videos")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true)]
    verbose: bool,

    /// Settings file (defaults to <data dir>/corkscene/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Scenario database (defaults to <data dir>/corkscene/scenarios.db)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Combine reference images into an edited scene
    Generate(GenerateArgs),

    /// Animate the edited image of a saved scenario
    Video {
        /// Scenario id
        id: String,

        #[arg(short, long, default_value = ".")]
        out_dir: PathBuf,

        #[arg(long)]
        api_key: Option<String>,
    },

    /// Manage saved scenarios
    #[command(subcommand)]
    Scenarios(ScenarioCommands),

    /// System prompt utilities
    #[command(subcommand)]
    SystemPrompt(SystemPromptCommands),
}

#[derive(Args)]
struct GenerateArgs {
    /// Reference images (1-5)
    #[arg(short, long = "image", required = true)]
    images: Vec<PathBuf>,

    /// Description of the desired scene
    #[arg(short, long)]
    prompt: String,

    /// Replace the built-in system prompt
    #[arg(long)]
    system_prompt_file: Option<PathBuf>,

    /// standard or advanced
    #[arg(long)]
    mode: Option<ModelMode>,

    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Use this key for the run instead of prompting
    #[arg(long)]
    api_key: Option<String>,

    /// Also generate a video of the scene
    #[arg(long)]
    video: bool,

    /// Save the result as a scenario with this name
    #[arg(long)]
    save: Option<String>,
}

#[derive(Subcommand)]
enum ScenarioCommands {
    /// List saved scenarios
    List,

    /// Print one scenario
    Show { id: String },

    /// Edit name, prompt or description
    Edit {
        id: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        prompt: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete a scenario
    Delete {
        id: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// Write all scenarios to a JSON file
    Export { file: Option<PathBuf> },

    /// Merge scenarios from a JSON file
    Import { file: PathBuf },
}

#[derive(Subcommand)]
enum SystemPromptCommands {
    /// Write the system prompt to a text file
    Export {
        file: Option<PathBuf>,

        /// Export this prompt file instead of the built-in one
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .init();

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Generate(args) => generate_command(&config, cli.db.as_deref(), args).await,
        Commands::Video {
            id,
            out_dir,
            api_key,
        } => video_command(&config, cli.db.as_deref(), id, out_dir, api_key).await,
        Commands::Scenarios(command) => {
            let store = open_store(&config, cli.db.as_deref())?;
            scenarios_command(&store, command).await
        }
        Commands::SystemPrompt(SystemPromptCommands::Export { file, from }) => {
            system_prompt_export(file, from)
        }
    }
}

fn open_store(config: &AppConfig, db: Option<&Path>) -> Result<ScenarioStore> {
    let path = db
        .map(Path::to_path_buf)
        .unwrap_or_else(SqliteMedium::default_path);
    let medium = SqliteMedium::open_or_create(&path, config.store.capacity_bytes)
        .with_context(|| format!("failed to open scenario database {}", path.display()))?;
    Ok(ScenarioStore::open(&config.store, Arc::new(medium)))
}

fn build_session(config: &AppConfig) -> Result<CliSession> {
    let backend = BackendFactory::create(&config.backend)?;
    info!(backend = backend.name(), mode = %config.backend.mode, "backend ready");
    Ok(Session::new(
        backend,
        config.backend.clone(),
        Arc::new(MemorySessionStore::new()),
    ))
}

fn report_status(status: &str) {
    info!("{}", status);
}

fn suspension(resumed: &Resumed) -> Option<SuspendReason> {
    match resumed {
        Resumed::Image(Outcome::Suspended(reason)) | Resumed::Video(Outcome::Suspended(reason)) => {
            Some(reason.clone())
        }
        _ => None,
    }
}

/// Ask for a key on stdin. An empty line or end of input cancels.
async fn prompt_for_key(session: &CliSession, reason: &SuspendReason) -> Result<Option<String>> {
    match reason {
        SuspendReason::MissingCredential => {
            warn!("Missing API Key. Please enter your Google Gemini API Key.");
            session.open_host_selection().await;
        }
        SuspendReason::Rejected(message) => warn!("{}", message),
    }

    let mut stdout = tokio::io::stdout();
    stdout
        .write_all(b"Gemini API key (empty line cancels): ")
        .await?;
    stdout.flush().await?;

    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
    let key = line.trim();
    Ok((!key.is_empty()).then(|| key.to_string()))
}

/// Keep answering credential prompts until the action completes, fails or
/// is cancelled. `None` means cancelled.
async fn settle(session: &CliSession, mut current: Resumed) -> Result<Option<Resumed>> {
    loop {
        let Some(reason) = suspension(&current) else {
            return Ok(Some(current));
        };
        let supplied = prompt_for_key(session, &reason).await?;
        match session.resolve(supplied.as_deref(), &report_status).await? {
            Some(next) => current = next,
            None => {
                warn!("API key entry cancelled");
                return Ok(None);
            }
        }
    }
}

async fn generate_command(config: &AppConfig, db: Option<&Path>, args: GenerateArgs) -> Result<()> {
    let images = args
        .images
        .iter()
        .map(|path| ImageAsset::load(path))
        .collect::<Result<Vec<_>, _>>()?;
    let system_prompt = match &args.system_prompt_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read system prompt {}", path.display()))?,
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };
    let mode = args.mode.unwrap_or(config.backend.mode);
    let override_key = args.api_key.as_deref().and_then(Credential::new);

    let session = build_session(config)?;
    let request = GenerationRequest::new(images.clone(), args.prompt.clone(), system_prompt, mode);
    let first = Resumed::Image(session.generate(request, override_key.as_ref()).await?);

    let result = match settle(&session, first).await? {
        Some(Resumed::Image(Outcome::Completed(result))) => result,
        Some(_) => {
            warn!("generation was superseded");
            return Ok(());
        }
        None => return Ok(()),
    };

    std::fs::create_dir_all(&args.out_dir)?;
    let image_path = args.out_dir.join(result.download_name());
    std::fs::write(&image_path, result.edited_image.decode_bytes()?)
        .with_context(|| format!("failed to write {}", image_path.display()))?;
    info!("Edited image written to {}", image_path.display());
    if let Some(description) = &result.description {
        println!("Description: {description}");
    }
    if let Some(filename) = &result.filename {
        println!("Filename: {filename}");
    }

    if args.video {
        let first =
            Resumed::Video(session.generate_video(override_key.as_ref(), &report_status).await?);
        if let Some(video) = settle_video(&session, first).await? {
            write_video(&video, result.filename.as_deref(), &args.out_dir)?;
        }
    }

    if let Some(name) = args.save {
        let store = open_store(config, db)?;
        let scenario = Scenario::new(
            store.next_id(),
            name,
            args.prompt,
            images,
            &result.edited_image,
            result.description.clone(),
            result.filename.clone(),
        );
        let id = scenario.id.clone();
        let status = store.add(scenario).await?;
        if !status.is_persisted() {
            warn!("{}", status);
        }

        let scenario_path = args.out_dir.join(format!("scenario_{}.json", store.len()));
        std::fs::write(&scenario_path, store.export_one(&id)?)
            .with_context(|| format!("failed to write {}", scenario_path.display()))?;
        info!(id = %id, "Scenario saved and written to {}", scenario_path.display());
    }
    Ok(())
}

async fn settle_video(session: &CliSession, first: Resumed) -> Result<Option<VideoAsset>> {
    match settle(session, first).await? {
        Some(Resumed::Video(Outcome::Completed(video))) => Ok(Some(video)),
        Some(_) => {
            warn!("video generation was superseded");
            Ok(None)
        }
        None => Ok(None),
    }
}

fn write_video(video: &VideoAsset, filename: Option<&str>, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;
    let path = out_dir.join(format!(
        "{}.{}",
        filename.unwrap_or(DEFAULT_DOWNLOAD_NAME),
        video.extension()
    ));
    std::fs::write(&path, &video.bytes)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("Video written to {}", path.display());
    Ok(())
}

async fn video_command(
    config: &AppConfig,
    db: Option<&Path>,
    id: String,
    out_dir: PathBuf,
    api_key: Option<String>,
) -> Result<()> {
    let store = open_store(config, db)?;
    let Some(scenario) = store.load_by_id(&id) else {
        bail!("scenario not found: {id}");
    };

    let session = build_session(config)?;
    session.load_scenario_outputs(
        scenario.original_images.clone(),
        scenario.prompt.clone(),
        scenario.edited_asset()?,
        scenario.description.clone(),
        scenario.filename.clone(),
    );

    let override_key = api_key.as_deref().and_then(Credential::new);
    let first = Resumed::Video(session.generate_video(override_key.as_ref(), &report_status).await?);
    if let Some(video) = settle_video(&session, first).await? {
        write_video(&video, scenario.filename.as_deref(), &out_dir)?;
    }
    Ok(())
}

async fn scenarios_command(store: &ScenarioStore, command: ScenarioCommands) -> Result<()> {
    match command {
        ScenarioCommands::List => {
            if store.is_empty() {
                println!("No saved scenarios.");
            }
            for scenario in store.list() {
                println!(
                    "{}  {}  ({} image(s))",
                    scenario.id,
                    scenario.name,
                    scenario.original_images.len()
                );
            }
        }
        ScenarioCommands::Show { id } => {
            let Some(scenario) = store.load_by_id(&id) else {
                bail!("scenario not found: {id}");
            };
            println!("Name:        {}", scenario.name);
            println!("Prompt:      {}", scenario.prompt);
            println!("Images:      {}", scenario.original_images.len());
            println!(
                "Description: {}",
                scenario.description.as_deref().unwrap_or_default()
            );
            println!(
                "Filename:    {}",
                scenario.filename.as_deref().unwrap_or_default()
            );
        }
        ScenarioCommands::Edit {
            id,
            name,
            prompt,
            description,
        } => {
            let patch = ScenarioPatch {
                name,
                prompt,
                description,
            };
            if patch.is_empty() {
                bail!("nothing to change: pass --name, --prompt or --description");
            }
            report_sync(store.update(&id, patch).await?);
            info!(id = %id, "Scenario updated");
        }
        ScenarioCommands::Delete { id, yes } => {
            if !yes {
                bail!("refusing to delete {id} without --yes");
            }
            report_sync(store.remove(&id).await?);
            println!("Scenario deleted.");
        }
        ScenarioCommands::Export { file } => {
            if store.is_empty() {
                bail!("There are no saved scenarios to export.");
            }
            let path = file.unwrap_or_else(|| PathBuf::from(EXPORT_FILENAME));
            std::fs::write(&path, store.export()?)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(count = store.len(), "Scenarios exported to {}", path.display());
        }
        ScenarioCommands::Import { file } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let (count, status) = store.import_json(&text).await?;
            report_sync(status);
            println!("{count} scenario(s) loaded successfully.");
        }
    }
    Ok(())
}

fn report_sync(status: scenarios::SyncStatus) {
    if !status.is_persisted() {
        warn!("{}", status);
    }
}

fn system_prompt_export(file: Option<PathBuf>, from: Option<PathBuf>) -> Result<()> {
    let prompt = match from {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => DEFAULT_SYSTEM_PROMPT.to_string(),
    };
    let path = file.unwrap_or_else(|| PathBuf::from(SYSTEM_PROMPT_EXPORT_NAME));
    std::fs::write(&path, prompt).with_context(|| format!("failed to write {}", path.display()))?;
    info!("System prompt written to {}", path.display());
    Ok(())
}
