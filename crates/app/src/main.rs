mod config;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use beatgrid_core::{
    import_sample, search, AudioSink, CpalSink, FileDecoder, FileStore, ProjectId, ProjectStore,
    RecordingSink, SampleCategory, SampleResolver, Session, SessionOptions, Upload,
};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser)]
#[command(version, about = "A step sequencer with a sample library.")]
struct Cli {
    /// Project store file. Overrides `store_path` from the config file.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    /// Directory sample filenames are resolved against.
    #[arg(long, global = true)]
    samples: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists all projects.
    Projects,
    /// Creates an empty project.
    New {
        name: String,
    },
    /// Browses the sample library.
    Samples {
        #[arg(short, long)]
        category: Option<SampleCategory>,
        /// Case-insensitive match on names and tags.
        #[arg(short, long)]
        search: Option<String>,
    },
    /// Copies an audio file into the library.
    Import {
        file: PathBuf,
        #[arg(short, long)]
        name: Option<String>,
        #[arg(short, long)]
        category: Option<SampleCategory>,
        #[arg(long)]
        bpm: Option<u32>,
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Bounces a project's pattern to a WAV file.
    Render {
        #[arg(short, long)]
        project: u64,
        #[arg(short, long)]
        out: PathBuf,
        #[arg(short, long, default_value_t = 1)]
        loops: u32,
    },
    /// Opens a project and reads commands from stdin.
    Play {
        /// Defaults to the first project, creating one if there is none.
        #[arg(short, long)]
        project: Option<u64>,
        /// Run without an audio device.
        #[arg(long)]
        dry_run: bool,
    },
    /// Prints the effective configuration.
    Config {
        /// Also write it to the user config file.
        #[arg(long)]
        write: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (mut config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    };
    init_tracing(&config.log_filter);
    if let Some(err) = config_error {
        warn!(error = %err, "Using default configuration");
    }

    let cli = Cli::parse();
    if let Some(store) = cli.store {
        config.store_path = store;
    }
    if let Some(samples) = cli.samples {
        config.samples_root = samples;
    }

    match cli.command {
        Commands::Projects => {
            let store = open_store(&config)?;
            let projects = store.projects()?;
            if projects.is_empty() {
                println!("No projects in {}.", config.store_path.display());
            }
            for project in projects {
                let tracks = store.tracks(project.id)?.len();
                println!(
                    "{:>3}  {:<24} {:>3} BPM  {} track(s)",
                    project.id, project.name, project.tempo, tracks
                );
            }
        }
        Commands::New { name } => {
            let mut store = open_store(&config)?;
            let project = store.create_project(&name)?;
            println!("Created project {} ({})", project.id, project.name);
        }
        Commands::Samples { category, search: query } => {
            let store = open_store(&config)?;
            let samples = store.samples()?;
            let found = search(&samples, category, query.as_deref());
            println!("Samples (count: {}):", found.len());
            for sample in found {
                println!(
                    "{:>3}  {:<16} {:<7} {:<24} {}{}",
                    sample.id,
                    sample.name,
                    sample.category,
                    sample.filename.display(),
                    sample.tags.join(", "),
                    if sample.user_uploaded { "  (uploaded)" } else { "" },
                );
            }
        }
        Commands::Import {
            file,
            name,
            category,
            bpm,
            tags,
        } => {
            let mut store = open_store(&config)?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let original_name = file
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let sample = import_sample(
                &mut store,
                Upload {
                    original_name: &original_name,
                    bytes: &bytes,
                    name,
                    category,
                    tempo: bpm,
                    tags,
                },
                &SampleResolver::new(&config.samples_root),
                &config.uploads_dir(),
            )?;
            println!("Imported sample {} ({})", sample.id, sample.name);
        }
        Commands::Render {
            project,
            out,
            loops,
        } => {
            let sink = Arc::new(RecordingSink::new(config.render_sample_rate));
            let session = open_session(&config, ProjectId(project), sink)?;
            session.render_to_file(&out, loops)?;
            println!("Wrote {}", out.display());
        }
        Commands::Play { project, dry_run } => {
            let project = match project {
                Some(id) => ProjectId(id),
                None => default_project(&config)?,
            };
            let sink: Arc<dyn AudioSink> = if dry_run {
                Arc::new(RecordingSink::default())
            } else {
                Arc::new(CpalSink::start()?)
            };
            let session = open_session(&config, project, sink)?;
            let driver = beatgrid_core::spawn(session);
            let result = repl::run(driver.handle()).await;
            driver.shutdown().await;
            result?;
        }
        Commands::Config { write } => {
            print!("{}", toml::to_string_pretty(&config)?);
            if write {
                let path = Config::config_path().context("no config directory on this platform")?;
                config.save_to(&path)?;
                info!(path = %path.display(), "Config written");
            }
        }
    }

    Ok(())
}

fn init_tracing(fallback: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_store(config: &Config) -> anyhow::Result<FileStore> {
    FileStore::open(&config.store_path)
        .with_context(|| format!("failed to open store {}", config.store_path.display()))
}

fn open_session(
    config: &Config,
    project: ProjectId,
    sink: Arc<dyn AudioSink>,
) -> anyhow::Result<Session> {
    let store = open_store(config)?;
    let decoder = FileDecoder::new(SampleResolver::new(&config.samples_root));
    let options = SessionOptions {
        step_count: config.step_count()?,
        master_volume: config.master_volume,
    };
    let session = Session::open(Box::new(store), project, sink, Arc::new(decoder), options)?;
    Ok(session)
}

fn default_project(config: &Config) -> anyhow::Result<ProjectId> {
    let mut store = open_store(config)?;
    let project = match store.projects()?.into_iter().next() {
        Some(project) => project,
        None => store.create_project("My First Beat")?,
    };
    Ok(project.id)
}
