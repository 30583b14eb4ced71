pub mod audio;
pub mod cache;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod pipeline;
pub mod providers;
pub mod speak;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use serde_json::Value;

use config::Config;
use daemon::{ClientResponse, DaemonConfig, Method, RuntimePaths, SpeechDaemon};
use pipeline::{Pipeline, SpeakRequest};
use providers::ProviderRegistry;
use speak::{DaemonTarget, SpeakReport};

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "speakcache",
    version,
    about = "Text-to-speech with a semantic audio cache and a warm background daemon"
)]
pub struct Cli {
    /// Verbose logging (overridden by RUST_LOG)
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Speak text (argument, --file, or stdin)
    Speak {
        text: Option<String>,

        /// Read the text from a file
        #[arg(short, long, conflicts_with = "text")]
        file: Option<PathBuf>,

        /// Save audio here instead of playing it
        #[arg(short, long)]
        output: Option<PathBuf>,

        #[arg(short, long)]
        provider: Option<String>,

        #[arg(short, long)]
        voice: Option<String>,

        /// Skip the semantic cache
        #[arg(long)]
        no_cache: bool,

        /// Minimum similarity for a cache hit (0.0-1.0)
        #[arg(long)]
        cache_threshold: Option<f32>,

        /// Run immediately instead of waiting in the daemon queue
        #[arg(long)]
        no_queue: bool,

        /// Synthesize in this process without contacting the daemon
        #[arg(long)]
        no_daemon: bool,
    },
    /// Run the speech daemon in the foreground
    Daemon {
        /// Directory for the socket, lock and log files
        #[arg(long)]
        runtime_dir: Option<PathBuf>,

        /// Also serve the HTTP API on this port
        #[arg(long)]
        http_port: Option<u16>,

        /// Bind address for the HTTP API
        #[arg(long)]
        http_host: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Show the daemon's speech queue
    Queue,
    /// Stop the daemon
    Stop,
    /// Restart the daemon
    Restart,
    /// List voices
    Voices {
        /// Only this provider
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Manage the config file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Install or inspect the MiniLM embedding model
    Models {
        #[command(subcommand)]
        action: ModelsAction,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write the default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the config file path
    Path,
}

#[derive(Subcommand, Debug)]
pub enum ModelsAction {
    /// Download and verify the model files
    Download {
        /// Re-download even if a verified copy is installed
        #[arg(long)]
        force: bool,

        /// Hub (or mirror) to download from
        #[arg(long, env = "SPEAKCACHE_MODEL_HUB", default_value = cache::models::DEFAULT_HUB_URL)]
        hub: String,
    },
    /// Show where the model lives and whether it verifies
    Status,
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            runtime_dir,
            http_port,
            http_host,
        } => run_daemon(runtime_dir, http_port, http_host, cli.debug).await,
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "speakcache", &mut std::io::stdout());
            Ok(())
        }
        command => {
            logging::init_cli(cli.debug);
            let debug = cli.debug;
            tokio::task::spawn_blocking(move || run_command(command, debug))
                .await
                .context("command task failed")?
        }
    }
}

async fn run_daemon(
    runtime_dir: Option<PathBuf>,
    http_port: Option<u16>,
    http_host: Option<String>,
    debug: bool,
) -> Result<()> {
    let mut config = Config::load()?;
    if let Some(dir) = runtime_dir {
        config.daemon.runtime_dir = Some(dir);
    }
    if let Some(port) = http_port {
        config.http.enabled = true;
        config.http.port = port;
    }
    if let Some(host) = http_host {
        config.http.host = host;
    }

    let dir = config.runtime_dir()?;
    let _log_guard = logging::init_daemon(&dir, debug)?;

    let mut daemon_config = DaemonConfig::new(RuntimePaths::new(&dir), &config);
    if config.http.enabled {
        daemon_config = daemon_config.with_http(&config.http.host, config.http.port)?;
    }
    let pipeline = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || Pipeline::from_config(&config))
            .await
            .context("pipeline setup failed")?
    };
    SpeechDaemon::new(daemon_config, Arc::new(pipeline))
        .run()
        .await
}

fn run_command(command: Commands, debug: bool) -> Result<()> {
    let config = Config::load()?;
    match command {
        Commands::Speak {
            text,
            file,
            output,
            provider,
            voice,
            no_cache,
            cache_threshold,
            no_queue,
            no_daemon,
        } => {
            let text = speak::read_text(text, file).context("reading text")?;
            let mut request = SpeakRequest::new(text.trim());
            request.provider = provider;
            request.voice = voice;
            request.output = output;
            request.cache = !no_cache;
            request.cache_threshold = cache_threshold;
            request.queue = !no_queue;
            request.debug = debug;
            speak::absolute_output(&mut request).context("resolving output path")?;

            let target = if no_daemon {
                None
            } else {
                match DaemonTarget::from_config(&config) {
                    Ok(target) => Some(target),
                    Err(err) => {
                        tracing::warn!(error = %err, "daemon unavailable; running in-process");
                        None
                    }
                }
            };
            let report = speak::speak(&config, target.as_ref(), &request)?;
            print_report(&report);
            Ok(())
        }
        Commands::Status => {
            let target = DaemonTarget::from_config(&config)?;
            let status = daemon::control::status(&target.client());
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        Commands::Queue => {
            let target = DaemonTarget::from_config(&config)?;
            match target.client().send(Method::QueueStatus, Value::Null) {
                ClientResponse::Success(result) => {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                    Ok(())
                }
                ClientResponse::Error { message, .. } => bail!(message),
            }
        }
        Commands::Stop => {
            let target = DaemonTarget::from_config(&config)?;
            if daemon::control::stop(&target.paths, &target.client()) {
                println!("Daemon stopped");
            } else {
                println!("Daemon not running");
            }
            Ok(())
        }
        Commands::Restart => {
            let target = DaemonTarget::from_config(&config)?;
            daemon::control::restart(&target.paths, &target.client(), &target.spawn)?;
            println!("Daemon restarted");
            Ok(())
        }
        Commands::Voices { provider } => {
            let registry = ProviderRegistry::with_defaults(&config);
            let names: Vec<String> = match provider {
                Some(name) => vec![name],
                None => registry.names().into_iter().map(str::to_string).collect(),
            };
            for name in names {
                let provider = registry.get(&name)?;
                for voice in provider.list_voices()? {
                    println!("{}\t{}\t{}", voice.provider, voice.id, voice.name);
                }
            }
            Ok(())
        }
        Commands::Config { action } => match action {
            ConfigAction::Init { force } => {
                let path = config::config_path();
                if path.exists() && !force {
                    bail!(
                        "{} already exists (use --force to overwrite)",
                        path.display()
                    );
                }
                Config::write_default(&path)?;
                println!("{}", path.display());
                Ok(())
            }
            ConfigAction::Path => {
                println!("{}", config::config_path().display());
                Ok(())
            }
        },
        Commands::Models { action } => {
            let model_dir = cache::embedder::minilm_model_dir(&config.data_dir());
            match action {
                ModelsAction::Download { force, hub } => {
                    let manifest = cache::models::ModelDownloader::new(hub)?
                        .download(&model_dir, force)
                        .with_context(|| format!("installing model into {}", model_dir.display()))?;
                    println!(
                        "Model installed in {} ({} files)",
                        model_dir.display(),
                        manifest.files.len()
                    );
                }
                ModelsAction::Status => {
                    let status = cache::models::status(&model_dir);
                    println!("{}", serde_json::to_string_pretty(&status)?);
                }
            }
            Ok(())
        }
        Commands::Daemon { .. } | Commands::Completions { .. } => Ok(()),
    }
}

fn print_report(report: &SpeakReport) {
    match report {
        SpeakReport::Daemon { result } => {
            if let Some(position) = result.get("queue_position").and_then(Value::as_u64) {
                println!("Queued (position {position})");
            } else if let Some(saved) = result.get("saved").and_then(Value::as_str) {
                println!("Saved to {saved}");
            }
        }
        SpeakReport::InProcess { outcome } => {
            if let Some(saved) = &outcome.saved {
                println!("Saved to {}", saved.display());
            }
        }
    }
}
