//! Squadron - manage fleets of AI coding-agent sessions
//!
//! Run with `squadron --help` for usage.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use squadron::{
    config::Config,
    git::SyncOptions,
    instance::Instance,
    storage::{FileStateStore, Storage},
    APP_NAME, VERSION,
};

#[derive(Parser)]
#[command(name = APP_NAME)]
#[command(version = VERSION)]
#[command(about = "A terminal-native engine for managing fleets of AI coding-agent sessions")]
#[command(long_about = None)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List all instances
    List,

    /// Create and start a new instance
    New {
        /// Instance title
        title: String,

        /// Agent program to run (default from config)
        #[arg(short, long)]
        program: Option<String>,

        /// Repository path (default: current directory)
        #[arg(short = 'd', long)]
        path: Option<PathBuf>,

        /// Auto-acknowledge agent prompts
        #[arg(long)]
        auto_yes: bool,
    },

    /// Attach the terminal to an instance's session
    Attach {
        /// Instance title
        title: String,
    },

    /// Pause an instance (terminal detached, worktree removed, branch kept)
    Pause {
        /// Instance title
        title: String,
    },

    /// Resume a paused instance
    Resume {
        /// Instance title
        title: String,
    },

    /// Kill an instance and remove it from storage
    Kill {
        /// Instance title
        title: String,
    },

    /// Send a prompt to an instance's agent
    Send {
        /// Instance title
        title: String,

        /// Prompt text
        text: String,
    },

    /// Update instances from the mainline branch
    Sync {
        /// Instance titles (all started instances when omitted)
        titles: Vec<String>,

        /// Sync every started instance
        #[arg(long)]
        all: bool,

        /// Merge the remote default branch into each instance branch
        #[arg(long)]
        pull_main: bool,

        /// Refresh submodules recursively
        #[arg(long)]
        update_submodules: bool,

        /// Auto-resolve merge conflicts preferring the instance's side
        #[arg(long)]
        auto_resolve: bool,
    },

    /// Show configuration
    Config {
        /// Initialize config file with defaults
        #[arg(long)]
        init: bool,
    },
}

fn setup_logging(debug: bool, to_file: bool) -> Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
            .add_directive("gix=warn".parse()?)
            .add_directive("tokio=warn".parse()?)
    };

    if to_file {
        // Log to file while the terminal is bridged so output stays clean
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(std::env::temp_dir().join("squadron.log"))?;

        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(file).with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let store = FileStateStore::default_location().map_err(|e| eyre!(e.to_string()))?;
    let storage = Storage::new(Box::new(store), config.clone());
    storage
        .load_instances()
        .await
        .map_err(|e| eyre!(e.to_string()))?;
    Ok(storage)
}

async fn find_instance(storage: &Storage, title: &str) -> Result<Arc<Instance>> {
    let found = storage.find_by_title(title).await;
    found
        .into_iter()
        .next()
        .ok_or_else(|| eyre!("instance not found: {title}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = Config::load().unwrap_or_else(|e| {
        eprintln!("Warning: Failed to load config, using defaults: {}", e);
        Config::default()
    });

    if let Err(e) = config.ensure_directories() {
        eprintln!("Warning: Failed to create directories: {}", e);
    }

    match cli.command {
        Commands::List => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let instances = storage.list().await;
            if instances.is_empty() {
                println!("No instances. Use 'squadron new <title>' to create one.");
                return Ok(());
            }

            println!("Instances:");
            println!();
            for instance in instances {
                let snapshot = instance.snapshot().await;
                let status_icon = match snapshot.status {
                    squadron::Status::Running => "●",
                    squadron::Status::Paused => "◐",
                    squadron::Status::Loading => "◌",
                    squadron::Status::Ready => "○",
                };
                println!(
                    "  {} {} [{}] ({}) {}",
                    status_icon,
                    snapshot.title,
                    snapshot.branch,
                    snapshot.program,
                    snapshot.diff_stats.summary()
                );
            }
        }

        Commands::New {
            title,
            program,
            path,
            auto_yes,
        } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let path = match path {
                Some(p) => p,
                None => std::env::current_dir()?,
            };
            let program = program.unwrap_or_else(|| config.default_program.clone());

            let mut opts = storage
                .instance_options(&title, path, &program)
                .map_err(|e| eyre!(e.to_string()))?;
            opts.auto_yes = opts.auto_yes || auto_yes;

            let instance = Arc::new(Instance::new(opts).map_err(|e| eyre!(e.to_string()))?);

            println!("Starting instance '{title}'...");
            instance
                .start(true)
                .await
                .map_err(|e| eyre!(e.to_string()))?;
            storage
                .add_instance(Arc::clone(&instance))
                .await
                .map_err(|e| eyre!(e.to_string()))?;

            println!("Instance running on branch {}", instance.branch().await);
            println!();
            println!("Attach with: squadron attach {title}");
        }

        Commands::Attach { title } => {
            setup_logging(cli.debug, true)?;
            let storage = open_storage(&config).await?;

            let instance = find_instance(&storage, &title).await?;
            let done = instance.attach().await.map_err(|e| eyre!(e.to_string()))?;

            match done.await {
                Ok(result) => info!("Attach finished: {:?}", result),
                Err(_) => info!("Attach channel closed"),
            }
        }

        Commands::Pause { title } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let instance = find_instance(&storage, &title).await?;
            instance.pause().await.map_err(|e| eyre!(e.to_string()))?;
            storage
                .save_instances()
                .await
                .map_err(|e| eyre!(e.to_string()))?;

            println!(
                "Paused '{title}'. Branch {} copied to clipboard.",
                instance.branch().await
            );
        }

        Commands::Resume { title } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let instance = find_instance(&storage, &title).await?;
            instance.resume().await.map_err(|e| eyre!(e.to_string()))?;
            storage
                .save_instances()
                .await
                .map_err(|e| eyre!(e.to_string()))?;

            println!("Resumed '{title}'.");
        }

        Commands::Kill { title } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let instance = find_instance(&storage, &title).await?;
            let program = instance.program().await;

            if let Err(e) = instance.kill().await {
                eprintln!("Warning: cleanup reported failures: {e}");
            }
            storage
                .delete_instance(&title, &program)
                .await
                .map_err(|e| eyre!(e.to_string()))?;

            println!("Killed '{title}'.");
        }

        Commands::Send { title, text } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            let instance = find_instance(&storage, &title).await?;
            instance
                .send_prompt(&text)
                .await
                .map_err(|e| eyre!(e.to_string()))?;

            println!("Sent prompt to '{title}'.");
        }

        Commands::Sync {
            titles,
            all,
            pull_main,
            update_submodules,
            auto_resolve,
        } => {
            setup_logging(cli.debug, false)?;
            let storage = open_storage(&config).await?;

            if titles.is_empty() && !all {
                return Err(eyre!("pass instance titles or --all"));
            }

            let opts = SyncOptions {
                pull_main: pull_main || !update_submodules,
                update_submodules,
                auto_resolve,
                resolve_message: config.sync_resolve_message.clone(),
            };

            let selected = if all { Vec::new() } else { titles };
            let results = storage.sync_instances(&selected, &opts).await;

            if results.is_empty() {
                println!("No started instances matched.");
                return Ok(());
            }

            let mut failed = false;
            for status in &results {
                let outcome = if status.success { "ok" } else { "failed" };
                print!("  {} [{}]", status.branch, outcome);
                if status.updated_from_main {
                    print!(" updated-from-main");
                }
                if status.updated_submodule {
                    print!(" submodules");
                }
                if status.conflicts_resolved {
                    print!(" conflicts-resolved");
                }
                if let Some(err) = &status.error {
                    print!(" error: {err}");
                }
                if !status.message.is_empty() {
                    print!(" ({})", status.message);
                }
                println!();
                failed |= !status.success;
            }

            if failed {
                std::process::exit(1);
            }
        }

        Commands::Config { init } => {
            setup_logging(cli.debug, false)?;

            if init {
                config.save().map_err(|e| eyre!(e.to_string()))?;
                println!(
                    "Configuration initialized at {:?}",
                    Config::config_file_path().map_err(|e| eyre!(e.to_string()))?
                );
            } else {
                println!("Configuration:");
                println!("{}", toml::to_string_pretty(&config)?);
                println!(
                    "\nConfig file: {:?}",
                    Config::config_file_path().map_err(|e| eyre!(e.to_string()))?
                );
                println!(
                    "State file: {:?}",
                    Config::state_file_path().map_err(|e| eyre!(e.to_string()))?
                );
            }
        }
    }

    Ok(())
}
