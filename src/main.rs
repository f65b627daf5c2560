//! keepsake CLI entry point

use chrono::{DateTime, Utc};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use keepsake::{
    commands::{
        cmd_create, cmd_delete, cmd_init, cmd_list, cmd_show, cmd_update, print_init,
        print_memories, print_memory, CreateOptions, UpdateOptions,
    },
    config::Config,
    error::{Error, Result},
    models::Visibility,
    store::MemoryStore,
};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keepsake")]
#[command(version, about = "Local memory journal with photo and audio attachments", long_about = None)]
struct Cli {
    /// Storage directory (defaults to ~/.keepsake)
    #[arg(long, global = true, env = "KEEPSAKE_HOME")]
    home: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the storage directory and default config
    Init {
        /// Overwrite an existing config
        #[arg(long)]
        force: bool,
    },

    /// Record a new memory
    Create {
        /// Owner of the memory
        #[arg(long)]
        owner: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        body: Option<String>,

        #[arg(long)]
        category: Option<String>,

        /// everyone, private or scheduled
        #[arg(long, default_value = "everyone")]
        visibility: Visibility,

        /// Reveal time for scheduled memories (RFC 3339)
        #[arg(long)]
        scheduled_for: Option<DateTime<Utc>>,

        /// Image files to attach
        #[arg(long = "image")]
        images: Vec<PathBuf>,

        /// Audio files to attach
        #[arg(long = "audio")]
        audio: Vec<PathBuf>,

        /// URL or asset name used when no image is attached
        #[arg(long)]
        fallback_image: Option<String>,
    },

    /// List memories, newest first
    List {
        /// Only show memories for this owner
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show one memory
    Show { id: String },

    /// Edit a memory
    Update {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long, conflicts_with = "clear_body")]
        body: Option<String>,

        /// Remove the body text
        #[arg(long)]
        clear_body: bool,

        /// Attachment filename to remove
        #[arg(long = "remove")]
        remove: Vec<String>,

        #[arg(long = "image")]
        images: Vec<PathBuf>,

        #[arg(long = "audio")]
        audio: Vec<PathBuf>,
    },

    /// Delete a memory and its attachment files
    Delete { id: String },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json = cli.json;

    // Logs go to stderr
    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json().with_writer(std::io::stderr)))
        .with((!json).then(|| fmt::layer().with_writer(std::io::stderr)))
        .with(filter)
        .init();

    match cli.command {
        Commands::Init { force } => {
            let config = cmd_init(cli.home, force).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config.paths.base_dir)?);
            } else {
                print_init(&config);
            }
            return Ok(());
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "keepsake", &mut std::io::stdout());
            return Ok(());
        }
        _ => {}
    }

    let config = load_config(cli.home)?;
    let store = MemoryStore::open(&config).await?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Create {
            owner,
            title,
            body,
            category,
            visibility,
            scheduled_for,
            images,
            audio,
            fallback_image,
        } => {
            let options = CreateOptions {
                owner_id: owner,
                title,
                body,
                category,
                visibility,
                scheduled_for,
                images,
                audio,
                fallback_image,
            };
            let memory = cmd_create(&store, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            } else {
                println!("✓ Created memory {}", memory.id);
            }
        }

        Commands::List { owner } => {
            let memories = cmd_list(&store, owner.as_deref()).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&memories)?);
            } else {
                print_memories(&memories);
            }
        }

        Commands::Show { id } => {
            let memory = cmd_show(&store, &id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            } else {
                print_memory(&store, &memory);
            }
        }

        Commands::Update {
            id,
            title,
            body,
            clear_body,
            remove,
            images,
            audio,
        } => {
            let options = UpdateOptions {
                title,
                body,
                clear_body,
                remove,
                images,
                audio,
            };
            let memory = cmd_update(&store, &id, options).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&memory)?);
            } else {
                println!("✓ Updated memory {}", memory.id);
            }
        }

        Commands::Delete { id } => {
            cmd_delete(&store, &id).await?;
            if json {
                println!("{}", deleted_json(&id));
            } else {
                println!("✓ Deleted memory {}", id);
            }
        }
    }

    Ok(())
}

fn load_config(home: Option<PathBuf>) -> Result<Config> {
    let config = Config::load_from(home)?;
    if !config.paths.base_dir.exists() {
        return Err(Error::Config(format!(
            "No keepsake directory at {}. Run 'keepsake init' first.",
            config.paths.base_dir.display()
        )));
    }
    Ok(config)
}

fn deleted_json(id: &str) -> serde_json::Value {
    serde_json::json!({ "status": "ok", "deleted": id })
}
