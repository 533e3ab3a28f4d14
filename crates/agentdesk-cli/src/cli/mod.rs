//! CLI entry and dispatch.

use std::sync::Arc;

use agentdesk_core::api::{HttpChatTransport, HttpThreadApi};
use agentdesk_core::auth::{EnvToken, TokenProvider};
use agentdesk_core::clock::SystemClock;
use agentdesk_core::config::{self, Config};
use agentdesk_core::logging;
use agentdesk_core::outbound::{FileStore, PipelineDeps, PipelineSettings, ResiliencePipeline};
use anyhow::{Context, Result};
use clap::Parser;

mod commands;
mod render;

#[derive(Parser)]
#[command(name = "agentdesk")]
#[command(version)]
#[command(about = "Chat with a multi-agent backend from the terminal")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand)]
enum Commands {
    /// Sends a message and prints the streamed reply
    Send {
        /// The message to send
        #[arg(value_name = "MESSAGE")]
        message: String,

        /// Continue an existing thread by ID
        #[arg(long, value_name = "ID")]
        thread: Option<String>,

        /// Address a specific agent instead of the configured one
        #[arg(long, value_name = "SLUG")]
        agent: Option<String>,

        /// Print the finalized turn as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delivers queued messages to the backend
    Flush,
    /// Lists messages waiting for delivery
    Queue,
    /// Browse threads stored on the backend
    Threads {
        #[command(subcommand)]
        command: ThreadCommands,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(clap::Subcommand)]
enum ThreadCommands {
    /// Lists threads
    List,
    /// Shows a thread's messages
    Show {
        /// The ID of the thread to show
        #[arg(value_name = "THREAD_ID")]
        id: String,
    },
}

#[derive(clap::Subcommand)]
enum ConfigCommands {
    /// Show the path to the config file
    Path,
    /// Initialize a default config file (if not present)
    Init,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Runtime::new().context("create tokio runtime")?;

    rt.block_on(async move { dispatch(cli).await })
}

async fn dispatch(cli: Cli) -> Result<()> {
    // Config commands must work even when the existing file is broken.
    if let Commands::Config { command } = &cli.command {
        return match command {
            ConfigCommands::Path => {
                commands::config::path();
                Ok(())
            }
            ConfigCommands::Init => commands::config::init(),
        };
    }

    let config = Config::load().context("load config")?;
    let _log_guard =
        logging::init(&config.logging, &config::paths::logs_dir()).context("init logging")?;

    match cli.command {
        Commands::Send {
            message,
            thread,
            agent,
            json,
        } => {
            commands::send::run(commands::send::SendOptions {
                config: &config,
                message,
                thread,
                agent,
                json,
            })
            .await
        }
        Commands::Flush => commands::flush::run(&config).await,
        Commands::Queue => commands::queue::run(&config).await,
        Commands::Threads { command } => match command {
            ThreadCommands::List => commands::threads::list(&config).await,
            ThreadCommands::Show { id } => commands::threads::show(&config, &id).await,
        },
        Commands::Config { .. } => Ok(()),
    }
}

fn token_provider() -> Arc<dyn TokenProvider> {
    Arc::new(EnvToken::default())
}

/// REST client for the configured backend.
pub(crate) fn thread_api(config: &Config) -> Result<HttpThreadApi> {
    let base_url = config.effective_base_url()?;
    Ok(HttpThreadApi::new(
        base_url,
        config.api.clone(),
        token_provider(),
    )?)
}

/// Pipeline backed by the on-disk queue under the agentdesk home.
pub(crate) fn build_pipeline(config: &Config) -> Result<ResiliencePipeline> {
    let base_url = config.effective_base_url()?;
    let tokens = token_provider();
    let deps = PipelineDeps {
        store: Arc::new(FileStore::new(config::paths::queue_dir())),
        api: Arc::new(HttpThreadApi::new(
            base_url.clone(),
            config.api.clone(),
            Arc::clone(&tokens),
        )?),
        transport: Arc::new(HttpChatTransport::new(
            &base_url,
            &config.api,
            Arc::clone(&tokens),
        )?),
        tokens,
        clock: Arc::new(SystemClock),
    };
    ResiliencePipeline::new(deps, PipelineSettings::from_config(config))
        .context("open outbound queue")
}
