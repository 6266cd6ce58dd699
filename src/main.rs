//! Switchboard CLI - multi-account GitLab routing for AI clients
//!
//! Run `switchboard --help` for usage information.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use switchboard::config::{Config, LogFormat};
use switchboard::connection::GitLabConnectionFactory;
use switchboard::context::{
    detect_from_git, write_project_context, FileContextProvider, ProjectContextProvider,
    CONTEXT_FILE_NAME,
};
use switchboard::mcp::McpServer;
use switchboard::server::Switchboard;
use switchboard::store::ValidationResult;
use tracing::{info, warn};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(
    name = "switchboard",
    about = "Route GitLab work to the right account - an MCP server managing several GitLab tokens",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// GitLab personal access token for the default connection
    #[arg(long, env = "GITLAB_TOKEN", hide_env_values = true, global = true)]
    gitlab_token: Option<String>,

    /// GitLab URL for the default connection (defaults to https://gitlab.com)
    #[arg(long, env = "GITLAB_HOST", global = true)]
    gitlab_host: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the MCP server on stdio
    Serve,

    /// Validate the configured token and exit
    Validate,

    /// Inspect or write the project context file
    Context {
        #[command(subcommand)]
        command: ContextCommands,
    },

    /// Initialize configuration
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum ContextCommands {
    /// Show the context that applies to the current directory
    Show,

    /// Write a context file into the current directory
    Init {
        /// Project path (e.g. group/repo); detected from the git remote if omitted
        #[arg(short, long)]
        project: Option<String>,

        /// GitLab URL for this project
        #[arg(long)]
        host: Option<String>,

        /// Token name to use for this project
        #[arg(short = 'n', long)]
        credential: Option<String>,

        /// Overwrite an existing context file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    // `init` must work before any configuration exists
    if let Commands::Init { force } = cli.command {
        return init_config(&config_path, force).await;
    }

    let config = if cli.config.is_some() || config_path.exists() {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };
    let config = config.with_overrides(cli.gitlab_token, cli.gitlab_host);

    init_logging(&config, cli.verbose)?;

    match cli.command {
        Commands::Serve => run_mcp_server(config).await?,
        Commands::Validate => validate_token(config).await?,
        Commands::Context { command } => match command {
            ContextCommands::Show => show_context().await?,
            ContextCommands::Init {
                project,
                host,
                credential,
                force,
            } => init_context(project, host, credential, force).await?,
        },
        Commands::Init { .. } => {}
    }

    Ok(())
}

/// Install the tracing subscriber
///
/// Logs go to stderr (stdout carries JSON-RPC) or to the configured file.
fn init_logging(config: &Config, verbose: u8) -> Result<(), Box<dyn std::error::Error>> {
    let directive = match verbose {
        0 => config.logging.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let (writer, ansi) = match &config.logging.file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            (BoxMakeWriter::new(Arc::new(file)), false)
        }
        None => (BoxMakeWriter::new(std::io::stderr), true),
    };

    let fmt_layer = match config.logging.format {
        LogFormat::Json => fmt::layer().json().with_writer(writer).boxed(),
        LogFormat::Pretty => fmt::layer().with_writer(writer).with_ansi(ansi).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive)))
        .init();

    Ok(())
}

/// Build the service and register the environment token, if any
async fn build_switchboard(
    config: &Config,
) -> Result<Arc<Switchboard>, Box<dyn std::error::Error>> {
    let factory = Arc::new(GitLabConnectionFactory::new()?);
    let provider = Arc::new(FileContextProvider::from_current_dir()?);
    let switchboard = Arc::new(Switchboard::new(config, factory, provider));

    match &config.gitlab.token {
        Some(token) => {
            let name = switchboard.bootstrap(token, &config.gitlab.host).await?;
            info!(name = %name, "Default connection ready");
        }
        None => warn!("GITLAB_TOKEN not set; add tokens with the add_token tool"),
    }

    Ok(switchboard)
}

/// Run the MCP server for AI client integration
async fn run_mcp_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let switchboard = build_switchboard(&config).await?;
    let mut mcp = McpServer::new(switchboard, std::env::current_dir()?);

    mcp.run_stdio().await?;

    Ok(())
}

/// Validate the environment token and print the outcome
async fn validate_token(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    if config.gitlab.token.is_none() {
        return Err("No token to validate. Set GITLAB_TOKEN or pass --gitlab-token.".into());
    }

    let switchboard = build_switchboard(&config).await?;
    let results = switchboard.validate_all().await;

    if results.is_empty() {
        return Err("Token validation failed; see the log for details".into());
    }

    println!("{:<30} {:<8} {:<20} EXPIRES", "NAME", "STATUS", "USER");
    println!("{}", "-".repeat(70));
    for result in &results {
        print_validation(result);
    }

    if results.iter().any(|r| !r.success) {
        return Err("One or more tokens failed validation".into());
    }
    Ok(())
}

fn print_validation(result: &ValidationResult) {
    let status = if result.success { "ok" } else { "failed" };
    let user = result
        .identity
        .as_ref()
        .map(|i| i.username.clone())
        .unwrap_or_else(|| "-".to_string());
    let expires = if result.days_until_expiry > 0 {
        format!("in {} days", result.days_until_expiry)
    } else {
        "-".to_string()
    };

    println!("{:<30} {:<8} {:<20} {}", result.name, status, user, expires);
    if let Some(error) = &result.error {
        println!("  {}", error);
    }
}

/// Show the context file that applies here, or what git suggests
async fn show_context() -> Result<(), Box<dyn std::error::Error>> {
    let provider = FileContextProvider::from_current_dir()?;

    if let Some(found) = provider.find().await? {
        println!("# {}", found.source.display());
        println!("{}", serde_json::to_string_pretty(&found.context)?);
        return Ok(());
    }

    println!("No {} found in this directory or its parents.", CONTEXT_FILE_NAME);
    match detect_from_git(provider.start_dir()).await {
        Ok(detected) => {
            println!("\nDetected from git remote:");
            println!("{}", serde_json::to_string_pretty(&detected)?);
            println!("\nRun `switchboard context init` to save it.");
        }
        Err(e) => println!("Git detection: {}", e),
    }

    Ok(())
}

/// Write a context file into the current directory
async fn init_context(
    project: Option<String>,
    host: Option<String>,
    credential: Option<String>,
    force: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::current_dir()?;

    if dir.join(CONTEXT_FILE_NAME).exists() && !force {
        return Err(format!(
            "{} already exists. Use --force to overwrite.",
            CONTEXT_FILE_NAME
        )
        .into());
    }

    let mut context = match project {
        Some(project) => switchboard::context::ProjectContext::new(project),
        None => detect_from_git(&dir).await?,
    };
    if host.is_some() {
        context.host = host;
    }
    if credential.is_some() {
        context.credential_name = credential;
    }

    let path = write_project_context(&dir, &context).await?;
    println!("Project context for '{}' written to {}", context.project_id, path.display());

    Ok(())
}

async fn init_config(config_path: &Path, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    if config_path.exists() && !force {
        return Err(format!(
            "Configuration already exists at {}. Use --force to overwrite.",
            config_path.display()
        )
        .into());
    }

    if let Some(parent) = config_path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let default_config = r#"# Switchboard Configuration
#
# The token itself is never read from this file. Provide it with
# GITLAB_TOKEN (or --gitlab-token); GITLAB_HOST overrides [gitlab].host.

[gitlab]
# host = "https://gitlab.example.com"
# default_connection = "work"

[validation]
timeout_secs = 10
expiry_warning_days = 30

[notifications]
capacity = 100

[logging]
level = "info"
format = "pretty"
# file = "~/.local/state/switchboard/switchboard.log"
"#;

    tokio::fs::write(config_path, default_config).await?;

    println!("Configuration initialized at {}", config_path.display());
    println!("\nNext steps:");
    println!("1. export GITLAB_TOKEN=<your personal access token>");
    println!("2. Check it: switchboard validate");
    println!("3. Register with your MCP client: switchboard serve");
    println!("4. Pin a project to a token: switchboard context init --credential <name>");

    Ok(())
}
