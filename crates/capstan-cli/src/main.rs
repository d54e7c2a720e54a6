//! Capstan operator CLI.

use capstan_config::{LogFormat, SystemConfig};
use capstan_core::{DeploymentId, DeploymentStatus, HostId, ProjectId, RecipeId, StageId};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Capstan deployment console", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, env = "CAPSTAN_CONFIG", default_value = "capstan.kdl")]
    config: PathBuf,

    /// Database URL, overrides the configuration file
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply database migrations
    Migrate,
    /// Manage projects
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },
    /// Manage hosts
    Host {
        #[command(subcommand)]
        command: HostCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Manage configuration parameters
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
    /// Manage stages
    Stage {
        #[command(subcommand)]
        command: StageCommands,
    },
    /// Start and finish deployments
    Deploy {
        #[command(subcommand)]
        command: DeployCommands,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a project
    Create { name: String },
    /// List all projects
    List,
}

#[derive(Subcommand)]
enum HostCommands {
    /// Create a host
    Create { name: String },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a recipe
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Associate a recipe with a stage
    Attach { stage: StageId, recipe: RecipeId },
}

/// Which project or stage a parameter belongs to.
#[derive(Args)]
#[group(required = true, multiple = false)]
struct OwnerArgs {
    /// Project ID
    #[arg(long)]
    project: Option<ProjectId>,
    /// Stage ID
    #[arg(long)]
    stage: Option<StageId>,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Create or replace a parameter
    Set {
        #[command(flatten)]
        owner: OwnerArgs,
        name: String,
        #[arg(default_value = "")]
        value: String,
        /// Ask for the value at deploy time
        #[arg(long)]
        prompt: bool,
    },
    /// Remove a parameter
    Unset {
        #[command(flatten)]
        owner: OwnerArgs,
        name: String,
    },
}

#[derive(Subcommand)]
enum StageCommands {
    /// Create a stage
    Create {
        #[arg(long)]
        project: ProjectId,
        name: String,
        /// Space-separated alert addresses
        #[arg(long)]
        alert_emails: Option<String>,
    },
    /// List the stages of a project
    List {
        #[arg(long)]
        project: ProjectId,
    },
    /// Show a stage with its effective configuration
    Show { id: StageId },
    /// Report why a stage cannot be deployed
    Check { id: StageId },
    /// Lock a stage
    Lock { id: StageId },
    /// Unlock a stage
    Unlock { id: StageId },
    /// Attach a deployment to a locked stage
    LockWith { id: StageId, deployment: DeploymentId },
    /// Create a new stage seeded from an existing one
    Clone {
        source: StageId,
        /// Name of the new stage, defaults to "Clone of <source>"
        #[arg(long)]
        name: Option<String>,
    },
    /// List the tasks available to a stage
    Tasks { id: StageId },
    /// Delete a stage
    Delete { id: StageId },
    /// Bind a host to a stage under a role name
    AddRole {
        id: StageId,
        name: String,
        host: HostId,
        #[arg(long)]
        primary: bool,
        #[arg(long)]
        no_release: bool,
        #[arg(long)]
        no_symlink: bool,
        #[arg(long)]
        ssh_port: Option<u16>,
    },
}

#[derive(Subcommand)]
enum DeployCommands {
    /// Lock a stage and record a deployment
    Begin {
        stage: StageId,
        #[arg(default_value = "deploy")]
        task: String,
        #[arg(long)]
        description: Option<String>,
    },
    /// Record the outcome of a deployment and release its stage
    Finish {
        deployment: DeploymentId,
        /// success, failed or canceled
        status: DeploymentStatus,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(&cli.config)?;
    if let Some(url) = cli.database_url {
        config.database.url = url;
    }
    init_tracing(&config);

    let ctx = commands::Context::connect(config, cli.json).await?;

    match cli.command {
        Commands::Migrate => commands::migrate(&ctx).await?,
        Commands::Project { command } => match command {
            ProjectCommands::Create { name } => commands::project::create(&ctx, &name).await?,
            ProjectCommands::List => commands::project::list(&ctx).await?,
        },
        Commands::Host { command } => match command {
            HostCommands::Create { name } => commands::inventory::create_host(&ctx, &name).await?,
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create { name, description } => {
                commands::inventory::create_recipe(&ctx, &name, description.as_deref()).await?;
            }
            RecipeCommands::Attach { stage, recipe } => {
                commands::inventory::attach_recipe(&ctx, stage, recipe).await?;
            }
        },
        Commands::Config { command } => match command {
            ConfigCommands::Set {
                owner,
                name,
                value,
                prompt,
            } => {
                commands::config::set(&ctx, owner.into_owner()?, name, value, prompt).await?;
            }
            ConfigCommands::Unset { owner, name } => {
                commands::config::unset(&ctx, owner.into_owner()?, &name).await?;
            }
        },
        Commands::Stage { command } => match command {
            StageCommands::Create {
                project,
                name,
                alert_emails,
            } => commands::stage::create(&ctx, project, name, alert_emails).await?,
            StageCommands::List { project } => commands::stage::list(&ctx, project).await?,
            StageCommands::Show { id } => commands::stage::show(&ctx, id).await?,
            StageCommands::Check { id } => commands::stage::check(&ctx, id).await?,
            StageCommands::Lock { id } => commands::stage::lock(&ctx, id).await?,
            StageCommands::Unlock { id } => commands::stage::unlock(&ctx, id).await?,
            StageCommands::LockWith { id, deployment } => {
                commands::stage::lock_with(&ctx, id, deployment).await?;
            }
            StageCommands::Clone { source, name } => {
                commands::stage::clone(&ctx, source, name).await?;
            }
            StageCommands::Tasks { id } => commands::stage::tasks(&ctx, id).await?,
            StageCommands::Delete { id } => commands::stage::delete(&ctx, id).await?,
            StageCommands::AddRole {
                id,
                name,
                host,
                primary,
                no_release,
                no_symlink,
                ssh_port,
            } => {
                let mut role = capstan_core::NewRole::new(name, host);
                role.primary = primary;
                role.no_release = no_release;
                role.no_symlink = no_symlink;
                role.ssh_port = ssh_port;
                commands::inventory::add_role(&ctx, id, role).await?;
            }
        },
        Commands::Deploy { command } => match command {
            DeployCommands::Begin {
                stage,
                task,
                description,
            } => commands::deploy::begin(&ctx, stage, task, description).await?,
            DeployCommands::Finish { deployment, status } => {
                commands::deploy::finish(&ctx, deployment, status).await?;
            }
        },
    }

    Ok(())
}

impl OwnerArgs {
    fn into_owner(self) -> anyhow::Result<capstan_core::ParameterOwner> {
        match (self.project, self.stage) {
            (None, Some(stage)) => Ok(capstan_core::ParameterOwner::Stage(stage)),
            (Some(project), None) => Ok(capstan_core::ParameterOwner::Project(project)),
            _ => anyhow::bail!("exactly one of --project or --stage is required"),
        }
    }
}

/// Defaults when the file does not exist. A malformed file is an error.
fn load_config(path: &Path) -> anyhow::Result<SystemConfig> {
    if !path.exists() {
        return Ok(SystemConfig::default());
    }
    capstan_config::load_system_config(path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", path.display(), e))
}

/// `RUST_LOG` wins over the configured filter.
fn init_tracing(config: &SystemConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));

    match config.logging.format {
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}
