use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(
    name = "credential-rotator",
    version,
    about = "Rotate group members' passwords through a secret-store vault"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Rotate every group member's password.
    Run(RunOpts),
    /// Show what a run would do without changing anything.
    Plan(PlanOpts),
    Config(ConfigOpts),
    Version,
}

#[derive(clap::Args)]
pub struct RunOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    /// Identities reconciled at once.
    #[arg(long, env = "ROTATOR_CONCURRENCY")]
    pub concurrency: Option<usize>,
    /// Abort work not yet started after this many seconds.
    #[arg(long)]
    pub deadline_secs: Option<u64>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct PlanOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
}

#[derive(clap::Args)]
pub struct ConfigOpts {
    #[arg(short, long)]
    pub config: Option<String>,
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    Show,
    Validate,
    Init,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
