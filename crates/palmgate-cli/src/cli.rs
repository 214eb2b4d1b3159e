use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use palmgate_config::MatchPreset;

#[derive(Debug, Parser)]
#[command(
    name = "palmgate",
    about = "Enroll and verify identities from hand landmark captures",
    version
)]
pub struct Cli {
    /// Emit structured JSON to stdout instead of human-readable logs
    #[arg(long, global = true)]
    pub json: bool,

    /// Increase verbosity (may be used multiple times)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Work with hand captures and enrolled templates
    #[command(subcommand)]
    Hands(HandsCommands),
    /// Match a capture against a user's enrolled template
    Verify(VerifyArgs),
    /// Secret Service keyring utilities
    #[command(subcommand)]
    Keyring(KeyringCommands),
}

#[derive(Debug, Subcommand)]
pub enum HandsCommands {
    /// Extract the geometric signature from a landmark capture
    Extract(HandExtractArgs),
    /// Replace a user's template with signatures from several captures
    Enroll(HandEnrollArgs),
    /// Remove enrolled samples (or the whole template) for a user
    Remove(HandRemoveArgs),
}

#[derive(Debug, Args)]
pub struct HandExtractArgs {
    /// Landmark capture JSON produced by the hand detector
    pub capture: PathBuf,

    /// Output file for the extracted features (defaults to <capture>.features.json)
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct HandEnrollArgs {
    /// Target user name
    #[arg(long)]
    pub user: String,

    /// Landmark captures to enroll (one sample per capture)
    #[arg(required = true)]
    pub captures: Vec<PathBuf>,

    /// Override the template store directory
    #[arg(long)]
    pub store_dir: Option<PathBuf>,

    /// Minimum number of usable captures (defaults to config or 5)
    #[arg(long)]
    pub min_samples: Option<usize>,
}

#[derive(Debug, Args)]
pub struct HandRemoveArgs {
    /// Target user name
    #[arg(long)]
    pub user: String,

    /// Sample identifier to remove (repeatable)
    #[arg(long = "sample-id", required_unless_present = "all", conflicts_with = "all")]
    pub sample_id: Vec<String>,

    /// Remove the whole template
    #[arg(long)]
    pub all: bool,

    /// Override the template store directory
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Target user name
    #[arg(long)]
    pub user: String,

    /// Landmark capture JSON to verify
    pub capture: PathBuf,

    /// Match policy preset (strict-geometric or hybrid-fused)
    #[arg(long)]
    pub preset: Option<MatchPreset>,

    /// Transaction amount used to pick the step-up tier
    #[arg(long)]
    pub amount: Option<f64>,

    /// Override the template store directory
    #[arg(long)]
    pub store_dir: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum KeyringCommands {
    /// Verify that the Secret Service keyring is reachable and report the template key
    Check(KeyringCheckArgs),
}

#[derive(Debug, Args)]
pub struct KeyringCheckArgs {
    /// Account whose template key is inspected (defaults to the invoking user)
    #[arg(long)]
    pub user: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl From<bool> for OutputMode {
    fn from(json: bool) -> Self {
        if json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

impl Cli {
    pub fn output_mode(&self) -> OutputMode {
        OutputMode::from(self.json)
    }
}
