use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "voxgate",
    version,
    about = "Validation decisions, review queue and regression tracking for voice assistant tests"
)]
pub struct Cli {
    /// SQLite database (falls back to $VOXGATE_DB, then .voxgate/voxgate.db)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[arg(long, global = true, default_value = "voxgate.yaml")]
    pub config: PathBuf,

    /// Reject unknown config keys instead of warning
    #[arg(long, global = true)]
    pub strict: bool,

    /// Log filter, e.g. "info" or "voxgate_core=debug" (falls back to $VOXGATE_LOG)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Write a sample config and create the database
    Init(InitArgs),
    Config(ConfigArgs),
    /// Run JSONL step executions and script results through the pipeline
    Ingest(IngestArgs),
    Queue(QueueArgs),
    Baseline(BaselineArgs),
    /// Compare latest results against approved baselines (exit 1 on regressions)
    Regress(RegressArgs),
    Defects(DefectsArgs),
    /// Run scheduled background jobs
    Serve(ServeArgs),
    Version,
}

#[derive(clap::Args, Debug, Clone)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

#[derive(Parser, Clone)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub cmd: ConfigSub,
}

#[derive(Subcommand, Clone)]
pub enum ConfigSub {
    /// Load and validate the config, print the effective values
    Check,
}

#[derive(clap::Args, Debug, Clone)]
pub struct IngestArgs {
    /// JSONL file; "-" reads stdin
    #[arg(long)]
    pub input: PathBuf,
}

#[derive(Parser, Clone)]
pub struct QueueArgs {
    #[command(subcommand)]
    pub cmd: QueueSub,
}

#[derive(Subcommand, Clone)]
pub enum QueueSub {
    /// Show the next pending item without claiming it
    Next {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        validator: String,
        #[arg(long)]
        language: Option<String>,
    },
    Claim {
        queue_id: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        validator: String,
    },
    Release {
        queue_id: String,
        #[arg(long)]
        tenant: String,
    },
    Submit {
        queue_id: String,
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        validator: String,
        /// pass | fail
        #[arg(long)]
        decision: String,
        #[arg(long)]
        feedback: Option<String>,
        #[arg(long, default_value_t = 0)]
        time_spent: u32,
    },
    Stats {
        #[arg(long)]
        tenant: String,
        /// Also show this validator's running performance
        #[arg(long)]
        validator: Option<String>,
    },
}

#[derive(Parser, Clone)]
pub struct BaselineArgs {
    #[command(subcommand)]
    pub cmd: BaselineSub,
}

#[derive(Subcommand, Clone)]
pub enum BaselineSub {
    /// Approve a new baseline version for a script
    Approve {
        script_id: String,
        #[arg(long)]
        by: String,
        #[arg(long)]
        note: Option<String>,
        /// Snapshot JSON ({"status", "metrics"}); defaults to the latest recorded execution
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },
    Show {
        script_id: String,
        #[arg(long)]
        version: Option<u32>,
    },
    History {
        script_id: String,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct RegressArgs {
    /// Only this script; defaults to every script with a baseline
    #[arg(long)]
    pub script: Option<String>,

    /// text | json
    #[arg(long, default_value = "text")]
    pub format: String,
}

#[derive(Parser, Clone)]
pub struct DefectsArgs {
    #[command(subcommand)]
    pub cmd: DefectsSub,
}

#[derive(Subcommand, Clone)]
pub enum DefectsSub {
    List {
        #[arg(long)]
        script: Option<String>,
    },
    /// Show defect patterns; --refresh re-clusters first
    Patterns {
        #[arg(long)]
        refresh: bool,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct ServeArgs {
    /// Run a single sweep and exit
    #[arg(long)]
    pub once: bool,

    /// Deliver override samples by appending to this JSONL file
    #[arg(long, conflicts_with = "sink_url")]
    pub sink_jsonl: Option<PathBuf>,

    /// Deliver override samples by POSTing to this URL
    #[arg(long)]
    pub sink_url: Option<String>,
}
