use super::args::{Cli, Command};
use serde::Serialize;
use std::path::{Path, PathBuf};
use voxgate_core::config::{load_config, EngineConfig, EnvOverrides};
use voxgate_core::storage::Store;

pub mod baseline;
pub mod defects;
pub mod ingest;
pub mod init;
pub mod queue;
pub mod regress;
pub mod serve;

pub mod exit_codes {
    pub const OK: i32 = 0;
    /// Regressions found, or a queue request was refused.
    pub const TEST_FAILED: i32 = 1;
    pub const CONFIG_ERROR: i32 = 2;
}

pub const DEFAULT_DB: &str = ".voxgate/voxgate.db";

/// Everything a command needs besides its own arguments.
pub struct Ctx {
    pub db: PathBuf,
    pub config_path: PathBuf,
    pub strict: bool,
}

impl Ctx {
    pub fn from_cli(cli: &Cli, env: &EnvOverrides) -> Self {
        Self {
            db: cli
                .db
                .clone()
                .or_else(|| env.db_path.clone())
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB)),
            config_path: cli.config.clone(),
            strict: cli.strict,
        }
    }

    /// A missing config file means defaults; a present but invalid one is an error.
    pub fn engine_config(&self) -> anyhow::Result<EngineConfig> {
        if !self.config_path.exists() {
            tracing::debug!(path = %self.config_path.display(), "no config file, using defaults");
            return Ok(EngineConfig::default());
        }
        load_config(&self.config_path, self.strict).map_err(|e| anyhow::anyhow!(e))
    }

    pub fn open_store(&self) -> anyhow::Result<Store> {
        ensure_parent(&self.db)?;
        let store = Store::open(&self.db)?;
        store.init_schema()?;
        Ok(store)
    }
}

fn ensure_parent(path: &Path) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn dispatch(cli: Cli, env: EnvOverrides) -> anyhow::Result<i32> {
    let ctx = Ctx::from_cli(&cli, &env);
    match cli.cmd {
        Command::Init(args) => init::cmd_init(&ctx, args),
        Command::Config(args) => init::cmd_config(&ctx, args),
        Command::Ingest(args) => ingest::cmd_ingest(&ctx, args),
        Command::Queue(args) => queue::cmd_queue(&ctx, args),
        Command::Baseline(args) => baseline::cmd_baseline(&ctx, args),
        Command::Regress(args) => regress::cmd_regress(&ctx, args),
        Command::Defects(args) => defects::cmd_defects(&ctx, args),
        Command::Serve(args) => serve::cmd_serve(&ctx, args).await,
        Command::Version => {
            println!("voxgate {}", env!("CARGO_PKG_VERSION"));
            Ok(exit_codes::OK)
        }
    }
}
