use super::super::args::{ConfigArgs, ConfigSub, InitArgs};
use super::{exit_codes, Ctx};
use voxgate_core::config::{load_config, write_sample_config};

pub fn cmd_init(ctx: &Ctx, args: InitArgs) -> anyhow::Result<i32> {
    if ctx.config_path.exists() && !args.force {
        eprintln!(
            "{} already exists (use --force to overwrite)",
            ctx.config_path.display()
        );
        return Ok(exit_codes::CONFIG_ERROR);
    }
    write_sample_config(&ctx.config_path)?;
    eprintln!("Wrote {}", ctx.config_path.display());

    let store = ctx.open_store()?;
    let stats = store.stats_best_effort()?;
    eprintln!(
        "Database ready at {} (schema v{})",
        ctx.db.display(),
        stats.version.unwrap_or_else(|| "?".into())
    );
    Ok(exit_codes::OK)
}

pub fn cmd_config(ctx: &Ctx, args: ConfigArgs) -> anyhow::Result<i32> {
    match args.cmd {
        ConfigSub::Check => match load_config(&ctx.config_path, ctx.strict) {
            Ok(cfg) => {
                println!("{}", serde_yaml::to_string(&cfg)?);
                eprintln!("config ok ({})", cfg.fingerprint());
                Ok(exit_codes::OK)
            }
            Err(e) => {
                eprintln!("{}", e);
                Ok(exit_codes::CONFIG_ERROR)
            }
        },
    }
}
