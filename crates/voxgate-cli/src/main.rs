use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};
use voxgate_core::config::EnvOverrides;

mod cli;

use cli::args::Cli;
use cli::commands::{dispatch, exit_codes};

fn init_logging(log_level: &str, json: bool) {
    let filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt()
        .with_env_filter(filter)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .with_target(true)
        .with_writer(std::io::stderr);

    if json {
        builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init();
    } else {
        builder.compact().init();
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() {
    let cli = Cli::parse();
    let env = EnvOverrides::from_env();

    // stdout carries command output; logs go to stderr
    let level = cli
        .log_level
        .clone()
        .or_else(|| env.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    init_logging(&level, cli.log_json);

    let code = match dispatch(cli, env).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("fatal: {e:?}");
            exit_codes::CONFIG_ERROR
        }
    };
    std::process::exit(code);
}
