use anyhow::Result;
use onair::{
    app,
    cli::{handle_chunks_command, handle_plan_command, handle_status_command, load_config, Cli, CliCommand},
};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    match cli.command {
        Some(CliCommand::Version) => {
            println!("onair {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        Some(CliCommand::Status(args)) => {
            let config = load_config(cli.config.as_ref())?;
            handle_status_command(&config, args)?;
            return Ok(());
        }
        Some(CliCommand::Chunks(args)) => {
            let config = load_config(cli.config.as_ref())?;
            handle_chunks_command(&config, args)?;
            return Ok(());
        }
        Some(CliCommand::Plan) => {
            let config = load_config(cli.config.as_ref())?;
            handle_plan_command(&config).await?;
            return Ok(());
        }
        None => {}
    }

    app::run_service(cli.config).await
}
