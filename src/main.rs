use clap::Parser;
use exn::ResultExt;
use reel::error::{ErrorKind, Result};
use reel::{App, Cli};
use reel_config::Settings;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

fn init_tracing(level: &str) {
    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Settings)?;
    init_tracing(&settings.log.level);

    let app = App::open(&settings, cli.read_only).await?;
    let output = cli.command.execute(&app).await;
    app.close().await;
    let output = serde_json::to_string_pretty(&output?)
        .or_raise(|| ErrorKind::InvalidInput("unserializable output".to_string()))?;
    println!("{output}");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    match run(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:?}");
            ExitCode::FAILURE
        },
    }
}
