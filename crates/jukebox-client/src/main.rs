mod console;

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use jukebox_client::SessionCore;
use jukebox_proto::config::Config;
use jukebox_proto::platform;
use jukebox_proto::session::SessionToken;

#[derive(Debug, Parser)]
#[command(name = "jukebox", version, about = "Headless client for the jukebox music bot")]
struct Cli {
    /// Page URL carrying the session token in its `s` parameter
    page_url: String,

    /// Backend host[:port], overrides the config file
    #[arg(long)]
    host: Option<String>,

    /// Use plain ws:// instead of wss://
    #[arg(long)]
    insecure: bool,

    /// Config file to use instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let data_dir = platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = platform::log_path();

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for our crates and quieter
    // websocket internals.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        "info,jukebox_client=debug,jukebox_proto=debug,tungstenite=warn,tokio_tungstenite=warn"
            .to_string()
    });
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("jukebox log: {}", log_path.display());

    tracing::info!("jukebox starting…");

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load().unwrap_or_default(),
    };
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if cli.insecure {
        config.server.secure = false;
    }

    let token = SessionToken::from_page_url(&cli.page_url).context("reading session token")?;
    tracing::info!("session token: {:?}", token);

    let (handle, core_task) = SessionCore::spawn(&config, &token)?;
    console::run(handle).await?;
    core_task.await??;

    tracing::info!("jukebox stopped");
    Ok(())
}
