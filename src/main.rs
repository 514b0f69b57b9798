use anyhow::Result;
use clap::Parser;

mod cli;
mod config;
mod error;
mod formats;
mod model;
mod pipeline;
mod playback;
mod player;
mod protocol;
mod session;
mod timeline;
mod worker;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Args::parse();

    let cfg = config::Config::load(args.config.as_deref())?;
    config::init_tracing(&cfg.logging, args.log_level.as_deref())?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "subsync starting");

    match args.command {
        cli::Command::Transcribe(cmd) => pipeline::run_transcribe(cmd, &cfg).await,
        cli::Command::Play(cmd) => pipeline::run_play(cmd, &cfg).await,
        cli::Command::Convert(cmd) => pipeline::run_convert(cmd, &cfg),
        cli::Command::PrintDefaultConfig => {
            let s = cfg.to_toml_pretty()?;
            print!("{s}");
            Ok(())
        }
    }
}
