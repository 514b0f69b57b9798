use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Parser)]
#[command(name = "subsync")]
#[command(about = "Stream subtitles out of a transcription worker and play them back in sync.")]
pub struct Args {
    /// Path to config TOML (defaults to ./config.toml if present)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the worker on a media file and save the subtitles it produces
    Transcribe(TranscribeCmd),
    /// Play a subtitle file against a simulated clock
    Play(PlayCmd),
    /// Convert between formats
    Convert(ConvertCmd),
    /// Print the effective default config as TOML and exit
    PrintDefaultConfig,
}

#[derive(Debug, Parser)]
pub struct TranscribeCmd {
    /// Media file handed to the worker
    pub media: PathBuf,

    /// Ask the worker to synthesize voice-over clips
    #[arg(long)]
    pub tts: bool,

    /// Output file path (optional)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value_t = Format::Srt)]
    pub to: Format,

    /// Write to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,

    /// Allow overwriting output file
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Debug, Parser)]
pub struct PlayCmd {
    /// Subtitle file (.srt or .json), or a media file with --transcribe
    pub input: PathBuf,

    /// Treat the input as media and play cues as the worker streams them
    #[arg(long)]
    pub transcribe: bool,

    /// Start position, seconds or M:SS.mmm
    #[arg(long)]
    pub from: Option<String>,

    /// Stop position, seconds or M:SS.mmm (defaults to the end of the last cue)
    #[arg(long)]
    pub until: Option<String>,

    /// Force voice-over on regardless of config (with --transcribe, also
    /// asks the worker to synthesize it)
    #[arg(long)]
    pub voice: bool,

    /// User volume, 0.0 to 1.0 (defaults to the config value)
    #[arg(long)]
    pub volume: Option<f64>,

    /// Start muted
    #[arg(long)]
    pub mute: bool,
}

#[derive(Debug, Parser)]
pub struct ConvertCmd {
    /// Input file path, or '-' for stdin
    pub input: String,

    /// Output file path (optional)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Target format
    #[arg(long, value_enum)]
    pub to: Format,

    /// Force input format (otherwise inferred from extension or content)
    #[arg(long, value_enum)]
    pub from: Option<Format>,

    /// Write to stdout instead of a file
    #[arg(long)]
    pub stdout: bool,

    /// Allow overwriting output file
    #[arg(long)]
    pub overwrite: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum Format {
    Srt,
    Json,
}

impl Format {
    pub fn extension(self) -> &'static str {
        match self {
            Format::Srt => "srt",
            Format::Json => "json",
        }
    }
}
