use std::path::PathBuf;

use thiserror::Error;

/// Why an ingestion session ended in `failed`.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to start worker '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("worker exited with {}: {diagnostics}", exit_label(.code))]
    Exited {
        code: Option<i32>,
        diagnostics: String,
    },

    #[error("failed reading worker output: {source}{}", stderr_suffix(.diagnostics))]
    Read {
        #[source]
        source: std::io::Error,
        diagnostics: String,
    },

    #[error("worker task stopped without reporting an exit status")]
    Aborted,
}

fn exit_label(code: &Option<i32>) -> String {
    match *code {
        Some(c) => format!("code {c}"),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(diagnostics: &str) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!(" (worker stderr: {diagnostics})")
    }
}

/// Voice-over failures. Always absorbed by the playback controller.
#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("failed to read voice track {}: {source}", path.display())]
    Fetch {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("voice playback failed: {0}")]
    Playback(String),
}
