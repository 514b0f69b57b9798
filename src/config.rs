use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: Logging,
    pub worker: WorkerCfg,
    pub playback: PlaybackCfg,
    pub srt: SrtCfg,
    pub json: JsonCfg,
}

impl Config {
    pub fn load(path_opt: Option<&Path>) -> Result<Self> {
        let default_path = Path::new("config.toml");
        let path = if let Some(p) = path_opt {
            Some(p)
        } else if default_path.exists() {
            Some(default_path)
        } else {
            None
        };

        let Some(path) = path else {
            return Ok(Config::default());
        };

        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed reading config file: {}", path.display()))?;
        let cfg: Config = toml::from_str(&raw)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        Ok(cfg)
    }

    pub fn to_toml_pretty(&self) -> Result<String> {
        let s = toml::to_string_pretty(self).context("failed serializing config as TOML")?;
        Ok(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    pub level: String,
    pub format: String,
    pub debug_cue_samples: usize,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
            debug_cue_samples: 20,
        }
    }
}

/// How to launch the transcription worker. The media path goes after
/// `args`, followed by `tts_flag` when voice-over synthesis is requested.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerCfg {
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub tts_flag: String,
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerCfg {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["process.py".to_string()],
            working_dir: None,
            tts_flag: "--tts".to_string(),
            env: BTreeMap::from([("PYTHONUNBUFFERED".to_string(), "1".to_string())]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackCfg {
    /// Fraction of the user volume the primary track keeps under voice-over.
    pub ducking_factor: f64,
    /// Initial user volume, 0.0..=1.0.
    pub volume: f64,
    pub tick_ms: u64,
    pub voice_over: bool,
}

impl Default for PlaybackCfg {
    fn default() -> Self {
        Self {
            ducking_factor: 0.15,
            volume: 1.0,
            tick_ms: 250,
            voice_over: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SrtCfg {
    /// Shift applied to every timestamp on export.
    pub timestamp_offset_ms: i64,
    /// Export translated text where present instead of the original.
    pub prefer_translation: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct JsonCfg {
    /// Export as `{"subtitles": [...]}` instead of a bare array.
    pub wrapped: bool,
}

pub fn init_tracing(logging: &Logging, cli_override_level: Option<&str>) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let level = cli_override_level.unwrap_or(logging.level.as_str());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let is_json = logging.format.to_lowercase() == "json";

    if is_json {
        fmt()
            .with_env_filter(filter)
            .event_format(fmt::format().json())
            .with_writer(std::io::stderr)
            .with_target(true)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(true)
            .pretty()
            .init();
    }

    tracing::info!(
        level = level,
        format = logging.format.as_str(),
        "logging initialized"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [worker]
            program = "/opt/worker/bin/python"

            [playback]
            ducking_factor = 0.3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.worker.program, "/opt/worker/bin/python");
        assert_eq!(cfg.worker.args, vec!["process.py"]);
        assert_eq!(cfg.worker.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
        assert_eq!(cfg.playback.ducking_factor, 0.3);
        assert_eq!(cfg.playback.volume, 1.0);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn default_config_survives_toml_round_trip() {
        let s = Config::default().to_toml_pretty().unwrap();
        let back: Config = toml::from_str(&s).unwrap();
        assert_eq!(back.worker.tts_flag, "--tts");
        assert_eq!(back.playback.tick_ms, 250);
    }

    #[test]
    fn load_reads_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subsync.toml");
        fs::write(&path, "[srt]\ntimestamp_offset_ms = -250\n").unwrap();

        let cfg = Config::load(Some(&path)).unwrap();
        assert_eq!(cfg.srt.timestamp_offset_ms, -250);

        assert!(Config::load(Some(&dir.path().join("missing.toml"))).is_err());
    }
}
