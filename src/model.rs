use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub type CueId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cue {
    pub id: CueId,
    pub start: f64,
    pub end: f64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub translated_text: Option<String>,
    /// Synthesized voice-over clip for `translated_text`.
    #[serde(default, rename = "audioFile")]
    pub voice_track: Option<PathBuf>,
}

impl Cue {
    pub fn new(id: CueId, start: f64, end: f64, text: impl Into<String>) -> Self {
        Self {
            id,
            start,
            end,
            text: text.into(),
            translated_text: None,
            voice_track: None,
        }
    }

    /// A cue is only valid with finite timing and a positive duration.
    pub fn is_valid(&self) -> bool {
        self.start.is_finite() && self.end.is_finite() && self.end > self.start
    }

    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Inclusive on both ends.
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t <= self.end
    }

    /// Translation when one is available, otherwise the original text.
    pub fn display_text(&self) -> &str {
        match self.translated_text.as_deref() {
            Some(t) if !t.trim().is_empty() => t,
            _ => self.text.as_str(),
        }
    }
}

/// Cue record as the worker emits it. Every field may be missing: a record
/// naming an existing id without timing is a correction of that cue.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCue {
    pub id: Option<CueId>,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub text: Option<String>,
    pub translated_text: Option<String>,
    pub audio_file: Option<String>,
}

impl WireCue {
    /// Builds the stored cue, taking missing fields from `prior`.
    pub fn resolve(self, id: CueId, prior: Option<&Cue>) -> Cue {
        let voice_track = match self.audio_file {
            Some(p) if !p.trim().is_empty() => Some(PathBuf::from(p)),
            Some(_) => None,
            None => prior.and_then(|c| c.voice_track.clone()),
        };

        Cue {
            id,
            start: self
                .start
                .or_else(|| prior.map(|c| c.start))
                .unwrap_or(f64::NAN),
            end: self
                .end
                .or_else(|| prior.map(|c| c.end))
                .unwrap_or(f64::NAN),
            text: self
                .text
                .or_else(|| prior.map(|c| c.text.clone()))
                .unwrap_or_default(),
            translated_text: self
                .translated_text
                .or_else(|| prior.and_then(|c| c.translated_text.clone())),
            voice_track,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Idle,
    Extracting,
    Transcribing,
    Translating,
    Done,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Extracting => "extracting",
            Stage::Transcribing => "transcribing",
            Stage::Translating => "translating",
            Stage::Done => "done",
            Stage::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    pub stage: Stage,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub message: String,
}

impl Default for ProgressState {
    fn default() -> Self {
        Self {
            stage: Stage::Idle,
            progress: 0.0,
            message: String::new(),
        }
    }
}

impl ProgressState {
    pub fn starting() -> Self {
        Self {
            stage: Stage::Extracting,
            progress: 0.0,
            message: String::new(),
        }
    }

    /// Folds a worker update in. Progress never moves backwards within a
    /// stage and is clamped to 0..=100.
    pub fn advance(&mut self, update: ProgressState) {
        let mut progress = if update.progress.is_finite() {
            update.progress.clamp(0.0, 100.0)
        } else {
            0.0
        };
        if update.stage == self.stage {
            progress = progress.max(self.progress);
        }
        self.stage = update.stage;
        self.progress = progress;
        self.message = update.message;
    }
}
