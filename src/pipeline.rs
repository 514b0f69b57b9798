use anyhow::{Context, Result, anyhow};
use bytes::Bytes;
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::{
    cli::{ConvertCmd, Format, PlayCmd, TranscribeCmd},
    config::{Config, PlaybackCfg},
    error::{SessionError, VoiceError},
    formats::{
        self,
        time::{format_clock, format_compact, format_srt_timestamp, parse_compact},
    },
    playback::{MediaSink, PlaybackClock, Update, VoiceTicket},
    player::{Player, PlayerEvent},
    session::{IngestionSession, SessionEvent, SessionOptions},
    timeline::Timeline,
    worker::WorkerCommand,
};

enum Ending {
    Completed,
    Failed(SessionError),
    Interrupted,
}

pub async fn run_transcribe(cmd: TranscribeCmd, cfg: &Config) -> Result<()> {
    let span = tracing::info_span!(
        "transcribe",
        media = %cmd.media.display(),
        tts = cmd.tts,
        to = ?cmd.to
    );
    transcribe(cmd, cfg).instrument(span).await
}

async fn transcribe(cmd: TranscribeCmd, cfg: &Config) -> Result<()> {
    if !cmd.media.is_file() {
        return Err(anyhow!("media file not found: {}", cmd.media.display()));
    }

    let mut session = IngestionSession::new(WorkerCommand::from_config(&cfg.worker));
    session.start(
        &cmd.media,
        SessionOptions {
            synthesize_voice: cmd.tts,
        },
    );

    let ending = drive_session(&mut session).await;
    let timeline = session.timeline();
    log_timeline_summary(timeline, cfg);

    // Partial results are still worth keeping after a crash or Ctrl-C.
    if matches!(ending, Ending::Completed) || !timeline.is_empty() {
        let rendered = render_any(timeline, cmd.to, cfg)?;
        if cmd.stdout {
            print!("{rendered}");
            tracing::info!(mode = "stdout", "wrote output");
        } else {
            let out_path = cmd
                .output
                .clone()
                .unwrap_or_else(|| cmd.media.with_extension(cmd.to.extension()));
            write_output(&out_path, &rendered, cmd.overwrite)?;
            tracing::info!(path = %out_path.display(), "wrote output file");
        }
    }

    match ending {
        Ending::Completed => Ok(()),
        Ending::Failed(e) => Err(anyhow::Error::new(e).context("transcription failed")),
        Ending::Interrupted => Err(anyhow!("transcription interrupted")),
    }
}

async fn drive_session(session: &mut IngestionSession) -> Ending {
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                session.cancel();
                tracing::warn!(
                    stage = session.progress().stage.as_str(),
                    "interrupted, worker cancelled"
                );
                return Ending::Interrupted;
            }
            ev = session.next_event() => match ev {
                Some(SessionEvent::Progress(p)) => tracing::info!(
                    stage = p.stage.as_str(),
                    progress = p.progress,
                    message = p.message.as_str(),
                    "progress"
                ),
                Some(SessionEvent::Cue(c)) => tracing::info!(
                    id = c.id,
                    at = %format_compact(c.start),
                    text = c.display_text(),
                    "cue"
                ),
                Some(SessionEvent::Completed { cues, from_fallback }) => {
                    tracing::info!(cues, from_fallback, "transcription complete");
                    return Ending::Completed;
                }
                Some(SessionEvent::Failed(e)) => {
                    tracing::error!(error = %e, "transcription failed");
                    return Ending::Failed(e);
                }
                None => return Ending::Interrupted,
            }
        }
    }
}

enum Source {
    Subtitles(Timeline),
    Media {
        path: PathBuf,
        synthesize_voice: bool,
    },
}

#[derive(Debug, Default, Clone, Copy)]
struct PlayWindow {
    from: f64,
    until: Option<f64>,
    volume: Option<f64>,
    mute: bool,
}

#[derive(Debug, Default)]
struct PlayReport {
    cues_shown: usize,
    voice_overs: usize,
    position: f64,
    volume: f64,
    applied_volume: f64,
    muted: bool,
    failure: Option<SessionError>,
}

pub async fn run_play(cmd: PlayCmd, cfg: &Config) -> Result<()> {
    let span = tracing::info_span!(
        "play",
        input = %cmd.input.display(),
        transcribe = cmd.transcribe,
        voice = cmd.voice
    );
    async move {
        let source = if cmd.transcribe {
            if !cmd.input.is_file() {
                return Err(anyhow!("media file not found: {}", cmd.input.display()));
            }
            Source::Media {
                path: cmd.input.clone(),
                synthesize_voice: cmd.voice,
            }
        } else {
            let input = cmd.input.to_string_lossy();
            let input_format = infer_format_from_path_or_dash(&input);
            tracing::info!(?input_format, "input format selected");

            let raw = read_input_to_string(&input)?;
            let timeline = parse_any(&raw, input_format)
                .with_context(|| format!("failed parsing input as {:?}", input_format))?;
            log_timeline_summary(&timeline, cfg);
            Source::Subtitles(timeline)
        };

        let window = PlayWindow {
            from: cmd.from.as_deref().map(parse_position).unwrap_or(0.0),
            until: cmd.until.as_deref().map(parse_position),
            volume: cmd.volume,
            mute: cmd.mute,
        };

        let mut playback = cfg.playback.clone();
        if cmd.voice {
            playback.voice_over = true;
        }

        let report = play(source, window, cfg, &playback).await;
        tracing::info!(
            cues_shown = report.cues_shown,
            voice_overs = report.voice_overs,
            stopped_at = %format_clock(report.position),
            volume = report.volume,
            muted = report.muted,
            "playback finished"
        );
        match report.failure {
            Some(e) => Err(anyhow::Error::new(e).context("transcription failed")),
            None => Ok(()),
        }
    }
    .instrument(span)
    .await
}

/// Drives the player with a simulated clock advancing one tick per
/// `tick_ms` of wall time. With media as the source, cues become playable
/// as the worker streams them in.
async fn play(
    source: Source,
    window: PlayWindow,
    cfg: &Config,
    playback: &PlaybackCfg,
) -> PlayReport {
    let mut player = Player::new(
        WorkerCommand::from_config(&cfg.worker),
        LogSink::default(),
        playback,
    );
    match source {
        Source::Subtitles(timeline) => {
            player.open_subtitles(timeline);
            if !player.has_voice_tracks() {
                player.set_voice_enabled(false);
            }
        }
        Source::Media {
            path,
            synthesize_voice,
        } => player.open_media(&path, SessionOptions { synthesize_voice }),
    }
    if let Some(volume) = window.volume {
        player.set_volume(volume);
    }
    if window.mute {
        player.toggle_mute();
    }

    let step = Duration::from_millis(playback.tick_ms.max(1));
    let mut interval = tokio::time::interval(step);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut report = PlayReport::default();
    let mut position = window.from.max(0.0);
    if position > 0.0 {
        let update = player.seek(position);
        record(&update, position, &mut report);
    }
    // Simulated end of the clip the sink is playing.
    let mut voice_end: Option<(VoiceTicket, f64)> = None;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                tracing::warn!("interrupted");
                break;
            }
            Some(ev) = player.next_event() => match ev {
                PlayerEvent::Session(SessionEvent::Progress(p)) => tracing::info!(
                    stage = p.stage.as_str(),
                    progress = p.progress,
                    "progress"
                ),
                PlayerEvent::Session(SessionEvent::Cue(c)) => tracing::debug!(
                    id = c.id,
                    at = %format_compact(c.start),
                    "cue received"
                ),
                PlayerEvent::Session(SessionEvent::Completed { cues, from_fallback }) => {
                    tracing::info!(cues, from_fallback, "transcription complete");
                }
                PlayerEvent::Session(SessionEvent::Failed(e)) => {
                    tracing::error!(error = %e, "transcription failed, playing what arrived");
                    report.failure = Some(e);
                }
                PlayerEvent::VoiceLoaded { ticket, ok } => {
                    tracing::debug!(ticket = ticket.get(), ok, "voice track fetched");
                    if let Some(length) = player.controller().sink().clip_length(ticket) {
                        voice_end = Some((ticket, position + length.as_secs_f64()));
                    }
                }
            },
            _ = interval.tick() => {
                let update = player.tick(PlaybackClock { position, playing: true });
                record(&update, position, &mut report);

                if let Some((ticket, end)) = voice_end {
                    if position >= end {
                        player.voice_finished(ticket, Ok(()));
                        voice_end = None;
                    }
                }

                let done = match window.until {
                    Some(until) => position >= until,
                    None => {
                        !player.session().is_running()
                            && position >= player.timeline().duration()
                    }
                };
                if done {
                    break;
                }
                position += step.as_secs_f64();
            }
        }
    }

    player.set_playing(false);
    let controller = player.controller();
    tracing::debug!(
        session = ?player.session().state(),
        last_cue = ?controller.active(),
        voice_over = controller.voice_enabled(),
        "player state at stop"
    );
    report.voice_overs = controller.sink().voice_started;
    report.position = position;
    report.volume = controller.user_volume();
    report.applied_volume = controller.applied_volume();
    report.muted = controller.is_muted();
    report
}

fn record(update: &Update, position: f64, report: &mut PlayReport) {
    if !update.changed {
        return;
    }
    match &update.active {
        Some(c) => {
            report.cues_shown += 1;
            tracing::info!(
                id = c.id,
                at = %format_clock(position),
                text = c.display_text(),
                "cue shown"
            );
        }
        None => tracing::debug!(at = %format_clock(position), "cue cleared"),
    }
}

/// Plain seconds or an editor timestamp such as `1:02.500`.
fn parse_position(s: &str) -> f64 {
    match s.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v >= 0.0 => v,
        _ => parse_compact(s),
    }
}

/// Headless media stack: reports what a real player would do.
#[derive(Debug, Default)]
struct LogSink {
    voice_started: usize,
    /// Clip on the voice element and its playing time, when known.
    clip: Option<(VoiceTicket, Option<Duration>)>,
}

impl LogSink {
    fn clip_length(&self, ticket: VoiceTicket) -> Option<Duration> {
        match self.clip {
            Some((t, length)) if t == ticket => length,
            _ => None,
        }
    }
}

impl MediaSink for LogSink {
    fn set_primary_volume(&mut self, volume: f64) {
        tracing::info!(volume, "primary volume");
    }

    fn set_primary_muted(&mut self, muted: bool) {
        tracing::info!(muted, "primary muted");
    }

    fn start_voice(
        &mut self,
        ticket: VoiceTicket,
        audio: Bytes,
        volume: f64,
        muted: bool,
    ) -> Result<(), VoiceError> {
        if audio.is_empty() {
            return Err(VoiceError::Playback("empty voice track".to_string()));
        }
        let length = wav_duration(&audio);
        self.voice_started += 1;
        self.clip = Some((ticket, length));
        tracing::info!(
            ticket = ticket.get(),
            bytes = audio.len(),
            seconds = length.map(|d| d.as_secs_f64()),
            volume,
            muted,
            "voice-over started"
        );
        Ok(())
    }

    fn pause_voice(&mut self) {
        tracing::debug!("voice-over paused");
    }

    fn resume_voice(&mut self) {
        tracing::debug!("voice-over resumed");
    }

    fn stop_voice(&mut self) {
        self.clip = None;
        tracing::debug!("voice-over stopped");
    }

    fn set_voice_volume(&mut self, volume: f64) {
        tracing::debug!(volume, "voice-over volume");
    }

    fn set_voice_muted(&mut self, muted: bool) {
        tracing::debug!(muted, "voice-over muted");
    }
}

/// Playing time of a RIFF WAVE clip: `data` chunk size over the `fmt `
/// chunk's byte rate. `None` for anything else.
fn wav_duration(audio: &[u8]) -> Option<Duration> {
    if audio.len() < 12 || &audio[0..4] != b"RIFF" || &audio[8..12] != b"WAVE" {
        return None;
    }

    let le_u32 = |at: usize| -> Option<u32> {
        Some(u32::from_le_bytes(audio.get(at..at + 4)?.try_into().ok()?))
    };

    let mut byte_rate = None;
    let mut pos = 12usize;
    while pos + 8 <= audio.len() {
        let id = &audio[pos..pos + 4];
        let size = le_u32(pos + 4)? as usize;
        let body = pos + 8;
        match id {
            b"fmt " => byte_rate = le_u32(body + 8),
            b"data" => {
                let rate = byte_rate.filter(|r| *r > 0)?;
                let len = size.min(audio.len() - body);
                return Some(Duration::from_secs_f64(len as f64 / f64::from(rate)));
            }
            _ => {}
        }
        // Chunks are padded to an even length.
        pos = body.checked_add(size)?.checked_add(size % 2)?;
    }
    None
}

pub fn run_convert(cmd: ConvertCmd, cfg: &Config) -> Result<()> {
    let span = tracing::info_span!("convert", input = cmd.input.as_str(), to = ?cmd.to);
    let _g = span.enter();

    let input_format = cmd
        .from
        .unwrap_or_else(|| infer_format_from_path_or_dash(&cmd.input));
    tracing::info!(?input_format, "input format selected");

    let raw = read_input_to_string(&cmd.input)?;
    tracing::info!(bytes = raw.len(), "read input");

    let timeline = parse_any(&raw, input_format)
        .with_context(|| format!("failed parsing input as {:?}", input_format))?;

    log_timeline_summary(&timeline, cfg);

    let rendered = render_any(&timeline, cmd.to, cfg)?;

    if cmd.stdout {
        print!("{rendered}");
        tracing::info!(mode = "stdout", "wrote output");
        return Ok(());
    }

    let out_path = derive_output_path(&cmd)?;
    write_output(&out_path, &rendered, cmd.overwrite)?;
    tracing::info!(path = %out_path.display(), "wrote output file");

    Ok(())
}

fn infer_format_from_path_or_dash(input: &str) -> Format {
    if input == "-" {
        return Format::Srt;
    }
    let p = Path::new(input);
    match p
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_lowercase()
        .as_str()
    {
        "json" => Format::Json,
        _ => Format::Srt,
    }
}

fn read_input_to_string(input: &str) -> Result<String> {
    if input == "-" {
        use std::io::Read;
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("failed reading stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(input).with_context(|| format!("failed reading input file: {input}"))
    }
}

fn parse_any(raw: &str, fmt: Format) -> Result<Timeline> {
    let trimmed = raw.trim_start();
    if fmt == Format::Srt && (trimmed.starts_with('{') || trimmed.starts_with('[')) {
        tracing::info!("input looks like JSON; attempting JSON parse");
        if let Ok(t) = formats::json::parse_json(raw) {
            return Ok(t);
        }
    }

    match fmt {
        Format::Srt => {
            let t = formats::srt::parse_srt(raw);
            if t.is_empty() && !trimmed.is_empty() {
                return Err(anyhow!("no valid SRT blocks found"));
            }
            Ok(t)
        }
        Format::Json => formats::json::parse_json(raw),
    }
}

fn log_timeline_summary(t: &Timeline, cfg: &Config) {
    tracing::info!(
        cues = t.len(),
        duration = %format_clock(t.duration()),
        voice_tracks = t.has_voice_tracks(),
        "timeline summary"
    );

    if tracing::enabled!(tracing::Level::DEBUG) {
        let n = cfg.logging.debug_cue_samples.min(t.len());
        for (i, c) in t.all().iter().take(n).enumerate() {
            tracing::debug!(
                idx = i,
                id = c.id,
                start = %format_srt_timestamp(c.start),
                duration = c.duration(),
                chars = c.text.chars().count(),
                translated = c.translated_text.is_some(),
                "cue sample"
            );
        }
    }
}

fn render_any(t: &Timeline, fmt: Format, cfg: &Config) -> Result<String> {
    match fmt {
        Format::Srt => Ok(formats::srt::write_srt(t, cfg)),
        Format::Json => formats::json::write_json(t, cfg.json.wrapped),
    }
}

fn derive_output_path(cmd: &ConvertCmd) -> Result<PathBuf> {
    if let Some(o) = &cmd.output {
        return Ok(PathBuf::from(o));
    }

    if cmd.input == "-" {
        return Err(anyhow!(
            "output path required when input is stdin and --stdout is not set"
        ));
    }

    let p = Path::new(&cmd.input);
    let stem = p
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| anyhow!("bad input filename"))?;

    let parent = p.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!("{stem}.{}", cmd.to.extension())))
}

fn write_output(path: &Path, data: &str, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        return Err(anyhow!(
            "refusing to overwrite existing file (pass --overwrite): {}",
            path.display()
        ));
    }
    fs::write(path, data).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}
