//! Host-side driver tying one ingestion session (or one static subtitle
//! file) to the synchronization controller.
//!
//! Everything here runs on a single task: the caller interleaves clock
//! ticks and user actions with [`Player::next_event`], which is cancel safe
//! and therefore fits in a `tokio::select!` loop.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::PlaybackCfg,
    error::VoiceError,
    playback::{
        MediaSink, PlaybackClock, SyncController, Update, VoicePhase, VoiceRequest, VoiceTicket,
    },
    session::{IngestionSession, SessionEvent, SessionOptions},
    timeline::Timeline,
    worker::WorkerCommand,
};

#[derive(Debug)]
pub enum PlayerEvent {
    Session(SessionEvent),
    /// A voice track fetch resolved and was handed to the controller.
    VoiceLoaded { ticket: VoiceTicket, ok: bool },
}

#[derive(Debug)]
struct VoiceFetched {
    ticket: VoiceTicket,
    result: Result<Bytes, VoiceError>,
}

#[derive(Debug)]
enum Subtitles {
    None,
    Streaming,
    Static(Timeline),
}

#[derive(Debug)]
pub struct Player<S> {
    session: IngestionSession,
    subtitles: Subtitles,
    empty: Timeline,
    controller: SyncController<S>,
    fetch_tx: mpsc::UnboundedSender<VoiceFetched>,
    fetch_rx: mpsc::UnboundedReceiver<VoiceFetched>,
    /// In-flight voice track fetch.
    fetch: Option<(VoiceTicket, CancellationToken)>,
}

impl<S: MediaSink> Player<S> {
    pub fn new(command: WorkerCommand, sink: S, cfg: &PlaybackCfg) -> Self {
        let (fetch_tx, fetch_rx) = mpsc::unbounded_channel();
        Self {
            session: IngestionSession::new(command),
            subtitles: Subtitles::None,
            empty: Timeline::new(),
            controller: SyncController::new(sink, cfg),
            fetch_tx,
            fetch_rx,
            fetch: None,
        }
    }

    /// Loads new media and starts transcribing it. Anything from the
    /// previous media is discarded first.
    pub fn open_media(&mut self, media: &Path, options: SessionOptions) {
        self.reset();
        self.session.start(media, options);
        self.subtitles = Subtitles::Streaming;
    }

    /// Shows a prepared subtitle file instead of running the worker.
    pub fn open_subtitles(&mut self, timeline: Timeline) {
        self.reset();
        tracing::info!(cues = timeline.len(), "static subtitles loaded");
        self.subtitles = Subtitles::Static(timeline);
    }

    pub fn reset(&mut self) {
        self.session.reset();
        self.cancel_fetch();
        self.controller.reset();
        self.subtitles = Subtitles::None;
    }

    pub fn timeline(&self) -> &Timeline {
        current(&self.subtitles, &self.session, &self.empty)
    }

    pub fn session(&self) -> &IngestionSession {
        &self.session
    }

    pub fn controller(&self) -> &SyncController<S> {
        &self.controller
    }

    pub fn has_voice_tracks(&self) -> bool {
        self.timeline().has_voice_tracks()
    }

    /// Clock tick from the primary element.
    pub fn tick(&mut self, clock: PlaybackClock) -> Update {
        let timeline = current(&self.subtitles, &self.session, &self.empty);
        let update = self.controller.update(clock, timeline);
        self.drop_abandoned_fetch();
        self.dispatch(&update);
        update
    }

    pub fn seek(&mut self, position: f64) -> Update {
        self.cancel_fetch();
        let timeline = current(&self.subtitles, &self.session, &self.empty);
        let update = self.controller.seek(position, timeline);
        self.dispatch(&update);
        update
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.controller.set_playing(playing);
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.controller.set_volume(volume);
    }

    pub fn toggle_mute(&mut self) {
        self.controller.toggle_mute();
    }

    /// Turning voice-over on with no synthesized tracks does nothing.
    pub fn set_voice_enabled(&mut self, enabled: bool) {
        if enabled && !self.has_voice_tracks() {
            tracing::debug!("no voice tracks available");
            return;
        }
        if !enabled {
            self.cancel_fetch();
        }
        self.controller.set_voice_enabled(enabled);
    }

    /// Reported by the host when the secondary element ends or errors.
    pub fn voice_finished(&mut self, ticket: VoiceTicket, outcome: Result<(), VoiceError>) {
        self.controller.voice_finished(ticket, outcome);
    }

    /// Waits for the next session event or voice fetch completion.
    pub async fn next_event(&mut self) -> Option<PlayerEvent> {
        loop {
            let running = self.session.is_running();
            let fetching = self.fetch.is_some();
            tokio::select! {
                Some(fetched) = self.fetch_rx.recv(), if fetching => {
                    if self.fetch.as_ref().map(|f| f.0) != Some(fetched.ticket) {
                        continue;
                    }
                    self.fetch = None;
                    if self.loading_ticket() != Some(fetched.ticket) {
                        continue;
                    }
                    let ok = fetched.result.is_ok();
                    self.controller.voice_loaded(fetched.ticket, fetched.result);
                    return Some(PlayerEvent::VoiceLoaded { ticket: fetched.ticket, ok });
                }
                ev = self.session.next_event(), if running => {
                    match ev {
                        Some(ev) => return Some(PlayerEvent::Session(ev)),
                        None => continue,
                    }
                }
                else => return None,
            }
        }
    }

    fn dispatch(&mut self, update: &Update) {
        if let Some(req) = &update.voice_request {
            self.spawn_fetch(req.clone());
        }
    }

    fn spawn_fetch(&mut self, req: VoiceRequest) {
        self.cancel_fetch();
        let token = CancellationToken::new();
        self.fetch = Some((req.ticket, token.clone()));

        tracing::debug!(cue_id = req.cue_id, ticket = req.ticket.get(), "fetching voice track");
        let tx = self.fetch_tx.clone();
        tokio::spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                r = fetch_voice(req.path) => r,
            };
            let _ = tx.send(VoiceFetched {
                ticket: req.ticket,
                result,
            });
        });
    }

    fn loading_ticket(&self) -> Option<VoiceTicket> {
        match self.controller.phase() {
            VoicePhase::Loading { ticket, .. } => Some(ticket),
            _ => None,
        }
    }

    /// The controller left `Loading` for the tracked fetch, e.g. the viewer
    /// moved on to a cue without a voice track.
    fn drop_abandoned_fetch(&mut self) {
        let tracked = self.fetch.as_ref().map(|f| f.0);
        if tracked.is_some() && tracked != self.loading_ticket() {
            self.cancel_fetch();
        }
    }

    fn cancel_fetch(&mut self) {
        if let Some((_, token)) = self.fetch.take() {
            token.cancel();
        }
    }
}

fn current<'a>(
    subtitles: &'a Subtitles,
    session: &'a IngestionSession,
    empty: &'a Timeline,
) -> &'a Timeline {
    match subtitles {
        Subtitles::None => empty,
        Subtitles::Streaming => session.timeline(),
        Subtitles::Static(t) => t,
    }
}

/// Reads a voice track into memory for the host media stack.
pub async fn fetch_voice(path: PathBuf) -> Result<Bytes, VoiceError> {
    match tokio::fs::read(&path).await {
        Ok(data) => Ok(Bytes::from(data)),
        Err(source) => Err(VoiceError::Fetch { path, source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::Cue,
        playback::tests::RecordingSink,
        session::SessionState,
    };

    fn at(position: f64) -> PlaybackClock {
        PlaybackClock {
            position,
            playing: true,
        }
    }

    fn player() -> Player<RecordingSink> {
        Player::new(
            WorkerCommand::new("sh"),
            RecordingSink::default(),
            &PlaybackCfg::default(),
        )
    }

    #[tokio::test]
    async fn static_subtitles_drive_voice_over() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("tts_1.wav");
        std::fs::write(&clip, b"RIFF0000WAVE").unwrap();

        let mut cue = Cue::new(1, 1.0, 3.0, "hola");
        cue.voice_track = Some(clip);

        let mut p = player();
        p.open_subtitles(Timeline::from_cues([cue]));
        assert!(p.has_voice_tracks());

        let u = p.tick(at(1.5));
        assert!(u.voice_request.is_some());

        match p.next_event().await {
            Some(PlayerEvent::VoiceLoaded { ok: true, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(p.controller().phase(), VoicePhase::Ducking { cue_id: 1, .. }));
        assert_eq!(p.controller().sink().primary_volume, 0.15);

        p.seek(0.0);
        assert_eq!(p.controller().sink().primary_volume, 1.0);
    }

    #[tokio::test]
    async fn leaving_a_loading_cue_abandons_its_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("tts_1.wav");
        std::fs::write(&clip, b"RIFF0000WAVE").unwrap();

        let mut voiced = Cue::new(1, 0.0, 2.0, "hola");
        voiced.voice_track = Some(clip);
        let silent = Cue::new(2, 2.2, 4.0, "adios");

        let mut p = player();
        p.open_subtitles(Timeline::from_cues([voiced, silent]));
        assert!(p.tick(at(0.5)).voice_request.is_some());
        assert!(p.fetch.is_some());

        let u = p.tick(at(2.5));
        assert_eq!(u.active.map(|c| c.id), Some(2));
        assert!(p.fetch.is_none());
        assert_eq!(p.controller().phase(), VoicePhase::Idle);

        assert!(p.next_event().await.is_none());
        assert_eq!(p.controller().sink().primary_volume, 1.0);
        assert!(p.controller().sink().voice_playing.is_none());
    }

    #[tokio::test]
    async fn missing_voice_track_is_not_fatal() {
        let mut cue = Cue::new(1, 0.0, 2.0, "hola");
        cue.voice_track = Some(PathBuf::from("/nonexistent/tts_1.wav"));

        let mut p = player();
        p.open_subtitles(Timeline::from_cues([cue]));
        p.tick(at(0.5));

        match p.next_event().await {
            Some(PlayerEvent::VoiceLoaded { ok: false, .. }) => {}
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(p.controller().phase(), VoicePhase::Idle);
        assert_eq!(p.controller().sink().primary_volume, 1.0);
    }

    #[tokio::test]
    async fn streaming_cues_become_active_as_they_arrive() {
        let script = r#"
            echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"a"}'
            echo 'SUBTITLE:{"id":2,"start":1.5,"end":2.5,"text":"b"}'
        "#;
        let mut p = Player::new(
            WorkerCommand::new("sh").arg("-c").arg(script).arg("worker"),
            RecordingSink::default(),
            &PlaybackCfg::default(),
        );
        p.open_media(Path::new("movie.mp4"), SessionOptions::default());
        assert!(p.tick(at(2.0)).active.is_none());

        let mut seen = 0;
        while let Some(ev) = p.next_event().await {
            if let PlayerEvent::Session(SessionEvent::Cue(_)) = ev {
                seen += 1;
                if seen == 2 {
                    assert_eq!(p.tick(at(2.0)).active.map(|c| c.id), Some(2));
                }
            }
        }
        assert_eq!(seen, 2);
        assert_eq!(p.timeline().len(), 2);
    }

    #[tokio::test]
    async fn voice_enable_requires_tracks() {
        let mut p = player();
        p.open_subtitles(Timeline::from_cues([Cue::new(1, 0.0, 1.0, "a")]));
        p.set_voice_enabled(false);
        assert!(!p.controller().voice_enabled());
        p.set_voice_enabled(true);
        assert!(!p.controller().voice_enabled());
    }

    #[tokio::test]
    async fn user_controls_pass_through_while_ducked() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("tts_1.wav");
        std::fs::write(&clip, b"RIFF0000WAVE").unwrap();
        let mut cue = Cue::new(1, 0.0, 4.0, "hola");
        cue.voice_track = Some(clip);

        let mut p = player();
        p.open_subtitles(Timeline::from_cues([cue]));
        p.tick(at(0.5));
        assert!(matches!(
            p.next_event().await,
            Some(PlayerEvent::VoiceLoaded { ok: true, .. })
        ));

        p.set_volume(0.5);
        assert_eq!(p.controller().sink().primary_volume, 0.5 * 0.15);
        p.toggle_mute();
        assert!(p.controller().is_muted());
        p.set_playing(false);

        let VoicePhase::Ducking { ticket, .. } = p.controller().phase() else {
            panic!("expected ducking");
        };
        p.voice_finished(ticket, Ok(()));
        assert_eq!(p.controller().phase(), VoicePhase::Idle);
        assert_eq!(p.controller().sink().primary_volume, 0.5);
        assert_eq!(p.session().state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn reset_clears_everything() {
        let mut p = player();
        p.open_subtitles(Timeline::from_cues([Cue::new(1, 0.0, 1.0, "a")]));
        p.tick(at(0.5));
        p.reset();
        assert!(p.timeline().is_empty());
        assert!(p.controller().active().is_none());
        assert!(p.next_event().await.is_none());
    }
}
