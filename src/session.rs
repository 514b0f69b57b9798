//! One end-to-end run of the worker: streams progress and cues into a
//! [`Timeline`] and reports how the run ended.
//!
//! Lifecycle is `Idle -> Running -> {Completed, Failed}`. A cancelled run
//! ends in `Cancelled` without a terminal event; whatever was accumulated
//! up to that point stays readable.

use std::path::Path;

use crate::{
    error::SessionError,
    model::{Cue, CueId, ProgressState, Stage, WireCue},
    protocol::Message,
    timeline::{Appended, Timeline},
    worker::{self, WorkerCommand, WorkerEvent, WorkerHandle},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionOptions {
    /// Ask the worker to synthesize voice-over clips.
    pub synthesize_voice: bool,
}

#[derive(Debug)]
pub enum SessionEvent {
    Progress(ProgressState),
    /// A cue that was accepted into the timeline.
    Cue(Cue),
    Completed {
        cues: usize,
        /// The timeline came from the worker's `RESULT:` batch.
        from_fallback: bool,
    },
    /// Cues streamed before the failure stay in the timeline.
    Failed(SessionError),
}

#[derive(Debug)]
pub struct IngestionSession {
    command: WorkerCommand,
    state: SessionState,
    timeline: Timeline,
    progress: ProgressState,
    worker: Option<WorkerHandle>,
    streamed: usize,
    fallback: Option<Vec<WireCue>>,
    next_id: CueId,
}

impl IngestionSession {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            state: SessionState::Idle,
            timeline: Timeline::new(),
            progress: ProgressState::default(),
            worker: None,
            streamed: 0,
            fallback: None,
            next_id: 1,
        }
    }

    /// Launches the worker on `source`, cancelling any run still in flight.
    pub fn start(&mut self, source: &Path, options: SessionOptions) {
        if self.state == SessionState::Running {
            tracing::info!("replacing running session");
        }
        self.discard_worker();
        self.clear();

        tracing::info!(
            program = self.command.program(),
            source = %source.display(),
            synthesize_voice = options.synthesize_voice,
            "session starting"
        );
        self.state = SessionState::Running;
        self.progress = ProgressState::starting();
        self.worker = Some(worker::spawn(
            &self.command,
            source,
            options.synthesize_voice,
        ));
    }

    /// Next event in worker order. `None` once the session is not running.
    ///
    /// Cancel safe: a dropped call loses no worker output.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            let worker = self.worker.as_mut()?;
            let event = match worker.recv().await {
                Some(ev) => ev,
                None => {
                    self.worker = None;
                    return Some(self.finish(Err(SessionError::Aborted)));
                }
            };

            match event {
                WorkerEvent::Message(msg) => {
                    if let Some(ev) = self.apply(msg) {
                        return Some(ev);
                    }
                }
                WorkerEvent::Exited(result) => {
                    self.worker = None;
                    return Some(self.finish(result));
                }
            }
        }
    }

    /// Stops the worker. Nothing further is applied or emitted.
    pub fn cancel(&mut self) {
        if self.state != SessionState::Running {
            return;
        }
        self.discard_worker();
        self.state = SessionState::Cancelled;
        tracing::info!(cues = self.timeline.len(), "session cancelled");
    }

    /// Cancels and forgets everything, back to `Idle`.
    pub fn reset(&mut self) {
        self.discard_worker();
        self.clear();
        self.state = SessionState::Idle;
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SessionState::Running
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn progress(&self) -> &ProgressState {
        &self.progress
    }

    fn discard_worker(&mut self) {
        if let Some(mut w) = self.worker.take() {
            w.cancel();
        }
    }

    fn clear(&mut self) {
        self.timeline.clear();
        self.progress = ProgressState::default();
        self.streamed = 0;
        self.fallback = None;
        self.next_id = 1;
    }

    fn apply(&mut self, msg: Message) -> Option<SessionEvent> {
        match msg {
            Message::Progress(update) => {
                self.progress.advance(update);
                tracing::debug!(
                    stage = self.progress.stage.as_str(),
                    progress = self.progress.progress,
                    "worker progress"
                );
                Some(SessionEvent::Progress(self.progress.clone()))
            }
            Message::Cue(wire) => {
                self.streamed += 1;
                self.accept(wire).map(SessionEvent::Cue)
            }
            Message::Result(batch) => {
                tracing::debug!(cues = batch.len(), "worker result batch");
                self.fallback = Some(batch);
                None
            }
            Message::Unrecognized => None,
        }
    }

    fn accept(&mut self, wire: WireCue) -> Option<Cue> {
        let id = wire.id.unwrap_or(self.next_id);
        self.next_id = self.next_id.max(id.saturating_add(1));

        let cue = wire.resolve(id, self.timeline.get(id));
        match self.timeline.append(cue.clone()) {
            Appended::Rejected => None,
            Appended::Inserted | Appended::Replaced => Some(cue),
        }
    }

    fn finish(&mut self, result: Result<(), SessionError>) -> SessionEvent {
        match result {
            Ok(()) => {
                let from_fallback = self.streamed == 0 && self.fallback.is_some();
                if self.streamed == 0 {
                    for wire in self.fallback.take().unwrap_or_default() {
                        self.accept(wire);
                    }
                }
                self.fallback = None;
                self.state = SessionState::Completed;
                let message = std::mem::take(&mut self.progress.message);
                self.progress.advance(ProgressState {
                    stage: Stage::Done,
                    progress: 100.0,
                    message,
                });
                tracing::info!(
                    cues = self.timeline.len(),
                    from_fallback,
                    "session completed"
                );
                SessionEvent::Completed {
                    cues: self.timeline.len(),
                    from_fallback,
                }
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.progress = ProgressState {
                    stage: Stage::Error,
                    progress: 0.0,
                    message: e.to_string(),
                };
                tracing::warn!(cues = self.timeline.len(), error = %e, "session failed");
                SessionEvent::Failed(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> IngestionSession {
        IngestionSession::new(WorkerCommand::new("sh").arg("-c").arg(script).arg("worker"))
    }

    async fn run_to_end(s: &mut IngestionSession) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Some(ev) = s.next_event().await {
            out.push(ev);
        }
        out
    }

    fn ids(t: &Timeline) -> Vec<CueId> {
        t.all().iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn streamed_cues_complete_in_order() {
        let mut s = sh(r#"
            echo 'PROGRESS:{"stage":"transcribing","progress":10,"message":"go"}'
            echo 'SUBTITLE:{"id":1,"start":0.0,"end":1.0,"text":"a","translatedText":"A"}'
            echo 'SUBTITLE:{"id":2,"start":1.5,"end":2.0,"text":"b","translatedText":"B"}'
            echo 'SUBTITLE:{"id":3,"start":2.5,"end":3.0,"text":"c","translatedText":"C"}'
        "#);
        assert_eq!(s.state(), SessionState::Idle);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        assert!(s.is_running());

        let events = run_to_end(&mut s).await;
        assert!(matches!(events[0], SessionEvent::Progress(ref p) if p.progress == 10.0));
        let streamed: Vec<CueId> = events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Cue(c) => Some(c.id),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, vec![1, 2, 3]);
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Completed { cues: 3, from_fallback: false })
        ));
        assert_eq!(s.state(), SessionState::Completed);
        assert_eq!(ids(s.timeline()), vec![1, 2, 3]);
        assert_eq!(s.progress().stage, Stage::Done);
    }

    #[tokio::test]
    async fn result_batch_used_when_nothing_streamed() {
        let mut s = sh(r#"
            echo 'DEBUG: model loaded'
            printf 'RESULT:{"subtitles":[{"id":1,"start":0,"end":1,"text":"a"},{"id":2,"start":2,"end":3,"text":"b"}]}'
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        let events = run_to_end(&mut s).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Completed { cues: 2, from_fallback: true })
        ));
        assert_eq!(ids(s.timeline()), vec![1, 2]);
    }

    #[tokio::test]
    async fn result_batch_ignored_after_streaming() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"a"}'
            echo 'RESULT:{"subtitles":[{"id":1,"start":0,"end":1,"text":"a"},{"id":2,"start":2,"end":3,"text":"b"}]}'
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        run_to_end(&mut s).await;
        assert_eq!(ids(s.timeline()), vec![1]);
    }

    #[tokio::test]
    async fn no_speech_is_an_empty_success() {
        let mut s = sh("echo 'PROGRESS:{\"stage\":\"done\",\"progress\":100,\"message\":\"0\"}'");
        s.start(Path::new("silence.mp4"), SessionOptions::default());
        let events = run_to_end(&mut s).await;
        assert!(matches!(
            events.last(),
            Some(SessionEvent::Completed { cues: 0, from_fallback: false })
        ));
        assert!(s.timeline().is_empty());
    }

    #[tokio::test]
    async fn malformed_lines_do_not_stop_ingestion() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"id":1,"start":0,'
            echo 'SUBTITLE:{"id":2,"start":5,"end":4,"text":"backwards"}'
            echo 'garbage'
            echo 'SUBTITLE:{"id":3,"start":1,"end":2,"text":"ok"}'
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        let events = run_to_end(&mut s).await;
        let cues = events
            .iter()
            .filter(|e| matches!(e, SessionEvent::Cue(_)))
            .count();
        assert_eq!(cues, 1);
        assert_eq!(ids(s.timeline()), vec![3]);
        assert_eq!(s.state(), SessionState::Completed);
    }

    #[tokio::test]
    async fn partial_stream_then_crash_keeps_cues() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"a"}'
            echo 'CUDA out of memory' >&2
            exit 1
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        let events = run_to_end(&mut s).await;
        match events.last() {
            Some(SessionEvent::Failed(e)) => assert!(e.to_string().contains("CUDA out of memory")),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.progress().stage, Stage::Error);
        assert_eq!(ids(s.timeline()), vec![1]);
    }

    #[tokio::test]
    async fn launch_failure_fails_the_session() {
        let mut s = IngestionSession::new(WorkerCommand::new("/nonexistent/worker"));
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        let events = run_to_end(&mut s).await;
        assert!(matches!(
            events.as_slice(),
            [SessionEvent::Failed(SessionError::Launch { .. })]
        ));
    }

    #[tokio::test]
    async fn cancel_emits_nothing_further() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"a"}'
            sleep 30
            echo 'SUBTITLE:{"id":2,"start":2,"end":3,"text":"b"}'
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        assert!(matches!(s.next_event().await, Some(SessionEvent::Cue(_))));

        s.cancel();
        assert_eq!(s.state(), SessionState::Cancelled);
        assert!(s.next_event().await.is_none());
        assert_eq!(ids(s.timeline()), vec![1]);
    }

    #[tokio::test]
    async fn restart_discards_previous_run() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"first run"}'
            sleep 30
        "#);
        s.start(Path::new("a.mp4"), SessionOptions::default());
        assert!(matches!(s.next_event().await, Some(SessionEvent::Cue(_))));

        s.command = WorkerCommand::new("sh")
            .arg("-c")
            .arg(r#"echo 'SUBTITLE:{"id":9,"start":4,"end":5,"text":"second run"}'"#)
            .arg("worker");
        s.start(Path::new("b.mp4"), SessionOptions::default());
        assert_eq!(s.progress().stage, Stage::Extracting);
        assert!(s.timeline().is_empty());

        run_to_end(&mut s).await;
        assert_eq!(ids(s.timeline()), vec![9]);
    }

    #[tokio::test]
    async fn corrections_and_missing_ids() {
        let mut s = sh(r#"
            echo 'SUBTITLE:{"start":0,"end":1,"text":"no id"}'
            echo 'SUBTITLE:{"id":5,"start":2,"end":3,"text":"five"}'
            echo 'SUBTITLE:{"id":5,"translatedText":"FIVE","audioFile":"/tmp/tts_5.wav"}'
            echo 'SUBTITLE:{"start":4,"end":5,"text":"after five"}'
        "#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        run_to_end(&mut s).await;

        let t = s.timeline();
        assert_eq!(ids(t), vec![1, 5, 6]);
        let five = t.get(5).unwrap();
        assert_eq!(five.start, 2.0);
        assert_eq!(five.display_text(), "FIVE");
        assert!(five.voice_track.is_some());
    }

    #[tokio::test]
    async fn reset_returns_to_idle() {
        let mut s = sh(r#"echo 'SUBTITLE:{"id":1,"start":0,"end":1,"text":"a"}'"#);
        s.start(Path::new("movie.mp4"), SessionOptions::default());
        run_to_end(&mut s).await;
        s.reset();
        assert_eq!(s.state(), SessionState::Idle);
        assert!(s.timeline().is_empty());
        assert_eq!(s.progress().stage, Stage::Idle);
    }
}
