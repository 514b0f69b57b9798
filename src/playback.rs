//! Maps the playback clock onto the active cue and runs the voice-over
//! ducking state machine.
//!
//! The controller does no I/O. It asks the host to fetch a voice track by
//! returning a [`VoiceRequest`], and the host reports back through
//! [`SyncController::voice_loaded`] and [`SyncController::voice_finished`].
//! Every report carries the request's [`VoiceTicket`]; reports for a ticket
//! that is no longer current are dropped, which is what makes a late fetch
//! for a cue the viewer already left harmless.

use std::path::PathBuf;

use bytes::Bytes;

use crate::{
    config::PlaybackCfg,
    error::VoiceError,
    model::{Cue, CueId},
    timeline::Timeline,
};

/// Host media stack: the primary element and one secondary voice element.
pub trait MediaSink {
    fn set_primary_volume(&mut self, volume: f64);
    fn set_primary_muted(&mut self, muted: bool);

    /// Starts playing `audio` on the secondary element, replacing anything
    /// loaded there.
    fn start_voice(
        &mut self,
        ticket: VoiceTicket,
        audio: Bytes,
        volume: f64,
        muted: bool,
    ) -> Result<(), VoiceError>;
    fn pause_voice(&mut self);
    fn resume_voice(&mut self);
    fn stop_voice(&mut self);
    fn set_voice_volume(&mut self, volume: f64);
    fn set_voice_muted(&mut self, muted: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VoiceTicket(u64);

impl VoiceTicket {
    pub fn get(self) -> u64 {
        self.0
    }
}

/// Read-only snapshot of the primary element.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackClock {
    pub position: f64,
    pub playing: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VoiceRequest {
    pub ticket: VoiceTicket,
    pub cue_id: CueId,
    pub path: PathBuf,
}

/// Voice-over sub-state. Restoring is immediate and always lands in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoicePhase {
    Idle,
    Loading { cue_id: CueId, ticket: VoiceTicket },
    Ducking { cue_id: CueId, ticket: VoiceTicket },
}

impl VoicePhase {
    fn cue_id(self) -> Option<CueId> {
        match self {
            VoicePhase::Idle => None,
            VoicePhase::Loading { cue_id, .. } | VoicePhase::Ducking { cue_id, .. } => Some(cue_id),
        }
    }

    fn ticket(self) -> Option<VoiceTicket> {
        match self {
            VoicePhase::Idle => None,
            VoicePhase::Loading { ticket, .. } | VoicePhase::Ducking { ticket, .. } => Some(ticket),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    pub active: Option<Cue>,
    /// The active cue id differs from the previous update.
    pub changed: bool,
    pub voice_request: Option<VoiceRequest>,
}

#[derive(Debug)]
pub struct SyncController<S> {
    sink: S,
    ducking_factor: f64,
    /// Last volume the user chose. Never derived from the applied volume.
    user_volume: f64,
    muted: bool,
    voice_enabled: bool,
    playing: bool,
    active: Option<CueId>,
    /// Cue whose voice-over was already triggered while still active.
    voiced: Option<CueId>,
    phase: VoicePhase,
    last_ticket: u64,
}

impl<S: MediaSink> SyncController<S> {
    pub fn new(mut sink: S, cfg: &PlaybackCfg) -> Self {
        let user_volume = clamp_volume(cfg.volume);
        sink.set_primary_volume(user_volume);
        Self {
            sink,
            ducking_factor: clamp_volume(cfg.ducking_factor),
            user_volume,
            muted: false,
            voice_enabled: cfg.voice_over,
            playing: false,
            active: None,
            voiced: None,
            phase: VoicePhase::Idle,
            last_ticket: 0,
        }
    }

    /// Re-evaluates the active cue for the current clock.
    pub fn update(&mut self, clock: PlaybackClock, timeline: &Timeline) -> Update {
        self.set_playing(clock.playing);

        let cue = timeline.active_at(clock.position);
        let id = cue.map(|c| c.id);
        let changed = id != self.active;

        if changed {
            tracing::debug!(from = ?self.active, to = ?id, position = clock.position, "active cue changed");
            self.active = id;
            self.voiced = None;
            if self.phase.cue_id().is_some_and(|busy| Some(busy) != id) {
                self.restore("active cue changed");
            }
        }

        let voice_request = match cue {
            Some(c) if self.phase == VoicePhase::Idle => self.begin_voice(c),
            _ => None,
        };

        Update {
            active: cue.cloned(),
            changed,
            voice_request,
        }
    }

    /// User seek: any voice-over is dropped before the new position is
    /// evaluated, even when it lands inside the same cue.
    pub fn seek(&mut self, position: f64, timeline: &Timeline) -> Update {
        self.restore("seek");
        self.active = None;
        self.voiced = None;
        let clock = PlaybackClock {
            position,
            playing: self.playing,
        };
        self.update(clock, timeline)
    }

    /// Pausing the primary pauses the voice-over with it.
    pub fn set_playing(&mut self, playing: bool) {
        if playing == self.playing {
            return;
        }
        self.playing = playing;
        if let VoicePhase::Ducking { .. } = self.phase {
            if playing {
                self.sink.resume_voice();
            } else {
                self.sink.pause_voice();
            }
        }
    }

    pub fn set_volume(&mut self, volume: f64) {
        self.user_volume = clamp_volume(volume);
        if let VoicePhase::Ducking { .. } = self.phase {
            self.sink.set_voice_volume(self.user_volume);
        }
        let applied = self.applied_volume();
        self.sink.set_primary_volume(applied);
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        self.sink.set_primary_muted(muted);
        self.sink.set_voice_muted(muted);
    }

    pub fn toggle_mute(&mut self) {
        self.set_muted(!self.muted);
    }

    pub fn set_voice_enabled(&mut self, enabled: bool) {
        if enabled == self.voice_enabled {
            return;
        }
        self.voice_enabled = enabled;
        if !enabled {
            self.restore("voice-over disabled");
            self.voiced = None;
        }
        tracing::info!(enabled, "voice-over toggled");
    }

    /// Fetch result for `ticket`. Stale tickets are ignored.
    pub fn voice_loaded(&mut self, ticket: VoiceTicket, audio: Result<Bytes, VoiceError>) {
        let VoicePhase::Loading { cue_id, ticket: current } = self.phase else {
            tracing::debug!(ticket = ticket.get(), "discarding voice track, nothing loading");
            return;
        };
        if current != ticket {
            tracing::debug!(ticket = ticket.get(), "discarding stale voice track");
            return;
        }

        let audio = match audio {
            Ok(a) => a,
            Err(e) => {
                tracing::warn!(cue_id, error = %e, "voice track unavailable");
                self.restore("fetch failed");
                return;
            }
        };

        if let Err(e) = self
            .sink
            .start_voice(ticket, audio, self.user_volume, self.muted)
        {
            tracing::warn!(cue_id, error = %e, "voice playback failed to start");
            self.restore("playback failed");
            return;
        }

        self.phase = VoicePhase::Ducking { cue_id, ticket };
        if !self.playing {
            self.sink.pause_voice();
        }
        let ducked = self.applied_volume();
        self.sink.set_primary_volume(ducked);
        tracing::debug!(cue_id, volume = ducked, "ducking primary audio");
    }

    /// Voice playback ended or errored. Either way the primary comes back.
    pub fn voice_finished(&mut self, ticket: VoiceTicket, outcome: Result<(), VoiceError>) {
        if self.phase.ticket() != Some(ticket) {
            return;
        }
        if let Err(e) = outcome {
            tracing::warn!(error = %e, "voice playback error");
        }
        self.restore("voice ended");
    }

    /// New media or reset: drop everything cue related.
    pub fn reset(&mut self) {
        self.restore("reset");
        self.active = None;
        self.voiced = None;
    }

    pub fn phase(&self) -> VoicePhase {
        self.phase
    }

    pub fn active(&self) -> Option<CueId> {
        self.active
    }

    pub fn user_volume(&self) -> f64 {
        self.user_volume
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn voice_enabled(&self) -> bool {
        self.voice_enabled
    }

    /// Volume currently applied to the primary element.
    pub fn applied_volume(&self) -> f64 {
        match self.phase {
            VoicePhase::Ducking { .. } => self.user_volume * self.ducking_factor,
            _ => self.user_volume,
        }
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[cfg(test)]
    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    fn begin_voice(&mut self, cue: &Cue) -> Option<VoiceRequest> {
        if !self.voice_enabled || self.voiced == Some(cue.id) {
            return None;
        }
        let path = cue.voice_track.clone()?;

        self.last_ticket += 1;
        let ticket = VoiceTicket(self.last_ticket);
        self.phase = VoicePhase::Loading {
            cue_id: cue.id,
            ticket,
        };
        self.voiced = Some(cue.id);
        tracing::debug!(cue_id = cue.id, ticket = ticket.get(), "loading voice track");

        Some(VoiceRequest {
            ticket,
            cue_id: cue.id,
            path,
        })
    }

    fn restore(&mut self, reason: &str) {
        match self.phase {
            VoicePhase::Idle => return,
            VoicePhase::Loading { cue_id, .. } => {
                tracing::debug!(cue_id, reason, "abandoning voice track load");
            }
            VoicePhase::Ducking { cue_id, .. } => {
                self.sink.stop_voice();
                tracing::debug!(cue_id, reason, volume = self.user_volume, "restoring primary audio");
            }
        }
        self.phase = VoicePhase::Idle;
        self.sink.set_primary_volume(self.user_volume);
    }
}

fn clamp_volume(v: f64) -> f64 {
    if v.is_finite() { v.clamp(0.0, 1.0) } else { 1.0 }
}
