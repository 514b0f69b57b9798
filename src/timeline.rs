//! Time-ordered cue store queried by playback position.

use crate::model::{Cue, CueId};

/// What [`Timeline::append`] did with a cue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    Inserted,
    Replaced,
    Rejected,
}

/// Cues sorted ascending by `start`. Cues sharing a `start` keep their
/// arrival order. Ids are unique.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Timeline {
    cues: Vec<Cue>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bulk load. Invalid cues are dropped and later duplicates of an id
    /// replace earlier ones, exactly as repeated [`append`](Self::append).
    pub fn from_cues(cues: impl IntoIterator<Item = Cue>) -> Self {
        let mut t = Self::new();
        for cue in cues {
            t.append(cue);
        }
        t
    }

    pub fn append(&mut self, cue: Cue) -> Appended {
        if !cue.is_valid() {
            tracing::debug!(
                id = cue.id,
                start = cue.start,
                end = cue.end,
                "rejected cue with invalid timing"
            );
            return Appended::Rejected;
        }

        if let Some(ix) = self.position(cue.id) {
            let ordered = (ix == 0 || self.cues[ix - 1].start <= cue.start)
                && self.cues.get(ix + 1).is_none_or(|next| cue.start <= next.start);
            if ordered {
                self.cues[ix] = cue;
            } else {
                self.cues.remove(ix);
                self.insert_sorted(cue);
            }
            return Appended::Replaced;
        }

        self.insert_sorted(cue);
        Appended::Inserted
    }

    fn insert_sorted(&mut self, cue: Cue) {
        let at = self.cues.partition_point(|c| c.start <= cue.start);
        self.cues.insert(at, cue);
    }

    fn position(&self, id: CueId) -> Option<usize> {
        self.cues.iter().position(|c| c.id == id)
    }

    /// The cue whose `[start, end]` contains `t`. With overlapping cues the
    /// one with the lowest `start` wins.
    pub fn active_at(&self, t: f64) -> Option<&Cue> {
        self.cues
            .iter()
            .take_while(|c| c.start <= t)
            .find(|c| c.contains(t))
    }

    pub fn all(&self) -> &[Cue] {
        &self.cues
    }

    pub fn get(&self, id: CueId) -> Option<&Cue> {
        self.cues.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.cues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cues.is_empty()
    }

    pub fn clear(&mut self) {
        self.cues.clear();
    }

    /// End of the last-ending cue.
    pub fn duration(&self) -> f64 {
        self.cues.iter().map(|c| c.end).fold(0.0, f64::max)
    }

    pub fn has_voice_tracks(&self) -> bool {
        self.cues.iter().any(|c| c.voice_track.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn starts(t: &Timeline) -> Vec<f64> {
        t.all().iter().map(|c| c.start).collect()
    }

    fn assert_sorted(t: &Timeline) {
        assert!(t.all().windows(2).all(|w| w[0].start <= w[1].start));
    }

    #[test]
    fn stays_sorted_for_any_arrival_order() {
        let mut t = Timeline::new();
        for (id, start) in [(1, 5.0), (2, 1.0), (3, 3.0), (4, 1.0), (5, 9.0), (6, 0.5)] {
            t.append(Cue::new(id, start, start + 1.0, "x"));
            assert_sorted(&t);
        }
        assert_eq!(starts(&t), vec![0.5, 1.0, 1.0, 3.0, 5.0, 9.0]);
        // equal starts keep arrival order
        assert_eq!(t.all()[1].id, 2);
        assert_eq!(t.all()[2].id, 4);
    }

    #[test]
    fn duplicate_id_replaces_in_place() {
        let mut t = Timeline::new();
        t.append(Cue::new(1, 0.0, 1.0, "a"));
        t.append(Cue::new(2, 2.0, 3.0, "b"));
        t.append(Cue::new(3, 4.0, 5.0, "c"));

        assert_eq!(t.append(Cue::new(2, 2.0, 3.5, "B")), Appended::Replaced);
        assert_eq!(t.len(), 3);
        assert_eq!(t.all()[1].text, "B");

        // a correction that moves the cue re-sorts it
        assert_eq!(t.append(Cue::new(1, 6.0, 7.0, "A")), Appended::Replaced);
        assert_eq!(t.len(), 3);
        assert_sorted(&t);
        assert_eq!(t.all()[2].id, 1);
    }

    #[test]
    fn invalid_cue_has_no_effect() {
        let mut t = Timeline::new();
        t.append(Cue::new(1, 0.0, 1.0, "a"));
        let before = t.clone();

        assert_eq!(t.append(Cue::new(2, 3.0, 3.0, "zero")), Appended::Rejected);
        assert_eq!(t.append(Cue::new(1, 3.0, 2.0, "backwards")), Appended::Rejected);
        assert_eq!(t, before);
    }

    #[test]
    fn active_at_is_inclusive() {
        let t = Timeline::from_cues([Cue::new(1, 1.0, 2.0, "a"), Cue::new(2, 4.0, 5.0, "b")]);
        assert_eq!(t.active_at(1.0).map(|c| c.id), Some(1));
        assert_eq!(t.active_at(2.0).map(|c| c.id), Some(1));
        assert_eq!(t.active_at(4.5).map(|c| c.id), Some(2));
        assert!(t.active_at(0.999).is_none());
        assert!(t.active_at(3.0).is_none());
        assert!(t.active_at(5.001).is_none());
        assert!(t.active_at(f64::NAN).is_none());
    }

    #[test]
    fn overlap_prefers_lowest_start() {
        let t = Timeline::from_cues([
            Cue::new(1, 2.0, 3.0, "short, later"),
            Cue::new(2, 0.0, 10.0, "long, earlier"),
        ]);
        assert_eq!(t.active_at(2.5).map(|c| c.id), Some(2));
    }

    #[test]
    fn active_at_sees_every_prior_append() {
        let mut t = Timeline::new();
        assert!(t.active_at(1.5).is_none());
        t.append(Cue::new(1, 1.0, 2.0, "a"));
        assert_eq!(t.active_at(1.5).map(|c| c.id), Some(1));
    }

    #[test]
    fn voice_track_presence() {
        let mut cue = Cue::new(1, 0.0, 1.0, "a");
        let mut t = Timeline::from_cues([cue.clone()]);
        assert!(!t.has_voice_tracks());
        cue.voice_track = Some("/tmp/v.wav".into());
        t.append(cue);
        assert!(t.has_voice_tracks());
        assert_eq!(t.duration(), 1.0);
    }
}
