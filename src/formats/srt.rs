use regex::Regex;
use std::{collections::HashSet, sync::LazyLock};

use crate::{
    config::Config,
    formats::time::{format_srt_timestamp, hms_to_ms, ms_to_seconds, seconds_to_ms},
    model::Cue,
    timeline::Timeline,
};

static BLOCK_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n\s*\n").expect("block separator regex"));

static TIMECODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{2}):(\d{2}):(\d{2}),(\d{3})\s*-->\s*(\d{2}):(\d{2}):(\d{2}),(\d{3})")
        .expect("timecode regex")
});

/// Parses SRT text. Blocks without an integer index, without a valid
/// timecode line, or without text are skipped; the rest still load.
pub fn parse_srt(input: &str) -> Timeline {
    let normalized = input.replace("\r\n", "\n");
    let mut cues: Vec<Cue> = Vec::new();
    let mut skipped = 0usize;

    for block in BLOCK_SEP.split(normalized.trim()) {
        let lines: Vec<&str> = block.trim().lines().collect();
        let Some(cue) = parse_block(&lines) else {
            skipped += 1;
            continue;
        };
        cues.push(cue);
    }

    // Numbering in the wild is unreliable; keep every block by moving
    // duplicate indices past the largest one.
    let mut next_free = cues.iter().map(|c| c.id).max().and_then(|m| m.checked_add(1));
    let mut taken: HashSet<i64> = HashSet::new();
    cues.retain_mut(|cue| {
        if taken.insert(cue.id) {
            return true;
        }
        let Some(id) = next_free else {
            skipped += 1;
            return false;
        };
        cue.id = id;
        taken.insert(id);
        next_free = id.checked_add(1);
        true
    });

    let timeline = Timeline::from_cues(cues);
    tracing::debug!(cues = timeline.len(), skipped, "parsed SRT");
    timeline
}

fn parse_block(lines: &[&str]) -> Option<Cue> {
    if lines.len() < 3 {
        return None;
    }

    let index: i64 = lines[0].trim().parse().ok()?;
    let caps = TIMECODE.captures(lines[1].trim())?;
    let field = |i: usize| -> Option<i64> { caps.get(i)?.as_str().parse().ok() };

    let start = hms_to_ms(field(1)?, field(2)?, field(3)?, field(4)?);
    let end = hms_to_ms(field(5)?, field(6)?, field(7)?, field(8)?);
    let text = lines[2..].join("\n").trim().to_string();

    Some(Cue::new(index, ms_to_seconds(start), ms_to_seconds(end), text))
}

/// Serializes cues sorted by start, numbered from 1.
pub fn generate_srt(cues: &[Cue]) -> String {
    let mut sorted: Vec<&Cue> = cues.iter().collect();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start));

    let blocks: Vec<String> = sorted
        .iter()
        .enumerate()
        .map(|(i, cue)| {
            format!(
                "{}\n{} --> {}\n{}\n",
                i + 1,
                format_srt_timestamp(cue.start),
                format_srt_timestamp(cue.end),
                cue.text
            )
        })
        .collect();

    blocks.join("\n")
}

/// Export entry point: applies the configured offset and text choice.
pub fn write_srt(t: &Timeline, cfg: &Config) -> String {
    let offset_ms = cfg.srt.timestamp_offset_ms;
    let shift = |secs: f64| ms_to_seconds(seconds_to_ms(secs).saturating_add(offset_ms));

    let cues: Vec<Cue> = t
        .all()
        .iter()
        .map(|c| {
            let text = if cfg.srt.prefer_translation {
                c.display_text()
            } else {
                c.text.as_str()
            };
            Cue::new(c.id, shift(c.start), shift(c.end), text)
        })
        .collect();

    generate_srt(&cues)
}
