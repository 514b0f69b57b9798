use anyhow::{Result, anyhow};
use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use crate::{
    formats::time::{ms_to_seconds, parse_time_to_ms},
    model::{Cue, CueId},
    timeline::Timeline,
};

/// Export shape. Field names follow the worker's `SUBTITLE:` records so an
/// export can be fed back in as a `RESULT:`-style document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JsonCue<'a> {
    pub id: CueId,
    pub start: f64,
    pub end: f64,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translated_text: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_file: Option<String>,
}

#[derive(Debug, Serialize)]
struct Wrapped<'a> {
    subtitles: Vec<JsonCue<'a>>,
}

pub fn write_json(t: &Timeline, wrapped: bool) -> Result<String> {
    let cues: Vec<JsonCue<'_>> = t
        .all()
        .iter()
        .map(|c| JsonCue {
            id: c.id,
            start: c.start,
            end: c.end,
            text: c.text.as_str(),
            translated_text: c.translated_text.as_deref(),
            audio_file: c
                .voice_track
                .as_ref()
                .map(|p| p.to_string_lossy().into_owned()),
        })
        .collect();

    if wrapped {
        Ok(serde_json::to_string_pretty(&Wrapped { subtitles: cues })?)
    } else {
        Ok(serde_json::to_string_pretty(&cues)?)
    }
}

/// Accepts `{"subtitles": [...]}`, `{"cues": [...]}` or a bare array.
pub fn parse_json(input: &str) -> Result<Timeline> {
    let v: Value = serde_json::from_str(input)?;

    if let Some(subs) = v.get("subtitles") {
        return parse_cues_array(subs);
    }

    if let Some(cues) = v.get("cues") {
        return parse_cues_array(cues);
    }

    if v.is_array() {
        return parse_cues_array(&v);
    }

    Err(anyhow!("unrecognized JSON subtitle shape"))
}

fn parse_cues_array(v: &Value) -> Result<Timeline> {
    let arr = v
        .as_array()
        .ok_or_else(|| anyhow!("cues must be an array"))?;
    let mut cues: Vec<Cue> = Vec::with_capacity(arr.len());

    // Records without an id are numbered past every explicit one so they
    // cannot replace an explicit record in the timeline.
    let mut next_id: CueId = arr
        .iter()
        .filter_map(|item| item.get("id").and_then(Value::as_i64))
        .max()
        .unwrap_or(0)
        .saturating_add(1);

    for (i, item) in arr.iter().enumerate() {
        let obj = item
            .as_object()
            .ok_or_else(|| anyhow!("cue {i} must be an object"))?;

        let start = decode_time(obj.get("start").ok_or_else(|| anyhow!("cue {i}: missing start"))?)?;
        let end = decode_time(obj.get("end").ok_or_else(|| anyhow!("cue {i}: missing end"))?)?;
        let id = match obj.get("id").and_then(Value::as_i64) {
            Some(id) => id,
            None => {
                let id = next_id;
                next_id = next_id.saturating_add(1);
                id
            }
        };
        let text = obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let mut cue = Cue::new(id, start, end, text);
        cue.translated_text = obj
            .get("translatedText")
            .and_then(Value::as_str)
            .map(str::to_string);
        cue.voice_track = obj
            .get("audioFile")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        cues.push(cue);
    }

    Ok(Timeline::from_cues(cues))
}

/// Numbers are seconds; strings go through the lenient timestamp reader.
fn decode_time(v: &Value) -> Result<f64> {
    match v {
        Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("bad numeric time")),
        Value::String(s) => {
            if let Ok(f) = s.trim().parse::<f64>() {
                return Ok(f);
            }
            Ok(ms_to_seconds(parse_time_to_ms(s)?))
        }
        _ => Err(anyhow!("unsupported time type")),
    }
}
