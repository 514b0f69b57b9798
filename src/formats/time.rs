use anyhow::{Result, anyhow};

/// Absorbs float error such as `1.001 * 1000.0 == 1000.9999999999999`
/// without turning truncation into rounding.
const MS_EPSILON: f64 = 1e-6;

/// Seconds to whole milliseconds, truncating. Negative and non-finite input
/// maps to zero.
pub fn seconds_to_ms(seconds: f64) -> i64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * 1000.0 + MS_EPSILON).floor() as i64
}

pub fn ms_to_seconds(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

pub fn hms_to_ms(h: i64, m: i64, s: i64, milli: i64) -> i64 {
    ((h * 60 + m) * 60 + s) * 1000 + milli
}

/// `HH:MM:SS,mmm`
pub fn format_srt_timestamp(seconds: f64) -> String {
    format_srt_timestamp_ms(seconds_to_ms(seconds))
}

pub fn format_srt_timestamp_ms(ms_in: i64) -> String {
    let ms = ms_in.max(0);

    let total_seconds = ms / 1000;
    let milli = ms % 1000;

    let sec = total_seconds % 60;
    let total_minutes = total_seconds / 60;
    let min = total_minutes % 60;
    let hour = total_minutes / 60;

    format!("{hour:02}:{min:02}:{sec:02},{milli:03}")
}

/// `M:SS` or `H:MM:SS`, hours only when non-zero.
pub fn format_clock(seconds: f64) -> String {
    let total = seconds_to_ms(seconds) / 1000;
    let (hour, min, sec) = (total / 3600, (total % 3600) / 60, total % 60);
    if hour > 0 {
        format!("{hour}:{min:02}:{sec:02}")
    } else {
        format!("{min}:{sec:02}")
    }
}

/// Editor timestamp: `M:SS.mmm` or `H:MM:SS.mmm`.
pub fn format_compact(seconds: f64) -> String {
    let ms = seconds_to_ms(seconds);
    let milli = ms % 1000;
    let total = ms / 1000;
    let (hour, min, sec) = (total / 3600, (total % 3600) / 60, total % 60);
    if hour > 0 {
        format!("{hour}:{min:02}:{sec:02}.{milli:03}")
    } else {
        format!("{min}:{sec:02}.{milli:03}")
    }
}

/// Inverse of [`format_compact`]. Accepts `M:SS[.fff]` or `H:MM:SS[.fff]`.
/// Anything else, including half-typed input, reads as `0.0`.
pub fn parse_compact(input: &str) -> f64 {
    let parts: Vec<&str> = input.trim().split(':').map(str::trim).collect();

    let (hours, minutes, seconds) = match parts.as_slice() {
        [m, s] => ("0", *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return 0.0,
    };

    let (Ok(h), Ok(m), Ok(s)) = (
        hours.parse::<u32>(),
        minutes.parse::<u32>(),
        seconds.parse::<f64>(),
    ) else {
        return 0.0;
    };
    if !s.is_finite() || s < 0.0 {
        return 0.0;
    }

    f64::from(h) * 3600.0 + f64::from(m) * 60.0 + s
}

/// Lenient timestamp reader for imported cue lists: plain milliseconds,
/// fractional seconds, or `HH:MM:SS[,.]mmm`. Returns milliseconds.
pub fn parse_time_to_ms(s: &str) -> Result<i64> {
    let t = s.trim();

    if let Ok(v) = t.parse::<i64>() {
        return Ok(v);
    }

    if let Ok(v) = t.parse::<f64>() {
        return Ok(seconds_to_ms(v));
    }

    let (hms, milli) = if let Some((a, b)) = t.split_once(',') {
        (a, Some(b))
    } else if let Some((a, b)) = t.split_once('.') {
        (a, Some(b))
    } else {
        (t, None)
    };

    let parts: Vec<&str> = hms.split(':').collect();
    let (h, m, s2) = match parts.as_slice() {
        [h, m, s] => (*h, *m, *s),
        [m, s] => ("0", *m, *s),
        _ => return Err(anyhow!("unrecognized timestamp: '{t}'")),
    };

    let h: i64 = h.parse().map_err(|_| anyhow!("bad hours: '{t}'"))?;
    let m: i64 = m.parse().map_err(|_| anyhow!("bad minutes: '{t}'"))?;
    let s2: i64 = s2.parse().map_err(|_| anyhow!("bad seconds: '{t}'"))?;

    let mut ms = hms_to_ms(h, m, s2, 0);

    if let Some(frac) = milli {
        let mut frac_s = frac.trim().to_string();
        frac_s.truncate(3);
        while frac_s.len() < 3 {
            frac_s.push('0');
        }
        let milli: i64 = frac_s
            .parse()
            .map_err(|_| anyhow!("bad milliseconds: '{t}'"))?;
        ms += milli;
    }

    Ok(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt_timestamp_truncates() {
        assert_eq!(format_srt_timestamp(0.0), "00:00:00,000");
        assert_eq!(format_srt_timestamp(1.9999), "00:00:01,999");
        assert_eq!(format_srt_timestamp(1.001), "00:00:01,001");
        assert_eq!(format_srt_timestamp(3723.5), "01:02:03,500");
        assert_eq!(format_srt_timestamp(-4.0), "00:00:00,000");
    }

    #[test]
    fn clock_hides_zero_hours() {
        assert_eq!(format_clock(65.9), "1:05");
        assert_eq!(format_clock(3661.0), "1:01:01");
    }

    #[test]
    fn compact_format_and_parse() {
        assert_eq!(format_compact(75.25), "1:15.250");
        assert_eq!(format_compact(3600.5), "1:00:00.500");
        assert_eq!(format_compact(f64::NAN), "0:00.000");

        assert_eq!(parse_compact("1:15.250"), 75.25);
        assert_eq!(parse_compact("1:00:00.5"), 3600.5);
        assert_eq!(parse_compact("0:07"), 7.0);
    }

    #[test]
    fn compact_parse_never_fails() {
        assert_eq!(parse_compact(""), 0.0);
        assert_eq!(parse_compact("1:"), 0.0);
        assert_eq!(parse_compact("12"), 0.0);
        assert_eq!(parse_compact("a:b"), 0.0);
        assert_eq!(parse_compact("1:2:3:4"), 0.0);
        assert_eq!(parse_compact("1:-5"), 0.0);
    }

    #[test]
    fn lenient_time_parse() {
        assert_eq!(parse_time_to_ms("1500").unwrap(), 1500);
        assert_eq!(parse_time_to_ms("1.5").unwrap(), 1500);
        assert_eq!(parse_time_to_ms("00:01:02,003").unwrap(), 62_003);
        assert_eq!(parse_time_to_ms("01:02.5").unwrap(), 62_500);
        assert!(parse_time_to_ms("nope").is_err());
    }
}
