//! TTML / DFXP.

use std::sync::LazyLock;

use regex::Regex;

use crate::ass::Cue;
use crate::error::SubtitleError;
use crate::html::decode_entities;

static P_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?p\b([^>]*)>(.*?)</(?:\w+:)?p\s*>").expect("Invalid p regex")
});
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([\w:]+)\s*=\s*"([^"]*)""#).expect("Invalid attribute regex")
});
static SPAN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<(/?)(?:\w+:)?(\w+)([^>]*?)(/?)>").expect("Invalid span regex")
});

struct Timing {
    frame_rate: f64,
    tick_rate: f64,
}

pub(super) fn parse(content: &str) -> Result<Vec<Cue>, SubtitleError> {
    if !content.contains("<tt") {
        return Err(SubtitleError::Parse("missing <tt> root element".into()));
    }
    let root_attrs = content
        .find("<tt")
        .and_then(|i| content[i..].find('>').map(|j| &content[i..i + j]))
        .unwrap_or("");
    let frame_rate = attr(root_attrs, "frameRate")
        .and_then(|v| v.parse::<f64>().ok())
        .unwrap_or(30.0);
    let timing = Timing {
        frame_rate,
        tick_rate: attr(root_attrs, "tickRate")
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(frame_rate),
    };

    let mut cues = Vec::new();
    for caps in P_RE.captures_iter(content) {
        let attrs = &caps[1];
        let Some(start) = attr(attrs, "begin").and_then(|v| parse_time(&v, &timing)) else {
            continue;
        };
        let end = match attr(attrs, "end").and_then(|v| parse_time(&v, &timing)) {
            Some(end) => end,
            None => match attr(attrs, "dur").and_then(|v| parse_time(&v, &timing)) {
                Some(dur) => start + dur,
                None => continue,
            },
        };
        let text = inner_to_ass(&caps[2]);
        if text.is_empty() {
            continue;
        }
        cues.push(Cue {
            start_ms: start,
            end_ms: end.max(start),
            text,
        });
    }
    Ok(cues)
}

/// Attribute value by local name (namespace prefixes ignored).
fn attr(attrs: &str, name: &str) -> Option<String> {
    ATTR_RE.captures_iter(attrs).find_map(|c| {
        let key = &c[1];
        let local = key.rsplit(':').next().unwrap_or(key);
        (local == name).then(|| c[2].to_string())
    })
}

/// Clock time (`HH:MM:SS.fff`, `HH:MM:SS:FF`) or offset time (`12.5s`, `500ms`, `3f`, `10t`).
fn parse_time(value: &str, timing: &Timing) -> Option<u64> {
    let value = value.trim();
    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        return match parts.len() {
            3 => super::parse_clock(value),
            4 => {
                let base = super::parse_clock(&parts[..3].join(":"))?;
                let frames: f64 = parts[3].parse().ok()?;
                Some(base + (frames * 1000.0 / timing.frame_rate).round() as u64)
            }
            _ => None,
        };
    }
    let split = value.find(|c: char| c.is_ascii_alphabetic())?;
    let (number, unit) = value.split_at(split);
    let number: f64 = number.parse().ok()?;
    let ms = match unit {
        "h" => number * 3_600_000.0,
        "m" => number * 60_000.0,
        "s" => number * 1000.0,
        "ms" => number,
        "f" => number * 1000.0 / timing.frame_rate,
        "t" => number * 1000.0 / timing.tick_rate,
        _ => return None,
    };
    Some(ms.round() as u64)
}

fn inner_to_ass(inner: &str) -> String {
    let mut open: Vec<String> = Vec::new();
    let with_tags = SPAN_RE.replace_all(inner, |c: &regex::Captures| {
        let closing = !c[1].is_empty();
        let self_closing = !c[4].is_empty();
        match (&c[2], closing) {
            ("br", _) => "\\N".to_string(),
            ("span", false) if !self_closing => {
                let attrs = &c[3];
                let mut tags = String::new();
                let mut resets = String::new();
                if attr(attrs, "fontStyle").is_some_and(|v| v == "italic") {
                    tags.push_str("\\i1");
                    resets.push_str("\\i0");
                }
                if attr(attrs, "fontWeight").is_some_and(|v| v == "bold") {
                    tags.push_str("\\b1");
                    resets.push_str("\\b0");
                }
                if attr(attrs, "textDecoration").is_some_and(|v| v.contains("underline")) {
                    tags.push_str("\\u1");
                    resets.push_str("\\u0");
                }
                open.push(resets);
                if tags.is_empty() {
                    String::new()
                } else {
                    format!("{{{tags}}}")
                }
            }
            ("span", true) => match open.pop() {
                Some(reset) if !reset.is_empty() => format!("{{{reset}}}"),
                _ => String::new(),
            },
            _ => String::new(),
        }
    });
    let collapsed = with_tags.split_whitespace().collect::<Vec<_>>().join(" ");
    decode_entities(&collapsed.replace(" \\N", "\\N").replace("\\N ", "\\N"))
}
