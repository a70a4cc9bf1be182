//! MicroDVD `{start}{end}text` frame-based subtitles.

use std::sync::LazyLock;

use regex::Regex;

use crate::ass::Cue;
use crate::html::to_ass_text;

const DEFAULT_FPS: f64 = 23.976;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{(\d+)\}\{(\d*)\}(.*)$").expect("Invalid MicroDVD regex")
});
static STYLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[yY]:([biu]+)\}").expect("Invalid MicroDVD style regex"));

/// Plain `.txt`/`.sub` files that are not MicroDVD are tried as SRT.
pub(super) fn parse(content: &str) -> Vec<Cue> {
    let mut fps = DEFAULT_FPS;
    let mut cues = Vec::new();
    for line in content.lines() {
        let Some(caps) = LINE_RE.captures(line.trim()) else {
            continue;
        };
        let start: u64 = caps[1].parse().unwrap_or(0);
        let end: Option<u64> = caps[2].parse().ok();
        let text = caps[3].trim();

        // `{1}{1}23.976` declares the frame rate.
        if start == 1 && end == Some(1) {
            if let Ok(declared) = text.parse::<f64>() {
                if declared > 0.0 {
                    fps = declared;
                }
                continue;
            }
        }

        let start_ms = frames_to_ms(start, fps);
        let end_ms = end.map_or(start_ms + 2000, |end| frames_to_ms(end, fps));
        cues.push(Cue {
            start_ms,
            end_ms: end_ms.max(start_ms),
            text: text_to_ass(text),
        });
    }

    if cues.is_empty() {
        return super::srt::parse(content);
    }
    cues
}

fn frames_to_ms(frames: u64, fps: f64) -> u64 {
    (frames as f64 * 1000.0 / fps).round() as u64
}

fn text_to_ass(text: &str) -> String {
    let styled = STYLE_RE.replace_all(text, |caps: &regex::Captures| {
        caps[1]
            .chars()
            .map(|c| format!("{{\\{c}1}}"))
            .collect::<String>()
    });
    to_ass_text(&styled.replace('|', "\n"))
}
