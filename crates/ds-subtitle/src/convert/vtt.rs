use super::parse_clock;
use crate::ass::Cue;
use crate::html::to_ass_text;

/// WebVTT: header, then cue blocks with optional identifiers and settings.
pub(super) fn parse(content: &str) -> Vec<Cue> {
    let mut cues = Vec::new();
    for block in content.split("\n\n") {
        let lines: Vec<&str> = block
            .lines()
            .skip_while(|l| l.trim().is_empty())
            .collect();
        let Some(first) = lines.first() else {
            continue;
        };
        let head = first.trim_start_matches('\u{feff}');
        if head.starts_with("WEBVTT")
            || head.starts_with("NOTE")
            || head.starts_with("STYLE")
            || head.starts_with("REGION")
        {
            continue;
        }
        let Some(timing_idx) = lines.iter().position(|l| l.contains("-->")) else {
            continue;
        };
        let Some((start, end)) = parse_timing(lines[timing_idx]) else {
            continue;
        };
        let text = to_ass_text(&lines[timing_idx + 1..].join("\n"));
        if text.is_empty() {
            continue;
        }
        let text = match alignment(lines[timing_idx]) {
            Some(tag) => format!("{tag}{text}"),
            None => text,
        };
        cues.push(Cue {
            start_ms: start,
            end_ms: end.max(start),
            text,
        });
    }
    cues
}

fn parse_timing(line: &str) -> Option<(u64, u64)> {
    let (start, rest) = line.split_once("-->")?;
    let end = rest.split_whitespace().next()?;
    Some((parse_clock(start)?, parse_clock(end)?))
}

/// Top-of-frame cues (`line:0` … `line:10%`) map to `\an8`.
fn alignment(timing: &str) -> Option<&'static str> {
    let setting = timing
        .split_whitespace()
        .find_map(|s| s.strip_prefix("line:"))?;
    let value = setting.split(',').next()?;
    let top = match value.strip_suffix('%') {
        Some(pct) => pct.parse::<f32>().ok()? < 20.0,
        None => value.parse::<i32>().ok().is_some_and(|l| (0..=2).contains(&l)),
    };
    top.then_some("{\\an8}")
}
