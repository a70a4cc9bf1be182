//! ASS/SSA packet fields, timestamps and script generation.

use std::collections::BTreeMap;
use std::fmt::Write;

/// Field names of a Matroska ASS block, in order, before the text.
pub const ASS_FIELDS: [&str; 8] = [
    "readorder",
    "layer",
    "style",
    "name",
    "marginl",
    "marginr",
    "marginv",
    "effect",
];

pub const DEFAULT_STYLE: &str = "Default";

/// Split a Matroska ASS/SSA block into its text and dialogue fields.
///
/// The body is `ReadOrder,Layer,Style,Name,MarginL,MarginR,MarginV,Effect,Text`;
/// the text keeps any commas it contains. SSA blocks carry `Marked` instead
/// of `Layer`, which is not reported.
pub fn parse_block(body: &str, ssa: bool) -> (String, BTreeMap<String, String>) {
    let parts: Vec<&str> = body.splitn(ASS_FIELDS.len() + 1, ',').collect();
    let (fields, text) = match parts.split_last() {
        Some((text, fields)) if !fields.is_empty() => (fields, *text),
        _ => return (body.to_string(), BTreeMap::new()),
    };

    let mut extra = BTreeMap::new();
    for (key, value) in ASS_FIELDS.iter().zip(fields) {
        if ssa && *key == "layer" {
            continue;
        }
        extra.insert((*key).to_string(), value.trim().to_string());
    }
    (text.to_string(), extra)
}

/// Dialogue fields used for text converted from other formats.
pub fn default_fields() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("readorder".to_string(), String::new()),
        ("layer".to_string(), "0".to_string()),
        ("style".to_string(), DEFAULT_STYLE.to_string()),
        ("name".to_string(), String::new()),
        ("marginl".to_string(), "0".to_string()),
        ("marginr".to_string(), "0".to_string()),
        ("marginv".to_string(), "0".to_string()),
        ("effect".to_string(), String::new()),
    ])
}

/// Format milliseconds as `HH:MM:SS.cc`.
pub fn format_timestamp(ms: u64) -> String {
    let cs = ms / 10;
    let hours = cs / 360_000;
    let minutes = (cs / 6_000) % 60;
    let seconds = (cs / 100) % 60;
    let centis = cs % 100;
    format!("{hours:02}:{minutes:02}:{seconds:02}.{centis:02}")
}

/// One timed cue, text already in ASS markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cue {
    pub start_ms: u64,
    pub end_ms: u64,
    pub text: String,
}

/// Minimal ASS script with a single `Default` style.
#[derive(Debug, Clone)]
pub struct AssScript {
    pub title: String,
    pub play_res_x: u32,
    pub play_res_y: u32,
    pub cues: Vec<Cue>,
}

impl AssScript {
    pub fn new(title: impl Into<String>, cues: Vec<Cue>) -> Self {
        Self {
            title: title.into(),
            play_res_x: 640,
            play_res_y: 360,
            cues,
        }
    }

    /// The `[Script Info]`, `[V4+ Styles]` and `[Events]` format header.
    pub fn header(&self) -> String {
        let mut out = String::new();
        out.push_str("[Script Info]\n");
        let _ = writeln!(out, "Title: {}", self.title);
        out.push_str("ScriptType: v4.00+\n");
        out.push_str("WrapStyle: 0\n");
        out.push_str("ScaledBorderAndShadow: yes\n");
        let _ = writeln!(out, "PlayResX: {}", self.play_res_x);
        let _ = writeln!(out, "PlayResY: {}", self.play_res_y);
        out.push('\n');
        out.push_str("[V4+ Styles]\n");
        out.push_str(
            "Format: Name, Fontname, Fontsize, PrimaryColour, SecondaryColour, OutlineColour, \
             BackColour, Bold, Italic, Underline, StrikeOut, ScaleX, ScaleY, Spacing, Angle, \
             BorderStyle, Outline, Shadow, Alignment, MarginL, MarginR, MarginV, Encoding\n",
        );
        let _ = writeln!(
            out,
            "Style: {DEFAULT_STYLE},Arial,22,&H00FFFFFF,&H000000FF,&H00000000,&H80000000,\
             0,0,0,0,100,100,0,0,1,1.5,0.5,2,20,20,18,1"
        );
        out.push('\n');
        out.push_str("[Events]\n");
        out.push_str(
            "Format: Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text\n",
        );
        out
    }

    /// Full script text.
    pub fn render(&self) -> String {
        let mut out = self.header();
        for cue in &self.cues {
            let _ = writeln!(
                out,
                "Dialogue: 0,{},{},{DEFAULT_STYLE},,0,0,0,,{}",
                format_timestamp(cue.start_ms),
                format_timestamp(cue.end_ms),
                cue.text
            );
        }
        out
    }
}
